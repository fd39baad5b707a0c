use clap::Parser;

use gauntlet_core::errors::CoreError;

mod cli;
mod logging;

use cli::args::Cli;
use cli::commands::dispatch;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();
    let _guard = logging::init(&cli);
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            let code = e.downcast_ref::<CoreError>().map_or(1, CoreError::exit_code);
            eprintln!("error: {e:#}");
            code
        }
    };
    std::process::exit(code);
}
