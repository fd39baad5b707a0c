use super::args::{Cli, Command};

pub mod init;
pub mod list;
pub mod run;
pub mod show;
pub mod show_result;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let Cli { config, cmd } = cli;
    match cmd {
        Command::Init(args) => init::run(&config, args),
        Command::List(args) => list::run(&config, args),
        Command::Show(args) => show::run(&config, args),
        Command::Run(args) => run::run(&config, args).await,
        Command::ShowResult(args) => show_result::run(&config, args),
    }
}
