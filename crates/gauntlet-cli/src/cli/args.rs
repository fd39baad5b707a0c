use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use gauntlet_core::config::{Collection, DEFAULT_CONFIG_FILE};

#[derive(Parser)]
#[command(
    name = "gauntlet",
    version,
    about = "Benchmark and red-team LLM endpoints with recipes and cookbooks"
)]
pub struct Cli {
    /// Path to the environment config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the directory layout and config file
    Init(InitArgs),
    /// List record ids in a collection
    List(ListArgs),
    /// Print one catalog record
    Show(ShowArgs),
    /// Execute recipes or cookbooks against a runner's endpoints
    Run(RunArgs),
    /// Print the result document of a finished run
    ShowResult(ShowResultArgs),
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Root directory of the new installation.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Seed a small offline demo catalog (echo endpoint, no network).
    #[arg(long)]
    pub demo: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    pub collection: CollectionArg,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub collection: CollectionArg,
    pub id: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Runner record naming the endpoints and database.
    pub runner: String,

    /// Recipe ids to run (comma separated).
    #[arg(long, value_delimiter = ',', conflicts_with = "cookbooks")]
    pub recipes: Vec<String>,

    /// Cookbook ids to run (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub cookbooks: Vec<String>,

    /// Percentage of each dataset to sample.
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub percentage: u8,

    /// Seed for prompt sampling.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// System prompt handed to every connector.
    #[arg(long, default_value = "")]
    pub system_prompt: String,

    /// Skip prediction cache lookups (rows are still written).
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Args, Debug)]
pub struct ShowResultArgs {
    pub runner: String,

    /// Print the whole document instead of the summary.
    #[arg(long)]
    pub full: bool,
}

/// Collections addressable from the command line. The database directory is
/// managed by the engine and stays out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollectionArg {
    Endpoints,
    Recipes,
    Cookbooks,
    Datasets,
    PromptTemplates,
    Runners,
    Results,
}

impl From<CollectionArg> for Collection {
    fn from(arg: CollectionArg) -> Self {
        match arg {
            CollectionArg::Endpoints => Collection::Endpoints,
            CollectionArg::Recipes => Collection::Recipes,
            CollectionArg::Cookbooks => Collection::Cookbooks,
            CollectionArg::Datasets => Collection::Datasets,
            CollectionArg::PromptTemplates => Collection::PromptTemplates,
            CollectionArg::Runners => Collection::Runners,
            CollectionArg::Results => Collection::Results,
        }
    }
}
