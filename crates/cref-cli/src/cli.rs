use clap::{Args, Parser, Subcommand};
use cref_core::model::SourceType;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Climate model diagnostics orchestrator.",
    long_about = "Discovers diagnostic providers, ingests climate dataset metadata, derives \
                  execution groups and runs diagnostics with results persisted per execution."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Directory containing config.toml")]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity level (-v for debug, -vv for trace)")]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Manage the dataset catalog")]
    Datasets(DatasetsArgs),

    #[command(about = "List installed diagnostic providers")]
    Providers(ProvidersArgs),

    #[command(about = "Run pending execution groups across all providers")]
    Solve(SolveArgs),

    #[command(about = "Inspect execution groups and their run history")]
    Executions(ExecutionsArgs),
}

#[derive(Args)]
pub struct DatasetsArgs {
    #[command(subcommand)]
    pub command: DatasetsCommands,
}

#[derive(Subcommand)]
pub enum DatasetsCommands {
    #[command(about = "Materialize a named dataset bundle into a directory")]
    FetchData(FetchDataArgs),

    #[command(about = "Ingest dataset metadata into the catalog")]
    Ingest(IngestArgs),

    #[command(about = "List ingested datasets")]
    List(ListDatasetsArgs),
}

#[derive(Args)]
pub struct FetchDataArgs {
    #[arg(long, help = "Name of a registry configured under [registries]")]
    pub registry: String,

    #[arg(long, value_name = "DIR")]
    pub output_directory: PathBuf,
}

#[derive(Args)]
pub struct IngestArgs {
    #[arg(long, help = "Dataset source type: cmip6, obs4mips or pmp-climatology")]
    pub source_type: SourceType,

    #[arg(value_name = "PATH")]
    pub path: PathBuf,
}

#[derive(Args)]
pub struct ListDatasetsArgs {
    #[arg(long)]
    pub source_type: Option<SourceType>,
}

#[derive(Args)]
pub struct ProvidersArgs {
    #[command(subcommand)]
    pub command: ProvidersCommands,
}

#[derive(Subcommand)]
pub enum ProvidersCommands {
    #[command(about = "List discovered providers and their diagnostics")]
    List,
}

#[derive(Args)]
pub struct SolveArgs {
    #[arg(
        long,
        help = "Select exactly one pending group per diagnostic (breadth smoke test)"
    )]
    pub one_per_diagnostic: bool,

    #[arg(long, value_name = "SECONDS", help = "Global deadline for the session")]
    pub timeout: Option<u64>,

    #[arg(
        short = 'j',
        long,
        help = "Worker-pool size; defaults to the configured concurrency or the CPU count"
    )]
    pub jobs: Option<usize>,

    #[arg(long, help = "Also re-run groups whose latest execution succeeded")]
    pub include_successful: bool,
}

#[derive(Args)]
pub struct ExecutionsArgs {
    #[command(subcommand)]
    pub command: ExecutionsCommands,
}

#[derive(Subcommand)]
pub enum ExecutionsCommands {
    #[command(about = "Summarize execution groups with their latest result")]
    List(ListExecutionsArgs),

    #[command(about = "Show one execution group with its full history")]
    Show(ShowExecutionArgs),
}

#[derive(Args)]
pub struct ListExecutionsArgs {
    #[arg(long)]
    pub provider: Option<String>,

    #[arg(long)]
    pub diagnostic: Option<String>,
}

#[derive(Args)]
pub struct ShowExecutionArgs {
    #[arg(help = "Execution group id")]
    pub group_id: i64,
}
