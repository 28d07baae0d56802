mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::{Cli, Commands, DatasetsCommands, ExecutionsCommands, ProvidersCommands};
use colored::Colorize;
use commands::AppContext;
use cref_core::config::Config;
use cref_core::logging;
use error::Result;

fn main() {
    let cli = Cli::parse();

    logging::set_log_level_from_env();
    if cli.verbose > 0 {
        logging::set_log_level(logging::LogLevel::from(2 + cli.verbose));
    }

    match run(cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    if cli.verbose > 0 {
        logging::init_stderr_logger();
    } else if let Err(e) = logging::init_session_logger(&config.logging) {
        eprintln!(
            "{} could not initialize session log file: {}",
            "Warning:".yellow(),
            e
        );
    }

    let context = AppContext::new(config)?;
    match cli.command {
        Commands::Datasets(args) => match args.command {
            DatasetsCommands::FetchData(args) => {
                commands::datasets::handle_fetch_data(args, &context)
            }
            DatasetsCommands::Ingest(args) => commands::datasets::handle_ingest(args, &context),
            DatasetsCommands::List(args) => commands::datasets::handle_list(args, &context),
        },
        Commands::Providers(args) => match args.command {
            ProvidersCommands::List => commands::providers::handle_list(&context),
        },
        Commands::Solve(args) => commands::solve::handle_solve(args, &context),
        Commands::Executions(args) => match args.command {
            ExecutionsCommands::List(args) => commands::executions::handle_list(args, &context),
            ExecutionsCommands::Show(args) => commands::executions::handle_show(args, &context),
        },
    }
}
