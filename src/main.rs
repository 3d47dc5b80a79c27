mod cli;
mod commands;
mod model;
mod tabular;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::model::RunStatus;

/// Exit code for a scrape stopped by SIGINT/SIGTERM after saving its state.
const INTERRUPTED_EXIT_CODE: i32 = 130;

fn main() {
    init_tracing();

    match run() {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!(error = %err, "command failed");
            for cause in err.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ids(args) => commands::ids::run(args).map(|()| 0),
        Commands::Scrape(args) => commands::scrape::run(args).map(|status| match status {
            RunStatus::Completed => 0,
            RunStatus::Interrupted => INTERRUPTED_EXIT_CODE,
        }),
        Commands::Merge(args) => commands::merge::run(args).map(|()| 0),
        Commands::Status(args) => commands::status::run(args).map(|()| 0),
        Commands::Referees(args) => commands::referees::run(args).map(|()| 0),
        Commands::Travel(args) => commands::travel::run(args).map(|()| 0),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
