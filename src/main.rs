mod analysis;
mod collision;
mod config;
mod engine;
mod epidemic;
mod manager;
mod model;
mod population;
mod sampler;
mod stats;

use crate::manager::Manager;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// Directory holding `config.toml` and the run directories.
    #[arg(long)]
    sim_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a new run and simulate its first trajectory file.
    Create {
        /// Keep simulating until the epidemic ends or the horizon is reached.
        #[arg(long)]
        to_end: bool,
    },

    /// Continue a run from its checkpoint.
    Resume {
        #[arg(long)]
        run_idx: usize,

        #[arg(long)]
        to_end: bool,
    },

    /// Summarize every run into its `results.json`.
    Analyze,

    /// Remove every run directory.
    Clean,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mgr = Manager::new(args.sim_dir).context("failed to construct mgr")?;

    match args.command {
        Command::Create { to_end } => mgr.create_run(to_end)?,
        Command::Resume { run_idx, to_end } => mgr.resume_run(run_idx, to_end)?,
        Command::Analyze => mgr.analyze_sim()?,
        Command::Clean => mgr.clean_sim()?,
    }

    Ok(())
}
