//! tomoflow - Main Entry Point
//!
//! Runs a process list on an in-process cluster of worker ranks and prints
//! the run summary.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tomoflow::{
    config::ProcessList,
    pipeline::{run_local, MemoryStore},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command line interface for the `tomoflow` executable
#[derive(Parser, Debug, Clone)]
#[command(name = "tomoflow", about = "Run a plugin process list over N-dimensional datasets")]
struct Cli {
    /// Process list (.toml or .json)
    process_list: PathBuf,

    /// Worker processes, overriding the process list
    #[arg(short = 'j', long)]
    processes: Option<usize>,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    summary_json: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The guard flushes the log file on drop
    let (file_layer, _guard) = match &cli.log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .context("--log-file must name a file")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tomoflow=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    let mut list = ProcessList::load(&cli.process_list)
        .with_context(|| format!("Loading {:?}", cli.process_list))?;
    if let Some(processes) = cli.processes {
        list.negotiation.processes = processes;
    }
    tracing::info!(
        "Running {:?} on {} processes",
        cli.process_list,
        list.negotiation.processes
    );

    let summary = run_local(&list, Arc::new(MemoryStore::default())).context("Run failed")?;
    print!("{}", summary);

    if let Some(path) = &cli.summary_json {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json).with_context(|| format!("Writing {:?}", path))?;
    }
    Ok(())
}
