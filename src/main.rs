use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing::error;

use napt_rs::nat::{DropReason, NatConfig, NatResult};
use napt_rs::net::replay_capture;
use napt_rs::utils::consts::DEFAULT_WORKERS;
use napt_rs::utils::logging::{init_logging, init_logging_with};

#[derive(Parser)]
#[command(author, version, about = "Stateful IPv4 NAPT", long_about = None)]
struct Cli {
    /// Default log filter, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate every frame of a capture and write the forwarded ones
    Replay {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,
    },
    /// Load and validate a configuration file
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    match &cli.log_level {
        Some(level) => init_logging_with(level),
        None => init_logging(),
    }

    let result = match cli.command {
        Commands::Replay {
            config,
            input,
            output,
            workers,
        } => replay(&config, &input, &output, workers),
        Commands::CheckConfig { config } => check_config(&config),
    };

    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

fn replay(config: &Path, input: &Path, output: &Path, workers: usize) -> NatResult<()> {
    let config = NatConfig::from_file(config)?;
    let report = replay_capture(config, input, output, workers)?;

    let frames = report.pipeline;
    println!(
        "{} frames in, {} forwarded, {} dropped, {} for neither port",
        frames.received, frames.forwarded, frames.dropped, frames.unclassified
    );
    println!(
        "{} bindings created, {} evicted",
        report.counters.bindings_created, report.counters.bindings_evicted
    );
    for reason in DropReason::ALL {
        let n = report.counters.dropped(reason);
        if n > 0 {
            println!("  dropped ({}): {}", reason, n);
        }
    }
    Ok(())
}

fn check_config(path: &Path) -> NatResult<()> {
    let config = NatConfig::from_file(path)?;
    println!("public  {} {}", config.public_address(), config.public_port.mac);
    println!("private {}", config.private_port.mac);
    println!(
        "ports {}..={}, timeout {}s",
        config.options.port_range.first,
        config.options.port_range.last,
        config.options.connection_timeout_secs
    );
    Ok(())
}
