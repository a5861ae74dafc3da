mod ipc;
mod supervisor;
mod worker;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fern::colors::{Color, ColoredLevelConfig};
use log::debug;

use kopach_common::{fork::Fork, network::Network, wire::ChannelConfig};

use supervisor::{Supervisor, SupervisorConfig};
use worker::Worker;

#[derive(Parser, Debug)]
#[command(name = "kopach", about = "Multi-algorithm CPU mining supervisor", styles = kopach_common::get_cli_styles())]
struct Cli {
    /// Network the chain runs on (mainnet, testnet)
    #[clap(long, default_value = "mainnet")]
    network: String,

    /// Shared secret authenticating the work bus
    #[clap(long, default_value_t = String::from("pa55word"))]
    miner_pass: String,

    /// Worker subprocesses to spawn; defaults to the CPU count
    #[clap(long)]
    gen_threads: Option<usize>,

    /// Log level (off, error, warn, info, debug, trace)
    #[clap(long, default_value = "info")]
    log_level: String,

    #[clap(subcommand)]
    command: Option<KopachCommand>,
}

#[derive(Subcommand, Debug)]
enum KopachCommand {
    /// Run one mining worker over stdio IPC (spawned by the supervisor)
    Worker {
        network: String,
        log_level: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(KopachCommand::Worker { network, log_level }) => {
            let level = log_level
                .as_deref()
                .unwrap_or(&cli.log_level)
                .parse()
                .context("invalid log level")?;
            setup_logger(level)?;
            let network: Network = network.parse().map_err(anyhow::Error::msg)?;
            run_worker(network).await
        }
        None => {
            let level = cli.log_level.parse().context("invalid log level")?;
            setup_logger(level)?;
            let network: Network = cli.network.parse().map_err(anyhow::Error::msg)?;
            let config = SupervisorConfig {
                network,
                miner_pass: cli.miner_pass,
                gen_threads: cli.gen_threads.unwrap_or_else(num_cpus::get),
                log_level: cli.log_level,
                channel: ChannelConfig::bus(),
            };
            let supervisor = Supervisor::start(config)
                .await
                .context("could not start supervisor")?;
            supervisor.run().await?;
            Ok(())
        }
    }
}

async fn run_worker(network: Network) -> Result<()> {
    debug!("miner worker starting");
    let worker = Worker::new(Fork::new(network));
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    worker::serve_ipc(worker, stdin, stdout).await?;
    debug!("worker finished");
    Ok(())
}

/// Timestamped, colored dispatch to stderr. Stdout stays clean: the worker
/// subcommand talks IPC on it.
fn setup_logger(level: log::LevelFilter) -> Result<()> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::BrightBlack);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{:5}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .context("could not initialize logging")?;
    Ok(())
}
