//! The `umbra` binary.
//!
//! Exit codes: 0 on a clean shutdown, 1 on a fatal initialization error,
//! 2 on panic.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use umbra_chain::GenesisKind;
use umbra_config::Config;
use umbra_node::Node;

/// The Umbra full node.
#[derive(Parser, Debug)]
#[command(name = "umbra")]
#[command(version)]
#[command(about = "Umbra blockchain full node")]
struct Cli {
    /// Configuration file path
    #[arg(long, default_value = "umbra.toml")]
    config: PathBuf,

    /// Genesis fixture to boot an empty chain from
    #[arg(long, default_value = "new")]
    genesis: String,
}

fn main() -> ExitCode {
    // A panic anywhere is exit code 2, distinguishable from init failures.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        std::process::exit(2);
    }));

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal initialization error");
            eprintln!("fatal: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Configuration first so logging can honor it.
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        info!(path = %cli.config.display(), "no config file, using defaults");
        Config::default()
    };

    init_tracing(&config);

    let genesis: GenesisKind = cli
        .genesis
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        network = %config.network.magic,
        "starting umbra"
    );

    let handle = Node::start(config, genesis).await?;
    handle.wait().await;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}
