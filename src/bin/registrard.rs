//! Registration scheduler daemon.
//!
//! Wires the scheduling engine to the HTTP request store and per-network
//! chain gateways, with TOML config, CLI/env overrides, and structured
//! logging. Exits non-zero on fatal errors so a supervisor restarts it.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use subnet_registrar::{
    init_logging, logging::LogFormat, GatewayConnector, HttpRequestStore, RegistrarConfig,
    RegistrarService,
};

#[derive(Parser)]
#[command(name = "registrard")]
#[command(version, about = "Automated on-chain registration scheduler", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "registrar.toml")]
    config: PathBuf,

    /// Master key for the credential vault (prefer the env var over CLI)
    #[arg(long, env = "REGISTRAR_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,

    /// Override the request store base URL
    #[arg(long)]
    store_url: Option<String>,

    /// Override seconds between poll cycles
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Override seconds between submissions within one group
    #[arg(long)]
    submit_spacing: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Directory for daily-rotated JSON log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "registrar.toml")]
        output: PathBuf,
    },
    /// Validate config without running
    ValidateConfig,
    /// Run the scheduler (default)
    Run,
}

fn load_config(cli: &Cli) -> Result<RegistrarConfig, subnet_registrar::Error> {
    let mut config = if cli.config.exists() {
        RegistrarConfig::load(&cli.config)?
    } else {
        RegistrarConfig::default()
    };

    if let Some(key) = &cli.master_key {
        config.master_key = key.clone();
    }
    if let Some(url) = &cli.store_url {
        config.store_url = url.clone();
    }
    if let Some(secs) = cli.poll_interval {
        config.poll_interval_secs = secs;
    }
    if let Some(secs) = cli.submit_spacing {
        config.submit_spacing_secs = secs;
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log.format = match format.as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        };
    }
    if let Some(dir) = &cli.log_dir {
        config.log.log_dir = Some(dir.clone());
    }
    Ok(config)
}

/// Flip the shutdown flag on the first SIGINT or SIGTERM.
fn spawn_signal_listener(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "cannot install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt");
        }
        shutdown.store(true, Ordering::SeqCst);
        info!("shutdown requested, finishing in-flight work");
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(Commands::GenerateConfig { output }) = &cli.command {
        let sample = match toml::to_string_pretty(&RegistrarConfig::sample()) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("cannot serialize sample config: {e}");
                return ExitCode::FAILURE;
            }
        };
        if let Err(e) = std::fs::write(output, sample) {
            eprintln!("cannot write {}: {e}", output.display());
            return ExitCode::FAILURE;
        }
        println!("wrote sample config to {}", output.display());
        println!("set REGISTRAR_MASTER_KEY before running");
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if matches!(cli.command, Some(Commands::ValidateConfig)) {
        return match config.validate() {
            Ok(()) => {
                println!("config is valid");
                println!("  store_url: {}", config.store_url);
                println!("  networks: {}", config.gateway_urls.len());
                println!("  partitions: {}", config.partitions.len());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("config invalid: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let _guards = match init_logging(&config.log) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("cannot initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let store = match HttpRequestStore::new(config.store_url.clone()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "cannot construct store client");
            return ExitCode::FAILURE;
        }
    };
    let connector = Arc::new(GatewayConnector::new(config.gateway_urls.clone()));

    let service = match RegistrarService::new(config, store, connector) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot start scheduler");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    spawn_signal_listener(Arc::clone(&shutdown));

    match service.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "scheduler exited with fatal error");
            ExitCode::FAILURE
        }
    }
}
