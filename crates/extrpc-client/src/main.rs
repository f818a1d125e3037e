//! extrpc CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use extrpc_core::{TracingConfig, TracingOutputFormat, init_tracing};
use tracing::Level;

use extrpc_client::cli::{Cli, Command, ConfigAction, LogFormat};
use extrpc_client::commands;
use extrpc_client::commands::simulate::SimulateOptions;
use extrpc_client::config::RpcConfig;
use extrpc_client::error::ClientResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match RpcConfig::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => RpcConfig::load().unwrap_or_default(),
    };

    if let Err(e) = init_tracing(tracing_config(&cli, &config)) {
        eprintln!("error: failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Config file settings, then `--debug` and `--log-format` on top.
fn tracing_config(cli: &Cli, config: &RpcConfig) -> TracingConfig {
    let mut tracing = config.logging.to_tracing_config().unwrap_or_else(|e| {
        eprintln!("warning: {}, using default logging", e);
        TracingConfig::default()
    });
    if cli.debug {
        tracing = tracing.with_level(Level::DEBUG);
    }
    if let Some(format) = cli.log_format {
        tracing = tracing.with_format(match format {
            LogFormat::Compact => TracingOutputFormat::Compact,
            LogFormat::Pretty => TracingOutputFormat::Pretty,
            LogFormat::Json => TracingOutputFormat::Json,
        });
    }
    tracing
}

async fn run(cli: Cli, config: RpcConfig) -> ClientResult<()> {
    match cli.command {
        Command::Simulate {
            engine,
            procedure,
            args,
            from,
            timeout,
        } => {
            let options = SimulateOptions::from_config(
                &config,
                engine.as_deref(),
                procedure,
                args.as_deref(),
                from,
                timeout,
            )?;
            commands::simulate::run(&options).await
        }
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
