//! webrpc CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing::Level;
use webrpc_core::{TracingConfig, init_tracing};

use webrpc_cli::cli::{Cli, Command, ConfigAction};
use webrpc_cli::commands;
use webrpc_cli::config::CliConfig;
use webrpc_cli::error::CliResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = match cli.config {
        Some(ref path) => CliConfig::load_from(path)?,
        None => CliConfig::load()?,
    }
    .with_overrides(cli.debug, cli.socket_path.clone(), cli.timeout);

    let tracing_config = match cli.command {
        Command::Serve { .. } if config.debug => {
            TracingConfig::peer_process().with_level(Level::DEBUG)
        }
        Command::Serve { .. } => TracingConfig::peer_process(),
        _ => TracingConfig::cli(config.debug),
    };
    init_tracing(tracing_config)?;

    match cli.command {
        Command::Serve { max_connections } => commands::serve::run(&config, max_connections).await,
        Command::Call { name, args, notify } => {
            commands::call::call(&config, &name, &args, notify).await
        }
        Command::Var { path, set, check } => {
            commands::call::var(&config, &path, set.as_deref(), check.map(Into::into)).await
        }
        Command::Echo { chunks, pipe } => commands::echo::run(&config, &pipe, &chunks).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config),
            ConfigAction::Path => commands::config::path(),
        },
    }
}
