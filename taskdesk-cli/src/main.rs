mod cli;
mod commands;
mod logging;
mod session_store;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use commands::App;
use taskdesk_client::{ClientConfig, ClientError};
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    if let Err(err) = run(cli.command).await {
        if needs_login(&err) {
            eprintln!("Not logged in or session expired. Run `taskdesk login`.");
        }
        return Err(err);
    }
    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    if let Commands::ConfigPath = command {
        return commands::config_path();
    }

    let config = ClientConfig::load().context("Failed to load config")?;
    let app = App::connect(config)?;

    let result = app.run(command).await;
    // Cookies may have been rotated even if the command itself failed.
    let persisted = app.persist_session().context("Failed to save session");
    first_error(result, persisted)
}

/// The command's own failure wins; a save failure behind it is only logged.
fn first_error(result: Result<()>, persisted: Result<()>) -> Result<()> {
    match (result, persisted) {
        (Err(err), Err(persist_err)) => {
            warn!(error = %format!("{:#}", persist_err), "Failed to save session after command error");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
        (Ok(()), persisted) => persisted,
    }
}

fn needs_login(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<ClientError>()
            .is_some_and(ClientError::requires_login)
    })
}
