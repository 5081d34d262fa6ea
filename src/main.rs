mod cli;
mod commands;
mod config;
mod decision;
mod engine;
mod entities;
mod error;
mod hooks;
mod model;
mod render;
mod rollup;
mod search;
mod session;
mod store;

use std::io;

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, HookCommand};
use crate::config::{Workspace, LOG_ENV};
use crate::engine::Engine;
use crate::error::AppError;
use crate::store::Store;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

/// Diagnostics go to stderr so stdout stays reserved for command output
/// and hook JSON.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .try_init();
}

async fn run() -> Result<(), AppError> {
    let Cli {
        cwd,
        session_id,
        command,
    } = Cli::parse();

    if let Command::Hook(hook) = command {
        let payload = hooks::read_stdin().unwrap_or_else(|err| {
            warn!(error = %err, "could not read hook payload");
            String::new()
        });
        match hook {
            HookCommand::Stop => println!("{}", hooks::stop(&payload, cwd, session_id).await),
            HookCommand::PreToolUse => {
                if let Some(output) = hooks::pretooluse(&payload) {
                    println!("{output}");
                }
            }
        }
        return Ok(());
    }

    let session_id = config::resolve_session(session_id)?;
    let workspace = Workspace::resolve(cwd.as_deref())?;
    workspace.prepare()?;
    debug!(workspace = %workspace.root().display(), "using workspace");
    let mut lock = workspace.open_lock()?;
    let _guard = lock.write()?;

    let store = Store::open(&workspace.store_path()).await?;
    let engine = Engine::new(store, session_id);
    commands::dispatch(&engine, command).await
}
