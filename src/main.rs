mod calc;
mod db;
mod ipc;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Grade aggregation sidecar: one JSON request per stdin line, one JSON
/// response per stdout line.
#[derive(Parser, Debug)]
#[command(name = "gradebookd")]
#[command(version)]
struct Args {
    /// Workspace directory to open at startup
    #[arg(long, env = "GRADEBOOKD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log filter directives (written to stderr)
    #[arg(long = "log", env = "GRADEBOOKD_LOG", default_value = "info")]
    log_filter: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&args.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(false),
        )
        .init();

    let mut state = ipc::AppState::default();
    if let Some(path) = args.workspace.as_deref() {
        ipc::open_workspace(&mut state, path)?;
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => ipc::bad_json(&e),
        };
        writeln!(stdout, "{}", resp)?;
        stdout.flush()?;
    }

    tracing::debug!("stdin closed, exiting");
    Ok(())
}
