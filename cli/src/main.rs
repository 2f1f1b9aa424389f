//! ringcore CLI - line-oriented driver for the evaluation core.
//!
//! Reads one command per line from a script file (first argument) or stdin,
//! runs it against a `Core` seeded with demo substrates and the built-in
//! lenses, and prints one JSON reply per line on stdout.
//!
//! ```text
//! main() -> init_tracing() -> Core::from_config() -> demo::install()
//!                                  |
//!                                  v
//!                  for line: Session::run_line() -> println!
//! ```
//!
//! Logs go to stderr so stdout stays machine-readable.

mod command;
mod demo;
mod session;

use std::env;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, stdin};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ringcore_config::CoreConfig;
use ringcore_engine::Core;

use crate::session::Session;

fn init_tracing(default_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(io::stderr().is_terminal())
                .with_writer(io::stderr),
        )
        .with(env_filter)
        .init();
}

async fn run_lines<R>(session: &Session, input: R) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut executed = 0;
    while let Some(line) = lines.next_line().await.context("failed to read input")? {
        if let Some(reply) = session.run_line(&line).await {
            println!("{reply}");
            executed += 1;
        }
    }
    Ok(executed)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Config comes first so its logging filter can seed the subscriber.
    let (config, config_error) = match CoreConfig::load() {
        Ok(config) => (config.unwrap_or_default(), None),
        Err(err) => (CoreConfig::default(), Some(err)),
    };
    init_tracing(&config.logging.filter);
    if let Some(err) = config_error {
        tracing::warn!("{err}; falling back to defaults");
    }

    let core = Core::from_config(&config).context("invalid core settings")?;
    demo::install(&core).context("failed to install demo substrates")?;
    let session = Session::new(core);

    let executed = match env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            let file = File::open(&path)
                .await
                .with_context(|| format!("failed to open script {}", path.display()))?;
            run_lines(&session, BufReader::new(file)).await?
        }
        None => run_lines(&session, BufReader::new(stdin())).await?,
    };

    tracing::info!(executed, "input exhausted");
    Ok(())
}
