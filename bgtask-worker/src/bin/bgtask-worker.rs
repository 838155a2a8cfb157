//! bgtask worker
//!
//! Spawned by the background transport for a single task. Prints the
//! resulting envelope on stdout; logs go to a file, never to stderr.

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use bgtask_common::{AppSecret, EnvelopeCodec};
use bgtask_worker::{init_logging, DemoShapes, SingleMessageRunner, LOG_FILE_ENV};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;

#[derive(Parser, Debug)]
#[command(name = "bgtask-worker", version)]
#[command(about = "Runs one background task and answers on stdout")]
struct Cli {
    /// Shared secret; defaults to $BGTASK_SECRET
    #[arg(long, global = true)]
    secret: Option<String>,

    /// Log file; defaults to $BGTASK_WORKER_LOG, logs are discarded otherwise
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume one encoded envelope
    ConsumeSingleMessage {
        /// Base64 encoded envelope
        envelope: String,
        /// HMAC fingerprint of the envelope
        fingerprint: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_file = cli
        .log_file
        .or_else(|| env::var_os(LOG_FILE_ENV).map(PathBuf::from));
    init_logging(log_file.as_deref(), cli.debug)?;

    let secret = AppSecret::resolve(cli.secret);
    let demo = DemoShapes::new();
    let codec = EnvelopeCodec::new(Arc::new(demo.registry()?));
    let runner = SingleMessageRunner::new(codec, demo.bus()?, secret);

    let Command::ConsumeSingleMessage {
        envelope,
        fingerprint,
    } = cli.command;
    let outcome = runner.run(&envelope, &fingerprint).await;

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(outcome.output.as_bytes())
        .await
        .context("failed to write result envelope")?;
    stdout.flush().await?;

    Ok(ExitCode::from(outcome.exit_status()))
}
