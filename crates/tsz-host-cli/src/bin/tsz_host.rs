//! tsz-host: run a tsserver group and drive it from stdin.
//!
//! Each stdin line is a JSON request; results, events and the group's exit
//! are printed to stdout as JSON lines. Diagnostics about the host itself go
//! to stderr through `tracing` (see `TSZ_HOST_LOG`).

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tsz_host::{ExecuteError, ServerSpawner, TsServerDelegate, tracing_config};
use tsz_host_cli::{HostArgs, session};

/// Servers of a group disagree after a shared command; there is no local
/// recovery, so the session ends.
struct CliDelegate {
    shutdown: CancellationToken,
}

impl TsServerDelegate for CliDelegate {
    fn on_fatal_error(&self, command: &str, error: &ExecuteError) {
        tracing::error!(command, %error, "server group out of sync; shutting down");
        self.shutdown.cancel();
    }
}

fn print_records(mut records: mpsc::UnboundedReceiver<Value>) -> Result<()> {
    let stdout = std::io::stdout();
    while let Some(record) = records.blocking_recv() {
        let mut out = stdout.lock();
        serde_json::to_writer(&mut out, &record).context("encoding output record")?;
        out.write_all(b"\n")?;
        out.flush()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_config::init_tracing();

    let args = HostArgs::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(run_host(args));
    // A pending stdin read must not keep the process alive.
    runtime.shutdown_background();
    result
}

async fn run_host(args: HostArgs) -> Result<()> {
    let config = args.to_config()?;
    tracing::info!(
        composite = ?config.composite,
        separate_diagnostics = config.separate_diagnostics_server,
        "starting server group"
    );

    let shutdown = CancellationToken::new();
    let delegate = Arc::new(CliDelegate {
        shutdown: shutdown.clone(),
    });
    let server = ServerSpawner::new(config, delegate)
        .spawn()
        .context("failed to start tsserver")?;

    let (output, records) = mpsc::unbounded_channel();
    let printer = tokio::task::spawn_blocking(move || print_records(records));
    let subscriptions = session::watch_server(server.as_ref(), &output, &shutdown);

    let stdin = BufReader::new(tokio::io::stdin());
    let outcome = session::run(Arc::clone(&server), stdin, output, shutdown).await;

    server.kill();
    server.dispose();
    drop(subscriptions);
    printer.await.context("output task panicked")??;
    outcome
}
