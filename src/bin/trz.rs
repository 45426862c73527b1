//! `trz`: receive files sent by `tsz`. Thin collaborator around the
//! library's [`termxfer::session::run_receiver`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use termxfer::config::TrzArgs;
use termxfer::control::Lifecycle;
use termxfer::model::TransferMode;
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = TrzArgs::parse();
    let cfg_file = termxfer::config::TrzszConfig::load_default();
    let dest_root = args
        .path
        .clone()
        .or(cfg_file.default_download_path.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let mode = if args.directory {
        TransferMode::ReceiveDirectory
    } else {
        TransferMode::ReceiveFile
    };
    let local_action = termxfer::session::default_action(mode, 5);
    let lifecycle = Lifecycle::new();

    let carrier_in = Arc::new(termxfer::carrier::LineBuffer::new());
    feed_stdin_forever(carrier_in.clone());

    let mut stdout = tokio::io::stdout();
    let stats = termxfer::session::run_receiver(&mut stdout, &carrier_in, &local_action, &dest_root, &lifecycle).await?;

    if !args.quiet {
        eprintln!("received {} file(s), {} bytes", stats.files_ok, stats.bytes_transferred);
    }
    Ok(())
}

/// Spawns a background task pumping raw stdin bytes into the line buffer.
/// `LineBuffer` is internally synchronized, so the pump task and the
/// receiver driver share it through a plain `Arc` with no external lock.
fn feed_stdin_forever(carrier_in: Arc<termxfer::carrier::LineBuffer>) {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => carrier_in.push(&buf[..n]),
            }
        }
    });
}
