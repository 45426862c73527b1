//! `trzsz-wrap`: spawns the user-supplied command and installs the filter
//! around its stdio pair (§6 CLI surface, §9 "wrapper binary"). Real
//! OS-specific pty allocation is out of core scope (§1); this drives the
//! filter over any `AsyncRead + AsyncWrite` pair, so a pty crate can be
//! slotted in without touching the engine.

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use termxfer::config::WrapArgs;
use termxfer::session::Filter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = WrapArgs::parse();
    let (program, rest) = args.command.split_first().expect("clap requires >= 1 arg");

    let mut child = Command::new(program)
        .args(rest)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .spawn()?;

    let mut child_stdin = child.stdin.take().expect("piped stdin");
    let mut child_stdout = child.stdout.take().expect("piped stdout");

    let mut filter = Filter::new(false);
    let mut buf = [0u8; 4096];
    loop {
        let n = child_stdout.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let (forwarded, trigger) = filter.process_output(&buf[..n]);
        tokio::io::stdout().write_all(&forwarded).await?;
        tokio::io::stdout().flush().await?;

        if let Some(record) = trigger {
            tracing::info!(mode = ?record.mode, unique_id = %record.unique_id, "transfer trigger detected");
            // A full implementation claims the transfer slot here and hands
            // the carrier off to `session::run_sender`/`run_receiver`
            // against `child_stdin`/`child_stdout`; wiring that against a
            // live pty is the out-of-core collaborator concern (§1, §9).
            let _guard = filter.claim_transfer();
        }
    }

    child_stdin.shutdown().await.ok();
    let status = child.wait().await?;
    std::process::exit(status.code().unwrap_or(1));
}
