//! End-to-end scenario against the full sender/receiver driver pair, wired
//! over a pair of in-memory duplex pipes instead of a real tty (S1: single
//! small file, non-binary mode).

use std::sync::Arc;

use tempfile::tempdir;
use tokio::io::AsyncReadExt;

use termxfer::carrier::LineBuffer;
use termxfer::control::Lifecycle;
use termxfer::model::TransferMode;
use termxfer::session::{default_action, plain_source_entries, run_receiver, run_sender};

/// Spawn a background task copying bytes from `read_half` into `line_buf`
/// as they arrive, so the protocol driver can treat the duplex pipe's
/// output like carrier input. `LineBuffer` is already internally
/// synchronized (its own `Mutex`+`Notify`), so the pump task and the
/// protocol driver share it through a plain `Arc`, never a lock that either
/// side would have to hold across an `.await`.
fn pump_into(mut read_half: tokio::io::ReadHalf<tokio::io::DuplexStream>, line_buf: Arc<LineBuffer>) {
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => line_buf.push(&buf[..n]),
            }
        }
    });
}

#[tokio::test]
async fn single_small_file_transfers_end_to_end() {
    let source_dir = tempdir().unwrap();
    let dest_dir = tempdir().unwrap();

    let file_path = source_dir.path().join("greeting.txt");
    tokio::fs::write(&file_path, b"ABC").await.unwrap();
    let entries = plain_source_entries(&[file_path.clone()], &[3]);

    let (mut sender_write, receiver_read) = tokio::io::duplex(64 * 1024);
    let (mut receiver_write, sender_read) = tokio::io::duplex(64 * 1024);

    let sender_lb = Arc::new(LineBuffer::new());
    let receiver_lb = Arc::new(LineBuffer::new());
    pump_into(sender_read, sender_lb.clone());
    pump_into(receiver_read, receiver_lb.clone());

    let sender_action = default_action(TransferMode::ServerSend, 5);
    let receiver_action = default_action(TransferMode::ServerSend, 5);
    let sender_lifecycle = Lifecycle::new();
    let receiver_lifecycle = Lifecycle::new();
    let dest_path = dest_dir.path().to_path_buf();

    let sender_task = tokio::spawn(async move {
        run_sender(&mut sender_write, &sender_lb, &sender_action, &entries, false, &sender_lifecycle).await
    });

    let receiver_task = tokio::spawn(async move {
        run_receiver(&mut receiver_write, &receiver_lb, &receiver_action, &dest_path, &receiver_lifecycle).await
    });

    let (sender_result, receiver_result) = tokio::join!(sender_task, receiver_task);
    let sender_stats = sender_result.unwrap().expect("sender must complete the transfer");
    let receiver_stats = receiver_result.unwrap().expect("receiver must complete the transfer");

    assert_eq!(sender_stats.files_ok, 1);
    assert_eq!(receiver_stats.files_ok, 1);
    assert_eq!(receiver_stats.bytes_transferred, 3);

    let written = tokio::fs::read(dest_dir.path().join("greeting.txt")).await.unwrap();
    assert_eq!(written, b"ABC");
}
