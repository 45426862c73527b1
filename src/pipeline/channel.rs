//! Bounded-channel plumbing for the Data Pipeline (C5, §4.5, §5).
//!
//! Queue depths follow the spec's named budgets: `file-bytes ~ 100`,
//! `framed-bytes ~ 5`, `md5-source ~ 100`, `ack channel ~ 5`.

use bytes::Bytes;
use tokio::sync::mpsc;

pub const FILE_BYTES_CHANNEL_SIZE: usize = 100;
pub const FRAMED_BYTES_CHANNEL_SIZE: usize = 5;
pub const MD5_SOURCE_CHANNEL_SIZE: usize = 100;
pub const ACK_CHANNEL_SIZE: usize = 5;

/// Raw bytes read off disk, fed to both the encoder and the hasher.
#[derive(Debug, Clone)]
pub struct FileBytes(pub Bytes);

/// A ready-to-send, already-framed `DATA` payload.
#[derive(Debug, Clone)]
pub struct FramedBytes(pub Bytes);

/// Acknowledgment read back off the carrier by the ack-receiver task.
#[derive(Debug, Clone)]
pub enum AckEvent {
    Progress { len: u64, saved: u64 },
    Heartbeat,
    Failure(String),
}

pub type FileBytesSender = mpsc::Sender<FileBytes>;
pub type FileBytesReceiver = mpsc::Receiver<FileBytes>;
pub type FramedBytesSender = mpsc::Sender<FramedBytes>;
pub type FramedBytesReceiver = mpsc::Receiver<FramedBytes>;
pub type AckSender = mpsc::Sender<AckEvent>;
pub type AckReceiver = mpsc::Receiver<AckEvent>;

pub fn file_bytes_channel() -> (FileBytesSender, FileBytesReceiver) {
    mpsc::channel(FILE_BYTES_CHANNEL_SIZE)
}

pub fn framed_bytes_channel() -> (FramedBytesSender, FramedBytesReceiver) {
    mpsc::channel(FRAMED_BYTES_CHANNEL_SIZE)
}

pub fn ack_channel() -> (AckSender, AckReceiver) {
    mpsc::channel(ACK_CHANNEL_SIZE)
}

/// Per-transfer counters reported at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    pub files_ok: usize,
    pub bytes_transferred: u64,
    pub files_failed: usize,
}
