//! Wire-adjacent data types shared across components (§3 Data Model).

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// One file or directory on the sender side.
///
/// Invariants: `relative_path` is non-empty; directories carry `size == 0`;
/// every descendant of an archive root shares its `path_id`; once enqueued
/// an entry is never mutated.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Groups entries belonging to the same user-named root.
    pub path_id: u64,
    /// Sender-local absolute path; never transmitted.
    pub absolute_path: PathBuf,
    /// Ordered path components, relative to the transfer root. Transmitted.
    pub relative_path: Vec<String>,
    pub is_dir: bool,
    /// This entry is itself a packed subtree (see [`crate::protocol::archive`]).
    pub archive: bool,
    pub size: u64,
    pub permissions: u32,
    /// Only present for entries inside an archive: the marshaled header used
    /// to recreate this entry on the receiver.
    pub header_payload: Option<Vec<u8>>,
    /// Only present for archive roots.
    pub children: Vec<SourceEntry>,
}

impl SourceEntry {
    pub fn file_name(&self) -> &str {
        self.relative_path
            .last()
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// Receiver-side descriptor reported back to the sender after name
/// resolution (collisions may force a rename).
#[derive(Debug, Clone)]
pub struct TargetEntry {
    pub local_name: String,
    pub size: u64,
}

/// Handshake response from the receiver (`ACT`).
#[derive(Debug, Clone)]
pub struct TransferAction {
    pub dialect: Dialect,
    pub protocol_version: u32,
    pub confirm: bool,
    pub supports_binary: bool,
    pub supports_directory: bool,
    pub supports_fork: bool,
}

impl TransferAction {
    /// Line terminator dictated by this action's dialect (§4.1, §4.7).
    pub fn line_ending(&self) -> &'static str {
        match self.dialect {
            Dialect::Windows => "!\n",
            Dialect::Unix => "\n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Unix,
    Windows,
}

/// Mode encoded in the transfer trigger (§3 Trigger record, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// `S` — server sends, client receives.
    ServerSend,
    /// `R` — client sends, server receives a single file.
    ReceiveFile,
    /// `D` — client sends, server receives a directory.
    ReceiveDirectory,
}

impl TransferMode {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'S' => Some(TransferMode::ServerSend),
            'R' => Some(TransferMode::ReceiveFile),
            'D' => Some(TransferMode::ReceiveDirectory),
            _ => None,
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, TransferMode::ReceiveDirectory)
    }
}

/// Compression-mode knob for the bulk codec (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    Auto,
    Yes,
    No,
}

/// Sender-chosen, receiver-acknowledged transfer parameters (`CFG`).
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub quiet: bool,
    pub binary: bool,
    pub directory: bool,
    pub overwrite: bool,
    pub timeout_seconds: u64,
    pub line_ending: &'static str,
    pub protocol_version: u32,
    /// Adaptive chunk-size ceiling, bounded `1 KiB <= s <= 1 GiB`.
    pub max_buffer_size: u64,
    /// Present iff `binary` is set.
    pub escape_table: Option<crate::escape::EscapeTable>,
    /// Width of the multiplexer pane hosting this session, if any.
    pub carrier_pane_width: Option<u32>,
    pub carrier_output_may_contain_junk: bool,
    pub compression: CompressionMode,
}

pub const MIN_BUFFER_SIZE: u64 = 1024;
pub const MAX_BUFFER_SIZE: u64 = 1024 * 1024 * 1024;

impl TransferConfig {
    pub fn clamp_buffer_size(size: u64) -> u64 {
        size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
    }

    pub fn dialect(&self) -> Dialect {
        if self.line_ending == "!\n" {
            Dialect::Windows
        } else {
            Dialect::Unix
        }
    }
}

/// Produced by the trigger detector (§3, §4.3).
#[derive(Debug, Clone)]
pub struct TriggerRecord {
    pub mode: TransferMode,
    pub protocol_version: (u32, u32, u32),
    pub unique_id: String,
    pub server_is_windows: bool,
    pub tunnel_port: Option<u16>,
    pub multiplexer_prefix: Option<String>,
}

impl TriggerRecord {
    /// Derive the 13-digit unique id: `ms_epoch % 1e10 * 100 + platform_tag`.
    pub fn new_unique_id(now: SystemTime, platform_tag: u8) -> String {
        let millis = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let base = (millis % 10_000_000_000) * 100 + platform_tag as u64;
        format!("{base:013}")
    }

    /// Platform tag is the trailing two digits of the unique id.
    pub fn is_windows_from_id(id: &str) -> bool {
        id.ends_with("10")
    }
}
