//! CLI surface (§6) and `~/.trzsz.conf` parsing.
//!
//! Argument parsing itself is a non-core collaborator (§1); this module
//! only builds the typed values the engine consumes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Parser;

use crate::model::CompressionMode;

/// `trz [-q][-y][-b][-e][-d|-r][-B <size>][-t <sec>][-c auto|yes|no][--] [path]`
#[derive(Debug, Parser)]
#[command(name = "trz", about = "Receive files sent by tsz")]
pub struct TrzArgs {
    /// Quiet: suppress progress output.
    #[arg(short = 'q', long)]
    pub quiet: bool,
    /// Assume yes to the destination-overwrite prompt.
    #[arg(short = 'y', long)]
    pub overwrite: bool,
    /// Use binary mode (escape layer) instead of the bulk codec.
    #[arg(short = 'b', long)]
    pub binary: bool,
    /// Use the extended escape table (`-e`/`--escape`).
    #[arg(short = 'e', long)]
    pub escape: bool,
    /// Receive a directory.
    #[arg(short = 'd', long, conflicts_with = "receive_file")]
    pub directory: bool,
    /// Receive a single file (default).
    #[arg(short = 'r', long = "receive")]
    pub receive_file: bool,
    #[arg(short = 'B', long = "bufsize", default_value_t = crate::model::MAX_BUFFER_SIZE)]
    pub max_buffer_size: u64,
    #[arg(short = 't', long = "timeout", default_value_t = 20)]
    pub timeout_seconds: u64,
    #[arg(short = 'c', long = "compress", default_value = "auto")]
    pub compress: String,
    /// Destination directory; defaults to the config file's
    /// `DefaultDownloadPath`.
    pub path: Option<PathBuf>,
}

impl TrzArgs {
    pub fn compression_mode(&self) -> CompressionMode {
        match self.compress.as_str() {
            "yes" => CompressionMode::Yes,
            "no" => CompressionMode::No,
            _ => CompressionMode::Auto,
        }
    }
}

/// `tsz [flags] <file>...`
#[derive(Debug, Parser)]
#[command(name = "tsz", about = "Send files to trz")]
pub struct TszArgs {
    #[arg(short = 'q', long)]
    pub quiet: bool,
    #[arg(short = 'b', long)]
    pub binary: bool,
    #[arg(short = 'e', long)]
    pub escape: bool,
    #[arg(short = 'd', long)]
    pub directory: bool,
    #[arg(short = 'B', long = "bufsize", default_value_t = crate::model::MAX_BUFFER_SIZE)]
    pub max_buffer_size: u64,
    #[arg(short = 't', long = "timeout", default_value_t = 20)]
    pub timeout_seconds: u64,
    #[arg(short = 'c', long = "compress", default_value = "auto")]
    pub compress: String,
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl TszArgs {
    pub fn compression_mode(&self) -> CompressionMode {
        match self.compress.as_str() {
            "yes" => CompressionMode::Yes,
            "no" => CompressionMode::No,
            _ => CompressionMode::Auto,
        }
    }
}

/// Wrapper binary: spawns a pty, runs the user-supplied command, and
/// installs the filter around the resulting bidirectional stream.
#[derive(Debug, Parser)]
#[command(name = "trzsz-wrap", about = "Wrap a command with the transfer filter")]
pub struct WrapArgs {
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

/// Parsed `~/.trzsz.conf`: `key = value` per line, `#` starts a comment.
/// Unrecognized keys are ignored (forward-compatible).
#[derive(Debug, Clone, Default)]
pub struct TrzszConfig {
    pub default_upload_path: Option<PathBuf>,
    pub default_download_path: Option<PathBuf>,
    pub drag_file_upload_command: Option<String>,
    pub progress_color_pair: Option<String>,
}

impl TrzszConfig {
    pub fn load_default() -> Self {
        let Some(home) = dirs::home_dir() else {
            return TrzszConfig::default();
        };
        Self::load(&home.join(".trzsz.conf")).unwrap_or_default()
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut raw = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                tracing::debug!(line, "ignoring malformed config line");
                continue;
            };
            raw.insert(key.trim().to_lowercase(), value.trim().to_string());
        }

        let mut cfg = TrzszConfig::default();
        for (key, value) in raw {
            match key.as_str() {
                "defaultuploadpath" => cfg.default_upload_path = Some(PathBuf::from(value)),
                "defaultdownloadpath" => cfg.default_download_path = Some(PathBuf::from(value)),
                "dragfileuploadcommand" => cfg.drag_file_upload_command = Some(value),
                "progresscolorpair" => cfg.progress_color_pair = Some(value),
                other => tracing::debug!(key = other, "ignoring unrecognized config key"),
            }
        }
        cfg
    }
}
