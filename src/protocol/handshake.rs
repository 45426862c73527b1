//! `ACT`/`CFG` handshake and the version/dialect/binary-mode tie-breaks
//! (§4.4 Handshake, §4.4 Tie-breaks).

use serde::{Deserialize, Serialize};

use crate::error::TrzError;
use crate::model::{CompressionMode, Dialect, TransferAction, TransferConfig};

/// Wire shape of the `ACT` handshake response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActWire {
    pub windows: bool,
    pub version: String,
    pub confirm: bool,
    pub binary: bool,
    pub directory: bool,
    pub fork: bool,
}

impl ActWire {
    pub fn from_action(action: &TransferAction) -> Self {
        ActWire {
            windows: action.dialect == crate::model::Dialect::Windows,
            version: format!("{}", action.protocol_version),
            confirm: action.confirm,
            binary: action.supports_binary,
            directory: action.supports_directory,
            fork: action.supports_fork,
        }
    }

    pub fn into_action(self) -> Result<TransferAction, TrzError> {
        let protocol_version = self
            .version
            .parse()
            .map_err(|e| TrzError::Protocol(format!("bad ACT version {:?}: {e}", self.version)))?;
        Ok(TransferAction {
            dialect: if self.windows { Dialect::Windows } else { Dialect::Unix },
            protocol_version,
            confirm: self.confirm,
            supports_binary: self.binary,
            supports_directory: self.directory,
            supports_fork: self.fork,
        })
    }

    pub fn encode(&self) -> Result<String, TrzError> {
        let json = serde_json::to_vec(self).map_err(|e| TrzError::Protocol(e.to_string()))?;
        Ok(crate::codec::short_field_encode(&json))
    }

    pub fn decode(payload: &str) -> Result<Self, TrzError> {
        let bytes = crate::codec::short_field_decode(payload)?;
        serde_json::from_slice(&bytes).map_err(|e| TrzError::Corrupt(format!("ACT json: {e}")))
    }
}

/// Wire shape of the `CFG` transfer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CfgWire {
    pub quiet: bool,
    pub binary: bool,
    pub directory: bool,
    pub overwrite: bool,
    pub timeout: u64,
    pub windows: bool,
    pub version: u32,
    pub bufsize: u64,
    pub escape_chars: Option<Vec<u8>>,
    pub tmux_pane_width: Option<u32>,
    pub tmux_output_junk: bool,
    pub compress: String,
}

impl CfgWire {
    pub fn from_config(cfg: &TransferConfig) -> Self {
        CfgWire {
            quiet: cfg.quiet,
            binary: cfg.binary,
            directory: cfg.directory,
            overwrite: cfg.overwrite,
            timeout: cfg.timeout_seconds,
            windows: cfg.line_ending == "!\n",
            version: cfg.protocol_version,
            bufsize: cfg.max_buffer_size,
            escape_chars: cfg.escape_table.as_ref().map(|t| t.raw_bytes()),
            tmux_pane_width: cfg.carrier_pane_width,
            tmux_output_junk: cfg.carrier_output_may_contain_junk,
            compress: match cfg.compression {
                CompressionMode::Auto => "auto".into(),
                CompressionMode::Yes => "yes".into(),
                CompressionMode::No => "no".into(),
            },
        }
    }

    pub fn into_config(self) -> TransferConfig {
        let escape_table = self.binary.then(|| match &self.escape_chars {
            Some(bytes) => crate::escape::EscapeTable::new(bytes),
            None => crate::escape::EscapeTable::default_table(),
        });
        TransferConfig {
            quiet: self.quiet,
            binary: self.binary,
            directory: self.directory,
            overwrite: self.overwrite,
            timeout_seconds: self.timeout,
            line_ending: if self.windows { "!\n" } else { "\n" },
            protocol_version: self.version,
            max_buffer_size: TransferConfig::clamp_buffer_size(self.bufsize),
            escape_table,
            carrier_pane_width: self.tmux_pane_width,
            carrier_output_may_contain_junk: self.tmux_output_junk,
            compression: match self.compress.as_str() {
                "yes" => CompressionMode::Yes,
                "no" => CompressionMode::No,
                _ => CompressionMode::Auto,
            },
        }
    }

    pub fn encode(&self) -> Result<String, TrzError> {
        let json = serde_json::to_vec(self).map_err(|e| TrzError::Protocol(e.to_string()))?;
        Ok(crate::codec::short_field_encode(&json))
    }

    pub fn decode(payload: &str) -> Result<Self, TrzError> {
        let bytes = crate::codec::short_field_decode(payload)?;
        serde_json::from_slice(&bytes).map_err(|e| TrzError::Corrupt(format!("CFG json: {e}")))
    }
}

/// Apply the handshake tie-breaks (§4.4): the sender downgrades its
/// protocol version to the receiver's; windows dialect wins if either side
/// flags it; binary mode requires both sides; directory mode requires
/// receiver support.
pub fn negotiate(
    sender_version: u32,
    sender_dialect: Dialect,
    receiver_action: &TransferAction,
    sender_wants_directory: bool,
) -> Result<TransferConfig, TrzError> {
    let protocol_version = sender_version.min(receiver_action.protocol_version);
    if sender_wants_directory && !receiver_action.supports_directory {
        return Err(TrzError::Protocol("receiver does not support directory transfer".into()));
    }
    let windows = sender_dialect == Dialect::Windows || receiver_action.dialect == Dialect::Windows;
    Ok(TransferConfig {
        quiet: false,
        binary: receiver_action.supports_binary,
        directory: sender_wants_directory,
        overwrite: false,
        timeout_seconds: 20,
        line_ending: if windows { "!\n" } else { "\n" },
        protocol_version,
        max_buffer_size: crate::model::MAX_BUFFER_SIZE,
        escape_table: receiver_action
            .supports_binary
            .then(crate::escape::EscapeTable::default_table),
        carrier_pane_width: None,
        carrier_output_may_contain_junk: false,
        compression: CompressionMode::Auto,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_action(binary: bool, directory: bool, windows: bool) -> TransferAction {
        TransferAction {
            dialect: if windows { Dialect::Windows } else { Dialect::Unix },
            protocol_version: 3,
            confirm: true,
            supports_binary: binary,
            supports_directory: directory,
            supports_fork: false,
        }
    }

    #[test]
    fn version_tie_break_takes_minimum() {
        let action = sample_action(true, true, false);
        let cfg = negotiate(5, Dialect::Unix, &action, false).unwrap();
        assert_eq!(cfg.protocol_version, 3);
    }

    #[test]
    fn windows_dialect_wins_line_ending_tie() {
        let action = sample_action(true, true, true);
        let cfg = negotiate(5, Dialect::Unix, &action, false).unwrap();
        assert_eq!(cfg.line_ending, "!\n");
    }

    #[test]
    fn sender_windows_dialect_also_wins_line_ending_tie() {
        let action = sample_action(true, true, false);
        let cfg = negotiate(5, Dialect::Windows, &action, false).unwrap();
        assert_eq!(cfg.line_ending, "!\n");
    }

    #[test]
    fn directory_mode_requires_receiver_support() {
        let action = sample_action(true, false, false);
        let err = negotiate(5, Dialect::Unix, &action, true).unwrap_err();
        assert!(matches!(err, TrzError::Protocol(_)));
    }

    #[test]
    fn binary_mode_falls_back_without_receiver_support() {
        let action = sample_action(false, true, false);
        let cfg = negotiate(5, Dialect::Unix, &action, false).unwrap();
        assert!(!cfg.binary);
        assert!(cfg.escape_table.is_none());
    }

    #[test]
    fn act_wire_round_trips() {
        let action = sample_action(true, true, true);
        let wire = ActWire::from_action(&action);
        let encoded = wire.encode().unwrap();
        let decoded = ActWire::decode(&encoded).unwrap().into_action().unwrap();
        assert_eq!(decoded.protocol_version, action.protocol_version);
        assert_eq!(decoded.dialect, action.dialect);
    }
}
