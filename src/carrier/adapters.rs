//! Carrier Adapters (C7, §4.7): line-ending dialect, junk stripping, and
//! relay-mode handshake rewriting. The multiplexer control-mode adapter
//! lives in [`crate::carrier::multiplexer`].

use crate::model::Dialect;

/// Appends the dialect-correct line terminator to a control line body
/// (without trailing newline). All `sendLine` calls route through this.
pub fn send_line(body: &str, dialect: Dialect) -> Vec<u8> {
    let mut out = body.as_bytes().to_vec();
    match dialect {
        Dialect::Windows => out.extend_from_slice(b"!\n"),
        Dialect::Unix => out.push(b'\n'),
    }
    out
}

/// Strips complete multiplexer status-line escape sequences
/// (`\x1bP=...\x1b\\`-style) from `input`, remembering a partial sequence
/// across calls so it can be completed by a later chunk.
#[derive(Debug, Default)]
pub struct JunkStripper {
    /// Bytes of a status-line sequence seen so far but not yet terminated.
    pending: Vec<u8>,
}

impl JunkStripper {
    pub fn new() -> Self {
        JunkStripper::default()
    }

    pub fn strip(&mut self, input: &[u8]) -> Vec<u8> {
        let mut combined = std::mem::take(&mut self.pending);
        combined.extend_from_slice(input);

        let mut out = Vec::with_capacity(combined.len());
        let mut i = 0;
        while i < combined.len() {
            if combined[i] == 0x1b && combined.get(i + 1) == Some(&b'P') {
                match find_st_terminator(&combined[i..]) {
                    Some(len) => {
                        i += len;
                        continue;
                    }
                    None => {
                        // Incomplete sequence: buffer the remainder for the
                        // next call and stop here.
                        self.pending = combined[i..].to_vec();
                        return out;
                    }
                }
            }
            out.push(combined[i]);
            i += 1;
        }
        out
    }
}

/// Find the length of a DCS sequence `\x1bP ... \x1b\\` (string terminator),
/// starting at `seq[0] == 0x1b`. Returns `None` if the terminator has not
/// arrived yet.
fn find_st_terminator(seq: &[u8]) -> Option<usize> {
    let mut j = 2;
    while j + 1 < seq.len() {
        if seq[j] == 0x1b && seq[j + 1] == b'\\' {
            return Some(j + 2);
        }
        j += 1;
    }
    None
}

/// A relay never participates in the data path. It watches the handshake
/// (`ACT`/`CFG`) and forwards it with two tweaks: binary mode is forced off
/// (a relay cannot re-escape what it forwards) and the protocol version is
/// capped to what the relay itself implements. After the handshake it
/// reverts to being a bidirectional pipe.
pub struct RelayAdapter {
    max_protocol_version: u32,
    in_handshake: bool,
}

impl RelayAdapter {
    pub fn new(max_protocol_version: u32) -> Self {
        RelayAdapter {
            max_protocol_version,
            in_handshake: true,
        }
    }

    /// Rewrite a `CFG` payload (already short-field-decoded to a JSON-like
    /// map) to disable binary mode and cap the protocol version. Call only
    /// while `in_handshake()` is true.
    pub fn rewrite_config(&self, cfg: &mut crate::model::TransferConfig) {
        cfg.binary = false;
        cfg.escape_table = None;
        if cfg.protocol_version > self.max_protocol_version {
            cfg.protocol_version = self.max_protocol_version;
        }
    }

    pub fn in_handshake(&self) -> bool {
        self.in_handshake
    }

    /// Called once the `CFG` exchange completes; afterward the relay stops
    /// inspecting traffic and just pipes bytes.
    pub fn end_handshake(&mut self) {
        self.in_handshake = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_line_uses_dialect_terminator() {
        assert_eq!(send_line("#ACT:1", Dialect::Unix), b"#ACT:1\n");
        assert_eq!(send_line("#ACT:1", Dialect::Windows), b"#ACT:1!\n");
    }

    #[test]
    fn junk_stripper_removes_complete_sequence() {
        let mut js = JunkStripper::new();
        let input = b"before\x1bP=1s\x1b\\after";
        let out = js.strip(input);
        assert_eq!(out, b"beforeafter");
    }

    #[test]
    fn junk_stripper_remembers_partial_sequence_across_calls() {
        let mut js = JunkStripper::new();
        let first = js.strip(b"before\x1bP=1s");
        assert_eq!(first, b"before");
        let second = js.strip(b"\x1b\\after");
        assert_eq!(second, b"after");
    }

    #[test]
    fn relay_forces_text_mode_and_caps_version() {
        let relay = RelayAdapter::new(3);
        let mut cfg = crate::model::TransferConfig {
            quiet: false,
            binary: true,
            directory: false,
            overwrite: true,
            timeout_seconds: 10,
            line_ending: "\n",
            protocol_version: 5,
            max_buffer_size: 1 << 20,
            escape_table: Some(crate::escape::EscapeTable::default_table()),
            carrier_pane_width: None,
            carrier_output_may_contain_junk: false,
            compression: crate::model::CompressionMode::Auto,
        };
        relay.rewrite_config(&mut cfg);
        assert!(!cfg.binary);
        assert!(cfg.escape_table.is_none());
        assert_eq!(cfg.protocol_version, 3);
    }
}
