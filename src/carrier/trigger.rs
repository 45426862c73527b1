//! Trigger Detector (C3, §4.3): scans carrier-to-client bytes for the
//! transfer-initiation literal, rewrites it so the next hop doesn't
//! retrigger, and suppresses replays.

use std::collections::VecDeque;

use regex::bytes::Regex;

use crate::model::{TransferMode, TriggerRecord};

/// Literal trigger requires at least this much context before it is trusted,
/// to limit spurious matches on arbitrary terminal output.
const MIN_CONTEXT_BYTES: usize = 24;

/// Size of the rolling window of recently-seen unique ids (§9 Open Question:
/// magic number, empirically sufficient).
const DEDUP_WINDOW: usize = 100;

fn trigger_regex() -> Regex {
    Regex::new(r"::TRZSZ:TRANSFER:([SRD]):(\d+)\.(\d+)\.(\d+)(?::(\d{13}))?(?::(\d+))?")
        .expect("trigger regex is a fixed literal")
}

/// Detects the trigger literal in arbitrary terminal output and maintains
/// the dedup window of recently-seen unique ids.
pub struct Detector {
    regex: Regex,
    seen: VecDeque<String>,
}

impl Detector {
    pub fn new() -> Self {
        Detector {
            regex: trigger_regex(),
            seen: VecDeque::with_capacity(DEDUP_WINDOW),
        }
    }

    fn already_seen(&mut self, id: &str) -> bool {
        if self.seen.iter().any(|s| s == id) {
            return true;
        }
        if self.seen.len() >= DEDUP_WINDOW {
            self.seen.pop_front();
        }
        self.seen.push_back(id.to_string());
        false
    }

    /// Scan `output` for the trigger literal. Output that sits inside
    /// multiplexer control-mode wrapping is ignored unless a tunnel
    /// connector is configured and the trigger carries a tunnel port
    /// (`tunnel_configured`).
    ///
    /// Returns the (possibly rewritten) output and, on a fresh match, the
    /// parsed [`TriggerRecord`].
    pub fn scan(&mut self, output: &[u8], tunnel_configured: bool) -> (Vec<u8>, Option<TriggerRecord>) {
        if output.len() < MIN_CONTEXT_BYTES {
            return (output.to_vec(), None);
        }
        if is_multiplexer_wrapped(output) && !tunnel_configured {
            return (output.to_vec(), None);
        }

        let Some(m) = self.regex.captures(output) else {
            return (output.to_vec(), None);
        };

        let mode_char = std::str::from_utf8(&m[1]).unwrap().chars().next().unwrap();
        let mode = TransferMode::from_char(mode_char).expect("regex only matches S|R|D");
        let major: u32 = std::str::from_utf8(&m[2]).unwrap().parse().unwrap_or(0);
        let minor: u32 = std::str::from_utf8(&m[3]).unwrap().parse().unwrap_or(0);
        let patch: u32 = std::str::from_utf8(&m[4]).unwrap().parse().unwrap_or(0);
        let unique_id = m
            .get(5)
            .map(|b| String::from_utf8_lossy(b.as_bytes()).into_owned())
            .unwrap_or_default();
        let tunnel_port = m
            .get(6)
            .and_then(|b| std::str::from_utf8(b.as_bytes()).ok())
            .and_then(|s| s.parse().ok());

        if !unique_id.is_empty() && self.already_seen(&unique_id) {
            return (output.to_vec(), None);
        }

        let server_is_windows = crate::model::TriggerRecord::is_windows_from_id(&unique_id);

        let record = TriggerRecord {
            mode,
            protocol_version: (major, minor, patch),
            unique_id,
            server_is_windows,
            tunnel_port,
            multiplexer_prefix: None,
        };

        let rewritten = rewrite_trigger(output, &self.regex);
        (rewritten, Some(record))
    }

    /// Relay variant: append `#R` after the trigger instead of rewriting
    /// `TRZSZ` to `TRZSZGO`, and optionally flip the platform-tag suffix to
    /// mark the relay path.
    pub fn relay_rewrite(output: &[u8]) -> Vec<u8> {
        let regex = trigger_regex();
        match regex.find(output) {
            Some(m) => {
                let mut out = Vec::with_capacity(output.len() + 2);
                out.extend_from_slice(&output[..m.end()]);
                out.extend_from_slice(b"#R");
                out.extend_from_slice(&output[m.end()..]);
                out
            }
            None => output.to_vec(),
        }
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

/// Idempotent rewrite: substitute the literal `TRZSZ` for `TRZSZGO` in the
/// matched span only, so a second scan over already-rewritten output finds
/// no match (the literal the regex looks for is gone).
fn rewrite_trigger(output: &[u8], regex: &Regex) -> Vec<u8> {
    match regex.find(output) {
        Some(m) => {
            let mut out = Vec::with_capacity(output.len() + 2);
            out.extend_from_slice(&output[..m.start()]);
            let matched = &output[m.start()..m.end()];
            let rewritten = replace_first(matched, b"TRZSZ", b"TRZSZGO");
            out.extend_from_slice(&rewritten);
            out.extend_from_slice(&output[m.end()..]);
            out
        }
        None => output.to_vec(),
    }
}

fn replace_first(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if let Some(pos) = haystack
        .windows(needle.len())
        .position(|w| w == needle)
    {
        let mut out = Vec::with_capacity(haystack.len() + replacement.len() - needle.len());
        out.extend_from_slice(&haystack[..pos]);
        out.extend_from_slice(replacement);
        out.extend_from_slice(&haystack[pos + needle.len()..]);
        out
    } else {
        haystack.to_vec()
    }
}

/// Cheap heuristic: multiplexer control-mode output begins a line with
/// `%output`, `%extended-output`, or `%begin` (see [`crate::carrier::multiplexer`]).
fn is_multiplexer_wrapped(output: &[u8]) -> bool {
    output.starts_with(b"%output")
        || output.starts_with(b"%extended-output")
        || output.starts_with(b"%begin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_trigger_and_rewrites_idempotently() {
        let mut d = Detector::new();
        let input = b"hello ::TRZSZ:TRANSFER:R:1.1.0:1700000000000\r\n";
        let (rewritten, record) = d.scan(input, false);
        let record = record.expect("should detect trigger");
        assert_eq!(record.mode, TransferMode::ReceiveFile);
        assert_eq!(record.protocol_version, (1, 1, 0));
        assert_eq!(record.unique_id, "1700000000000");
        assert!(rewritten.windows(7).any(|w| w == b"TRZSZGO"));

        // Idempotence: scanning the rewritten output again yields nothing new.
        let (_, record2) = d.scan(&rewritten, false);
        assert!(record2.is_none());
    }

    #[test]
    fn suppresses_duplicate_unique_id_within_window() {
        let mut d = Detector::new();
        let make = |id: u64| format!("hello ::TRZSZ:TRANSFER:S:1.0.0:{id:013}\r\n").into_bytes();

        let (_, first) = d.scan(&make(1700000000000), false);
        assert!(first.is_some());

        let (_, repeat) = d.scan(&make(1700000000000), false);
        assert!(repeat.is_none(), "immediate repeat must be suppressed");

        // The window holds 100 ids. `1700000000000` already occupies one
        // slot, so it takes 100 more distinct ids (not 99) to push it out
        // the front: the window must actually fill to capacity and then
        // take one more push before the oldest entry is evicted.
        for id in 1700000000001..=1700000000100 {
            d.scan(&make(id), false);
        }
        let (_, after_window) = d.scan(&make(1700000000000), false);
        assert!(
            after_window.is_some(),
            "repeat after 100 distinct ids should be accepted"
        );
    }

    #[test]
    fn requires_minimum_context() {
        let mut d = Detector::new();
        let (rewritten, record) = d.scan(b"::TRZSZ:T", false);
        assert!(record.is_none());
        assert_eq!(rewritten, b"::TRZSZ:T");
    }

    #[test]
    fn ignored_inside_multiplexer_output_without_tunnel() {
        let mut d = Detector::new();
        let input = b"%output %1 ::TRZSZ:TRANSFER:R:1.1.0:1700000000000\r\n";
        let (_, record) = d.scan(input, false);
        assert!(record.is_none());
    }
}
