//! Multiplexer control-mode adapter (C7, §4.7): wraps outgoing control
//! messages in the multiplexer's `send -t <pane> 0x...` form, split to the
//! multiplexer's command-length limit, and parses `%begin ... %end` /
//! `%output` / `%extended-output` framing on input.

/// Multiplexer command batches are capped at 1000 literal characters or 125
/// hex tokens, whichever is tighter (the 1024-byte command limit).
const MAX_LITERAL_CHARS: usize = 1000;
const MAX_HEX_TOKENS: usize = 125;

/// Encode `payload` as one or more `send -t <pane> ...` command batches.
pub fn encode_send_keys(pane: &str, payload: &[u8]) -> Vec<String> {
    let tokens: Vec<String> = payload.iter().map(|b| format!("0x{b:02x}")).collect();
    tokens
        .chunks(MAX_HEX_TOKENS.min(MAX_LITERAL_CHARS / 5))
        .map(|chunk| format!("send -t {pane} {}", chunk.join(" ")))
        .collect()
}

/// One line of multiplexer output, demultiplexed for the current pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlModeLine {
    /// `%output %<pane> <escaped bytes>` — normal output for a pane.
    Output { pane: String, data: Vec<u8> },
    /// `%extended-output %<pane> <age> : <escaped bytes>` — output flushed
    /// after a delay, carrying its age in milliseconds.
    ExtendedOutput { pane: String, age_ms: u64, data: Vec<u8> },
    /// `%begin <ts> <num> <flags>` — start of a command reply block.
    Begin,
    /// `%end <ts> <num> <flags>` — end of a command reply block.
    End,
    /// Anything else the adapter does not specifically interpret.
    Other(String),
}

/// Parse one line of multiplexer control-mode output (already separated on
/// `\n` by the line buffer) into a [`ControlModeLine`].
pub fn parse_control_line(line: &str) -> ControlModeLine {
    if let Some(rest) = line.strip_prefix("%output ") {
        let mut parts = rest.splitn(2, ' ');
        let pane = parts.next().unwrap_or_default().to_string();
        let data = parts.next().unwrap_or_default();
        return ControlModeLine::Output {
            pane,
            data: unescape_octal(data),
        };
    }
    if let Some(rest) = line.strip_prefix("%extended-output ") {
        let mut parts = rest.splitn(3, ' ');
        let pane = parts.next().unwrap_or_default().to_string();
        let age_ms = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let data = parts.next().unwrap_or_default().trim_start_matches(": ");
        return ControlModeLine::ExtendedOutput {
            pane,
            age_ms,
            data: unescape_octal(data),
        };
    }
    if line.starts_with("%begin") {
        return ControlModeLine::Begin;
    }
    if line.starts_with("%end") {
        return ControlModeLine::End;
    }
    ControlModeLine::Other(line.to_string())
}

/// Multiplexer control mode backslash-escapes non-printable bytes as octal
/// (`\NNN`) and doubles literal backslashes.
fn unescape_octal(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes.get(i + 1) == Some(&b'\\') {
                out.push(b'\\');
                i += 2;
                continue;
            }
            if i + 4 <= bytes.len() && bytes[i + 1..i + 4].iter().all(|b| b.is_ascii_digit()) {
                let octal = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("0");
                if let Ok(v) = u8::from_str_radix(octal, 8) {
                    out.push(v);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_and_splits_by_hex_token_limit() {
        let payload = vec![0x41u8; 300];
        let batches = encode_send_keys("%1", &payload);
        assert!(batches.len() > 1);
        for b in &batches {
            assert!(b.starts_with("send -t %1 "));
        }
    }

    #[test]
    fn parses_output_line() {
        let line = "%output %1 hello\\040world";
        match parse_control_line(line) {
            ControlModeLine::Output { pane, data } => {
                assert_eq!(pane, "%1");
                assert_eq!(data, b"hello world");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_begin_and_end() {
        assert_eq!(parse_control_line("%begin 1 2 3"), ControlModeLine::Begin);
        assert_eq!(parse_control_line("%end 1 2 3"), ControlModeLine::End);
    }
}
