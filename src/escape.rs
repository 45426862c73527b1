//! Byte-level escaping for binary-over-tty mode (C6, §4.6).
//!
//! Grounded on the ZDLE escape-table technique used by ZMODEM
//! implementations: a fixed leader byte precedes a one-byte substitute for
//! every raw byte that cannot survive a tty unmolested.

use crate::error::TrzError;

/// Leader byte that opens every two-byte escape sequence.
pub const LEADER: u8 = 0xEE;

/// Default escape set: `~` and the leader itself.
pub const DEFAULT_RAW_BYTES: &[u8] = &[0x7E, 0xEE];

/// Extended escape set enabled by `-e`/`--escape`: adds common flow-control
/// and terminal-control bytes that some tty drivers intercept.
pub const EXTENDED_RAW_BYTES: &[u8] = &[0x7E, 0xEE, 0x02, 0x10, 0x1B, 0x1D, 0x9D];

/// A set of at most 256 `(raw byte, two-byte escape)` pairs.
///
/// Invariants: raw bytes are pairwise distinct; the leader byte always
/// escapes as `leader, leader`; escaped second bytes are pairwise distinct.
#[derive(Debug, Clone)]
pub struct EscapeTable {
    /// Indexed by raw byte value; `Some(second)` means that byte escapes as
    /// `[LEADER, second]`.
    forward: [Option<u8>; 256],
    /// Indexed by the escape's second byte; maps back to the raw byte.
    reverse: [Option<u8>; 256],
}

impl EscapeTable {
    pub fn new(raw_bytes: &[u8]) -> Self {
        let mut forward = [None; 256];
        let mut reverse = [None; 256];
        let mut next_second: u16 = 0;
        for &raw in raw_bytes {
            let second = if raw == LEADER {
                LEADER
            } else {
                // Assign the next unused second byte, skipping the leader
                // itself so `leader,leader` stays reserved for the leader.
                loop {
                    let candidate = next_second as u8;
                    next_second += 1;
                    if candidate != LEADER && reverse[candidate as usize].is_none() {
                        break candidate;
                    }
                    if next_second > 255 {
                        break candidate;
                    }
                }
            };
            forward[raw as usize] = Some(second);
            reverse[second as usize] = Some(raw);
        }
        EscapeTable { forward, reverse }
    }

    pub fn default_table() -> Self {
        Self::new(DEFAULT_RAW_BYTES)
    }

    pub fn extended_table() -> Self {
        Self::new(EXTENDED_RAW_BYTES)
    }

    pub fn escapes(&self, raw: u8) -> bool {
        self.forward[raw as usize].is_some()
    }

    /// The raw byte set this table was built from, in ascending order. Lets
    /// a table be reconstructed on the other end of the wire (§3 CFG's
    /// `escape_chars` carries exactly this set).
    pub fn raw_bytes(&self) -> Vec<u8> {
        (0..=255u8)
            .filter(|&b| self.forward[b as usize].is_some())
            .collect()
    }
}

/// Substitute every escaped raw byte in `input` with its two-byte sequence.
pub fn escape(input: &[u8], table: &EscapeTable) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for &b in input {
        match table.forward[b as usize] {
            Some(second) => {
                out.push(LEADER);
                out.push(second);
            }
            None => out.push(b),
        }
    }
    out
}

/// Streaming unescaper that survives an escape sequence split across a chunk
/// boundary: when a chunk ends with a bare leader byte, the leader is
/// buffered and prepended to the next chunk before resuming the scan.
#[derive(Debug, Default)]
pub struct Unescaper {
    pending_leader: bool,
}

impl Unescaper {
    pub fn new() -> Self {
        Unescaper { pending_leader: false }
    }

    /// Decode one chunk, returning the unescaped bytes. Call repeatedly on
    /// consecutive chunks of an escaped stream; state carries over between
    /// calls via `self`.
    pub fn decode(&mut self, chunk: &[u8], table: &EscapeTable) -> Result<Vec<u8>, TrzError> {
        let mut out = Vec::with_capacity(chunk.len());
        let mut iter = chunk.iter().copied().peekable();

        if self.pending_leader {
            self.pending_leader = false;
            match iter.next() {
                Some(second) => {
                    let raw = table.reverse[second as usize].ok_or_else(|| {
                        TrzError::CorruptEscape(format!("unknown escape sequence 0x{LEADER:02x}{second:02x}"))
                    })?;
                    out.push(raw);
                }
                None => {
                    // Chunk was exactly the leader byte followed by nothing;
                    // stay pending for the next chunk.
                    self.pending_leader = true;
                    return Ok(out);
                }
            }
        }

        while let Some(b) = iter.next() {
            if b == LEADER {
                match iter.next() {
                    Some(second) => {
                        let raw = table.reverse[second as usize].ok_or_else(|| {
                            TrzError::CorruptEscape(format!(
                                "unknown escape sequence 0x{LEADER:02x}{second:02x}"
                            ))
                        })?;
                        out.push(raw);
                    }
                    None => {
                        self.pending_leader = true;
                    }
                }
            } else {
                out.push(b);
            }
        }
        Ok(out)
    }
}

/// One-shot unescape of a complete (non-streamed) buffer.
pub fn unescape(input: &[u8], table: &EscapeTable) -> Result<Vec<u8>, TrzError> {
    let mut u = Unescaper::new();
    let out = u.decode(input, table)?;
    if u.pending_leader {
        return Err(TrzError::CorruptEscape("truncated escape sequence".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_default_table() {
        let table = EscapeTable::default_table();
        let input = b"hello ~world\xEE\x03\x04".to_vec();
        let escaped = escape(&input, &table);
        let decoded = unescape(&escaped, &table).unwrap();
        assert_eq!(decoded, input);
    }

    #[test]
    fn leader_escapes_as_itself_twice() {
        let table = EscapeTable::default_table();
        let escaped = escape(&[LEADER], &table);
        assert_eq!(escaped, vec![LEADER, LEADER]);
    }

    #[test]
    fn survives_split_at_leader_boundary() {
        let table = EscapeTable::extended_table();
        let input: Vec<u8> = (0..=255u8).collect();
        let full = escape(&input, &table);

        // Split arbitrarily, including exactly after a lone leader byte.
        for split in 0..full.len() {
            let (a, b) = full.split_at(split);
            let mut u = Unescaper::new();
            let mut out = u.decode(a, &table).unwrap();
            out.extend(u.decode(b, &table).unwrap());
            assert!(!u.pending_leader, "split at {split} left a dangling leader");
            assert_eq!(out, input, "split at {split} mismatched");
        }
    }

    #[test]
    fn unknown_escape_sequence_is_corrupt() {
        let table = EscapeTable::default_table();
        // Construct a second byte that was never assigned.
        let mut unused = 0u8;
        while table.reverse[unused as usize].is_some() || unused == LEADER {
            unused = unused.wrapping_add(1);
        }
        let err = unescape(&[LEADER, unused], &table).unwrap_err();
        assert!(matches!(err, TrzError::CorruptEscape(_)));
    }

    proptest::proptest! {
        #[test]
        fn escape_round_trips_any_bytes(input: Vec<u8>) {
            let table = EscapeTable::extended_table();
            let escaped = escape(&input, &table);
            let decoded = unescape(&escaped, &table).unwrap();
            proptest::prop_assert_eq!(decoded, input);
        }

        #[test]
        fn escape_round_trips_across_an_arbitrary_chunk_split(input: Vec<u8>, split_fraction in 0.0f64..1.0f64) {
            let table = EscapeTable::extended_table();
            let split = ((input.len() as f64) * split_fraction) as usize;
            let (a, b) = input.split_at(split);
            let mut u = Unescaper::new();
            let mut out = u.decode(&escape(a, &table), &table).unwrap();
            out.extend(u.decode(&escape(b, &table), &table).unwrap());
            proptest::prop_assert!(!u.pending_leader);
            proptest::prop_assert_eq!(out, input);
        }
    }
}
