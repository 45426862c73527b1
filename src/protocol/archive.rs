//! Archive Packer (C8, §4.4.1): streams a directory subtree as a single
//! logical file. Present only in protocol >= 4 and when `overwrite` is
//! false.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::TrzError;
use crate::model::SourceEntry;

/// Minimum protocol version that carries archive transfers.
pub const MIN_PROTOCOL_VERSION: u32 = 4;

/// Marshaled per-entry header inside an archive body (§4.4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub path_id: u64,
    pub relative_path: Vec<String>,
    pub is_dir: bool,
    pub permissions: u32,
    pub size: u64,
}

impl ArchiveHeader {
    pub fn from_entry(entry: &SourceEntry) -> Self {
        ArchiveHeader {
            path_id: entry.path_id,
            relative_path: entry.relative_path.clone(),
            is_dir: entry.is_dir,
            permissions: entry.permissions,
            size: entry.size,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, TrzError> {
        let json = serde_json::to_vec(self).map_err(|e| TrzError::Protocol(e.to_string()))?;
        Ok(crate::codec::short_field_encode(&json).into_bytes())
    }

    fn decode(bytes: &[u8]) -> Result<Self, TrzError> {
        let text = std::str::from_utf8(bytes).map_err(|e| TrzError::Corrupt(e.to_string()))?;
        let json = crate::codec::short_field_decode(text)?;
        serde_json::from_slice(&json).map_err(|e| TrzError::Corrupt(format!("archive header json: {e}")))
    }
}

/// Flatten an archive root's descendants (depth-first) into
/// `(header, encoded header bytes + newline)` pairs, and compute the total
/// on-wire archive size up front (`SIZE` must be accurate before the first
/// byte is sent).
pub fn plan(root: &SourceEntry) -> (Vec<(ArchiveHeader, Vec<u8>)>, u64) {
    let mut plan = Vec::new();
    let mut total = 0u64;
    flatten(root, &mut plan, &mut total);
    (plan, total)
}

fn flatten(entry: &SourceEntry, out: &mut Vec<(ArchiveHeader, Vec<u8>)>, total: &mut u64) {
    let header = ArchiveHeader::from_entry(entry);
    if let Ok(mut encoded) = header.encode() {
        encoded.push(b'\n');
        *total += encoded.len() as u64 + entry.size;
        out.push((header, encoded));
    }
    for child in &entry.children {
        flatten(child, out, total);
    }
}

/// Write one archive entry (header line, then the raw body) into `out`.
pub fn encode_entry(header: &ArchiveHeader, body: &[u8], out: &mut Vec<u8>) -> Result<(), TrzError> {
    let mut encoded = header.encode()?;
    encoded.push(b'\n');
    out.extend_from_slice(&encoded);
    out.extend_from_slice(body);
    Ok(())
}

/// Event emitted by [`Parser::feed`] as archive bytes arrive.
#[derive(Debug, Clone)]
pub enum ArchiveEvent {
    /// A complete per-entry header has been parsed.
    Header(ArchiveHeader),
    /// Up to `body.len()` further bytes of the current entry's body.
    Body(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    AwaitingHeader,
    AwaitingBody { remaining: u64 },
}

/// Incrementally parses the archive byte stream the receiver sees as it
/// arrives in chunks off the data pipeline (§4.4.1, §4.5).
pub struct Parser {
    buf: VecDeque<u8>,
    state: ParserState,
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            buf: VecDeque::new(),
            state: ParserState::AwaitingHeader,
        }
    }

    /// Feed the next chunk of archive bytes, returning every event that
    /// became parseable as a result.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<ArchiveEvent>, TrzError> {
        self.buf.extend(chunk);
        let mut events = Vec::new();
        loop {
            match self.state {
                ParserState::AwaitingHeader => {
                    let newline_at = self.buf.iter().position(|&b| b == b'\n');
                    let Some(pos) = newline_at else { break };
                    let header_bytes: Vec<u8> = self.buf.drain(..pos).collect();
                    self.buf.pop_front(); // the newline itself
                    let header = ArchiveHeader::decode(&header_bytes)?;
                    let remaining = header.size;
                    events.push(ArchiveEvent::Header(header));
                    self.state = ParserState::AwaitingBody { remaining };
                }
                ParserState::AwaitingBody { remaining } => {
                    if remaining == 0 {
                        self.state = ParserState::AwaitingHeader;
                        continue;
                    }
                    if self.buf.is_empty() {
                        break;
                    }
                    let take = (remaining as usize).min(self.buf.len());
                    let body: Vec<u8> = self.buf.drain(..take).collect();
                    let remaining_after = remaining - take as u64;
                    events.push(ArchiveEvent::Body(body));
                    self.state = if remaining_after == 0 {
                        ParserState::AwaitingHeader
                    } else {
                        ParserState::AwaitingBody { remaining: remaining_after }
                    };
                }
            }
        }
        Ok(events)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path_id: u64, rel: &[&str], is_dir: bool, size: u64) -> SourceEntry {
        SourceEntry {
            path_id,
            absolute_path: rel.join("/").into(),
            relative_path: rel.iter().map(|s| s.to_string()).collect(),
            is_dir,
            archive: false,
            size,
            permissions: 0o644,
            header_payload: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn plan_flattens_and_sums_size() {
        let mut root = entry(1, &["d"], true, 0);
        root.children.push(entry(1, &["d", "f1"], false, 3));
        root.children.push(entry(1, &["d", "sub", "f2"], false, 0));
        let (plan, _total) = plan(&root);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[1].0.size, 3);
    }

    #[test]
    fn parser_round_trips_single_entry() {
        let e = entry(1, &["f1"], false, 5);
        let header = ArchiveHeader::from_entry(&e);
        let mut wire = Vec::new();
        encode_entry(&header, b"hello", &mut wire).unwrap();

        let mut parser = Parser::new();
        let events = parser.feed(&wire).unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ArchiveEvent::Header(h) => assert_eq!(h.relative_path, vec!["f1".to_string()]),
            _ => panic!("expected header first"),
        }
        match &events[1] {
            ArchiveEvent::Body(b) => assert_eq!(b, b"hello"),
            _ => panic!("expected body second"),
        }
    }

    #[test]
    fn parser_handles_body_split_across_feeds() {
        let e = entry(1, &["f1"], false, 5);
        let header = ArchiveHeader::from_entry(&e);
        let mut wire = Vec::new();
        encode_entry(&header, b"hello", &mut wire).unwrap();

        let split = wire.len() - 2;
        let mut parser = Parser::new();
        let mut events = parser.feed(&wire[..split]).unwrap();
        events.extend(parser.feed(&wire[split..]).unwrap());

        let body: Vec<u8> = events
            .into_iter()
            .filter_map(|e| match e {
                ArchiveEvent::Body(b) => Some(b),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn parser_handles_zero_size_entries_back_to_back() {
        let a = entry(1, &["empty1"], false, 0);
        let b = entry(1, &["empty2"], false, 0);
        let mut wire = Vec::new();
        encode_entry(&ArchiveHeader::from_entry(&a), b"", &mut wire).unwrap();
        encode_entry(&ArchiveHeader::from_entry(&b), b"", &mut wire).unwrap();

        let mut parser = Parser::new();
        let events = parser.feed(&wire).unwrap();
        let headers: Vec<_> = events
            .into_iter()
            .filter_map(|e| match e {
                ArchiveEvent::Header(h) => Some(h.relative_path),
                _ => None,
            })
            .collect();
        assert_eq!(headers, vec![vec!["empty1".to_string()], vec!["empty2".to_string()]]);
    }
}
