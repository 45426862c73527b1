//! Line Buffer (C1, §4.1): single-producer/single-consumer buffer turning
//! carrier bytes into delimited frames, with tmux-junk skipping and
//! per-read deadlines.
//!
//! The producer (carrier reader) and consumer (protocol driver) run as
//! separate tasks, so state lives behind a plain [`std::sync::Mutex`] with
//! only short, non-`.await`-holding critical sections; waiting for new
//! data uses [`Notify`], with the waiter registered before the buffer is
//! re-checked so a push arriving between the check and the wait is never
//! missed.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::timeout as tokio_timeout;

use crate::error::TrzError;

/// Accepted line terminators, tried in this order when reading a line; see
/// [`ReadLinePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLinePolicy {
    /// Bare `\n` only.
    Unix,
    /// `!\n` only (Windows dialect).
    Windows,
    /// Accept `\r\n`, `!\n`, or bare `\n`, in that preference order.
    Any,
}

/// State of the buffer; once stopped, every read fails permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Stopped,
}

struct Inner {
    buf: VecDeque<u8>,
    state: State,
}

/// Byte buffer feeding the protocol state machine. The carrier reader task
/// calls [`LineBuffer::push`] as bytes arrive; the protocol driver calls
/// [`LineBuffer::read_line`] / [`LineBuffer::read_binary`] concurrently from
/// a separate task, so every method takes `&self`.
pub struct LineBuffer {
    inner: Mutex<Inner>,
    notify: Notify,
    /// When set, `read_line` scans for the last `#<type>:` occurrence and
    /// discards everything before it (multiplexer status-line junk, §4.1).
    /// Intended to be set once during setup, before the buffer is shared.
    pub junk_mode: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        LineBuffer {
            inner: Mutex::new(Inner {
                buf: VecDeque::new(),
                state: State::Open,
            }),
            notify: Notify::new(),
            junk_mode: false,
        }
    }

    /// Feed bytes arriving from the carrier. No-op once stopped.
    pub fn push(&self, bytes: &[u8]) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == State::Stopped {
                return;
            }
            inner.buf.extend(bytes);
        }
        self.notify.notify_waiters();
    }

    /// Permanently move to the drained state; every future read fails with
    /// [`TrzError::Stopped`].
    pub fn stop(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = State::Stopped;
            inner.buf.clear();
        }
        self.notify.notify_waiters();
    }

    /// Discard buffered bytes without closing the buffer.
    pub fn drain(&self) {
        self.inner.lock().unwrap().buf.clear();
    }

    fn terminator_len(buf: &VecDeque<u8>, policy: ReadLinePolicy, at: usize) -> Option<usize> {
        let remaining = buf.len() - at;
        if remaining == 0 {
            return None;
        }
        let nth = |i: usize| *buf.get(at + i).unwrap();
        match policy {
            ReadLinePolicy::Unix => (nth(0) == b'\n').then_some(1),
            ReadLinePolicy::Windows => {
                if remaining >= 2 && nth(0) == b'!' && nth(1) == b'\n' {
                    Some(2)
                } else {
                    None
                }
            }
            ReadLinePolicy::Any => {
                if remaining >= 2 && nth(0) == b'\r' && nth(1) == b'\n' {
                    Some(2)
                } else if remaining >= 2 && nth(0) == b'!' && nth(1) == b'\n' {
                    Some(2)
                } else if nth(0) == b'\n' {
                    Some(1)
                } else {
                    None
                }
            }
        }
    }

    /// Scan the whole buffer for a complete line under `policy`, returning
    /// `(line_without_terminator, total_consumed_len)`.
    fn scan_line(buf: &VecDeque<u8>, policy: ReadLinePolicy) -> Option<(Vec<u8>, usize)> {
        for i in 0..buf.len() {
            if let Some(term_len) = Self::terminator_len(buf, policy, i) {
                let line: Vec<u8> = buf.iter().take(i).copied().collect();
                return Some((line, i + term_len));
            }
        }
        None
    }

    /// Return bytes up to and including the next newline (terminator
    /// stripped from the returned value), applying junk-mode skipping if
    /// enabled. Waits up to `deadline` for a complete line to arrive.
    pub async fn read_line(&self, policy: ReadLinePolicy, deadline: Option<Duration>) -> Result<Vec<u8>, TrzError> {
        let start = Instant::now();
        loop {
            // Register before checking so a push racing with this check is
            // never missed (tokio::sync::Notify captures notify_waiters()
            // calls made after notified() is created, even if not yet
            // polled).
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.state == State::Stopped {
                    return Err(TrzError::Stopped);
                }
                if let Some((mut line, consumed)) = Self::scan_line(&inner.buf, policy) {
                    for _ in 0..consumed {
                        inner.buf.pop_front();
                    }
                    drop(inner);
                    if self.junk_mode {
                        line = strip_junk_prefix(&line);
                    }
                    return Ok(line);
                }
            }
            let remaining = match deadline {
                Some(d) => d.checked_sub(start.elapsed()).ok_or(TrzError::Timeout)?,
                None => Duration::from_secs(3600 * 24),
            };
            match tokio_timeout(remaining, notified).await {
                Ok(()) => continue,
                Err(_) => return Err(TrzError::Timeout),
            }
        }
    }

    /// Return exactly `n` bytes, waiting for more data to arrive as needed.
    pub async fn read_binary(&self, n: usize, deadline: Option<Duration>) -> Result<Vec<u8>, TrzError> {
        let start = Instant::now();
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.state == State::Stopped {
                    return Err(TrzError::Stopped);
                }
                if inner.buf.len() >= n {
                    return Ok(inner.buf.drain(..n).collect());
                }
            }
            let remaining = match deadline {
                Some(d) => d.checked_sub(start.elapsed()).ok_or(TrzError::Timeout)?,
                None => Duration::from_secs(3600 * 24),
            };
            match tokio_timeout(remaining, notified).await {
                Ok(()) => continue,
                Err(_) => return Err(TrzError::Timeout),
            }
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the last `#<type>:` occurrence in `line` and return everything from
/// that index forward, discarding leading multiplexer junk.
fn strip_junk_prefix(line: &[u8]) -> Vec<u8> {
    let mut last_hash = None;
    for (i, &b) in line.iter().enumerate() {
        if b == b'#' {
            // A `#<TYPE>:` needs at least one uppercase letter then a colon
            // somewhere later in the line; cheaply check for a following ':'.
            if line[i..].iter().any(|&c| c == b':') {
                last_hash = Some(i);
            }
        }
    }
    match last_hash {
        Some(i) => line[i..].to_vec(),
        None => line.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_a_simple_line() {
        let lb = LineBuffer::new();
        lb.push(b"#ACT:hello\n");
        let line = lb.read_line(ReadLinePolicy::Unix, None).await.unwrap();
        assert_eq!(line, b"#ACT:hello");
    }

    #[tokio::test]
    async fn reads_windows_dialect_line() {
        let lb = LineBuffer::new();
        lb.push(b"#ACT:hi!\n");
        let line = lb.read_line(ReadLinePolicy::Windows, None).await.unwrap();
        assert_eq!(line, b"#ACT:hi");
    }

    #[tokio::test]
    async fn read_binary_returns_exact_length() {
        let lb = LineBuffer::new();
        lb.push(b"0123456789");
        let chunk = lb.read_binary(4, None).await.unwrap();
        assert_eq!(chunk, b"0123");
        let rest = lb.read_binary(6, None).await.unwrap();
        assert_eq!(rest, b"456789");
    }

    #[tokio::test]
    async fn stop_fails_future_reads() {
        let lb = LineBuffer::new();
        lb.stop();
        let err = lb.read_line(ReadLinePolicy::Unix, None).await.unwrap_err();
        assert!(matches!(err, TrzError::Stopped));
    }

    #[tokio::test]
    async fn junk_mode_strips_leading_garbage() {
        let mut lb = LineBuffer::new();
        lb.junk_mode = true;
        lb.push(b"garbage\x1b[2K#SUCC:3\n");
        let line = lb.read_line(ReadLinePolicy::Unix, None).await.unwrap();
        assert_eq!(line, b"#SUCC:3");
    }

    #[tokio::test]
    async fn read_line_times_out() {
        let lb = LineBuffer::new();
        let err = lb
            .read_line(ReadLinePolicy::Unix, Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, TrzError::Timeout));
    }

    #[tokio::test]
    async fn read_line_wakes_on_push_from_another_task() {
        let lb = std::sync::Arc::new(LineBuffer::new());
        let writer = lb.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            writer.push(b"#SUCC:1\n");
        });
        let line = lb.read_line(ReadLinePolicy::Unix, Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(line, b"#SUCC:1");
    }
}
