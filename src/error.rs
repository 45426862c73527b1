//! Error kinds for the transfer engine.
//!
//! Mirrors the wire-visible failure categories (`fail`/`FAIL`/`EXIT`/panic)
//! alongside purely local kinds that never reach the peer.

use thiserror::Error;

/// Category tag carried on the wire alongside an [`Error`] message, or the
/// empty string for a local-only error that is never sent to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// `fail` — user-initiated stop, not printed as a stack on the peer.
    Fail,
    /// `FAIL` — user-visible local failure.
    Fatal,
    /// `EXIT` — clean remote termination.
    Exit,
    /// No category: local internal error, never transmitted.
    Local,
}

impl Category {
    pub fn wire_tag(self) -> Option<&'static str> {
        match self {
            Category::Fail => Some("fail"),
            Category::Fatal => Some("FAIL"),
            Category::Exit => Some("EXIT"),
            Category::Local => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum TrzError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("corrupt payload: {0}")]
    Corrupt(String),

    #[error("corrupt escape sequence: {0}")]
    CorruptEscape(String),

    #[error("timed out waiting for carrier data")]
    Timeout,

    #[error("stopped by user")]
    Stopped,

    #[error("stopped by user, partial files deleted")]
    StoppedAndDeleted,

    #[error("destination name collision: exhausted {0} rename attempts")]
    Collision(u32),

    #[error("remote exited: {0}")]
    RemoteExit(String),

    #[error("remote reported failure: {0}")]
    RemoteFail(String),

    #[error("internal panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TrzError {
    /// The category this error is reported under when sent to the peer, and
    /// whether a trace snapshot should be appended (see §7 Error Handling).
    pub fn category(&self) -> (Category, bool) {
        match self {
            TrzError::Stopped => (Category::Fail, false),
            TrzError::StoppedAndDeleted => (Category::Fail, false),
            TrzError::RemoteExit(_) => (Category::Exit, false),
            TrzError::RemoteFail(_) => (Category::Fatal, false),
            TrzError::Panic(_) => (Category::Fatal, true),
            TrzError::Protocol(_)
            | TrzError::Corrupt(_)
            | TrzError::CorruptEscape(_)
            | TrzError::Timeout
            | TrzError::Collision(_)
            | TrzError::Io(_) => (Category::Fatal, false),
        }
    }

    /// Downgrade an arbitrary error bubbling up from a collaborator into the
    /// wire category the protocol state machine should report. Errors that
    /// are already a [`TrzError`] keep their own classification.
    pub fn classify(err: &anyhow::Error) -> (Category, bool, String) {
        if let Some(trz) = err.downcast_ref::<TrzError>() {
            let (cat, trace) = trz.category();
            return (cat, trace, trz.to_string());
        }
        (Category::Fatal, false, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrzError>;
