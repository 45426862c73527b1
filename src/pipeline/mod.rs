//! Data Pipeline (C5, §4.5): producer -> hasher/codec -> framer -> sender ->
//! ack-receiver, with adaptive chunk sizing and pause/resume heartbeats.

pub mod channel;
pub mod chunk_size;
pub mod receiver;
pub mod sender;

pub use chunk_size::ChunkSizer;
pub use receiver::{resolve_name, validate_path, Receiver};
pub use sender::{PauseFlag, Sender};
