//! Carrier-facing components: the line buffer (C1), trigger detector (C3),
//! and carrier adapters (C7).

pub mod adapters;
pub mod line_buffer;
pub mod multiplexer;
pub mod trigger;

pub use adapters::{JunkStripper, RelayAdapter};
pub use line_buffer::{LineBuffer, ReadLinePolicy};
pub use trigger::Detector;
