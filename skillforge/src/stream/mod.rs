//! Decoding and interpretation of the generation event stream.

mod frame;
mod interpreter;
mod record;

pub use frame::FrameDecoder;
pub use interpreter::{apply, apply_frame, SessionUpdate};
pub use record::{Assessment, Issue, RiskLevel, Severity, StreamRecord};
