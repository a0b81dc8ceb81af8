//! Generation session state machine and its controller.

mod controller;
mod state;

pub use controller::{Canceller, SessionController, SessionOutcome};
pub use state::{GenerationSession, Phase};
