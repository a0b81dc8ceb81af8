//! Skillforge - stream skill generation from a remote forge service.
//!
//! The client posts a description, decodes the event stream the service
//! answers with, tracks the session through its phases, and keeps a small
//! history of finished skills on disk.
//!
//! Architecture:
//! - `stream` decodes frames and applies records to a session
//! - `session` owns the state machine and the request lifecycle
//! - `history` persists completed sessions, newest first, capped at 20
//! - `cli` is the command-line front end

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod session;
pub mod stream;
