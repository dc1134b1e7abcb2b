//! Stream manager
//!
//! Owns at most one generation per workspace. A session is registered in
//! `start_stream`, consumed by a background task that mirrors every model
//! event into parts, outbound events and throttled partial writes, and is
//! unregistered by that task on every exit path.

mod manager;
mod processor;
mod replay;
mod session;
mod writer;

pub use manager::{StreamManager, StreamRequest};
pub use session::{StreamInfo, StreamOutcome, StreamSession, StreamState};
