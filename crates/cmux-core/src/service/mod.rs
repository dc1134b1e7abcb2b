//! Session orchestration on top of the stream manager

mod ai_service;

pub use ai_service::{AiService, SendMessageOptions};
