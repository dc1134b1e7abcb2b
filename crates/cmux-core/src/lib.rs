//! cmux Core Library
//!
//! This crate drives the streaming session lifecycle of a cmux workspace:
//! error taxonomy, configuration, the outbound event bus, the model adapter
//! contract, the stream manager and the AI service that orchestrates them.

pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod service;
pub mod stream;

pub use cmux_session;

// Re-export commonly used types
pub use config::{CmuxConfig, LoggingConfig, StreamConfig, load_config};
pub use error::{CmuxError, CmuxResult, ProviderError, UnifiedError};
pub use events::{EventBus, StreamEvent, WorkspaceEvent};
pub use llm::{
    GenerateRequest, ModelAdapter, ModelEvent, ModelResponse, ScriptedAdapter, ToolDefinition,
};
pub use service::{AiService, SendMessageOptions};
pub use stream::{StreamInfo, StreamManager, StreamRequest, StreamState};
