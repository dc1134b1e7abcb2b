//! Model adapter contract
//!
//! Provider SDKs sit behind [`ModelAdapter`]: given a conversation it yields a
//! typed event stream plus lazily resolved usage. [`ScriptedAdapter`] plays a
//! fixed script and backs the tests and the headless runner.

pub mod adapter;
pub mod scripted;

pub use adapter::{
    GenerateRequest, LazyProviderMetadata, LazyUsage, ModelAdapter, ModelEvent, ModelEventStream,
    ModelResponse, ToolDefinition,
};
#[cfg(test)]
pub use adapter::MockModelAdapter;
pub use scripted::{ScriptStep, ScriptedAdapter};
