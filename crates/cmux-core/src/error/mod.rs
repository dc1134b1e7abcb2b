//! Error types for cmux
//!
//! `CmuxError` is the crate-wide error. Provider failures arrive as
//! `ProviderError` and are sorted into the `StreamErrorType` taxonomy by the
//! classifiers, which prefer structured provider fields and fall back to
//! message matching.

mod classifiers;
mod constructors;
mod conversions;
mod provider;
mod types;

pub use classifiers::{classify_message, classify_provider_error};
pub use provider::ProviderError;
pub use types::{CmuxError, CmuxResult, UnifiedError};
