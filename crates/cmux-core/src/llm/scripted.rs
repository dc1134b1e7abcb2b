//! Deterministic adapter that replays a fixed script of model events

use super::adapter::{GenerateRequest, ModelAdapter, ModelEvent, ModelResponse};
use crate::error::{CmuxError, CmuxResult, ProviderError};
use async_trait::async_trait;
use cmux_session::LanguageModelUsage;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One scripted event, optionally preceded by a pause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptStep {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub event: ModelEvent,
}

impl From<ModelEvent> for ScriptStep {
    fn from(event: ModelEvent) -> Self {
        Self { delay_ms: 0, event }
    }
}

#[derive(Debug, Clone)]
enum UsageScript {
    Ready(Option<LanguageModelUsage>),
    Never,
}

/// Replays the same script for every `generate` call.
///
/// The stream ends when the request's cancellation token fires, so stopping a
/// stalled script behaves like aborting a real provider request.
#[derive(Debug)]
pub struct ScriptedAdapter {
    steps: Vec<ScriptStep>,
    stall: bool,
    fail_with: Option<ProviderError>,
    usage: UsageScript,
    provider_metadata: Option<serde_json::Value>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedAdapter {
    pub fn new(events: Vec<ModelEvent>) -> Self {
        Self::from_steps(events.into_iter().map(ScriptStep::from).collect())
    }

    pub fn from_steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            stall: false,
            fail_with: None,
            usage: UsageScript::Ready(None),
            provider_metadata: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Load a script with one JSON step per line. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn from_jsonl(path: &Path) -> CmuxResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CmuxError::config_with_context(
                format!("Failed to read script: {}", e),
                path.display().to_string(),
            )
        })?;

        let mut steps = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let step: ScriptStep = serde_json::from_str(line).map_err(|e| {
                CmuxError::invalid_field(
                    "script",
                    format!("{}:{}: {}", path.display(), index + 1, e),
                )
            })?;
            steps.push(step);
        }

        Ok(Self::from_steps(steps))
    }

    /// After the script runs out, keep the stream open until cancelled
    pub fn then_stall(mut self) -> Self {
        self.stall = true;
        self
    }

    /// Fail every `generate` call before any event is produced
    pub fn fail_with(mut self, error: ProviderError) -> Self {
        self.fail_with = Some(error);
        self
    }

    pub fn with_usage(mut self, usage: LanguageModelUsage) -> Self {
        self.usage = UsageScript::Ready(Some(usage));
        self
    }

    /// Usage future that never completes
    pub fn usage_never_resolves(mut self) -> Self {
        self.usage = UsageScript::Never;
        self
    }

    pub fn with_provider_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.provider_metadata = Some(metadata);
        self
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    async fn generate(&self, request: GenerateRequest) -> Result<ModelResponse, ProviderError> {
        let cancellation = request.cancellation.clone();
        self.requests.lock().push(request);

        if let Some(error) = &self.fail_with {
            return Err(error.clone());
        }

        let script = futures::stream::iter(self.steps.clone()).then(|step| async move {
            if step.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.delay_ms)).await;
            }
            step.event
        });
        let events = if self.stall {
            script.chain(futures::stream::pending()).boxed()
        } else {
            script.boxed()
        };
        let events = events.take_until(cancellation.cancelled_owned()).boxed();

        let usage = match self.usage.clone() {
            UsageScript::Ready(usage) => futures::future::ready(usage).boxed(),
            UsageScript::Never => futures::future::pending().boxed(),
        };
        let metadata = futures::future::ready(self.provider_metadata.clone()).boxed();

        Ok(ModelResponse::new(events)
            .with_usage(usage)
            .with_provider_metadata(metadata))
    }
}
