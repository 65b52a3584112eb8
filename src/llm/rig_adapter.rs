//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{CompletionModel, Prompt};

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};

/// Default output budget when the request does not set one (Anthropic requires it).
const DEFAULT_MAX_TOKENS: u64 = 1024;

/// Adapter that runs our requests through a rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let max_tokens = request
            .max_tokens
            .map(u64::from)
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let mut builder = AgentBuilder::new(self.model.clone())
            .temperature(f64::from(request.temperature))
            .max_tokens(max_tokens);
        if let Some(system) = request.system_prompt() {
            builder = builder.preamble(&system);
        }
        let agent = builder.build();

        let prompt = request.user_prompt();
        let content = agent
            .prompt(prompt.as_str())
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.model_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
        })
    }
}
