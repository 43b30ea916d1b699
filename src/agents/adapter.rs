//! Adapter from an untyped text-completion backend to the typed
//! [`Agent`](super::Agent) contract.
//!
//! [`JsonAgent`] serializes the typed input, appends it to a fixed
//! instruction prompt, and recovers the typed output from the reply with
//! [`extract_payload`], tolerating the fences and prose that
//! text backends wrap their JSON in.

use super::{Agent, AgentError};
use crate::utils::extract::extract_payload;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

/// Minimal surface a model provider has to offer: prompt in, text out.
///
/// Implementations classify their own failures via [`AgentError`]
/// constructors so retry and rollback policies upstream see accurate
/// fault kinds.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AgentError>;
}

/// Typed agent over a [`TextCompletion`] backend.
pub struct JsonAgent<I, O> {
    backend: Arc<dyn TextCompletion>,
    instructions: String,
    _io: PhantomData<fn(I) -> O>,
}

impl<I, O> JsonAgent<I, O> {
    pub fn new(backend: Arc<dyn TextCompletion>, instructions: impl Into<String>) -> Self {
        Self {
            backend,
            instructions: instructions.into(),
            _io: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O> Agent<I, O> for JsonAgent<I, O>
where
    I: Serialize + Send + Sync + 'static,
    O: DeserializeOwned + Send + Sync + 'static,
{
    async fn execute(&self, input: I) -> Result<O, AgentError> {
        let payload =
            serde_json::to_string_pretty(&input).map_err(|err| AgentError::MalformedOutput {
                detail: format!("input did not encode to JSON: {err}"),
            })?;
        let prompt = format!("{}\n\n{}", self.instructions, payload);
        let raw = self.backend.complete(&prompt).await?;
        let value = extract_payload(&raw).map_err(|err| AgentError::MalformedOutput {
            detail: err.to_string(),
        })?;
        serde_json::from_value(value).map_err(|err| AgentError::MalformedOutput {
            detail: format!("payload shape mismatch: {err}"),
        })
    }
}
