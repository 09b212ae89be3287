//! Pluggable language-model gateway.
//!
//! Three concrete backends (`ollama`, `openai`, `gemini`) sit behind one
//! contract: `generate(prompt, max_tokens) → text`. The [`Gateway`] wrapper
//! applies the cross-backend policies — minimum token floor, one retry with
//! backoff on transient failures, and the empty-response guard — so agents
//! never deal with provider quirks.
//!
//! ## Error taxonomy
//!
//! | Variant         | Source              | Policy                    |
//! |-----------------|---------------------|---------------------------|
//! | Unavailable     | network / HTTP 5xx  | retried once with backoff |
//! | RateLimited     | HTTP 429            | fatal, surfaced           |
//! | Auth            | HTTP 401/403        | fatal                     |
//! | EmptyResponse   | empty text          | parse-miss fallback       |
//! | InvalidOutput   | parsing helpers     | parse-miss fallback       |

pub mod gemini;
pub mod json;
pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub use json::extract_json;

use crate::config::{LlmType, PipelineConfig};

/// Floor applied to every `max_tokens`; reasoning models spend tokens before
/// producing text and very low budgets yield empty responses.
pub const DEFAULT_MIN_TOKENS: u32 = 100;

/// Backoff before the single retry of a transient failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Unified error type for all gateway operations.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Backend unreachable or 5xx. Safe to retry once.
    #[error("llm backend unavailable: {0}")]
    Unavailable(String),

    /// HTTP 429 from the provider. Fatal for the run.
    #[error("llm rate limited: {0}")]
    RateLimited(String),

    /// Credentials rejected. Fatal.
    #[error("llm auth rejected: {0}")]
    Auth(String),

    /// The backend produced no text at all.
    #[error("llm returned an empty response")]
    EmptyResponse,

    /// Structured output could not be recovered from the response.
    #[error("llm output unparseable: {0}")]
    InvalidOutput(String),
}

impl LlmError {
    /// True for errors the gateway may retry.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// True for errors that halt the run (no agent-local fallback applies).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Auth(_))
    }
}

/// One language-model backend. Stateless between calls; no cross-request
/// caching is assumed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Backend name for logs (`"ollama"`, `"openai"`, `"gemini"`).
    fn name(&self) -> &'static str;

    /// Generate a completion for `prompt`, spending at most `max_tokens`.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError>;
}

/// Policy wrapper over a backend. This is what agents hold.
pub struct Gateway {
    backend: Arc<dyn LlmClient>,
    min_tokens: u32,
}

impl Gateway {
    pub fn new(backend: Arc<dyn LlmClient>, min_tokens: u32) -> Self {
        Self {
            backend,
            min_tokens,
        }
    }

    /// Backend name, for log context.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Generate with the gateway policies applied.
    ///
    /// # Errors
    ///
    /// [`LlmError::Unavailable`] only after the retry also failed;
    /// [`LlmError::EmptyResponse`] when the backend returned blank text.
    pub async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
        let budget = max_tokens.max(self.min_tokens);

        let text = match self.backend.generate(prompt, budget).await {
            Ok(text) => text,
            Err(e) if e.is_retriable() => {
                warn!(backend = self.backend.name(), error = %e, "transient llm failure, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.backend.generate(prompt, budget).await?
            }
            Err(e) => return Err(e),
        };

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Build the configured backend. Fails when the selected provider is missing
/// its credentials — a persistent configuration problem, surfaced as 503.
pub fn build_backend(config: &PipelineConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.llm_type {
        LlmType::Ollama => Ok(Arc::new(ollama::OllamaClient::new(
            &config.ollama.base_url,
            &config.ollama.model,
        ))),
        LlmType::OpenAi => {
            let key = config.openai.api_key.as_deref().ok_or_else(|| {
                LlmError::Auth("OPENAI_API_KEY is not configured".into())
            })?;
            Ok(Arc::new(openai::OpenAiClient::new(key, &config.openai.model)))
        }
        LlmType::Gemini => {
            let key = config.gemini.api_key.as_deref().ok_or_else(|| {
                LlmError::Auth("GEMINI_API_KEY is not configured".into())
            })?;
            Ok(Arc::new(gemini::GeminiClient::new(key, &config.gemini.model)))
        }
    }
}

/// Deterministic in-process backend for tests.
///
/// Lives outside `#[cfg(test)]` so integration tests can drive full pipeline
/// runs without a provider. Never constructed by production wiring.
pub mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{LlmClient, LlmError};

    /// Replays a scripted sequence of responses, one per `generate` call.
    /// An exhausted script fails the call loudly instead of hanging.
    pub struct ScriptedLlm {
        script: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new(script: Vec<Result<String, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        /// Prompts received so far, in call order.
        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(LlmError::InvalidOutput("scripted llm exhausted".into()))
                })
        }
    }
}

/// Map an HTTP status from any provider into the shared taxonomy.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> LlmError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        LlmError::RateLimited(body.chars().take(200).collect())
    } else if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        LlmError::Auth(format!("status {status}"))
    } else {
        LlmError::Unavailable(format!("status {status}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that fails with a transient error `failures` times, then
    /// succeeds, recording the token budget it was handed.
    struct FlakyBackend {
        failures: AtomicU32,
        seen_tokens: AtomicU32,
        reply: String,
    }

    #[async_trait]
    impl LlmClient for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn generate(&self, _prompt: &str, max_tokens: u32) -> Result<String, LlmError> {
            self.seen_tokens.store(max_tokens, Ordering::SeqCst);
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                (f > 0).then(|| f - 1)
            }).is_ok()
            {
                return Err(LlmError::Unavailable("connection refused".into()));
            }
            Ok(self.reply.clone())
        }
    }

    fn flaky(failures: u32, reply: &str) -> Arc<FlakyBackend> {
        Arc::new(FlakyBackend {
            failures: AtomicU32::new(failures),
            seen_tokens: AtomicU32::new(0),
            reply: reply.into(),
        })
    }

    #[tokio::test]
    async fn test_gateway_enforces_min_tokens() {
        let backend = flaky(0, "ok");
        let gateway = Gateway::new(backend.clone(), DEFAULT_MIN_TOKENS);
        gateway.generate("p", 5).await.unwrap();
        assert_eq!(backend.seen_tokens.load(Ordering::SeqCst), DEFAULT_MIN_TOKENS);
    }

    #[tokio::test]
    async fn test_gateway_passes_larger_budgets_through() {
        let backend = flaky(0, "ok");
        let gateway = Gateway::new(backend.clone(), DEFAULT_MIN_TOKENS);
        gateway.generate("p", 2048).await.unwrap();
        assert_eq!(backend.seen_tokens.load(Ordering::SeqCst), 2048);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_retries_transient_once() {
        let backend = flaky(1, "recovered");
        let gateway = Gateway::new(backend, DEFAULT_MIN_TOKENS);
        let text = gateway.generate("p", 100).await.unwrap();
        assert_eq!(text, "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_gives_up_after_second_failure() {
        let backend = flaky(2, "never");
        let gateway = Gateway::new(backend, DEFAULT_MIN_TOKENS);
        let err = gateway.generate("p", 100).await.unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_gateway_raises_on_empty_response() {
        let mut mock = MockLlmClient::new();
        mock.expect_name().return_const("mock");
        mock.expect_generate()
            .returning(|_, _| Ok("   \n".to_string()));
        let gateway = Gateway::new(Arc::new(mock), DEFAULT_MIN_TOKENS);
        let err = gateway.generate("p", 100).await.unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_gateway_does_not_retry_fatal_errors() {
        let mut mock = MockLlmClient::new();
        mock.expect_name().return_const("mock");
        mock.expect_generate()
            .times(1)
            .returning(|_, _| Err(LlmError::Auth("bad key".into())));
        let gateway = Gateway::new(Arc::new(mock), DEFAULT_MIN_TOKENS);
        let err = gateway.generate("p", 100).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "slow down"),
            LlmError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED, ""),
            LlmError::Auth(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, ""),
            LlmError::Unavailable(_)
        ));
    }
}
