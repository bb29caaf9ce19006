use crate::config::ApiConfig;
use crate::error::{CallError, ConfigError, ErrorKind};
use crate::models::Usage;
use anyhow::{Context, Result};
use async_openai::error::{ApiError, OpenAIError};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
};
use async_openai::{Client, config::OpenAIConfig};
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};

/// Text produced by a successful call
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<Usage>,
}

/// The external capability: submit a prompt to a model, get text or a typed failure
pub trait Generator: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        model: &str,
    ) -> impl Future<Output = Result<Generation, CallError>> + Send;
}

/// Stand-in used for dry runs; never leaves the process
#[derive(Debug, Clone, Copy, Default)]
pub struct Placeholder;

impl Generator for Placeholder {
    async fn generate(&self, _prompt: &str, _model: &str) -> Result<Generation, CallError> {
        Ok(Generation {
            text: String::new(),
            usage: None,
        })
    }
}

/// Chat-completion client for OpenAI-compatible endpoints
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    temperature: f64,
    max_tokens: u32,
}

impl OpenAiGenerator {
    /// Build a generator, reading the API key from the configured environment variable
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.env_var_api_key)
            .map_err(|_| ConfigError::MissingApiKey(config.env_var_api_key.clone()))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &ApiConfig, api_key: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_endpoint);

        Ok(Self {
            client: Client::with_config(openai_config)
                .with_http_client(http_client)
                .with_backoff(single_attempt()),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    /// Build the chat completion request for a single user prompt
    fn build_request(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let user_message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages([user_message])
            .temperature(self.temperature as f32)
            .max_tokens(self.max_tokens.min(u32::from(u16::MAX)) as u16)
            .build()
    }

    /// Extract the generated text and token usage from the API response
    fn extract_generation(response: CreateChatCompletionResponse) -> Result<Generation, CallError> {
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(CallError::new(ErrorKind::Unknown, "empty response"));
        }

        let usage = response.usage.map(|usage| Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        });

        Ok(Generation { text, usage })
    }
}

/// A client retry policy that gives up after the first failure, leaving retries to the runner
fn single_attempt() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}

impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str, model: &str) -> Result<Generation, CallError> {
        let request = self
            .build_request(prompt, model)
            .map_err(|err| CallError::new(ErrorKind::Unknown, err.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|err| classify_error(&err))?;

        Self::extract_generation(response)
    }
}

/// Map a client error onto the failure taxonomy.
///
/// An HTTP error status carrying an error body arrives as `ApiError`; `Reqwest` only
/// covers failures to get a response at all. An error status whose body is not an
/// OpenAI error object surfaces as `JSONDeserialize` and falls through to `Unknown`.
pub fn classify_error(err: &OpenAIError) -> CallError {
    let kind = match err {
        OpenAIError::Reqwest(source) if source.is_timeout() => ErrorKind::Timeout,
        OpenAIError::Reqwest(_) => ErrorKind::TransportError,
        OpenAIError::ApiError(api) => classify_api_error(api),
        _ => ErrorKind::Unknown,
    };
    CallError::new(kind, err.to_string())
}

fn classify_api_error(api: &ApiError) -> ErrorKind {
    let haystack = format!("{:?} {:?} {}", api.code, api.r#type, api.message).to_lowercase();
    if haystack.contains("rate_limit")
        || haystack.contains("rate limit")
        || haystack.contains("too many requests")
        || haystack.contains("insufficient_quota")
    {
        ErrorKind::RateLimited
    } else if haystack.contains("model_not_found")
        || haystack.contains("invalid model")
        || (haystack.contains("model") && haystack.contains("does not exist"))
    {
        ErrorKind::InvalidModel
    } else if haystack.contains("timeout") || haystack.contains("timed out") {
        ErrorKind::Timeout
    } else {
        ErrorKind::Unknown
    }
}

/// Per-model dispatch pacing: a minimum interval between calls to the same model,
/// pushed further out when the model reports rate limiting
pub struct Throttle {
    min_interval: Option<Duration>,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl Throttle {
    pub fn new(rate_limit_rps: f64) -> Self {
        let min_interval = (rate_limit_rps > 0.0).then(|| Duration::from_secs_f64(1.0 / rate_limit_rps));
        Self {
            min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// No pacing at all
    pub fn unlimited() -> Self {
        Self::new(0.0)
    }

    /// Reserve the next dispatch slot for `model` and wait for it
    pub async fn wait_turn(&self, model: &str) {
        let slot = {
            let mut slots = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = slots.get(model).map_or(now, |&next| next.max(now));
            slots.insert(model.to_string(), slot + self.min_interval.unwrap_or_default());
            slot
        };
        sleep_until(slot).await;
    }

    /// Hold off every later dispatch to `model` for at least `delay`
    pub fn back_off(&self, model: &str, delay: Duration) {
        let mut slots = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
        let earliest = Instant::now() + delay;
        let slot = slots.entry(model.to_string()).or_insert(earliest);
        *slot = (*slot).max(earliest);
    }
}
