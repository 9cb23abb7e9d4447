use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::llm::prompts::MAX_RESPONSE_CHARS;
use crate::locale::Locale;

const MAX_RETRIES: u32 = 3;

/// The single operation the generator service exposes. Tier selection is
/// the opaque model string.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> CoreResult<String>;
}

pub struct LlmClient {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: OnceCell<Client<OpenAIConfig>>,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            timeout: Duration::from_secs(config.llm_timeout_secs),
            client: OnceCell::new(),
        }
    }

    /// Create-once accessor; the client is shared across tasks afterwards.
    async fn client(&self) -> &Client<OpenAIConfig> {
        self.client
            .get_or_init(|| async {
                let config = OpenAIConfig::new()
                    .with_api_base(&self.base_url)
                    .with_api_key(&self.api_key);
                debug!("generator client created");
                Client::with_config(config)
            })
            .await
    }

    async fn request(&self, model: &str, prompt: &str) -> CoreResult<String> {
        let message: ChatCompletionRequestMessage = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| CoreError::InvalidArgument(format!("bad generation request: {e}")))?
            .into();

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(vec![message])
            .build()
            .map_err(|e| CoreError::InvalidArgument(format!("bad generation request: {e}")))?;

        let response = self
            .client()
            .await
            .chat()
            .create(request)
            .await
            .map_err(|e| CoreError::Transient(format!("generation request failed: {e}")))?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(CoreError::Protocol("no content in generator response".into()));
        }
        Ok(text)
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(&self, model: &str, prompt: &str) -> CoreResult<String> {
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                warn!(model, attempt = attempt + 1, ?backoff, "retrying generation request");
                tokio::time::sleep(backoff).await;
            }

            match tokio::time::timeout(self.timeout, self.request(model, prompt)).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) if e.is_transient() => last_err = Some(e),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_err = Some(CoreError::Transient(format!(
                        "generation timed out after {:?}",
                        self.timeout
                    )))
                }
            }
        }

        Err(last_err.unwrap_or_else(|| CoreError::Transient("generation failed".into())))
    }
}

/// Truncates a reply to the platform-safe cap by characters, appending the
/// localized marker. Replies within the cap pass through untouched.
pub fn enforce_response_cap(text: String, locale: &Locale) -> String {
    let total = text.chars().count();
    if total <= MAX_RESPONSE_CHARS {
        return text;
    }

    let marker_len = locale.response_truncated_marker.chars().count();
    warn!(
        original_length = total,
        cap = MAX_RESPONSE_CHARS,
        "response exceeds cap, truncating"
    );

    let keep = MAX_RESPONSE_CHARS.saturating_sub(marker_len);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(locale.response_truncated_marker);
    truncated
}
