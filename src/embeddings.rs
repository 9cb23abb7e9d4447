//! Embedding client. Produces fixed-dimension dense vectors through an
//! OpenAI-compatible embeddings endpoint, with transparent batch splitting
//! and transient-failure retry.

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};

const MAX_RETRIES: u32 = 3;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>>;

    /// Same length and order as the input. Inputs larger than the batch cap
    /// are split into contiguous chunks transparently.
    async fn embed_many(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;
}

pub struct EmbeddingClient {
    base_url: String,
    api_key: String,
    model: String,
    batch_size: usize,
    timeout: Duration,
    client: OnceCell<Client<OpenAIConfig>>,
}

impl EmbeddingClient {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config.embedding_base_url.clone(),
            api_key: config.embedding_api_key.clone(),
            model: config.embedding_model.clone(),
            batch_size: config.embedding_batch_size,
            timeout: Duration::from_secs(config.embedding_timeout_secs),
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
                debug!(model = %self.model, "embedding client created");
                Client::with_config(config)
            })
            .await
    }

    async fn process_chunk(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                warn!(attempt = attempt + 1, ?backoff, "retrying embedding request");
                tokio::time::sleep(backoff).await;
            }

            match tokio::time::timeout(self.timeout, self.request_chunk(texts)).await {
                Ok(Ok(vectors)) => return Ok(vectors),
                Ok(Err(e)) if e.is_transient() => last_err = Some(e),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_err = Some(CoreError::Transient(format!(
                        "embedding request timed out after {:?}",
                        self.timeout
                    )))
                }
            }
        }

        Err(last_err.unwrap_or_else(|| CoreError::Transient("embedding request failed".into())))
    }

    async fn request_chunk(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(texts.to_vec())
            .build()
            .map_err(|e| CoreError::InvalidArgument(format!("bad embedding request: {e}")))?;

        let response = self
            .client()
            .await
            .embeddings()
            .create(request)
            .await
            .map_err(|e| CoreError::Transient(format!("embedding request failed: {e}")))?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);

        if data.len() != texts.len() {
            return Err(CoreError::Protocol(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        if data.iter().any(|d| d.embedding.is_empty()) {
            return Err(CoreError::Protocol("empty embedding received".into()));
        }

        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>> {
        let vectors = self.embed_many(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Protocol("no embedding generated".into()))
    }

    async fn embed_many(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if texts.len() <= self.batch_size {
            return self.process_chunk(texts).await;
        }

        debug!(
            total = texts.len(),
            batch_size = self.batch_size,
            "splitting embedding input into chunks"
        );

        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let vectors = self.process_chunk(chunk).await?;
            all.extend(vectors);
        }
        Ok(all)
    }
}
