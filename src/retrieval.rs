//! Retrieval engine: embeds the query, runs a scoped nearest-neighbour
//! search, and renders a size-capped context block for the generator
//! prompt. Retrieval never retries; the orchestrator degrades to an empty
//! context on any failure here.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::embeddings::Embedder;
use crate::error::CoreResult;
use crate::locale::Locale;
use crate::models::SearchHit;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub enabled: bool,
    pub top_k: usize,
    pub similarity_floor: f64,
    pub max_context_chars: usize,
}

impl RetrievalParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.rag_enabled,
            top_k: config.rag_top_k,
            similarity_floor: config.rag_similarity_floor,
            max_context_chars: config.rag_max_context_chars,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub context: String,
    pub hits: Vec<SearchHit>,
    pub query: String,
    pub count: usize,
}

impl RetrievalOutcome {
    fn empty(query: &str) -> Self {
        Self {
            context: String::new(),
            hits: Vec::new(),
            query: query.to_string(),
            count: 0,
        }
    }
}

pub struct Retriever {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    params: RetrievalParams,
    locale: &'static Locale,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        params: RetrievalParams,
        locale: &'static Locale,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
            locale,
        }
    }

    pub async fn search(&self, query: &str, chat_scope_id: i64) -> CoreResult<RetrievalOutcome> {
        if !self.params.enabled {
            debug!("retrieval is disabled");
            return Ok(RetrievalOutcome::empty(query));
        }

        let started = std::time::Instant::now();
        let query_embedding = self.embedder.embed_one(query).await?;

        let hits = self
            .store
            .search(
                &query_embedding,
                self.params.similarity_floor,
                self.params.top_k,
                chat_scope_id,
            )
            .await?;

        let context = render_context(
            &hits,
            self.params.max_context_chars,
            self.locale,
            Utc::now(),
        );

        info!(
            results = hits.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "retrieval completed"
        );

        Ok(RetrievalOutcome {
            context,
            count: hits.len(),
            hits,
            query: query.to_string(),
        })
    }
}

/// Renders the context block: localized header, one line per hit in result
/// order, accumulated by character count. When the next line would push the
/// total past `max_chars`, rendering stops and a trailer reports how many
/// hits were omitted. The block ends with a blank line.
pub fn render_context(
    hits: &[SearchHit],
    max_chars: usize,
    locale: &Locale,
    now: DateTime<Utc>,
) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let mut out = String::from(locale.context_header);
    let mut total = out.chars().count();

    for (i, hit) in hits.iter().enumerate() {
        let line = locale.context_line(
            i + 1,
            &hit.author_label(),
            &locale.time_ago(hit.created_at, now),
            hit.similarity,
            &hit.body,
        );

        let line_chars = line.chars().count();
        if total + line_chars > max_chars {
            out.push_str(&locale.context_omitted(hits.len() - i));
            break;
        }

        out.push_str(&line);
        total += line_chars;
    }

    out.push('\n');
    out
}
