#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use groupmind::bot::Bot;
use groupmind::config::Config;
use groupmind::digest::DigestGenerator;
use groupmind::embeddings::Embedder;
use groupmind::error::{CoreError, CoreResult};
use groupmind::indexer::SyncJob;
use groupmind::llm::Generator;
use groupmind::locale::EN;
use groupmind::models::{
    ChatMessage, DailyDigest, NewMessage, QuotaUsage, RequestLog, SearchHit, Tier,
    UserMessageCount,
};
use groupmind::quota::QuotaGovernor;
use groupmind::retrieval::{RetrievalParams, Retriever};
use groupmind::scheduler::Scheduler;
use groupmind::store::Store;
use groupmind::telegram::api::{ChatSender, ParseMode};
use groupmind::telegram::{Chat, Message, User};

pub const CHAT: i64 = -1_001_750_074_031;
pub const DIM: usize = 8;

/// Deterministic embedding with a spike at `seed`; distinct seeds give
/// near-orthogonal vectors.
pub fn spike_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[seed % DIM] = 1.0;
    v
}

/// Vector whose cosine similarity to the `[1, 0, ...]` axis is `sim`,
/// using `other_axis` for the orthogonal component.
pub fn vector_with_similarity(sim: f32, other_axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIM];
    v[0] = sim;
    v[other_axis % (DIM - 1) + 1] = (1.0 - sim * sim).sqrt();
    v
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)) as f64
}

#[derive(Default)]
struct StoreState {
    messages: Vec<ChatMessage>,
    next_id: i64,
    quotas: HashMap<(i64, NaiveDate), (u32, u32)>,
    digests: HashMap<(i64, NaiveDate), DailyDigest>,
    request_logs: Vec<RequestLog>,
}

/// In-memory store with the same observable semantics as the real facade:
/// idempotent capture, cosine search over indexed rows, atomic-ish quota
/// upsert, digest upsert.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    timezone: Tz,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            timezone: chrono_tz::UTC,
        }
    }

    pub fn seed_message(
        &self,
        message_id: i64,
        author_id: i64,
        handle: &str,
        body: &str,
        created_at: DateTime<Utc>,
        embedding: Option<Vec<f32>>,
    ) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let indexed = embedding.is_some();
        state.messages.push(ChatMessage {
            id,
            message_id,
            author_id,
            author_handle: Some(handle.to_string()),
            author_first_name: None,
            chat_scope_id: CHAT,
            body: body.to_string(),
            embedding,
            indexed,
            created_at,
            indexed_at: if indexed { Some(created_at) } else { None },
        });
        id
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().unwrap().messages.clone()
    }

    pub fn logs(&self) -> Vec<RequestLog> {
        self.state.lock().unwrap().request_logs.clone()
    }

    pub fn quota(&self, author_id: i64, date: NaiveDate) -> (u32, u32) {
        self.state
            .lock()
            .unwrap()
            .quotas
            .get(&(author_id, date))
            .copied()
            .unwrap_or((0, 0))
    }

    pub fn digest(&self, chat_scope_id: i64, date: NaiveDate) -> Option<DailyDigest> {
        self.state
            .lock()
            .unwrap()
            .digests
            .get(&(chat_scope_id, date))
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn record_message(&self, msg: &NewMessage) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let duplicate = state
            .messages
            .iter()
            .any(|m| m.chat_scope_id == msg.chat_scope_id && m.message_id == msg.message_id);
        if duplicate {
            return Ok(());
        }
        state.next_id += 1;
        let id = state.next_id;
        state.messages.push(ChatMessage {
            id,
            message_id: msg.message_id,
            author_id: msg.author_id,
            author_handle: msg.author_handle.clone(),
            author_first_name: msg.author_first_name.clone(),
            chat_scope_id: msg.chat_scope_id,
            body: msg.body.clone(),
            embedding: None,
            indexed: false,
            created_at: msg.created_at,
            indexed_at: None,
        });
        Ok(())
    }

    async fn drain_unindexed(&self, limit: usize) -> CoreResult<Vec<ChatMessage>> {
        let state = self.state.lock().unwrap();
        let mut backlog: Vec<ChatMessage> = state
            .messages
            .iter()
            .filter(|m| !m.indexed)
            .cloned()
            .collect();
        backlog.sort_by_key(|m| m.created_at);
        backlog.truncate(limit);
        Ok(backlog)
    }

    async fn attach_embedding(&self, row_id: i64, embedding: &[f32]) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .messages
            .iter_mut()
            .find(|m| m.id == row_id)
            .ok_or_else(|| CoreError::NotFound(format!("row {row_id}")))?;
        row.embedding = Some(embedding.to_vec());
        row.indexed = true;
        row.indexed_at = Some(Utc::now());
        Ok(())
    }

    async fn attach_embeddings_batch(
        &self,
        row_ids: &[i64],
        embeddings: &[Vec<f32>],
    ) -> CoreResult<usize> {
        if row_ids.len() != embeddings.len() {
            return Err(CoreError::InvalidArgument("length mismatch".into()));
        }
        let mut updated = 0;
        for (id, vec) in row_ids.iter().zip(embeddings) {
            if self.attach_embedding(*id, vec).await.is_ok() {
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn search(
        &self,
        query: &[f32],
        floor: f64,
        k: usize,
        chat_scope_id: i64,
    ) -> CoreResult<Vec<SearchHit>> {
        let state = self.state.lock().unwrap();
        let mut hits: Vec<SearchHit> = state
            .messages
            .iter()
            .filter(|m| m.chat_scope_id == chat_scope_id && m.indexed)
            .filter_map(|m| {
                let embedding = m.embedding.as_ref()?;
                let similarity = cosine(query, embedding);
                if similarity < floor {
                    return None;
                }
                Some(SearchHit {
                    id: m.id,
                    message_id: m.message_id,
                    author_id: m.author_id,
                    author_handle: m.author_handle.clone(),
                    author_first_name: m.author_first_name.clone(),
                    chat_scope_id: m.chat_scope_id,
                    body: m.body.clone(),
                    created_at: m.created_at,
                    similarity,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        hits.truncate(k);
        Ok(hits)
    }

    async fn messages_for_civil_day(
        &self,
        chat_scope_id: i64,
        date: NaiveDate,
    ) -> CoreResult<Vec<ChatMessage>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<ChatMessage> = state
            .messages
            .iter()
            .filter(|m| {
                m.chat_scope_id == chat_scope_id
                    && m.created_at.with_timezone(&self.timezone).date_naive() == date
            })
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        Ok(rows)
    }

    async fn most_active_for_day(
        &self,
        chat_scope_id: i64,
        date: NaiveDate,
    ) -> CoreResult<Option<UserMessageCount>> {
        let rows = self.messages_for_civil_day(chat_scope_id, date).await?;
        let mut counts: HashMap<i64, UserMessageCount> = HashMap::new();
        for m in &rows {
            counts
                .entry(m.author_id)
                .and_modify(|c| c.message_count += 1)
                .or_insert_with(|| UserMessageCount {
                    author_id: m.author_id,
                    author_handle: m.author_handle.clone(),
                    author_first_name: m.author_first_name.clone(),
                    message_count: 1,
                });
        }
        Ok(counts.into_values().max_by(|a, b| {
            a.message_count
                .cmp(&b.message_count)
                .then(b.author_id.cmp(&a.author_id))
        }))
    }

    async fn quota_get(&self, author_id: i64, date: NaiveDate) -> CoreResult<QuotaUsage> {
        let (a, b) = self.quota(author_id, date);
        Ok(QuotaUsage {
            tier_a_count: a,
            tier_b_count: b,
        })
    }

    async fn quota_increment(&self, author_id: i64, date: NaiveDate, tier: Tier) -> CoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state.quotas.entry((author_id, date)).or_insert((0, 0));
        match tier {
            Tier::A => entry.0 += 1,
            Tier::B => entry.1 += 1,
        }
        Ok(())
    }

    async fn digest_upsert(&self, digest: &DailyDigest) -> CoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .digests
            .insert((digest.chat_scope_id, digest.civil_date), digest.clone());
        Ok(())
    }

    async fn digest_exists(&self, chat_scope_id: i64, date: NaiveDate) -> CoreResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .digests
            .contains_key(&(chat_scope_id, date)))
    }

    async fn log_request(&self, entry: &RequestLog) -> CoreResult<()> {
        self.state.lock().unwrap().request_logs.push(entry.clone());
        Ok(())
    }

    async fn count_requests(&self, author_id: i64) -> CoreResult<i64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .request_logs
            .iter()
            .filter(|l| l.author_id == author_id)
            .count() as i64)
    }
}

/// Embedder returning seeded vectors for known texts and hash spikes for
/// everything else.
pub struct SeededEmbedder {
    seeded: Mutex<HashMap<String, Vec<f32>>>,
}

impl SeededEmbedder {
    pub fn new() -> Self {
        Self {
            seeded: Mutex::new(HashMap::new()),
        }
    }

    pub fn seed(&self, text: &str, vector: Vec<f32>) {
        self.seeded.lock().unwrap().insert(text.to_string(), vector);
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.seeded.lock().unwrap().get(text) {
            return v.clone();
        }
        let hash: usize = text.bytes().map(|b| b as usize).sum();
        spike_embedding(hash)
    }
}

#[async_trait]
impl Embedder for SeededEmbedder {
    async fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_many(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Embedder that always fails with a transient error (exhausted retries).
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_one(&self, _text: &str) -> CoreResult<Vec<f32>> {
        Err(CoreError::Transient("embedder unavailable".into()))
    }

    async fn embed_many(&self, _texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        Err(CoreError::Transient("embedder unavailable".into()))
    }
}

/// Generator returning a fixed reply (or error) while recording prompts.
pub struct ScriptedGenerator {
    response: Mutex<Result<String, String>>,
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedGenerator {
    pub fn answering(text: &str) -> Self {
        Self {
            response: Mutex::new(Ok(text.to_string())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            response: Mutex::new(Err(reason.to_string())),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, model: &str, prompt: &str) -> CoreResult<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((model.to_string(), prompt.to_string()));
        match &*self.response.lock().unwrap() {
            Ok(text) => Ok(text.clone()),
            Err(reason) => Err(CoreError::Transient(reason.clone())),
        }
    }
}

/// Sender recording every delivered message.
pub struct RecordingSender {
    pub sent: Mutex<Vec<(i64, String, ParseMode)>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl ChatSender for RecordingSender {
    async fn send(&self, chat_id: i64, text: &str, mode: ParseMode) -> CoreResult<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string(), mode));
        Ok(())
    }

    async fn send_typing(&self, _chat_id: i64) {}
}

pub fn test_config(tier_a_limit: u32, tier_b_limit: u32) -> Config {
    Config {
        bot_token: "token".into(),
        bot_handle: "groupmind_bot".into(),
        allowed_chat_ids: vec![CHAT],
        timezone: chrono_tz::UTC,
        log_level: "info".into(),
        environment: "test".into(),
        llm_base_url: "http://localhost".into(),
        llm_api_key: "key".into(),
        tier_a_model: "smart-model".into(),
        tier_b_model: "fast-model".into(),
        llm_timeout_secs: 5,
        embedding_base_url: "http://localhost".into(),
        embedding_api_key: "key".into(),
        embedding_model: "embed-model".into(),
        embedding_dim: DIM,
        embedding_batch_size: 100,
        embedding_timeout_secs: 5,
        store_url: "http://localhost".into(),
        store_key: "key".into(),
        store_timeout_secs: 5,
        tier_a_daily_limit: tier_a_limit,
        tier_b_daily_limit: tier_b_limit,
        rag_enabled: true,
        rag_top_k: 5,
        rag_similarity_floor: 0.8,
        rag_max_context_chars: 2000,
        sync_batch_size: 100,
        sync_max_messages: 1000,
        max_question_chars: 2000,
        shutdown_grace_secs: 10,
    }
}

/// Everything a scenario needs, wired over the fakes.
pub struct World {
    pub bot: Arc<Bot>,
    pub store: Arc<MemoryStore>,
    pub sender: Arc<RecordingSender>,
    pub generator: Arc<ScriptedGenerator>,
    pub scheduler: Arc<Scheduler>,
    pub config: Arc<Config>,
}

pub fn build_world(
    config: Config,
    embedder: Arc<dyn Embedder>,
    generator: Arc<ScriptedGenerator>,
) -> World {
    let config = Arc::new(config);
    let store = Arc::new(MemoryStore::new());
    let sender = Arc::new(RecordingSender::new());

    let store_dyn: Arc<dyn Store> = store.clone();
    let sender_dyn: Arc<dyn ChatSender> = sender.clone();
    let generator_dyn: Arc<dyn Generator> = generator.clone();

    let retriever = Arc::new(Retriever::new(
        store_dyn.clone(),
        embedder.clone(),
        RetrievalParams::from_config(&config),
        &EN,
    ));
    let quota = Arc::new(QuotaGovernor::new(
        store_dyn.clone(),
        config.timezone,
        config.tier_a_daily_limit,
        config.tier_b_daily_limit,
    ));
    let sync_job = Arc::new(SyncJob::new(
        store_dyn.clone(),
        embedder,
        config.sync_batch_size,
        config.sync_max_messages,
    ));
    let digester = Arc::new(DigestGenerator::new(
        generator_dyn.clone(),
        config.tier_b_model.clone(),
        config.timezone,
        &EN,
    ));
    let scheduler = Arc::new(Scheduler::new(
        store_dyn.clone(),
        sync_job.clone(),
        digester,
        sender_dyn.clone(),
        config.allowed_chat_ids.clone(),
        config.timezone,
    ));

    let bot = Arc::new(Bot::new(
        config.clone(),
        store_dyn,
        generator_dyn,
        retriever,
        quota,
        sync_job,
        scheduler.clone(),
        sender_dyn,
        &EN,
    ));

    World {
        bot,
        store,
        sender,
        generator,
        scheduler,
        config,
    }
}

/// A group message mentioning the assistant in plain text.
pub fn mention_message(message_id: i64, author_id: i64, text: &str) -> Message {
    Message {
        message_id,
        from: Some(User {
            id: author_id,
            username: Some("asker".into()),
            first_name: Some("Asker".into()),
        }),
        chat: Chat { id: CHAT },
        date: Utc::now().timestamp(),
        text: Some(text.to_string()),
        entities: Vec::new(),
    }
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}
