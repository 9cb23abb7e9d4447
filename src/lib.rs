pub mod bot;
pub mod civil;
pub mod config;
pub mod digest;
pub mod embeddings;
pub mod error;
pub mod indexer;
pub mod llm;
pub mod locale;
pub mod models;
pub mod quota;
pub mod retrieval;
pub mod scheduler;
pub mod store;
pub mod telegram;

pub use error::{CoreError, CoreResult};
