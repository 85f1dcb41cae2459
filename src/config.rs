use std::time::Duration;

use crate::{
    error::{Error, Result},
    store::RecordStore,
};

pub const EMBEDDING_URL_ENV_VAR: &str = "COLSEARCH_EMBEDDING_URL";

/// Settings key holding the embedding service base URL.
pub const EMBEDDING_URL_SETTING: &str = "embedding_url";

pub const DEFAULT_NEIGHBORS_PER_TOKEN: usize = 256;
pub const DEFAULT_STAGE1_LIMIT: usize = 1000;
pub const DEFAULT_STAGE2_LIMIT: usize = 50;
pub const DEFAULT_STAGE3_LIMIT: usize = 10;

/// Candidates resolved concurrently per stage-2 batch.
pub const RESOLVE_BATCH_SIZE: usize = 16;
/// Token links read per page when fetching a document's vectors.
pub const FETCH_PAGE_SIZE: usize = 16;
/// Token vectors written per persistence transaction.
pub const PERSIST_SUB_BATCH: usize = 16;

pub const DEFAULT_REINDEX_MAX_DOCS: usize = 16;
pub const DEFAULT_REINDEX_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-query cut-offs for the three retrieval stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchLimits {
    /// Neighbors requested from the vector index per query token.
    pub neighbors_per_token: usize,
    pub stage1: usize,
    pub stage2: usize,
    pub stage3: usize,
    /// Deadline for the stage-1 vector index searches.
    pub stage1_timeout: Option<Duration>,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            neighbors_per_token: DEFAULT_NEIGHBORS_PER_TOKEN,
            stage1: DEFAULT_STAGE1_LIMIT,
            stage2: DEFAULT_STAGE2_LIMIT,
            stage3: DEFAULT_STAGE3_LIMIT,
            stage1_timeout: None,
        }
    }
}

/// Resolve the embedding service URL from, in order of priority:
/// 1. An explicit URL (from --embedding-url)
/// 2. The COLSEARCH_EMBEDDING_URL environment variable
/// 3. The `embedding_url` setting stored in the record store
pub fn resolve_embedding_url(
    explicit: Option<&str>,
    store: &RecordStore,
) -> Result<String> {
    let env = std::env::var(EMBEDDING_URL_ENV_VAR).ok();
    pick_embedding_url(explicit, env.as_deref(), store)
}

fn pick_embedding_url(
    explicit: Option<&str>,
    env: Option<&str>,
    store: &RecordStore,
) -> Result<String> {
    let candidate = explicit
        .or(env)
        .map(str::to_string)
        .filter(|url| !url.trim().is_empty());
    if let Some(url) = candidate {
        return Ok(url);
    }
    store
        .get_setting(EMBEDDING_URL_SETTING)?
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| {
            Error::Config(format!(
                "no embedding service configured; pass --embedding-url, \
                 set {EMBEDDING_URL_ENV_VAR}, or run `colsearch service set <URL>`"
            ))
        })
}
