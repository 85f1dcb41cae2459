use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use reqwest::{StatusCode, blocking::Client};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    embedding::EMBEDDING_DIM,
    error::{Error, Result},
    records::{QueryToken, Span, TokenEmbedding},
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Turns text into per-token vectors.
///
/// Token offsets are byte ranges relative to the text that was submitted.
/// Implementations must fail rather than return partial results.
pub trait EmbeddingService: Send + Sync {
    /// Embed several texts in one request, keyed by caller-chosen ids.
    fn embed_documents(
        &self,
        texts: &BTreeMap<String, String>,
    ) -> Result<HashMap<String, Vec<TokenEmbedding>>>;

    fn embed_query(&self, query: &str) -> Result<Vec<QueryToken>>;
}

/// A token as sent by the service: either with offsets or a bare vector.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireToken {
    WithOffset { vector: Vec<f32>, offset: Span },
    Bare(Vec<f32>),
}

impl WireToken {
    /// Bare vectors get an empty span: they still score but never align.
    fn into_parts(self) -> Result<(Vec<f32>, Span)> {
        let (vector, span) = match self {
            WireToken::WithOffset { vector, offset } => (vector, offset),
            WireToken::Bare(vector) => (vector, Span::default()),
        };
        if vector.len() != EMBEDDING_DIM {
            return Err(Error::EmbeddingService {
                message: format!(
                    "service returned a {}-dimensional vector, expected {EMBEDDING_DIM}",
                    vector.len()
                ),
                retryable: false,
            });
        }
        Ok((vector, span))
    }
}

#[derive(Serialize)]
struct EmbedDocumentsRequest<'a> {
    documents: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct EmbedQueryRequest<'a> {
    query: &'a str,
}

/// Blocking JSON client for an embedding service exposing
/// `/api/embed_documents` and `/api/embed_query`.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingService {
    client: Client,
    base_url: String,
}

impl HttpEmbeddingService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("embedding service URL is empty".into()));
        }
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            Error::Config(format!("failed to build HTTP client: {e}"))
        })?;
        Ok(Self { client, base_url })
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| Error::EmbeddingService {
                message: format!("request to {url} failed: {e}"),
                retryable: true,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(Error::EmbeddingService {
                message: format!("{url} returned {status}: {body}"),
                retryable: is_retryable_status(status),
            });
        }

        response.json().map_err(|e| Error::EmbeddingService {
            message: format!("malformed response from {url}: {e}"),
            retryable: false,
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

impl EmbeddingService for HttpEmbeddingService {
    fn embed_documents(
        &self,
        texts: &BTreeMap<String, String>,
    ) -> Result<HashMap<String, Vec<TokenEmbedding>>> {
        if texts.is_empty() {
            return Ok(HashMap::new());
        }
        let raw: HashMap<String, Vec<WireToken>> = self.post(
            "/api/embed_documents",
            &EmbedDocumentsRequest { documents: texts },
        )?;
        decode_documents(texts, raw)
    }

    fn embed_query(&self, query: &str) -> Result<Vec<QueryToken>> {
        let raw: Vec<WireToken> =
            self.post("/api/embed_query", &EmbedQueryRequest { query })?;
        raw.into_iter()
            .map(|t| -> Result<QueryToken> {
                let (vector, span) = t.into_parts()?;
                Ok(QueryToken { vector, span })
            })
            .collect()
    }
}

/// Validate a documents response: every requested key must be present.
fn decode_documents(
    requested: &BTreeMap<String, String>,
    mut raw: HashMap<String, Vec<WireToken>>,
) -> Result<HashMap<String, Vec<TokenEmbedding>>> {
    let mut result = HashMap::with_capacity(requested.len());
    for key in requested.keys() {
        let tokens = raw.remove(key).ok_or_else(|| Error::EmbeddingService {
            message: format!("response is missing embeddings for {key}"),
            retryable: false,
        })?;
        let tokens = tokens
            .into_iter()
            .map(|t| -> Result<TokenEmbedding> {
                let (vector, span) = t.into_parts()?;
                Ok(TokenEmbedding { vector, span })
            })
            .collect::<Result<Vec<_>>>()?;
        result.insert(key.clone(), tokens);
    }
    Ok(result)
}
