//! Deterministic embedding service double for unit tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{
    embedding::EMBEDDING_DIM,
    embedding_service::EmbeddingService,
    error::{Error, Result},
    records::{QueryToken, Span, TokenEmbedding},
};

/// Pseudo-random vector derived from a lowercase word.
pub fn word_vector(word: &str) -> Vec<f32> {
    let mut bytes = [0u8; EMBEDDING_DIM];
    blake3::Hasher::new()
        .update(word.to_lowercase().as_bytes())
        .finalize_xof()
        .fill(&mut bytes);
    bytes.iter().map(|&b| (b as f32 - 127.5) / 127.5).collect()
}

/// A vector whose cosine similarity to `base` is exactly `similarity`,
/// built from the part of `other` orthogonal to `base`.
pub fn vector_with_similarity(base: &[f32], other: &[f32], similarity: f32) -> Vec<f32> {
    let unit = normalize(base);
    let along: f32 = other.iter().zip(&unit).map(|(o, u)| o * u).sum();
    let orthogonal: Vec<f32> =
        other.iter().zip(&unit).map(|(o, u)| o - along * u).collect();
    let orthogonal = normalize(&orthogonal);
    let rest = (1.0 - similarity * similarity).sqrt();
    unit.iter()
        .zip(&orthogonal)
        .map(|(u, w)| similarity * u + rest * w)
        .collect()
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

/// Split on whitespace, returning each word with its byte span.
fn words(text: &str) -> Vec<(&str, Span)> {
    let mut out = Vec::new();
    let mut start = None;
    for (idx, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push((&text[s..idx], Span::new(s, idx)));
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((&text[s..], Span::new(s, text.len())));
    }
    out
}

/// Embeds each whitespace-separated word with [`word_vector`].
///
/// Query words can be given fixed vectors, and the next calls can be made
/// to fail with a retryable error.
#[derive(Default)]
pub struct WordEmbedder {
    query_overrides: Mutex<HashMap<String, Vec<f32>>>,
    failures: AtomicUsize,
    pub document_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl WordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn override_query_word(&self, word: &str, vector: Vec<f32>) {
        if let Ok(mut overrides) = self.query_overrides.lock() {
            overrides.insert(word.to_lowercase(), vector);
        }
    }

    pub fn fail_next(&self, calls: usize) {
        self.failures.store(calls, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Result<()> {
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::EmbeddingService {
                message: "service unavailable".to_string(),
                retryable: true,
            });
        }
        Ok(())
    }
}

impl EmbeddingService for WordEmbedder {
    fn embed_documents(
        &self,
        texts: &BTreeMap<String, String>,
    ) -> Result<HashMap<String, Vec<TokenEmbedding>>> {
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(texts
            .iter()
            .map(|(key, text)| {
                let tokens = words(text)
                    .into_iter()
                    .map(|(word, span)| TokenEmbedding {
                        vector: word_vector(word),
                        span,
                    })
                    .collect();
                (key.clone(), tokens)
            })
            .collect())
    }

    fn embed_query(&self, query: &str) -> Result<Vec<QueryToken>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let overrides = self
            .query_overrides
            .lock()
            .map_err(|_| Error::Config("override lock poisoned".into()))?;
        Ok(words(query)
            .into_iter()
            .map(|(word, span)| QueryToken {
                vector: overrides
                    .get(&word.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| word_vector(word)),
                span,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn words_carry_byte_spans() {
        let spans: Vec<Span> = words("  the cat\nsat").into_iter().map(|w| w.1).collect();
        assert_eq!(spans, vec![Span::new(2, 5), Span::new(6, 9), Span::new(10, 13)]);
    }

    #[test]
    fn constructed_similarity_is_exact() {
        let v = vector_with_similarity(&word_vector("cat"), &word_vector("dog"), 0.9);
        let s = cosine_similarity(&v, &word_vector("cat")).unwrap();
        assert!((s - 0.9).abs() < 1e-4);
    }
}
