//! Stage 2: approximate per-document MaxSim over the stage-1 candidates.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::{
    candidates::Candidate,
    doc_id::DocumentId,
    error::{Error, Result},
    store::{EmbeddingOwner, RecordStore},
};

/// A document with its approximate score.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortlistedDocument {
    pub document: DocumentId,
    pub score: f32,
}

/// Score documents from the stage-1 candidates using the record store to
/// resolve embedding owners.
pub fn shortlist_documents(
    store: &RecordStore,
    candidates: &[Candidate],
    limit: usize,
    batch_size: usize,
) -> Result<Vec<ShortlistedDocument>> {
    aggregate_scores(
        candidates,
        |embedding| store.embedding_owners(embedding),
        limit,
        batch_size,
    )
}

/// Per-document accumulator: best similarity seen for each query token.
#[derive(Default)]
struct TokenMaxima {
    best: HashMap<usize, f32>,
}

impl TokenMaxima {
    fn observe(&mut self, token: usize, similarity: f32) {
        let slot = self.best.entry(token).or_insert(0.0);
        if similarity > *slot {
            *slot = similarity;
        }
    }

    fn score(&self) -> f32 {
        self.best.values().sum()
    }
}

/// Resolve candidates to owning documents in batches and rank documents
/// by the sum of their per-token maximum similarities.
///
/// Each distinct embedding in a batch is resolved once, concurrently;
/// batches run one after another. Tokens a document has no candidate for contribute zero, and
/// per-token maxima are floored at zero. Owners that are not yet indexed
/// are ignored. A candidate whose embedding has no owner at all is a
/// consistency error. Ties keep the order in which documents were first
/// seen.
pub fn aggregate_scores<F>(
    candidates: &[Candidate],
    resolve: F,
    limit: usize,
    batch_size: usize,
) -> Result<Vec<ShortlistedDocument>>
where
    F: Fn(u64) -> Result<Vec<EmbeddingOwner>> + Sync,
{
    let mut order: Vec<DocumentId> = Vec::new();
    let mut maxima: HashMap<DocumentId, TokenMaxima> = HashMap::new();

    for batch in candidates.chunks(batch_size.max(1)) {
        // Several query tokens often hit the same embedding.
        let mut distinct: Vec<u64> =
            batch.iter().map(|c| c.embedding_id).collect();
        distinct.sort_unstable();
        distinct.dedup();
        let resolved: HashMap<u64, Vec<EmbeddingOwner>> = distinct
            .par_iter()
            .map(|&embedding| -> Result<(u64, Vec<EmbeddingOwner>)> {
                Ok((embedding, resolve(embedding)?))
            })
            .collect::<Result<_>>()?;

        for candidate in batch {
            let owners = resolved
                .get(&candidate.embedding_id)
                .map_or(&[][..], Vec::as_slice);
            if owners.is_empty() {
                return Err(Error::Consistency(format!(
                    "candidate embedding {} has no owning document",
                    candidate.embedding_id
                )));
            }
            for owner in owners.iter().filter(|o| o.indexed) {
                let entry = maxima.entry(owner.document).or_insert_with(|| {
                    order.push(owner.document);
                    TokenMaxima::default()
                });
                entry.observe(candidate.token, candidate.similarity);
            }
        }
    }

    let mut ranked: Vec<ShortlistedDocument> = order
        .into_iter()
        .map(|document| ShortlistedDocument {
            document,
            score: maxima.get(&document).map_or(0.0, TokenMaxima::score),
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(limit);

    tracing::debug!(shortlisted = ranked.len(), "stage 2 complete");
    Ok(ranked)
}
