//! Stage 1: approximate candidate generation.

use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::{
    error::{Error, Result},
    records::QueryToken,
    vector_index::VectorIndex,
};

/// An embedding found near one query token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub embedding_id: u64,
    pub similarity: f32,
    /// Index of the query token whose search produced this hit.
    pub token: usize,
}

/// Search the index once per query token and merge the hits.
///
/// Per-token searches fan out across the rayon pool. The merged list is
/// sorted by descending similarity and truncated to `limit` as a single
/// global cut, so tokens with generically high similarities may crowd out
/// the others.
pub fn generate_candidates(
    index: &dyn VectorIndex,
    query: &[QueryToken],
    neighbors_per_token: usize,
    limit: usize,
    timeout: Option<Duration>,
) -> Result<Vec<Candidate>> {
    let deadline = timeout.map(|t| Instant::now() + t);

    let per_token: Vec<Vec<Candidate>> = query
        .par_iter()
        .enumerate()
        .map(|(token, q)| -> Result<Vec<Candidate>> {
            check_deadline(deadline)?;
            let hits = index.nearest_neighbors(&q.vector, neighbors_per_token)?;
            check_deadline(deadline)?;
            Ok(hits
                .into_iter()
                .map(|hit| Candidate {
                    embedding_id: hit.id,
                    similarity: hit.similarity,
                    token,
                })
                .collect())
        })
        .collect::<Result<_>>()?;

    let mut merged: Vec<Candidate> = per_token.into_iter().flatten().collect();
    // Stable sort: equal similarities keep token order.
    merged.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    merged.truncate(limit);

    tracing::debug!(
        tokens = query.len(),
        candidates = merged.len(),
        "stage 1 complete"
    );
    Ok(merged)
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(Error::Timeout(
            "vector index search exceeded its deadline".to_string(),
        )),
        _ => Ok(()),
    }
}
