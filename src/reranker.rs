use rayon::prelude::*;

use crate::{
    doc_id::DocumentId,
    embedding::cosine_similarity,
    heatmap::HeatMap,
    records::{DocumentToken, QueryToken},
};

/// A shortlisted document after exact scoring.
#[derive(Debug, Clone)]
pub struct RankedDocument {
    pub document: DocumentId,
    pub score: f32,
    pub heat_map: HeatMap,
}

/// Exact MaxSim score of one document, together with its alignment.
///
/// For each query token the best cosine similarity over all document
/// tokens is added to the score. Pairs whose similarity is undefined
/// (a zero-magnitude vector) are skipped; a token with no defined pair
/// adds nothing. Every defined pair where both spans cover at least one
/// byte is recorded in the heat map.
pub fn maxsim(query: &[QueryToken], document: &[DocumentToken]) -> (f32, HeatMap) {
    let mut score = 0.0;
    let mut heat_map = HeatMap::new();

    for q in query {
        let mut best: Option<f32> = None;
        for d in document {
            let Some(similarity) = cosine_similarity(&q.vector, &d.vector) else {
                continue;
            };
            best = Some(best.map_or(similarity, |b| b.max(similarity)));
            if !q.span.is_degenerate() && !d.span.is_degenerate() {
                heat_map.record(q.span, d.span, similarity);
            }
        }
        score += best.unwrap_or(0.0);
    }

    (score, heat_map)
}

/// Score every shortlisted document exactly and keep the best `limit`.
///
/// `documents` pairs each shortlisted id with its fetched token set, in
/// shortlist order. Documents are scored in parallel; equal scores keep
/// shortlist order.
pub fn rerank(
    query: &[QueryToken],
    documents: Vec<(DocumentId, Vec<DocumentToken>)>,
    limit: usize,
) -> Vec<RankedDocument> {
    let mut ranked: Vec<RankedDocument> = documents
        .into_par_iter()
        .map(|(document, tokens)| {
            let (score, heat_map) = maxsim(query, &tokens);
            RankedDocument {
                document,
                score,
                heat_map,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(limit);
    ranked
}
