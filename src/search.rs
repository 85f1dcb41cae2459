use std::time::Instant;

use serde::Serialize;

use crate::{
    aggregate,
    candidates,
    config::{FETCH_PAGE_SIZE, RESOLVE_BATCH_SIZE, SearchLimits},
    doc_id::DocumentId,
    embedding_service::EmbeddingService,
    error::{Error, Result},
    fetch,
    heatmap::{HeatMap, merge_spans},
    records::DocumentMetadata,
    render,
    reranker,
    store::RecordStore,
    vector_index::VectorIndex,
};

/// Parameters for a single search.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub limits: SearchLimits,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limits: SearchLimits::default(),
        }
    }
}

/// A final search result with its alignment to the query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub document_id: DocumentId,
    pub score: f32,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub heat_map: HeatMap,
}

/// Execute the full search pipeline.
///
/// 1. Embed the query into token vectors
/// 2. Per-token approximate neighbor search, globally cut (stage 1)
/// 3. Approximate per-document MaxSim shortlist (stage 2)
/// 4. Fetch shortlisted documents' token vectors
/// 5. Exact MaxSim rerank with heat maps (stage 3)
pub fn execute_search(
    params: &SearchParams,
    store: &RecordStore,
    index: &dyn VectorIndex,
    embedder: &dyn EmbeddingService,
) -> Result<Vec<SearchHit>> {
    if params.query.trim().is_empty() {
        return Ok(vec![]);
    }
    let limits = &params.limits;

    let started = Instant::now();
    let query = embedder.embed_query(&params.query)?;
    tracing::debug!(
        tokens = query.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "embedded query"
    );
    if query.is_empty() {
        return Ok(vec![]);
    }

    let started = Instant::now();
    let candidates = candidates::generate_candidates(
        index,
        &query,
        limits.neighbors_per_token,
        limits.stage1,
        limits.stage1_timeout,
    )?;
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage 1 timing"
    );

    let started = Instant::now();
    let shortlist = aggregate::shortlist_documents(
        store,
        &candidates,
        limits.stage2,
        RESOLVE_BATCH_SIZE,
    )?;
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage 2 timing"
    );
    if shortlist.is_empty() {
        return Ok(vec![]);
    }

    let started = Instant::now();
    let ids: Vec<DocumentId> = shortlist.iter().map(|d| d.document).collect();
    let token_sets = fetch::fetch_many(store, &ids, FETCH_PAGE_SIZE)?;
    let ranked = reranker::rerank(
        &query,
        ids.into_iter().zip(token_sets).collect(),
        limits.stage3,
    );
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "stage 3 timing"
    );

    ranked
        .into_iter()
        .enumerate()
        .map(|(i, ranked)| {
            let document =
                store.get_document(ranked.document)?.ok_or_else(|| {
                    Error::Consistency(format!(
                        "document {} disappeared during search",
                        ranked.document
                    ))
                })?;
            Ok(SearchHit {
                rank: i + 1,
                document_id: ranked.document,
                score: ranked.score,
                text: document.text,
                metadata: document.metadata,
                heat_map: ranked.heat_map,
            })
        })
        .collect()
}

/// Format results for human-readable terminal output, with highlights
/// drawn in color unless `plain` is set.
pub fn format_human(results: &[SearchHit], plain: bool) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!("{:>3}. [{:.3}] {}", r.rank, r.score, r.document_id);
        let byline = byline(&r.metadata);
        if !byline.is_empty() {
            println!("     {byline}");
        }
        let fragments = merge_spans(&r.heat_map, &r.text);
        let body = if plain {
            render::render_plain(&r.text, &fragments)
        } else {
            render::render_ansi(&r.text, &fragments)
        };
        for line in body.lines() {
            println!("     {line}");
        }
        println!();
    }
    println!("{} result(s)", results.len());
}

fn byline(metadata: &DocumentMetadata) -> String {
    let mut parts = Vec::new();
    if !metadata.title.is_empty() {
        parts.push(metadata.title.clone());
    }
    if !metadata.author.is_empty() {
        parts.push(format!("by {}", metadata.author));
    }
    if !metadata.year.is_empty() {
        parts.push(format!("({})", metadata.year));
    }
    parts.join(" ")
}

#[derive(Serialize)]
struct JsonResults<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [SearchHit],
}

/// Format results as JSON output.
pub fn format_json(results: &[SearchHit], query: &str) -> Result<()> {
    let out = JsonResults {
        query,
        result_count: results.len(),
        results,
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
