//! Background indexing: turns unindexed documents into stored, searchable
//! token vectors.

use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use crate::{
    chunking::{DEFAULT_CHUNK_SIZE, split_segments},
    config::{DEFAULT_REINDEX_MAX_DOCS, DEFAULT_REINDEX_TIMEOUT, PERSIST_SUB_BATCH},
    doc_id::DocumentId,
    embedding_service::EmbeddingService,
    error::{Error, Result},
    records::{Chunk, Document, Span, TokenEmbedding},
    store::{PendingToken, PreparedDocument, RecordStore},
    vector_index::VectorIndex,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Documents loaded and embedded per batch.
    pub max_docs: usize,
    /// Wall-clock budget of one invocation.
    pub time_budget: Duration,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Token vectors written per store transaction.
    pub sub_batch: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_docs: DEFAULT_REINDEX_MAX_DOCS,
            time_budget: DEFAULT_REINDEX_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sub_batch: PERSIST_SUB_BATCH,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexingStats {
    /// Documents flipped to indexed.
    pub documents: usize,
    /// Documents that were indexed or deleted by the time we got to them.
    pub skipped: usize,
    pub token_links: usize,
    pub embeddings_created: usize,
}

impl IndexingStats {
    pub fn absorb(&mut self, other: IndexingStats) {
        self.documents += other.documents;
        self.skipped += other.skipped;
        self.token_links += other.token_links;
        self.embeddings_created += other.embeddings_created;
    }
}

/// How one invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// No unindexed documents remain after the cursor.
    Idle(IndexingStats),
    /// The time budget ran out with work remaining; resume from `cursor`.
    Continue { stats: IndexingStats, cursor: u64 },
}

/// A document whose chunks are stored and which awaits its vectors.
struct ReadyDocument {
    id: DocumentId,
    pass: u64,
    chunks: Vec<Chunk>,
}

pub struct IndexingPipeline<'a> {
    store: &'a RecordStore,
    index: &'a dyn VectorIndex,
    embedder: &'a dyn EmbeddingService,
    options: PipelineOptions,
}

impl<'a> IndexingPipeline<'a> {
    pub fn new(
        store: &'a RecordStore,
        index: &'a dyn VectorIndex,
        embedder: &'a dyn EmbeddingService,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            options,
        }
    }

    /// Run one invocation starting strictly after `cursor` (a creation
    /// timestamp; 0 starts from the oldest document).
    ///
    /// Batches are processed until nothing is left or the time budget is
    /// spent. Any failure, including an embedding service error, fails the
    /// invocation; it can be retried from the same cursor because a
    /// document is only marked indexed after all of its vectors are
    /// stored.
    pub fn run_invocation(&self, cursor: u64) -> Result<Invocation> {
        let deadline = Instant::now() + self.options.time_budget;
        let mut cursor = cursor;
        let mut stats = IndexingStats::default();

        loop {
            let batch = self
                .store
                .load_unindexed(cursor, self.options.max_docs.max(1))?;
            let Some(last) = batch.last() else {
                tracing::info!(
                    documents = stats.documents,
                    links = stats.token_links,
                    "indexing idle"
                );
                return Ok(Invocation::Idle(stats));
            };
            let next_cursor = last.created_at;

            stats.absorb(self.index_batch(&batch)?);
            cursor = next_cursor;

            if Instant::now() >= deadline {
                if self.store.load_unindexed(cursor, 1)?.is_empty() {
                    return Ok(Invocation::Idle(stats));
                }
                tracing::info!(
                    documents = stats.documents,
                    cursor,
                    "indexing time budget spent, continuing later"
                );
                return Ok(Invocation::Continue { stats, cursor });
            }
        }
    }

    /// Run invocations back to back until idle. Returns the totals.
    pub fn run_until_idle(&self) -> Result<IndexingStats> {
        let mut total = IndexingStats::default();
        let mut cursor = 0;
        loop {
            match self.run_invocation(cursor)? {
                Invocation::Idle(stats) => {
                    total.absorb(stats);
                    return Ok(total);
                }
                Invocation::Continue { stats, cursor: next } => {
                    total.absorb(stats);
                    cursor = next;
                }
            }
        }
    }

    fn index_batch(&self, batch: &[Document]) -> Result<IndexingStats> {
        let mut stats = IndexingStats::default();

        // Load: split and store chunks, clearing any interrupted pass.
        let mut ready = Vec::with_capacity(batch.len());
        for doc in batch {
            let spans = split_segments(&doc.text, self.options.chunk_size);
            match self.store.prepare_document(doc.id, &spans)? {
                PreparedDocument::Skip => stats.skipped += 1,
                PreparedDocument::Ready {
                    pass,
                    chunks,
                    reclaimed,
                } => {
                    self.index.remove(&reclaimed)?;
                    ready.push(ReadyDocument {
                        id: doc.id,
                        pass,
                        chunks,
                    });
                }
            }
        }

        // Embed: one request covering every chunk of the batch.
        let texts = chunk_texts(batch, &ready);
        let started = Instant::now();
        let mut embedded = if texts.is_empty() {
            HashMap::new()
        } else {
            self.embedder.embed_documents(&texts)?
        };
        tracing::debug!(
            chunks = texts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "embedded batch"
        );

        for doc in &ready {
            let tokens = pending_tokens(doc, &mut embedded)?;
            match self.persist_document(doc.id, doc.pass, &tokens)? {
                Some(persisted) => stats.absorb(persisted),
                None => stats.skipped += 1,
            }
        }
        Ok(stats)
    }

    /// Persist: write one document's vectors in sub-batches, then
    /// Finalize: mark it indexed and publish its vectors to the index.
    ///
    /// Returns `None` when the document was indexed, deleted or taken
    /// over by another pass meanwhile.
    fn persist_document(
        &self,
        id: DocumentId,
        pass: u64,
        tokens: &[PendingToken],
    ) -> Result<Option<IndexingStats>> {
        let mut stats = IndexingStats::default();
        let mut vectors: HashMap<u64, Vec<f32>> = HashMap::new();

        for sub_batch in tokens.chunks(self.options.sub_batch.max(1)) {
            let outcome = match self.store.persist_token_batch(id, pass, sub_batch) {
                Ok(outcome) => outcome,
                Err(Error::NotFound { .. }) => {
                    tracing::debug!(document = %id, "document deleted during indexing");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if outcome.skipped {
                tracing::debug!(document = %id, pass, "document taken over, abandoning pass");
                return Ok(None);
            }
            stats.token_links += outcome.links_created;
            stats.embeddings_created += outcome.embeddings_created;
            vectors.extend(outcome.embeddings);
        }

        if !self.store.mark_indexed(id, pass)? {
            return Ok(None);
        }
        for (embedding, vector) in vectors {
            self.index.upsert(embedding, vector)?;
        }
        stats.documents = 1;
        tracing::debug!(document = %id, links = stats.token_links, "indexed document");
        Ok(Some(stats))
    }
}

fn chunk_key(document: DocumentId, chunk: u64) -> String {
    format!("{}:{chunk}", document.get())
}

fn chunk_texts(batch: &[Document], ready: &[ReadyDocument]) -> BTreeMap<String, String> {
    let texts: HashMap<DocumentId, &str> =
        batch.iter().map(|d| (d.id, d.text.as_str())).collect();
    let mut out = BTreeMap::new();
    for doc in ready {
        let Some(text) = texts.get(&doc.id) else {
            continue;
        };
        for chunk in &doc.chunks {
            out.insert(
                chunk_key(doc.id, chunk.id),
                text[chunk.span.start..chunk.span.end].to_string(),
            );
        }
    }
    out
}

/// Shift chunk-relative token offsets into document coordinates.
fn pending_tokens(
    doc: &ReadyDocument,
    embedded: &mut HashMap<String, Vec<TokenEmbedding>>,
) -> Result<Vec<PendingToken>> {
    let mut tokens = Vec::new();
    for chunk in &doc.chunks {
        let key = chunk_key(doc.id, chunk.id);
        let chunk_tokens =
            embedded.remove(&key).ok_or_else(|| Error::EmbeddingService {
                message: format!("no embeddings returned for chunk {key}"),
                retryable: false,
            })?;
        tokens.extend(chunk_tokens.into_iter().map(|t| PendingToken {
            chunk: chunk.id,
            vector: t.vector,
            span: shift_into_chunk(t.span, chunk.span),
        }));
    }
    Ok(tokens)
}

/// Move a chunk-relative span into document coordinates, clamped to the
/// chunk.
fn shift_into_chunk(token: Span, chunk: Span) -> Span {
    let start = chunk.start.saturating_add(token.start).min(chunk.end);
    let end = chunk.start.saturating_add(token.end).min(chunk.end).max(start);
    Span::new(start, end)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::{
        fetch::fetch_document_tokens,
        records::DocumentMetadata,
        testing::WordEmbedder,
        vector_index::FlatIndex,
    };

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: RecordStore,
        index: FlatIndex,
        embedder: WordEmbedder,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&tmp.path().join("test.redb")).unwrap();
        Fixture {
            _tmp: tmp,
            store,
            index: FlatIndex::new(),
            embedder: WordEmbedder::new(),
        }
    }

    impl Fixture {
        fn insert(&self, text: &str) -> DocumentId {
            self.store
                .insert_document(text, DocumentMetadata::default())
                .unwrap()
                .id
        }

        fn pipeline(&self, options: PipelineOptions) -> IndexingPipeline<'_> {
            IndexingPipeline::new(&self.store, &self.index, &self.embedder, options)
        }
    }

    #[test]
    fn indexes_and_publishes_documents() {
        let f = fixture();
        let id = f.insert("the cat sat on the mat");

        let stats = f.pipeline(PipelineOptions::default()).run_until_idle().unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.token_links, 6);
        assert_eq!(stats.embeddings_created, 5);

        assert!(f.store.get_document(id).unwrap().unwrap().indexed);
        assert_eq!(f.index.len().unwrap(), 5);
        assert_eq!(f.store.stats().unwrap().unindexed, 0);
    }

    #[test]
    fn spans_are_in_document_coordinates() {
        let f = fixture();
        let text = "alpha beta. gamma delta.";
        let id = f.insert(text);
        let options = PipelineOptions {
            chunk_size: 12,
            ..Default::default()
        };
        f.pipeline(options).run_until_idle().unwrap();

        assert_eq!(f.store.chunks_for_document(id).unwrap().len(), 2);
        let words: Vec<&str> = fetch_document_tokens(&f.store, id, 16)
            .unwrap()
            .iter()
            .map(|t| &text[t.span.start..t.span.end])
            .collect();
        assert_eq!(words, vec!["alpha", "beta.", "gamma", "delta."]);
    }

    #[test]
    fn reindex_is_idempotent() {
        let f = fixture();
        f.insert("one two three");
        f.pipeline(PipelineOptions::default()).run_until_idle().unwrap();
        let before = f.store.stats().unwrap();

        let stats = f.pipeline(PipelineOptions::default()).run_until_idle().unwrap();
        assert_eq!(stats, IndexingStats::default());
        assert_eq!(f.store.stats().unwrap(), before);
    }

    #[test]
    fn persist_skips_already_indexed_document() {
        let f = fixture();
        let id = f.insert("one two");
        f.pipeline(PipelineOptions::default()).run_until_idle().unwrap();
        let before = f.store.stats().unwrap();

        let chunk = f.store.chunks_for_document(id).unwrap()[0];
        let pending = vec![PendingToken {
            chunk: chunk.id,
            vector: vec![0.5; crate::embedding::EMBEDDING_DIM],
            span: Span::new(0, 3),
        }];
        let result = f
            .pipeline(PipelineOptions::default())
            .persist_document(id, 1, &pending);
        assert_eq!(result.unwrap(), None);
        assert_eq!(f.store.stats().unwrap(), before);
    }

    fn start_pass(f: &Fixture, id: DocumentId) -> (u64, Chunk) {
        match f.store.prepare_document(id, &[Span::new(0, 7)]).unwrap() {
            PreparedDocument::Ready { pass, chunks, .. } => (pass, chunks[0]),
            PreparedDocument::Skip => panic!("document should be preparable"),
        }
    }

    #[test]
    fn overlapping_passes_leave_only_the_newest() {
        let f = fixture();
        let id = f.insert("one two");
        let pipeline = f.pipeline(PipelineOptions::default());
        let tokens = |chunk: &Chunk| {
            vec![
                PendingToken {
                    chunk: chunk.id,
                    vector: crate::testing::word_vector("one"),
                    span: Span::new(0, 3),
                },
                PendingToken {
                    chunk: chunk.id,
                    vector: crate::testing::word_vector("two"),
                    span: Span::new(4, 7),
                },
            ]
        };

        let (old_pass, _) = start_pass(&f, id);
        let (new_pass, chunk) = start_pass(&f, id);

        assert_eq!(pipeline.persist_document(id, old_pass, &tokens(&chunk)).unwrap(), None);
        assert!(!f.store.get_document(id).unwrap().unwrap().indexed);
        assert_eq!(f.index.len().unwrap(), 0);

        let stats = pipeline
            .persist_document(id, new_pass, &tokens(&chunk))
            .unwrap()
            .unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.token_links, 2);
        assert!(f.store.get_document(id).unwrap().unwrap().indexed);
        assert_eq!(fetch_document_tokens(&f.store, id, 16).unwrap().len(), 2);
    }

    #[test]
    fn failed_embedding_leaves_documents_unindexed_and_retry_is_exact() {
        let f = fixture();
        let id = f.insert("red green blue");
        f.embedder.fail_next(1);

        let err = f.pipeline(PipelineOptions::default()).run_invocation(0).unwrap_err();
        assert!(err.is_retryable());
        assert!(!f.store.get_document(id).unwrap().unwrap().indexed);
        assert_eq!(f.index.len().unwrap(), 0);

        f.pipeline(PipelineOptions::default()).run_until_idle().unwrap();
        let stats = f.store.stats().unwrap();
        assert_eq!(stats.token_links, 3);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.unindexed, 0);
    }

    #[test]
    fn spent_budget_continues_from_cursor() {
        let f = fixture();
        f.insert("first doc");
        f.insert("second doc");
        f.insert("third doc");
        let options = PipelineOptions {
            max_docs: 1,
            time_budget: Duration::ZERO,
            ..Default::default()
        };
        let pipeline = f.pipeline(options);

        let mut cursor = 0;
        let mut invocations = 0;
        loop {
            invocations += 1;
            match pipeline.run_invocation(cursor).unwrap() {
                Invocation::Continue { stats, cursor: next } => {
                    assert_eq!(stats.documents, 1);
                    assert!(next > cursor);
                    cursor = next;
                }
                Invocation::Idle(stats) => {
                    assert_eq!(stats.documents, 1);
                    break;
                }
            }
        }
        assert_eq!(invocations, 3);
        assert_eq!(f.embedder.document_calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.store.stats().unwrap().unindexed, 0);
    }

    #[test]
    fn batches_share_one_request() {
        let f = fixture();
        for i in 0..5 {
            f.insert(&format!("document number {i}"));
        }
        f.pipeline(PipelineOptions::default()).run_until_idle().unwrap();
        assert_eq!(f.embedder.document_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_document_is_marked_indexed() {
        let f = fixture();
        let id = f.insert("   ");
        let stats = f.pipeline(PipelineOptions::default()).run_until_idle().unwrap();
        assert_eq!(stats.documents, 1);
        assert!(f.store.get_document(id).unwrap().unwrap().indexed);
    }

    #[test]
    fn many_tokens_span_sub_batches() {
        let f = fixture();
        let text: Vec<String> = (0..40).map(|i| format!("w{i}")).collect();
        let id = f.insert(&text.join(" "));
        let stats = f.pipeline(PipelineOptions::default()).run_until_idle().unwrap();
        assert_eq!(stats.token_links, 40);
        assert_eq!(fetch_document_tokens(&f.store, id, 16).unwrap().len(), 40);
    }

    #[test]
    fn shift_clamps_to_chunk() {
        let chunk = Span::new(10, 20);
        assert_eq!(shift_into_chunk(Span::new(2, 5), chunk), Span::new(12, 15));
        assert_eq!(shift_into_chunk(Span::new(8, 30), chunk), Span::new(18, 20));
        assert_eq!(shift_into_chunk(Span::new(0, 0), chunk), Span::new(10, 10));
    }
}
