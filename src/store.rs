use std::{
    collections::BTreeSet,
    ops::Bound,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use bytemuck::{Pod, Zeroable};
use redb::{
    Database,
    MultimapTableDefinition,
    ReadableDatabase,
    ReadableMultimapTable,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    WriteTransaction,
};

use crate::{
    doc_id::DocumentId,
    embedding::{self, check_dimension, content_hash, vectors_identical},
    error::{Error, Result},
    records::{Chunk, Document, DocumentMetadata, Embedding, Span, TokenLink},
};

const DOCUMENTS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("documents");
/// doc_id -> (created_at, pass, indexed), kept in step with `DOCUMENTS`.
const DOC_STATE: TableDefinition<u64, (u64, u64, bool)> =
    TableDefinition::new("doc_state");
/// `(created_at, doc_id)` for every document with `indexed == false`.
const UNINDEXED: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("unindexed");
/// chunk id -> (doc_id, start, end)
const CHUNKS: TableDefinition<u64, (u64, u64, u64)> =
    TableDefinition::new("chunks");
const CHUNKS_BY_DOCUMENT: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("chunks_by_document");
const EMBEDDINGS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("embeddings");
const EMBEDDING_HASHES: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("embedding_hashes");
const TOKEN_LINKS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("token_links");
const LINKS_BY_DOCUMENT: TableDefinition<(u64, u64), ()> =
    TableDefinition::new("links_by_document");
const LINKS_BY_EMBEDDING: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("links_by_embedding");
const SEQUENCES: TableDefinition<&str, u64> =
    TableDefinition::new("sequences");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

const DOCUMENT_SEQ: &str = "document";
const CHUNK_SEQ: &str = "chunk";
const EMBEDDING_SEQ: &str = "embedding";
const LINK_SEQ: &str = "token_link";
const CREATED_AT_SEQ: &str = "created_at";
const PASS_SEQ: &str = "pass";

/// Embedding rows start with the content hash (u64 LE), followed by the
/// f32 components.
const EMBEDDING_HEADER_SIZE: usize = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LinkRow {
    document: u64,
    chunk: u64,
    embedding: u64,
    start: u64,
    end: u64,
}

impl LinkRow {
    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != std::mem::size_of::<Self>() {
            return Err(Error::Consistency(format!(
                "token link row has {} bytes",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn into_link(self, id: u64) -> TokenLink {
        TokenLink {
            id,
            document: DocumentId(self.document),
            chunk: self.chunk,
            embedding: self.embedding,
            span: Span::new(self.start as usize, self.end as usize),
        }
    }
}

/// Small per-document state read on hot paths instead of the full
/// serialized document.
#[derive(Debug, Clone, Copy)]
struct DocState {
    created_at: u64,
    /// Persistence pass currently allowed to write; 0 before the first.
    pass: u64,
    indexed: bool,
}

impl DocState {
    fn from_row((created_at, pass, indexed): (u64, u64, bool)) -> Self {
        Self {
            created_at,
            pass,
            indexed,
        }
    }

    fn row(self) -> (u64, u64, bool) {
        (self.created_at, self.pass, self.indexed)
    }

    /// True when `pass` may still write to or finalize the document.
    fn accepts(self, pass: u64) -> bool {
        !self.indexed && self.pass == pass
    }
}

/// A token vector ready to be persisted for one chunk.
#[derive(Debug, Clone)]
pub struct PendingToken {
    pub chunk: u64,
    pub vector: Vec<f32>,
    /// Document-coordinate span; must lie inside the chunk.
    pub span: Span,
}

/// Result of starting a persistence pass over a document.
#[derive(Debug)]
pub enum PreparedDocument {
    /// The document is already indexed or no longer exists.
    Skip,
    Ready {
        /// Token for this pass. Starting another pass on the same
        /// document invalidates it.
        pass: u64,
        chunks: Vec<Chunk>,
        /// Embeddings left without any link after clearing the leftovers
        /// of an earlier, interrupted pass.
        reclaimed: Vec<u64>,
    },
}

/// Result of persisting one sub-batch of token vectors.
#[derive(Debug, Default)]
pub struct PersistOutcome {
    /// The document was already indexed or a newer pass took it over;
    /// nothing was written.
    pub skipped: bool,
    pub links_created: usize,
    pub embeddings_created: usize,
    /// Every embedding referenced by this batch, new or deduplicated.
    pub embeddings: Vec<(u64, Vec<f32>)>,
}

#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub removed: bool,
    pub links_removed: usize,
    /// Embedding ids whose last reference was removed.
    pub reclaimed: Vec<u64>,
}

/// A document that owns a token link to some embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingOwner {
    pub document: DocumentId,
    pub indexed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub documents: u64,
    pub unindexed: u64,
    pub chunks: u64,
    pub embeddings: u64,
    pub token_links: u64,
}

/// Durable storage for documents, chunks, the embedding pool and token
/// links, backed by a single redb database.
pub struct RecordStore {
    db: Database,
    hasher: fn(&[f32]) -> u64,
}

impl RecordStore {
    /// Open or create a record store at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use colsearch::RecordStore;
    ///
    /// let store = RecordStore::open(&tmp.path().join("colsearch.redb")).unwrap();
    /// assert_eq!(store.stats().unwrap().documents, 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(DOC_STATE)?;
        txn.open_table(UNINDEXED)?;
        txn.open_table(CHUNKS)?;
        txn.open_multimap_table(CHUNKS_BY_DOCUMENT)?;
        txn.open_table(EMBEDDINGS)?;
        txn.open_multimap_table(EMBEDDING_HASHES)?;
        txn.open_table(TOKEN_LINKS)?;
        txn.open_table(LINKS_BY_DOCUMENT)?;
        txn.open_multimap_table(LINKS_BY_EMBEDDING)?;
        txn.open_table(SEQUENCES)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self {
            db,
            hasher: content_hash,
        })
    }

    /// Replace the content hash function. Used to force collisions.
    #[cfg(test)]
    pub(crate) fn with_hasher(mut self, hasher: fn(&[f32]) -> u64) -> Self {
        self.hasher = hasher;
        self
    }

    // -- Documents --

    /// Store a new, unindexed document.
    pub fn insert_document(
        &self,
        text: &str,
        metadata: DocumentMetadata,
    ) -> Result<Document> {
        let txn = self.db.begin_write()?;
        let id = reserve_ids(&txn, DOCUMENT_SEQ, 1)?;
        let created_at = next_created_at(&txn)?;
        let document = Document {
            id: DocumentId(id),
            text: text.to_string(),
            metadata,
            indexed: false,
            created_at,
        };
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            write_document(&mut documents, &document)?;
            let state = DocState {
                created_at,
                pass: 0,
                indexed: false,
            };
            let mut states = txn.open_table(DOC_STATE)?;
            states.insert(id, state.row())?;
            let mut unindexed = txn.open_table(UNINDEXED)?;
            unindexed.insert((created_at, id), ())?;
        }
        txn.commit()?;
        Ok(document)
    }

    pub fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let Some(guard) = table.get(id.get())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    /// Load up to `limit` unindexed documents created strictly after
    /// `cursor`, oldest first.
    pub fn load_unindexed(
        &self,
        cursor: u64,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let txn = self.db.begin_read()?;
        let unindexed = txn.open_table(UNINDEXED)?;
        let documents = txn.open_table(DOCUMENTS)?;

        let range = (Bound::Excluded((cursor, u64::MAX)), Bound::Unbounded);
        let mut result = Vec::new();
        for entry in unindexed.range(range)?.take(limit) {
            let (key, _) = entry?;
            let (_, doc_id) = key.value();
            let guard = documents.get(doc_id)?.ok_or_else(|| {
                Error::Consistency(format!(
                    "unindexed entry for missing document {}",
                    DocumentId(doc_id)
                ))
            })?;
            result.push(serde_json::from_slice(guard.value())?);
        }
        Ok(result)
    }

    /// Delete a document with its chunks and token links.
    ///
    /// Embeddings that lose their last link are removed as well and their
    /// ids returned so the caller can drop them from the vector index.
    pub fn delete_document(&self, id: DocumentId) -> Result<DeleteOutcome> {
        let txn = self.db.begin_write()?;
        let removed = match read_state(&txn, id)? {
            Some(state) => {
                let mut documents = txn.open_table(DOCUMENTS)?;
                documents.remove(id.get())?;
                let mut states = txn.open_table(DOC_STATE)?;
                states.remove(id.get())?;
                let mut unindexed = txn.open_table(UNINDEXED)?;
                unindexed.remove((state.created_at, id.get()))?;
                true
            }
            None => false,
        };
        remove_chunks(&txn, id.get())?;
        let (links_removed, reclaimed) = remove_links(&txn, id.get())?;
        txn.commit()?;

        Ok(DeleteOutcome {
            removed,
            links_removed,
            reclaimed,
        })
    }

    // -- Indexing --

    /// Begin a persistence pass: clear anything an earlier pass left
    /// behind and store the document's chunks.
    ///
    /// The returned pass token supersedes every earlier one, so a pass
    /// that was overtaken can neither write links nor finalize.
    pub fn prepare_document(
        &self,
        id: DocumentId,
        chunk_spans: &[Span],
    ) -> Result<PreparedDocument> {
        let txn = self.db.begin_write()?;
        let Some(doc) = read_document(&txn, id)? else {
            return Ok(PreparedDocument::Skip);
        };
        let Some(mut state) = read_state(&txn, id)? else {
            return Err(Error::Consistency(format!(
                "document {id} has no state row"
            )));
        };
        if state.indexed {
            return Ok(PreparedDocument::Skip);
        }
        state.pass = reserve_ids(&txn, PASS_SEQ, 1)?;
        {
            let mut states = txn.open_table(DOC_STATE)?;
            states.insert(id.get(), state.row())?;
        }

        remove_chunks(&txn, id.get())?;
        let (_, reclaimed) = remove_links(&txn, id.get())?;

        let mut chunks = Vec::with_capacity(chunk_spans.len());
        if !chunk_spans.is_empty() {
            let first = reserve_ids(&txn, CHUNK_SEQ, chunk_spans.len() as u64)?;
            let mut table = txn.open_table(CHUNKS)?;
            let mut by_document = txn.open_multimap_table(CHUNKS_BY_DOCUMENT)?;
            for (offset, span) in chunk_spans.iter().enumerate() {
                if span.end > doc.text.len() || span.start > span.end {
                    return Err(Error::InvalidInput(format!(
                        "chunk [{}, {}) outside document {id}",
                        span.start, span.end
                    )));
                }
                let chunk_id = first + offset as u64;
                table.insert(
                    chunk_id,
                    (id.get(), span.start as u64, span.end as u64),
                )?;
                by_document.insert(id.get(), chunk_id)?;
                chunks.push(Chunk {
                    id: chunk_id,
                    document: id,
                    span: *span,
                });
            }
        }
        txn.commit()?;

        Ok(PreparedDocument::Ready {
            pass: state.pass,
            chunks,
            reclaimed,
        })
    }

    /// Persist one sub-batch of token vectors for a document in a single
    /// transaction, deduplicating embeddings by content.
    ///
    /// A document that is already indexed, or whose current pass is not
    /// `pass`, is left untouched.
    pub fn persist_token_batch(
        &self,
        id: DocumentId,
        pass: u64,
        tokens: &[PendingToken],
    ) -> Result<PersistOutcome> {
        let txn = self.db.begin_write()?;
        let state = read_state(&txn, id)?.ok_or_else(|| Error::NotFound {
            kind: "document",
            name: id.to_string(),
        })?;
        if !state.accepts(pass) {
            return Ok(PersistOutcome {
                skipped: true,
                ..Default::default()
            });
        }

        let mut outcome = PersistOutcome::default();
        for token in tokens {
            check_dimension(&token.vector)?;
            let chunk_span = read_chunk_span(&txn, id, token.chunk)?;
            if !chunk_span.contains(&token.span) {
                return Err(Error::InvalidInput(format!(
                    "token span [{}, {}) escapes chunk {} of {id}",
                    token.span.start, token.span.end, token.chunk
                )));
            }

            let (embedding_id, created) =
                self.intern_embedding(&txn, &token.vector)?;
            if created {
                outcome.embeddings_created += 1;
            }

            let link_id = reserve_ids(&txn, LINK_SEQ, 1)?;
            let row = LinkRow {
                document: id.get(),
                chunk: token.chunk,
                embedding: embedding_id,
                start: token.span.start as u64,
                end: token.span.end as u64,
            };
            {
                let mut links = txn.open_table(TOKEN_LINKS)?;
                links.insert(link_id, bytemuck::bytes_of(&row))?;
                let mut by_document = txn.open_table(LINKS_BY_DOCUMENT)?;
                by_document.insert((id.get(), link_id), ())?;
                let mut by_embedding =
                    txn.open_multimap_table(LINKS_BY_EMBEDDING)?;
                by_embedding.insert(embedding_id, link_id)?;
            }
            outcome.links_created += 1;
            outcome.embeddings.push((embedding_id, token.vector.clone()));
        }
        txn.commit()?;
        Ok(outcome)
    }

    /// Find the row holding exactly `vector`, or insert a new one.
    ///
    /// Rows sharing the hash are probed in id order and compared bit for
    /// bit; a collision with a different vector yields a new row.
    fn intern_embedding(
        &self,
        txn: &WriteTransaction,
        vector: &[f32],
    ) -> Result<(u64, bool)> {
        let hash = (self.hasher)(vector);
        {
            let hashes = txn.open_multimap_table(EMBEDDING_HASHES)?;
            let embeddings = txn.open_table(EMBEDDINGS)?;
            for candidate in hashes.get(hash)? {
                let candidate = candidate?.value();
                let Some(guard) = embeddings.get(candidate)? else {
                    continue;
                };
                let stored = decode_embedding_row(guard.value())?.1;
                if vectors_identical(&stored, vector) {
                    return Ok((candidate, false));
                }
            }
        }

        let id = reserve_ids(txn, EMBEDDING_SEQ, 1)?;
        let mut row = Vec::with_capacity(
            EMBEDDING_HEADER_SIZE + std::mem::size_of_val(vector),
        );
        row.extend_from_slice(&hash.to_le_bytes());
        row.extend_from_slice(embedding::encode_vector(vector));

        let mut embeddings = txn.open_table(EMBEDDINGS)?;
        embeddings.insert(id, row.as_slice())?;
        let mut hashes = txn.open_multimap_table(EMBEDDING_HASHES)?;
        hashes.insert(hash, id)?;
        Ok((id, true))
    }

    /// Flip the document to indexed on behalf of `pass`. Returns false
    /// when it already was, no longer exists, or `pass` was superseded.
    pub fn mark_indexed(&self, id: DocumentId, pass: u64) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let Some(mut state) = read_state(&txn, id)? else {
            return Ok(false);
        };
        if !state.accepts(pass) {
            return Ok(false);
        }
        let mut doc = read_document(&txn, id)?.ok_or_else(|| {
            Error::Consistency(format!("state row for missing document {id}"))
        })?;
        doc.indexed = true;
        state.indexed = true;
        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            write_document(&mut documents, &doc)?;
            let mut states = txn.open_table(DOC_STATE)?;
            states.insert(id.get(), state.row())?;
            let mut unindexed = txn.open_table(UNINDEXED)?;
            unindexed.remove((state.created_at, id.get()))?;
        }
        txn.commit()?;
        Ok(true)
    }

    // -- Query-side reads --

    /// One page of a document's token links ordered by link id, starting
    /// strictly after `after`.
    pub fn token_links_page(
        &self,
        id: DocumentId,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<TokenLink>> {
        let txn = self.db.begin_read()?;
        let by_document = txn.open_table(LINKS_BY_DOCUMENT)?;
        let links = txn.open_table(TOKEN_LINKS)?;

        let lower = match after {
            Some(link) => Bound::Excluded((id.get(), link)),
            None => Bound::Included((id.get(), 0)),
        };
        let upper = Bound::Included((id.get(), u64::MAX));

        let mut page = Vec::with_capacity(limit);
        for entry in by_document.range((lower, upper))?.take(limit) {
            let (key, _) = entry?;
            let (_, link_id) = key.value();
            let guard = links.get(link_id)?.ok_or_else(|| {
                Error::Consistency(format!(
                    "token link {link_id} of {id} is missing"
                ))
            })?;
            page.push(LinkRow::decode(guard.value())?.into_link(link_id));
        }
        Ok(page)
    }

    /// Load embedding vectors in one read transaction, preserving input
    /// order. Missing rows come back as `None`.
    pub fn embedding_vectors(
        &self,
        ids: &[u64],
    ) -> Result<Vec<Option<Vec<f32>>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        ids.iter()
            .map(|&id| -> Result<Option<Vec<f32>>> {
                match table.get(id)? {
                    Some(guard) => {
                        Ok(Some(decode_embedding_row(guard.value())?.1))
                    }
                    None => Ok(None),
                }
            })
            .collect()
    }

    /// Documents owning a link to the given embedding, deduplicated and in
    /// link order. Empty when the embedding has no links at all.
    pub fn embedding_owners(
        &self,
        embedding_id: u64,
    ) -> Result<Vec<EmbeddingOwner>> {
        let txn = self.db.begin_read()?;
        let by_embedding = txn.open_multimap_table(LINKS_BY_EMBEDDING)?;
        let links = txn.open_table(TOKEN_LINKS)?;
        let states = txn.open_table(DOC_STATE)?;

        let mut owners: Vec<EmbeddingOwner> = Vec::new();
        for link_id in by_embedding.get(embedding_id)? {
            let link_id = link_id?.value();
            let guard = links.get(link_id)?.ok_or_else(|| {
                Error::Consistency(format!("token link {link_id} is missing"))
            })?;
            let row = LinkRow::decode(guard.value())?;
            if owners.iter().any(|o| o.document.get() == row.document) {
                continue;
            }
            let state = states.get(row.document)?.ok_or_else(|| {
                Error::Consistency(format!(
                    "token link {link_id} points at missing document {}",
                    DocumentId(row.document)
                ))
            })?;
            owners.push(EmbeddingOwner {
                document: DocumentId(row.document),
                indexed: DocState::from_row(state.value()).indexed,
            });
        }
        Ok(owners)
    }

    /// All stored embeddings, for rebuilding an in-memory vector index.
    pub fn list_embeddings(&self) -> Result<Vec<Embedding>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(EMBEDDINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let (hash, vector) = decode_embedding_row(v.value())?;
            result.push(Embedding {
                id: k.value(),
                vector,
                hash,
            });
        }
        Ok(result)
    }

    pub fn chunks_for_document(&self, id: DocumentId) -> Result<Vec<Chunk>> {
        let txn = self.db.begin_read()?;
        let by_document = txn.open_multimap_table(CHUNKS_BY_DOCUMENT)?;
        let table = txn.open_table(CHUNKS)?;
        let mut chunks = Vec::new();
        for chunk_id in by_document.get(id.get())? {
            let chunk_id = chunk_id?.value();
            if let Some(guard) = table.get(chunk_id)? {
                let (_, start, end) = guard.value();
                chunks.push(Chunk {
                    id: chunk_id,
                    document: id,
                    span: Span::new(start as usize, end as usize),
                });
            }
        }
        chunks.sort_by_key(|c| c.span.start);
        Ok(chunks)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let txn = self.db.begin_read()?;
        Ok(StoreStats {
            documents: txn.open_table(DOCUMENTS)?.len()?,
            unindexed: txn.open_table(UNINDEXED)?.len()?,
            chunks: txn.open_table(CHUNKS)?.len()?,
            embeddings: txn.open_table(EMBEDDINGS)?.len()?,
            token_links: txn.open_table(TOKEN_LINKS)?.len()?,
        })
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

/// Reserve `count` consecutive ids from a named sequence; returns the
/// first. Ids start at 1.
fn reserve_ids(txn: &WriteTransaction, name: &str, count: u64) -> Result<u64> {
    let mut table = txn.open_table(SEQUENCES)?;
    let current = table.get(name)?.map(|g| g.value()).unwrap_or(0);
    table.insert(name, current + count)?;
    Ok(current + 1)
}

fn next_created_at(txn: &WriteTransaction) -> Result<u64> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let mut table = txn.open_table(SEQUENCES)?;
    let last = table.get(CREATED_AT_SEQ)?.map(|g| g.value()).unwrap_or(0);
    let created_at = now.max(last + 1);
    table.insert(CREATED_AT_SEQ, created_at)?;
    Ok(created_at)
}

fn read_document(
    txn: &WriteTransaction,
    id: DocumentId,
) -> Result<Option<Document>> {
    let table = txn.open_table(DOCUMENTS)?;
    let bytes = table.get(id.get())?.map(|g| g.value().to_vec());
    match bytes {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn read_state(
    txn: &WriteTransaction,
    id: DocumentId,
) -> Result<Option<DocState>> {
    let table = txn.open_table(DOC_STATE)?;
    let row = table.get(id.get())?.map(|g| g.value());
    Ok(row.map(DocState::from_row))
}

fn write_document(
    table: &mut redb::Table<'_, u64, &'static [u8]>,
    doc: &Document,
) -> Result<()> {
    let bytes = serde_json::to_vec(doc)?;
    table.insert(doc.id.get(), bytes.as_slice())?;
    Ok(())
}

fn read_chunk_span(
    txn: &WriteTransaction,
    id: DocumentId,
    chunk_id: u64,
) -> Result<Span> {
    let table = txn.open_table(CHUNKS)?;
    let row = table.get(chunk_id)?.map(|g| g.value());
    match row {
        Some((owner, start, end)) if owner == id.get() => {
            Ok(Span::new(start as usize, end as usize))
        }
        Some(_) => Err(Error::InvalidInput(format!(
            "chunk {chunk_id} does not belong to {id}"
        ))),
        None => Err(Error::NotFound {
            kind: "chunk",
            name: chunk_id.to_string(),
        }),
    }
}

fn decode_embedding_row(bytes: &[u8]) -> Result<(u64, Vec<f32>)> {
    if bytes.len() < EMBEDDING_HEADER_SIZE {
        return Err(Error::Consistency(format!(
            "embedding row has {} bytes",
            bytes.len()
        )));
    }
    let mut hash = [0u8; 8];
    hash.copy_from_slice(&bytes[..EMBEDDING_HEADER_SIZE]);
    let vector = embedding::decode_vector(&bytes[EMBEDDING_HEADER_SIZE..])?;
    Ok((u64::from_le_bytes(hash), vector))
}

fn remove_chunks(txn: &WriteTransaction, doc_id: u64) -> Result<usize> {
    let mut by_document = txn.open_multimap_table(CHUNKS_BY_DOCUMENT)?;
    let chunk_ids = by_document
        .remove_all(doc_id)?
        .map(|c| c.map(|g| g.value()))
        .collect::<std::result::Result<Vec<u64>, _>>()?;
    let mut chunks = txn.open_table(CHUNKS)?;
    for chunk_id in &chunk_ids {
        chunks.remove(*chunk_id)?;
    }
    Ok(chunk_ids.len())
}

/// Remove every token link of a document and reclaim embeddings that are
/// no longer referenced. Returns (links removed, reclaimed embedding ids).
fn remove_links(txn: &WriteTransaction, doc_id: u64) -> Result<(usize, Vec<u64>)> {
    let mut by_document = txn.open_table(LINKS_BY_DOCUMENT)?;
    let link_ids = by_document
        .range((doc_id, 0)..=(doc_id, u64::MAX))?
        .map(|e| e.map(|(k, _)| k.value().1))
        .collect::<std::result::Result<Vec<u64>, _>>()?;
    if link_ids.is_empty() {
        return Ok((0, Vec::new()));
    }

    let mut links = txn.open_table(TOKEN_LINKS)?;
    let mut by_embedding = txn.open_multimap_table(LINKS_BY_EMBEDDING)?;
    let mut touched = BTreeSet::new();
    for &link_id in &link_ids {
        by_document.remove((doc_id, link_id))?;
        let row = links.remove(link_id)?.map(|g| g.value().to_vec());
        if let Some(bytes) = row {
            let row = LinkRow::decode(&bytes)?;
            by_embedding.remove(row.embedding, link_id)?;
            touched.insert(row.embedding);
        }
    }

    let mut embeddings = txn.open_table(EMBEDDINGS)?;
    let mut hashes = txn.open_multimap_table(EMBEDDING_HASHES)?;
    let mut reclaimed = Vec::new();
    for embedding_id in touched {
        if by_embedding.get(embedding_id)?.next().is_some() {
            continue;
        }
        let row = embeddings.remove(embedding_id)?.map(|g| g.value().to_vec());
        if let Some(bytes) = row {
            let (hash, _) = decode_embedding_row(&bytes)?;
            hashes.remove(hash, embedding_id)?;
        }
        reclaimed.push(embedding_id);
    }
    Ok((link_ids.len(), reclaimed))
}
