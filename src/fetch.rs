//! Paginated retrieval of a document's full token-vector set.

use rayon::prelude::*;

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
    records::DocumentToken,
    store::RecordStore,
};

/// Read every token vector of a document, page by page in link order.
///
/// A document without links yields an empty set. A link whose embedding
/// row is gone is a consistency error.
pub fn fetch_document_tokens(
    store: &RecordStore,
    document: DocumentId,
    page_size: usize,
) -> Result<Vec<DocumentToken>> {
    let page_size = page_size.max(1);
    let mut tokens = Vec::new();
    let mut cursor = None;

    loop {
        let page = store.token_links_page(document, cursor, page_size)?;
        let ids: Vec<u64> = page.iter().map(|link| link.embedding).collect();
        let vectors = store.embedding_vectors(&ids)?;

        for (link, vector) in page.iter().zip(vectors) {
            let vector = vector.ok_or_else(|| {
                Error::Consistency(format!(
                    "token link {} of document {document} references missing embedding {}",
                    link.id, link.embedding
                ))
            })?;
            tokens.push(DocumentToken {
                vector,
                span: link.span,
            });
        }

        if page.len() < page_size {
            break;
        }
        cursor = page.last().map(|link| link.id);
    }

    Ok(tokens)
}

/// Fetch several documents concurrently, preserving input order.
pub fn fetch_many(
    store: &RecordStore,
    documents: &[DocumentId],
    page_size: usize,
) -> Result<Vec<Vec<DocumentToken>>> {
    documents
        .par_iter()
        .map(|&document| fetch_document_tokens(store, document, page_size))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::EMBEDDING_DIM,
        records::{DocumentMetadata, Span},
        store::{PendingToken, PreparedDocument},
    };

    fn vector(seed: usize) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIM];
        v[seed % EMBEDDING_DIM] = 1.0 + seed as f32;
        v
    }

    fn indexed_document(
        store: &RecordStore,
        token_count: usize,
    ) -> DocumentId {
        let text = "x".repeat(token_count.max(1));
        let doc = store
            .insert_document(&text, DocumentMetadata::default())
            .unwrap();
        let PreparedDocument::Ready { pass, chunks, .. } = store
            .prepare_document(doc.id, &[Span::new(0, text.len())])
            .unwrap()
        else {
            panic!("document should be ready");
        };
        let tokens: Vec<PendingToken> = (0..token_count)
            .map(|i| PendingToken {
                chunk: chunks[0].id,
                vector: vector(i),
                span: Span::new(i, i + 1),
            })
            .collect();
        for batch in tokens.chunks(16) {
            store.persist_token_batch(doc.id, pass, batch).unwrap();
        }
        store.mark_indexed(doc.id, pass).unwrap();
        doc.id
    }

    #[test]
    fn pages_through_all_links_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&tmp.path().join("test.redb")).unwrap();
        let doc = indexed_document(&store, 37);

        let tokens = fetch_document_tokens(&store, doc, 16).unwrap();
        assert_eq!(tokens.len(), 37);
        for (i, token) in tokens.iter().enumerate() {
            assert_eq!(token.span, Span::new(i, i + 1));
            assert_eq!(token.vector, vector(i));
        }
    }

    #[test]
    fn exact_page_multiple_terminates() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&tmp.path().join("test.redb")).unwrap();
        let doc = indexed_document(&store, 32);
        assert_eq!(fetch_document_tokens(&store, doc, 16).unwrap().len(), 32);
    }

    #[test]
    fn document_without_links_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&tmp.path().join("test.redb")).unwrap();
        let doc = indexed_document(&store, 0);
        assert!(fetch_document_tokens(&store, doc, 16).unwrap().is_empty());
        assert!(
            fetch_document_tokens(&store, DocumentId(999), 16)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn fetch_many_preserves_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RecordStore::open(&tmp.path().join("test.redb")).unwrap();
        let a = indexed_document(&store, 3);
        let b = indexed_document(&store, 20);

        let sets = fetch_many(&store, &[b, a], 16).unwrap();
        assert_eq!(sets[0].len(), 20);
        assert_eq!(sets[1].len(), 3);
    }
}
