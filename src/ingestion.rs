use std::path::Path;

use rayon::prelude::*;

use crate::{
    doc_id::DocumentId,
    error::{Error, Result},
    records::{Document, DocumentMetadata},
    store::{DeleteOutcome, RecordStore},
    vector_index::VectorIndex,
    walker::{SourceFile, discover_sources},
};

/// Store a new, unindexed document. It becomes searchable once the
/// indexing pipeline has processed it.
pub fn insert(
    store: &RecordStore,
    text: &str,
    metadata: DocumentMetadata,
) -> Result<Document> {
    let document = store.insert_document(text, metadata)?;
    tracing::debug!(document = %document.id, bytes = text.len(), "inserted document");
    Ok(document)
}

/// Delete a document with its chunks and token links, and drop
/// embeddings nothing references anymore from the vector index.
pub fn delete(
    store: &RecordStore,
    index: &dyn VectorIndex,
    id: DocumentId,
) -> Result<DeleteOutcome> {
    let outcome = store.delete_document(id)?;
    if !outcome.removed {
        return Err(Error::NotFound {
            kind: "document",
            name: id.to_string(),
        });
    }
    index.remove(&outcome.reclaimed)?;
    tracing::debug!(
        document = %id,
        links = outcome.links_removed,
        reclaimed = outcome.reclaimed.len(),
        "deleted document"
    );
    Ok(outcome)
}

/// Extract a title from file content.
///
/// Looks for the first markdown heading (line starting with `# `).
/// Falls back to the filename without extension.
pub fn extract_title(content: &str, file_path: &Path) -> String {
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("# "))
        .map(str::trim)
        .find(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            file_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("untitled")
                .to_string()
        })
}

/// Insert every text file under `dir` as a new document.
///
/// Files are read in parallel and inserted in path order. Unreadable
/// files are logged and skipped. Returns the inserted documents.
pub fn import_directory(store: &RecordStore, dir: &Path) -> Result<Vec<Document>> {
    let files = discover_sources(dir)?;
    let loaded: Vec<(&SourceFile, String)> = files
        .par_iter()
        .filter_map(|file| match std::fs::read_to_string(&file.absolute_path) {
            Ok(content) => Some((file, content)),
            Err(e) => {
                tracing::warn!(
                    path = %file.absolute_path.display(),
                    "skipping unreadable file: {e}"
                );
                None
            }
        })
        .collect();

    let mut inserted = Vec::with_capacity(loaded.len());
    for (file, content) in loaded {
        if content.trim().is_empty() {
            continue;
        }
        let metadata = DocumentMetadata {
            title: extract_title(&content, &file.relative_path),
            ..Default::default()
        };
        inserted.push(insert(store, &content, metadata)?);
    }
    tracing::info!(files = files.len(), inserted = inserted.len(), "imported directory");
    Ok(inserted)
}
