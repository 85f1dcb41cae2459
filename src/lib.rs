//! colsearch - late-interaction semantic search with match heat maps.
//!
//! Documents and queries are embedded as sequences of per-token vectors
//! by an external embedding service. A query is answered in three stages
//! of increasing cost and precision:
//!
//! 1. approximate nearest-neighbor search per query token, cut globally
//!    ([`candidates`]),
//! 2. approximate per-document MaxSim over those candidates
//!    ([`aggregate`]),
//! 3. exact MaxSim over each shortlisted document's full token set, which
//!    also yields a heat map of matching query/document spans
//!    ([`reranker`], [`heatmap`]).
//!
//! Documents become searchable once the [`indexer`] has embedded and
//! persisted them.
//!
//! # Quick start
//!
//! ```no_run
//! use colsearch::{DataDir, FlatIndex, HttpEmbeddingService, RecordStore};
//! use colsearch::search::{self, SearchParams};
//! use std::time::Duration;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let store = RecordStore::open(&data_dir.store_db()).unwrap();
//! let index = FlatIndex::from_store(&store).unwrap();
//! let embedder =
//!     HttpEmbeddingService::new("http://localhost:8000", Duration::from_secs(30))
//!         .unwrap();
//!
//! let params = SearchParams::new("the cat");
//! let results = search::execute_search(&params, &store, &index, &embedder).unwrap();
//! for r in &results {
//!     println!("{} (score: {:.3})", r.document_id, r.score);
//! }
//! ```

pub mod aggregate;
pub mod candidates;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod doc_id;
pub mod embedding;
pub mod embedding_service;
pub mod error;
pub mod fetch;
pub mod heatmap;
pub mod indexer;
pub mod ingestion;
pub mod records;
pub mod render;
pub mod reranker;
pub mod scheduler;
pub mod search;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
pub mod vector_index;
pub mod walker;

pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use embedding_service::{EmbeddingService, HttpEmbeddingService};
pub use error::{Error, Result};
pub use heatmap::HeatMap;
pub use store::RecordStore;
pub use vector_index::{FlatIndex, VectorIndex};
