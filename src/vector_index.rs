//! Approximate nearest-neighbor search over the embedding pool.

use std::{collections::HashMap, sync::RwLock};

use rayon::prelude::*;

use crate::{
    embedding::cosine_similarity,
    error::{Error, Result},
    store::RecordStore,
};

/// One search hit: an embedding id and its similarity to the probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    pub similarity: f32,
}

/// k-nearest-neighbor search over token vectors.
///
/// Implementations return hits ordered by descending similarity and
/// may be approximate.
pub trait VectorIndex: Send + Sync {
    fn nearest_neighbors(&self, vector: &[f32], k: usize)
    -> Result<Vec<Neighbor>>;

    /// Insert or replace the vector stored under `id`.
    fn upsert(&self, id: u64, vector: Vec<f32>) -> Result<()>;

    /// Remove entries; unknown ids are ignored.
    fn remove(&self, ids: &[u64]) -> Result<()>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// In-process index that scans every vector.
///
/// Exact, so it trivially satisfies the approximate contract. Suitable for
/// corpora that fit in memory; rebuilt from the record store at startup.
#[derive(Debug, Default)]
pub struct FlatIndex {
    vectors: RwLock<HashMap<u64, Vec<f32>>>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every stored embedding into a fresh index.
    pub fn from_store(store: &RecordStore) -> Result<Self> {
        let vectors: HashMap<u64, Vec<f32>> =
            store
                .list_embeddings()?
                .into_iter()
                .map(|e| (e.id, e.vector))
                .collect();
        tracing::debug!(vectors = vectors.len(), "loaded flat vector index");
        Ok(Self {
            vectors: RwLock::new(vectors),
        })
    }
}

fn poisoned() -> Error {
    Error::Config("vector index lock poisoned".to_string())
}

impl VectorIndex for FlatIndex {
    fn nearest_neighbors(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vectors = self.vectors.read().map_err(|_| poisoned())?;
        let mut hits: Vec<Neighbor> = vectors
            .par_iter()
            .filter_map(|(&id, stored)| {
                cosine_similarity(vector, stored)
                    .map(|similarity| Neighbor { id, similarity })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn upsert(&self, id: u64, vector: Vec<f32>) -> Result<()> {
        let mut vectors = self.vectors.write().map_err(|_| poisoned())?;
        vectors.insert(id, vector);
        Ok(())
    }

    fn remove(&self, ids: &[u64]) -> Result<()> {
        let mut vectors = self.vectors.write().map_err(|_| poisoned())?;
        for id in ids {
            vectors.remove(id);
        }
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.vectors.read().map_err(|_| poisoned())?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_descending_similarity() {
        let index = FlatIndex::new();
        index.upsert(1, vec![1.0, 0.0]).unwrap();
        index.upsert(2, vec![0.0, 1.0]).unwrap();
        index.upsert(3, vec![1.0, 1.0]).unwrap();

        let hits = index.nearest_neighbors(&[1.0, 0.1], 3).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn truncates_to_k() {
        let index = FlatIndex::new();
        for id in 0..10 {
            index.upsert(id, vec![1.0, id as f32]).unwrap();
        }
        assert_eq!(index.nearest_neighbors(&[1.0, 0.0], 4).unwrap().len(), 4);
        assert!(index.nearest_neighbors(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn zero_vectors_never_match() {
        let index = FlatIndex::new();
        index.upsert(1, vec![0.0, 0.0]).unwrap();
        index.upsert(2, vec![1.0, 0.0]).unwrap();
        let hits = index.nearest_neighbors(&[1.0, 0.0], 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);
        assert!(index.nearest_neighbors(&[0.0, 0.0], 10).unwrap().is_empty());
    }

    #[test]
    fn remove_drops_entries() {
        let index = FlatIndex::new();
        index.upsert(1, vec![1.0]).unwrap();
        index.upsert(2, vec![1.0]).unwrap();
        index.remove(&[1, 99]).unwrap();
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.nearest_neighbors(&[1.0], 5).unwrap()[0].id, 2);
    }
}
