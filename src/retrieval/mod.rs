// Retrieval module
// Loads the built index once and serves nearest-neighbour lookups


use std::sync::Arc;

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::IndexLocation;
use crate::embeddings::Embedder;
use crate::index::{Sidecar, VectorStore};
use crate::{RagError, Result};

pub const DEFAULT_TOP_K: usize = 3;

/// A sidecar entry returned for a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub source: String,
    pub distance: f32,
}

struct LoadedIndex {
    store: VectorStore,
    sidecar: Sidecar,
}

/// Read-only view over the on-disk index
///
/// `initialize` loads the index at most once; concurrent callers wait on the
/// same load and later calls are no-ops.
pub struct Retriever {
    location: IndexLocation,
    embedder: Arc<dyn Embedder>,
    state: OnceCell<LoadedIndex>,
}

impl Retriever {
    #[inline]
    pub fn new(location: IndexLocation, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            location,
            embedder,
            state: OnceCell::new(),
        }
    }

    #[inline]
    pub async fn initialize(&self) -> Result<()> {
        self.state.get_or_try_init(|| self.load()).await?;
        Ok(())
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Number of indexed passages, once loaded
    #[inline]
    pub fn passage_count(&self) -> Option<usize> {
        self.state.get().map(|loaded| loaded.sidecar.len())
    }

    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.state.get().and_then(|loaded| loaded.store.dimension())
    }

    async fn load(&self) -> Result<LoadedIndex> {
        info!("Loading index from {}", self.location.vectors_dir.display());

        let sidecar = Sidecar::load(&self.location.sidecar_path)?;
        let store = match VectorStore::open(&self.location).await? {
            Some(store) if store.table_exists().await? => store,
            _ => {
                return Err(RagError::Index(format!(
                    "table {} not found in {}; build the index first",
                    self.location.table,
                    self.location.vectors_dir.display()
                )));
            }
        };

        let rows = store.count_rows().await?;
        if sidecar.texts.len() != rows || sidecar.metas.len() != rows {
            return Err(RagError::IndexMisaligned(format!(
                "{} texts and {} metas for {} index rows",
                sidecar.texts.len(),
                sidecar.metas.len(),
                rows
            )));
        }

        if let Some(dimension) = store.dimension() {
            if sidecar.dimension != 0 && sidecar.dimension != dimension {
                return Err(RagError::IndexMisaligned(format!(
                    "sidecar records {} dimensions, index has {}",
                    sidecar.dimension, dimension
                )));
            }
        }

        info!(
            "Loaded {} passages built with {}",
            rows,
            if sidecar.embedder.is_empty() {
                "an unknown embedder"
            } else {
                sidecar.embedder.as_str()
            }
        );
        Ok(LoadedIndex { store, sidecar })
    }

    /// Embed `text` and return its `k` nearest passages, nearest first
    #[inline]
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        if !self.is_initialized() {
            return Err(RagError::IndexNotLoaded);
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedder = Arc::clone(&self.embedder);
        let texts = vec![text.to_string()];
        let embedding = tokio::task::spawn_blocking(move || embedder.encode(&texts))
            .await
            .map_err(|e| RagError::Embedding(format!("embedding task failed: {}", e)))??;

        let vector = embedding
            .row(0)
            .ok_or_else(|| RagError::Embedding("no embedding returned for query".to_string()))?;

        self.search_vector(vector, k).await
    }

    /// Nearest passages to an already-embedded query
    #[inline]
    pub async fn search_vector(&self, vector: &[f32], k: usize) -> Result<Vec<RetrievedPassage>> {
        let loaded = self.state.get().ok_or(RagError::IndexNotLoaded)?;

        let hits = loaded.store.search(vector, k).await?;
        debug!("Index returned {} hits for k={}", hits.len(), k);

        hits.into_iter()
            .map(|hit| {
                let (text, meta) = loaded
                    .sidecar
                    .texts
                    .get(hit.position)
                    .zip(loaded.sidecar.metas.get(hit.position))
                    .ok_or_else(|| {
                        RagError::IndexMisaligned(format!(
                            "row {} has no sidecar entry",
                            hit.position
                        ))
                    })?;

                if meta.id != hit.id {
                    return Err(RagError::IndexMisaligned(format!(
                        "row {} has id {} but sidecar has {}",
                        hit.position, hit.id, meta.id
                    )));
                }

                Ok(RetrievedPassage {
                    text: text.clone(),
                    source: meta.source.clone(),
                    distance: hit.distance,
                })
            })
            .collect()
    }
}
