// Embeddings module
// The `Embedder` seam and the dense matrix it produces


use std::sync::Arc;

use tracing::info;

use crate::config::{Config, ProviderKind};
use crate::providers::{GeminiClient, OllamaClient};
use crate::{RagError, Result};

/// Text embedding provider
///
/// `encode` always yields one row per input, all of the same width, even for a
/// single input.
pub trait Embedder: Send + Sync {
    /// Human-readable provider/model name, recorded in the index sidecar
    fn name(&self) -> &str;

    fn encode(&self, texts: &[String]) -> Result<EmbeddingMatrix>;
}

/// Row-major `(rows, dimension)` matrix of `f32` embeddings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingMatrix {
    dimension: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Build a matrix from per-text vectors, rejecting ragged or zero-width rows
    #[inline]
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Ok(Self::default());
        };

        let dimension = first.len();
        if dimension == 0 {
            return Err(RagError::Embedding(
                "provider returned an empty embedding vector".to_string(),
            ));
        }

        let mut data = Vec::with_capacity(rows.len() * dimension);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != dimension {
                return Err(RagError::Embedding(format!(
                    "embedding {} has {} dimensions, expected {}",
                    i,
                    row.len(),
                    dimension
                )));
            }
            data.extend_from_slice(row);
        }

        Ok(Self { dimension, data })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows(), self.dimension)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    #[inline]
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.max(1))
    }
}

/// Construct the embedder selected by `[embedding].provider`
///
/// Fails when the provider cannot be configured (e.g. missing API key); callers
/// treat this as fatal.
#[inline]
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    info!(
        "Loading {} embeddings ({})",
        config.embedding.provider,
        config.embedding.model_name()
    );

    let embedder: Arc<dyn Embedder> = match config.embedding.provider {
        ProviderKind::Gemini => Arc::new(GeminiClient::new(config)?),
        ProviderKind::Ollama => Arc::new(OllamaClient::new(config)?),
    };

    Ok(embedder)
}
