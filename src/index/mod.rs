// Index module
// Offline build of the flat vector index and its metadata sidecar

pub mod vector_store;


use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub use vector_store::{SearchHit, VectorStore};

use crate::config::{Config, IndexLocation};
use crate::corpus::{CorpusLoad, load_corpus};
use crate::embeddings::Embedder;
use crate::{RagError, Result};

/// One stored vector paired with its identity and provenance
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    /// Stable identifier shared with the sidecar entry
    pub id: String,
    pub position: u32,
    pub source: String,
    pub vector: Vec<f32>,
}

/// Per-row metadata stored in the sidecar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarMeta {
    #[serde(default)]
    pub id: String,
    pub source: String,
}

/// JSON file holding `texts[i]` and `metas[i]` for index row `i`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub texts: Vec<String>,
    pub metas: Vec<SidecarMeta>,
    #[serde(default)]
    pub dimension: usize,
    #[serde(default)]
    pub embedder: String,
    #[serde(default)]
    pub built_at: Option<DateTime<Utc>>,
}

impl Sidecar {
    #[inline]
    pub fn len(&self) -> usize {
        self.texts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    #[inline]
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            RagError::Index(format!("Failed to read sidecar {}: {}", path.display(), e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            RagError::Index(format!("Failed to parse sidecar {}: {}", path.display(), e))
        })
    }

    /// Write the sidecar next to a temporary name, then rename it into place
    #[inline]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RagError::Index(format!("Failed to serialize sidecar: {}", e)))?;

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Outcome of a build
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub indexed: usize,
    pub dimension: usize,
    pub skipped_files: usize,
    pub skipped_entries: usize,
    /// False when the corpus was empty and nothing was written
    pub written: bool,
}

/// Embed the configured corpus and replace the on-disk index and sidecar
///
/// An empty corpus is a no-op that leaves any previous index untouched.
#[inline]
pub async fn build_index(config: &Config, embedder: &dyn Embedder) -> Result<BuildReport> {
    let load = load_corpus(&config.chat_dir(), &config.text_dir());
    build_from_corpus(&config.index_location(), load, embedder).await
}

/// Build from an already-loaded corpus
#[inline]
pub async fn build_from_corpus(
    location: &IndexLocation,
    load: CorpusLoad,
    embedder: &dyn Embedder,
) -> Result<BuildReport> {
    let mut report = BuildReport {
        skipped_files: load.skipped_files,
        skipped_entries: load.skipped_entries,
        ..BuildReport::default()
    };

    if load.is_empty() {
        warn!("No documents found, index left unchanged");
        return Ok(report);
    }

    let (texts, sources): (Vec<String>, Vec<String>) = load
        .documents
        .into_iter()
        .map(|document| (document.text, document.meta.source))
        .unzip();

    info!(
        "Embedding {} documents with {}",
        texts.len(),
        embedder.name()
    );
    let embeddings = embedder.encode(&texts)?;
    if embeddings.rows() != texts.len() {
        return Err(RagError::Embedding(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            embeddings.rows()
        )));
    }

    let mut records = Vec::with_capacity(texts.len());
    let mut metas = Vec::with_capacity(texts.len());
    for (position, (vector, source)) in embeddings.iter_rows().zip(sources).enumerate() {
        let id = Uuid::new_v4().to_string();
        let position = u32::try_from(position)
            .map_err(|_| RagError::Index("corpus too large for index".to_string()))?;
        records.push(IndexRecord {
            id: id.clone(),
            position,
            source: source.clone(),
            vector: vector.to_vec(),
        });
        metas.push(SidecarMeta { id, source });
    }

    let mut store = VectorStore::connect(location).await?;
    store.replace_all(&records).await?;

    let sidecar = Sidecar {
        texts,
        metas,
        dimension: embeddings.dimension(),
        embedder: embedder.name().to_string(),
        built_at: Some(Utc::now()),
    };
    sidecar.save(&location.sidecar_path)?;

    report.indexed = sidecar.len();
    report.dimension = sidecar.dimension;
    report.written = true;

    info!(
        "Indexed {} items ({} dimensions)",
        report.indexed, report.dimension
    );
    Ok(report)
}
