
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::HttpTransport;
use crate::RagError;
use crate::config::Config;
use crate::embeddings::{Embedder, EmbeddingMatrix};
use crate::generation::Generator;

const API_VERSION: &str = "v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client for the Google Generative Language API
#[derive(Clone)]
pub struct GeminiClient {
    base_url: Url,
    api_key: String,
    embedding_model: String,
    generation_model: String,
    task_type: String,
    batch_size: u32,
    transport: HttpTransport,
    name: String,
}

impl std::fmt::Debug for GeminiClient {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"<redacted>")
            .field("embedding_model", &self.embedding_model)
            .field("generation_model", &self.generation_model)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GeminiClient {
    /// Build a client; the API key is read from `GOOGLE_API_KEY`
    #[inline]
    pub fn new(config: &Config) -> crate::Result<Self> {
        let api_key = config
            .gemini_api_key()
            .map_err(|e| RagError::Config(e.to_string()))?;
        Self::with_api_key(config, api_key)
    }

    #[inline]
    pub fn with_api_key(config: &Config, api_key: String) -> crate::Result<Self> {
        let base_url = Url::parse(&config.gemini.base_url).map_err(|e| {
            RagError::Config(format!(
                "Invalid Gemini base URL {}: {}",
                config.gemini.base_url, e
            ))
        })?;

        let embedding_model = config.embedding.model_name().to_string();
        Ok(Self {
            base_url,
            api_key,
            name: format!("gemini/{}", embedding_model),
            embedding_model,
            generation_model: config.generation.model_name().to_string(),
            task_type: config.embedding.task_type.clone(),
            batch_size: config.embedding.batch_size.max(1),
            transport: HttpTransport::from_config(&config.http),
        })
    }

    fn model_url(&self, model: &str, action: &str) -> Result<Url> {
        let model = model.trim_start_matches("models/");
        self.base_url
            .join(&format!("/{}/models/{}:{}", API_VERSION, model, action))
            .with_context(|| format!("Failed to build {} URL", action))
    }

    /// Embed `texts`, splitting into `batch_size` requests
    #[inline]
    pub fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating Gemini embeddings for {} texts", texts.len());

        let url = self.model_url(&self.embedding_model, "batchEmbedContents")?;
        let model_ref = format!(
            "models/{}",
            self.embedding_model.trim_start_matches("models/")
        );

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size as usize) {
            let request = BatchEmbedRequest {
                requests: chunk
                    .iter()
                    .map(|text| EmbedContentRequest {
                        model: model_ref.clone(),
                        content: Content {
                            parts: vec![Part {
                                text: text.as_str(),
                            }],
                        },
                        task_type: &self.task_type,
                    })
                    .collect(),
            };

            let response_text = self
                .transport
                .post_json(&url, &[(API_KEY_HEADER, self.api_key.as_str())], &request)
                .with_context(|| format!("Failed to embed batch of {} texts", chunk.len()))?;

            let response: BatchEmbedResponse = serde_json::from_str(&response_text)
                .context("Failed to parse embedding response")?;

            if response.embeddings.len() != chunk.len() {
                return Err(anyhow::anyhow!(
                    "Mismatch between request and response counts: {} vs {}",
                    chunk.len(),
                    response.embeddings.len()
                ));
            }

            results.extend(response.embeddings.into_iter().map(|e| e.values));
        }

        Ok(results)
    }

    /// Single-turn completion via `generateContent`
    #[inline]
    pub fn generate_text(&self, prompt: &str) -> Result<String> {
        let url = self.model_url(&self.generation_model, "generateContent")?;
        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
        };

        let response_text = self
            .transport
            .post_json(&url, &[(API_KEY_HEADER, self.api_key.as_str())], &request)
            .context("Failed to generate content")?;

        let response: GenerateContentResponse = serde_json::from_str(&response_text)
            .context("Failed to parse generateContent response")?;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Gemini returned no candidates"))?;

        let finish_reason = candidate
            .finish_reason
            .unwrap_or_else(|| "unknown".to_string());
        let parts: Vec<String> = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if parts.is_empty() {
            return Err(anyhow::anyhow!(
                "Gemini returned no text (finish reason: {})",
                finish_reason
            ));
        }

        Ok(parts.concat())
    }
}

impl Embedder for GeminiClient {
    #[inline]
    fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    fn encode(&self, texts: &[String]) -> crate::Result<EmbeddingMatrix> {
        let rows = self
            .generate_embeddings(texts)
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;
        EmbeddingMatrix::from_rows(rows)
    }
}

impl Generator for GeminiClient {
    #[inline]
    fn name(&self) -> &str {
        &self.generation_model
    }

    #[inline]
    fn generate(&self, prompt: &str) -> crate::Result<String> {
        self.generate_text(prompt)
            .map_err(|e| RagError::Generation(format!("{:#}", e)))
    }
}
