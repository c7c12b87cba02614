
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const CONFIG_FILE_NAME: &str = "ragchat.toml";
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which hosted or local service backs embeddings or generation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Gemini,
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => f.write_str("gemini"),
            Self::Ollama => f.write_str("ollama"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: Option<String>,
    pub batch_size: u32,
    pub task_type: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            model: None,
            batch_size: 16,
            task_type: "RETRIEVAL_QUERY".to_string(),
        }
    }
}

impl EmbeddingConfig {
    /// Configured model, falling back to the provider's default embedding model
    #[inline]
    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, ProviderKind::Gemini) => "gemini-embedding-001",
            (None, ProviderKind::Ollama) => "nomic-embed-text:latest",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    pub model: Option<String>,
}

impl GenerationConfig {
    #[inline]
    pub fn model_name(&self) -> &str {
        match (&self.model, self.provider) {
            (Some(model), _) => model,
            (None, ProviderKind::Gemini) => "gemini-2.5-flash-lite",
            (None, ProviderKind::Ollama) => "llama3.2:latest",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeminiConfig {
    pub base_url: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    /// Total attempts per provider call; 1 means no retries
    pub retry_attempts: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
            retry_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CorpusConfig {
    pub chat_dir: PathBuf,
    pub text_dir: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            chat_dir: PathBuf::from("saved_chats"),
            text_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    pub dir: PathBuf,
    pub table: String,
    pub sidecar: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("index"),
            table: "chat_index".to_string(),
            sidecar: "chat_meta.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnswerConfig {
    pub top_k: usize,
    pub saved_chat_limit: usize,
    /// Who the assistant is, e.g. "beginner guitar assistant"
    pub persona: String,
    /// The only subject the assistant may answer about
    pub topic: String,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            saved_chat_limit: 100,
            persona: "beginner guitar assistant".to_string(),
            topic: "guitar".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS; empty allows any origin
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: Vec::new(),
        }
    }
}

/// Resolved on-disk location of the vector index and its sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLocation {
    pub vectors_dir: PathBuf,
    pub table: String,
    pub sidecar_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 100)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0:?} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid top_k: {0} (must be between 1 and 50)")]
    InvalidTopK(usize),
    #[error("Invalid {0}: cannot be empty")]
    EmptyField(&'static str),
    #[error("Missing credentials: {0} is not set")]
    MissingCredentials(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Load `ragchat.toml` from `base_dir`, falling back to defaults when it is absent
    #[inline]
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let config_path = base_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: base_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = base_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_providers()?;
        self.validate_http()?;
        self.validate_answer()?;
        self.validate_index()?;

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        Ok(())
    }

    fn validate_providers(&self) -> Result<(), ConfigError> {
        if self.embedding.batch_size == 0 || self.embedding.batch_size > 100 {
            return Err(ConfigError::InvalidBatchSize(self.embedding.batch_size));
        }

        for model in [&self.embedding.model, &self.generation.model]
            .into_iter()
            .flatten()
        {
            if model.trim().is_empty() {
                return Err(ConfigError::InvalidModel(model.clone()));
            }
        }

        Url::parse(&self.gemini.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.gemini.base_url.clone()))?;

        Ok(())
    }

    fn validate_http(&self) -> Result<(), ConfigError> {
        if !(1..=600).contains(&self.http.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.http.timeout_seconds));
        }

        if !(1..=10).contains(&self.http.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.http.retry_attempts));
        }

        Ok(())
    }

    fn validate_answer(&self) -> Result<(), ConfigError> {
        if !(1..=50).contains(&self.answer.top_k) {
            return Err(ConfigError::InvalidTopK(self.answer.top_k));
        }

        if self.answer.persona.trim().is_empty() {
            return Err(ConfigError::EmptyField("answer.persona"));
        }

        if self.answer.topic.trim().is_empty() {
            return Err(ConfigError::EmptyField("answer.topic"));
        }

        Ok(())
    }

    fn validate_index(&self) -> Result<(), ConfigError> {
        if self.index.table.trim().is_empty() {
            return Err(ConfigError::EmptyField("index.table"));
        }

        if self.index.sidecar.trim().is_empty() {
            return Err(ConfigError::EmptyField("index.sidecar"));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE_NAME)
    }

    /// Resolve a configured path against the base directory
    #[inline]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    #[inline]
    pub fn chat_dir(&self) -> PathBuf {
        self.resolve(&self.corpus.chat_dir)
    }

    #[inline]
    pub fn text_dir(&self) -> PathBuf {
        self.resolve(&self.corpus.text_dir)
    }

    #[inline]
    pub fn index_location(&self) -> IndexLocation {
        let index_dir = self.resolve(&self.index.dir);
        IndexLocation {
            vectors_dir: index_dir.join("vectors"),
            table: self.index.table.clone(),
            sidecar_path: index_dir.join(&self.index.sidecar),
        }
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    /// Read the Gemini API key from the environment
    #[inline]
    pub fn gemini_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(GOOGLE_API_KEY_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingCredentials(GOOGLE_API_KEY_VAR))
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        self.ollama_url()?;

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }
}
