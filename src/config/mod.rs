// Configuration management module
// TOML settings, path resolution and the `config` command output

pub mod display;
pub mod settings;


pub use display::{init_config, show_config};
pub use settings::{
    AnswerConfig, Config, ConfigError, CorpusConfig, EmbeddingConfig, GeminiConfig,
    GenerationConfig, HttpConfig, IndexConfig, IndexLocation, OllamaConfig, ProviderKind,
    ServerConfig,
};
