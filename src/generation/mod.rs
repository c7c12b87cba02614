// Generation module
// The `Generator` seam for hosted text completion

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::info;

use crate::Result;
use crate::config::{Config, ProviderKind};
use crate::providers::{GeminiClient, OllamaClient};

/// Single-prompt text completion provider
pub trait Generator: Send + Sync {
    /// Model name, for logging
    fn name(&self) -> &str;

    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Construct the generator selected by `[generation].provider`
#[inline]
pub fn create_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    info!(
        "Using {} generation ({})",
        config.generation.provider,
        config.generation.model_name()
    );

    let generator: Arc<dyn Generator> = match config.generation.provider {
        ProviderKind::Gemini => Arc::new(GeminiClient::new(config)?),
        ProviderKind::Ollama => Arc::new(OllamaClient::new(config)?),
    };

    Ok(generator)
}
