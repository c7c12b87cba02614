use anyhow::{Context, Result};
use console::style;

use super::{Config, ProviderKind};

/// Write the default configuration to `ragchat.toml`, keeping an existing file untouched
#[inline]
pub fn init_config(config: &Config) -> Result<()> {
    let config_path = config.config_file_path();

    if config_path.exists() {
        eprintln!(
            "{} {}",
            style("Configuration already exists:").yellow(),
            style(config_path.display()).cyan()
        );
        return Ok(());
    }

    config.save().context("Failed to save configuration")?;
    eprintln!("{}", style("✓ Configuration saved successfully!").green());
    eprintln!(
        "Configuration saved to: {}",
        style(config_path.display()).cyan()
    );

    Ok(())
}

#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("Embedding:").bold().yellow());
    eprintln!("  Provider: {}", style(config.embedding.provider).cyan());
    eprintln!("  Model: {}", style(config.embedding.model_name()).cyan());
    eprintln!("  Batch Size: {}", style(config.embedding.batch_size).cyan());

    eprintln!("{}", style("Generation:").bold().yellow());
    eprintln!("  Provider: {}", style(config.generation.provider).cyan());
    eprintln!("  Model: {}", style(config.generation.model_name()).cyan());

    let uses_ollama = config.embedding.provider == ProviderKind::Ollama
        || config.generation.provider == ProviderKind::Ollama;
    let uses_gemini = config.embedding.provider == ProviderKind::Gemini
        || config.generation.provider == ProviderKind::Gemini;

    if uses_ollama {
        match config.ollama_url() {
            Ok(url) => eprintln!("  Ollama URL: {}", style(url).cyan()),
            Err(e) => eprintln!("  Ollama URL: {} ({})", style("Invalid").red(), e),
        }
    }

    if uses_gemini {
        eprintln!("  Gemini URL: {}", style(&config.gemini.base_url).cyan());
        match config.gemini_api_key() {
            Ok(_) => eprintln!("  API Key: {}", style("set").green()),
            Err(e) => eprintln!("  API Key: {} ({})", style("missing").red(), e),
        }
    }

    eprintln!();
    eprintln!("{}", style("Corpus & Index:").bold().yellow());
    eprintln!(
        "  Saved chats: {}",
        style(config.chat_dir().display()).cyan()
    );
    eprintln!(
        "  Knowledge texts: {}",
        style(config.text_dir().display()).cyan()
    );
    let location = config.index_location();
    eprintln!(
        "  Vectors: {} (table {})",
        style(location.vectors_dir.display()).cyan(),
        style(&location.table).cyan()
    );
    eprintln!(
        "  Sidecar: {}",
        style(location.sidecar_path.display()).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Answering:").bold().yellow());
    eprintln!("  Top k: {}", style(config.answer.top_k).cyan());
    eprintln!(
        "  Saved chat limit: {}",
        style(config.answer.saved_chat_limit).cyan()
    );
    eprintln!("  Persona: {}", style(&config.answer.persona).cyan());

    eprintln!();
    eprintln!("{}", style("Server:").bold().yellow());
    eprintln!(
        "  Listen: {}",
        style(format!("{}:{}", config.server.host, config.server.port)).cyan()
    );
    if config.server.allowed_origins.is_empty() {
        eprintln!("  CORS: {}", style("any origin").cyan());
    } else {
        eprintln!(
            "  CORS: {}",
            style(config.server.allowed_origins.join(", ")).cyan()
        );
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}
