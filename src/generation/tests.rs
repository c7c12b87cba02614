use super::*;
use crate::RagError;
use serial_test::serial;

#[test]
fn create_ollama_generator() {
    let mut config = Config::default();
    config.generation.provider = ProviderKind::Ollama;

    let generator = create_generator(&config).expect("ollama needs no credentials");
    assert_eq!(generator.name(), "llama3.2:latest");
}

#[test]
fn configured_model_overrides_default() {
    let mut config = Config::default();
    config.generation.provider = ProviderKind::Ollama;
    config.generation.model = Some("mistral:7b".to_string());

    let generator = create_generator(&config).expect("should create generator");
    assert_eq!(generator.name(), "mistral:7b");
}

#[test]
#[serial]
fn gemini_generator_requires_api_key() {
    // SAFETY: serialized with other environment-mutating tests
    unsafe { std::env::remove_var(crate::config::settings::GOOGLE_API_KEY_VAR) };

    let result = create_generator(&Config::default());
    assert!(matches!(result, Err(RagError::Config(_))));
}

#[test]
#[serial]
fn gemini_generator_with_api_key() {
    // SAFETY: serialized with other environment-mutating tests
    unsafe { std::env::set_var(crate::config::settings::GOOGLE_API_KEY_VAR, "test-key") };

    let generator = create_generator(&Config::default()).expect("key is present");
    assert_eq!(generator.name(), "gemini-2.5-flash-lite");

    // SAFETY: serialized with other environment-mutating tests
    unsafe { std::env::remove_var(crate::config::settings::GOOGLE_API_KEY_VAR) };
}
