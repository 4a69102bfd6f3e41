//! Completion provider implementations for cairn.
//!
//! All providers implement the `cairn_core::Provider` trait.
//! [`build_from_config`] wires the configured provider.

pub mod anthropic;

pub use anthropic::{AnthropicProvider, SseDecoder};

use cairn_config::AppConfig;
use cairn_core::error::ProviderError;

/// Build the completion provider described by the configuration.
pub fn build_from_config(config: &AppConfig) -> Result<AnthropicProvider, ProviderError> {
    let api_key = config
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            ProviderError::NotConfigured(
                "no API key; set CAIRN_API_KEY or api_key in config.toml".into(),
            )
        })?;

    Ok(AnthropicProvider::new(api_key)?.with_base_url(&config.api_url))
}
