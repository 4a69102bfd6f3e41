//! `cairn config` — show the effective configuration.

use cairn_config::AppConfig;

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    println!("# {}", AppConfig::config_path().display());
    println!("{}", config.to_redacted_toml()?);
    Ok(())
}
