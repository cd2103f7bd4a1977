//! Startup helpers shared by the binary and integration tests

use anyhow::Result;
use tracing::info;

use crate::config::Config;

/// Locate and load the configuration file, then validate it.
///
/// Lookup order: `CONFER_CONFIG_PATH`, `./config.yaml`, `/config/config.yaml`.
/// With no file present, environment variables and defaults are used.
pub fn load_config() -> Result<Config> {
    let config_path = std::env::var("CONFER_CONFIG_PATH")
        .ok()
        .filter(|p| std::path::Path::new(p).exists())
        .or_else(|| {
            ["config.yaml", "/config/config.yaml"]
                .into_iter()
                .find(|p| std::path::Path::new(p).exists())
                .map(str::to_string)
        });

    // Logging is not up yet, so report on stderr
    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()?
    };

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Config validation error: {error}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    info!("Configuration loaded and validated successfully");
    Ok(config)
}
