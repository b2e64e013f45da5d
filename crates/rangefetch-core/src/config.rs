//! Settings loading and conversion into the HTTP stack

use crate::error::ConfigError;
use crate::headers;
use rangefetch_types::Settings;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Load settings from a JSON file. A missing file yields the defaults.
pub async fn load_settings(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    match fs::read_to_string(path).await {
        Ok(content) => {
            let settings = serde_json::from_str(&content)?;
            info!("Loaded settings from {}", path.display());
            Ok(settings)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No settings at {}, using defaults", path.display());
            Ok(Settings::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Save settings as pretty JSON, creating parent directories
pub async fn save_settings(path: impl AsRef<Path>, settings: &Settings) -> Result<(), ConfigError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    fs::write(path, content).await?;
    Ok(())
}

/// Convert a name -> value table into a validated header map
pub fn header_map(table: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::new();
    for (name, value) in table {
        let (name, value) = headers::parse_header(name, value)?;
        map.insert(name, value);
    }
    Ok(map)
}

/// The HTTP client shared by every transfer.
///
/// Only the connect phase is bounded here; whole-transfer deadlines belong to
/// each transfer.
pub fn build_client(settings: &Settings) -> Result<Client, ConfigError> {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .build()?;
    Ok(client)
}
