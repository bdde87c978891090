//! CLI configuration.
//!
//! Stored as TOML under `~/.config/uplift/config.toml`; the `UPLIFT_API_URL`
//! and `UPLIFT_DATA_DIR` environment variables override the file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Host configuration for the upload engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Upload server endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Directory for persisted upload state and blobs.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Resume interrupted uploads automatically on startup.
    #[serde(default = "default_true")]
    pub auto_resume_on_reload: bool,
}

fn default_api_url() -> String {
    "http://localhost:4000/api/uploads".to_string()
}

fn default_data_dir() -> PathBuf {
    config_dir().join("data")
}

fn default_true() -> bool {
    true
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            data_dir: default_data_dir(),
            auto_resume_on_reload: default_true(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from disk, creating a default file if missing,
    /// then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_dir().join("config.toml");

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)?
        } else {
            let config = CliConfig::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, toml::to_string_pretty(&config)?)?;
            tracing::debug!(path = %path.display(), "default configuration written");
            config
        };

        if let Ok(url) = std::env::var("UPLIFT_API_URL")
            && !url.is_empty()
        {
            config.api_url = url;
        }
        if let Ok(dir) = std::env::var("UPLIFT_DATA_DIR")
            && !dir.is_empty()
        {
            config.data_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

/// Platform configuration directory for uplift.
fn config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("uplift")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            });
        base.join("uplift")
    }
}
