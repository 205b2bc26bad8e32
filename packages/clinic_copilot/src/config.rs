//! Configuration loading and the data directory layout.
//!
//! Three equivalent ways to configure the server, later ones winning:
//!
//! 1. Built-in defaults (a local dev server that binds 127.0.0.1:4500).
//! 2. `config.toml` in the data directory.
//! 3. `COPILOT_`-prefixed environment variables, with `__` separating
//!    section and key: `COPILOT_EVOLUTION__API_KEY=...`.
//!
//! The Evolution section is deliberately allowed to stay empty. Without a
//! base URL and API key the server still starts and ingests webhooks; only
//! provisioning and sending are disabled.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub evolution: EvolutionSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionSection {
    /// Base URL of the Evolution API deployment, e.g. "http://localhost:8080".
    #[serde(default)]
    pub base_url: String,
    /// Global API key of that deployment.
    #[serde(default)]
    pub api_key: String,
    /// Public URL the gateway should post events to. Defaults to this
    /// server's own /webhook/evolution, which only works when the gateway
    /// can reach us directly.
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EvolutionSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            webhook_url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EvolutionSection {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }

    pub fn webhook_url_or(&self, host: &str, port: u16) -> String {
        if self.webhook_url.trim().is_empty() {
            format!("http://{host}:{port}/webhook/evolution")
        } else {
            self.webhook_url.trim().to_string()
        }
    }
}

/// Layered configuration for the server.
pub fn load_config(data_dir: &Path) -> Figment {
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("COPILOT_").split("__"))
}

/// Filesystem layout under the data directory.
#[derive(Debug, Clone)]
pub struct CopilotConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl CopilotConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .expect("Could not find home directory")
                .join(".clinic-copilot"),
        };

        std::fs::create_dir_all(&data_dir).with_context(|| {
            format!("Failed to create data directory at {}", data_dir.display())
        })?;

        let db_path = data_dir.join("copilot.db");
        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    /// Remove the database and its WAL sidecars.
    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path).with_context(|| {
                format!("Failed to remove database at {}", self.db_path.display())
            })?;
        }
        for suffix in ["-wal", "-shm"] {
            let sidecar = PathBuf::from(format!("{}{}", self.db_path.display(), suffix));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar).with_context(|| {
                    format!("Failed to remove {}", sidecar.display())
                })?;
            }
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4500
}

fn default_timeout_secs() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_data_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("copilot-data");
        let config = CopilotConfig::new(Some(dir.clone())).unwrap();
        assert!(dir.exists());
        assert_eq!(config.db_path, dir.join("copilot.db"));
        assert!(config.db_url().starts_with("sqlite://"));
        assert!(config.db_url().ends_with("?mode=rwc"));
    }

    #[test]
    fn reset_database_removes_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CopilotConfig::new(Some(tmp.path().to_path_buf())).unwrap();

        std::fs::write(&config.db_path, b"data").unwrap();
        let wal = PathBuf::from(format!("{}-wal", config.db_path.display()));
        std::fs::write(&wal, b"wal").unwrap();

        config.reset_database().unwrap();
        assert!(!config.db_path.exists());
        assert!(!wal.exists());

        // A second reset with nothing to remove is fine.
        config.reset_database().unwrap();
    }

    #[test]
    fn defaults_without_any_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let config: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 4500);
        assert!(!config.evolution.is_configured());
        assert_eq!(config.evolution.timeout_secs, 15);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            r#"
                [server]
                port = 8080

                [evolution]
                base_url = "http://gateway:8080"
                api_key = "secret"
            "#,
        )
        .unwrap();

        let config: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "127.0.0.1");
        assert!(config.evolution.is_configured());
        assert_eq!(config.evolution.base_url, "http://gateway:8080");
    }

    #[test]
    fn webhook_url_falls_back_to_own_endpoint() {
        let section = EvolutionSection::default();
        assert_eq!(
            section.webhook_url_or("0.0.0.0", 4500),
            "http://0.0.0.0:4500/webhook/evolution"
        );

        let section = EvolutionSection {
            webhook_url: "https://copilot.example.com/webhook/evolution".to_string(),
            ..Default::default()
        };
        assert_eq!(
            section.webhook_url_or("127.0.0.1", 4500),
            "https://copilot.example.com/webhook/evolution"
        );
    }

    #[test]
    fn partially_configured_gateway_is_not_configured() {
        let section = EvolutionSection {
            base_url: "http://gateway:8080".to_string(),
            ..Default::default()
        };
        assert!(!section.is_configured());

        let section = EvolutionSection {
            api_key: "secret".to_string(),
            ..Default::default()
        };
        assert!(!section.is_configured());
    }
}
