use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::grid;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chroma: ChromaConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub grid: GridConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection string; the `DATABASE_URL` environment variable takes
    /// precedence when set.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseConfig {
    /// Effective connection URL, honoring the `DATABASE_URL` override.
    pub fn effective_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.url.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChromaConfig {
    #[serde(default = "default_chroma_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

fn default_chroma_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_collection() -> String {
    "argo_profiles".to_string()
}
fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_secs() -> u64 {
    5
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GridConfig {
    #[serde(default = "default_cell_size")]
    pub cell_size_degrees: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size_degrees: grid::DEFAULT_CELL_SIZE,
        }
    }
}

fn default_cell_size() -> f64 {
    grid::DEFAULT_CELL_SIZE
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.server.bind.trim().is_empty() {
        anyhow::bail!("server.bind must not be empty");
    }

    if config.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be >= 1");
    }

    if config.chroma.collection.trim().is_empty() {
        anyhow::bail!("chroma.collection must not be empty");
    }
    if config.chroma.default_top_k == 0 {
        anyhow::bail!("chroma.default_top_k must be >= 1");
    }

    if config.llm.max_attempts == 0 {
        anyhow::bail!("llm.max_attempts must be >= 1");
    }
    if config.llm.backoff_multiplier < 1.0 {
        anyhow::bail!("llm.backoff_multiplier must be >= 1.0");
    }

    if config.grid.cell_size_degrees <= 0.0 {
        anyhow::bail!("grid.cell_size_degrees must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
[server]
bind = "127.0.0.1:8080"

[database]
url = "postgres://localhost/argo"

[chroma]

[llm]
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let f = write_config(MINIMAL);
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.chroma.collection, "argo_profiles");
        assert_eq!(config.chroma.default_top_k, 10);
        assert_eq!(config.llm.max_attempts, 3);
        assert_eq!(config.llm.initial_delay_secs, 5);
        assert!((config.llm.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert!((config.grid.cell_size_degrees - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let f = write_config(&format!("{}\nmax_attempts = 0\n", MINIMAL));
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_shrinking_backoff() {
        let f = write_config(&format!("{}\nbackoff_multiplier = 0.5\n", MINIMAL));
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_bad_cell_size() {
        let f = write_config(&format!("{}\n[grid]\ncell_size_degrees = 0.0\n", MINIMAL));
        assert!(load_config(f.path()).is_err());
    }
}
