use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

pub const CONFIG_FILE: &str = "config.yml";
pub const BACKEND_URL_ENV: &str = "BACKEND_URL";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_description_path")]
    pub description_path: String,
    #[serde(default = "default_image_path")]
    pub image_path: String,
    #[serde(default = "default_script_path")]
    pub script_path: String,
    #[serde(default = "default_video_path")]
    pub video_path: String,
    #[serde(default = "default_characters_path")]
    pub characters_path: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_selected")]
    pub max_selected: usize,
    #[serde(default = "default_chunk_time")]
    pub default_chunk_time: String,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default)]
    pub video_model: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            description_path: default_description_path(),
            image_path: default_image_path(),
            script_path: default_script_path(),
            video_path: default_video_path(),
            characters_path: default_characters_path(),
            timeout_seconds: default_timeout_seconds(),
            retry_count: 0,
            retry_delay_seconds: default_retry_delay(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_selected: default_max_selected(),
            default_chunk_time: default_chunk_time(),
            fetch_concurrency: default_fetch_concurrency(),
            video_model: None,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3001".to_string()
}
fn default_description_path() -> String {
    "/generate-description".to_string()
}
fn default_image_path() -> String {
    "/generate-image".to_string()
}
fn default_script_path() -> String {
    "/generate-script".to_string()
}
fn default_video_path() -> String {
    "/generate-video".to_string()
}
fn default_characters_path() -> String {
    "/characters".to_string()
}
fn default_timeout_seconds() -> u64 {
    300
}
fn default_retry_delay() -> u64 {
    2
}
fn default_max_selected() -> usize {
    3
}
fn default_chunk_time() -> String {
    "0-8seconds".to_string()
}
fn default_fetch_concurrency() -> usize {
    4
}

impl BackendConfig {
    /// Joins `path` onto the base URL, tolerating stray slashes on either side.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Config {
    /// Loads `config.yml` from the working directory, or defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from(path)?
        } else {
            log::info!("{} not found, using defaults", CONFIG_FILE);
            Config::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Path::new(CONFIG_FILE))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                self.backend.base_url = url.trim().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.backend.base_url)
            .with_context(|| format!("Invalid backend base_url: {}", self.backend.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("backend base_url must be http or https, got {}", url.scheme());
        }
        if self.pipeline.max_selected == 0 {
            anyhow::bail!("pipeline.max_selected must be at least 1");
        }
        if self.pipeline.fetch_concurrency == 0 {
            anyhow::bail!("pipeline.fetch_concurrency must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(&path, "backend:\n  base_url: https://gen.example.com/\n")?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.backend.base_url, "https://gen.example.com/");
        assert_eq!(config.backend.script_path, "/generate-script");
        assert_eq!(config.pipeline.max_selected, 3);
        assert_eq!(config.pipeline.default_chunk_time, "0-8seconds");
        assert!(config.pipeline.video_model.is_none());
        config.validate()?;
        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");

        let mut config = Config::default();
        config.pipeline.video_model = Some("veo-3".to_string());
        config.backend.retry_count = 2;
        config.save_to(&path)?;

        let loaded = Config::load_from(&path)?;
        assert_eq!(loaded.pipeline.video_model.as_deref(), Some("veo-3"));
        assert_eq!(loaded.backend.retry_count, 2);
        Ok(())
    }

    #[test]
    fn test_endpoint_join() {
        let mut backend = BackendConfig::default();
        backend.base_url = "http://localhost:3001///".to_string();
        assert_eq!(
            backend.endpoint("/generate-video"),
            "http://localhost:3001/generate-video"
        );
        assert_eq!(
            backend.endpoint("characters/7"),
            "http://localhost:3001/characters/7"
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.backend.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.max_selected = 0;
        assert!(config.validate().is_err());
    }
}
