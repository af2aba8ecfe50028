use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name used for project and user configuration
pub const CONFIG_DIR: &str = ".vitrine";

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Marketplace API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Where the device store lives
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Keep a local development account when the API is unreachable
    #[serde(default = "default_true")]
    pub local_fallback: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            local_fallback: default_true(),
        }
    }
}

/// Overlay read from a config file. Every field is optional so a file only
/// overrides what it names.
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    api: Option<ApiOverlay>,
    #[serde(default)]
    storage: Option<StorageConfig>,
    #[serde(default)]
    auth: Option<AuthOverlay>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct ApiOverlay {
    base_url: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AuthOverlay {
    local_fallback: Option<bool>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.vitrine/config.local.toml) > project (.vitrine/config.toml)
    /// > user (~/.vitrine/config.toml) > built-in defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(CONFIG_DIR).join("config.toml");
            if user_config.exists() {
                config.merge_file(&user_config)?;
            }
        }

        let project_config = Path::new(CONFIG_DIR).join("config.toml");
        if project_config.exists() {
            config.merge_file(&project_config)?;
        }

        // Should be gitignored
        let local_config = Path::new(CONFIG_DIR).join("config.local.toml");
        if local_config.exists() {
            config.merge_file(&local_config)?;
        }

        Ok(config)
    }

    /// Load configuration from a specific path on top of the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge_file(path)?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        self.merge_str(&content)
    }

    /// Merge TOML text into this config (text takes priority)
    pub fn merge_str(&mut self, content: &str) -> Result<()> {
        let other: ConfigFile = toml::from_str(content)?;

        if let Some(api) = other.api {
            if let Some(base_url) = api.base_url {
                self.api.base_url = base_url;
            }
            if let Some(timeout_ms) = api.timeout_ms {
                self.api.timeout_ms = timeout_ms;
            }
        }

        if let Some(storage) = other.storage {
            if storage.path.is_some() {
                self.storage.path = storage.path;
            }
        }

        if let Some(auth) = other.auth {
            if let Some(local_fallback) = auth.local_fallback {
                self.auth.local_fallback = local_fallback;
            }
        }

        Ok(())
    }

    /// Resolved store file: configured path, else ~/.vitrine/store.json
    pub fn store_path(&self) -> PathBuf {
        if let Some(path) = &self.storage.path {
            return path.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
            .join("store.json")
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let url = self.api.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", self.api.base_url),
            });
        }

        if self.api.timeout_ms == 0 {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Some(path) = &self.storage.path {
            if path.as_os_str().is_empty() {
                errors.push(ValidationError {
                    field: "storage.path".to_string(),
                    message: "Must not be empty".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert!(config.auth.local_fallback);
        assert!(config.store_path().ends_with(".vitrine/store.json"));
    }

    #[test]
    fn test_merge_only_overrides_named_fields() {
        let mut config = Config::default();
        config
            .merge_str(
                r#"
[api]
timeout_ms = 2500

[auth]
local_fallback = false
"#,
            )
            .unwrap();
        assert_eq!(config.api.base_url, "http://localhost:3000");
        assert_eq!(config.api.timeout(), Duration::from_millis(2500));
        assert!(!config.auth.local_fallback);

        config
            .merge_str("[storage]\npath = \"/tmp/vitrine.json\"\n")
            .unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/tmp/vitrine.json"));
        // Later layers without the field keep the earlier value
        config.merge_str("[api]\nbase_url = \"https://api.example\"\n").unwrap();
        assert!(!config.auth.local_fallback);
        assert_eq!(config.api.timeout_ms, 2500);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\nbase_url = \"https://market.example/\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api.base_url, "https://market.example/");
        assert_eq!(config.api.timeout_ms, 10_000);
    }

    #[test]
    fn test_validate_collects_errors() {
        let mut config = Config::default();
        config.api.base_url = "ftp://nope".to_string();
        config.api.timeout_ms = 0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].field.contains("base_url"));
        assert!(errors[1].message.contains("greater than 0"));
    }

    #[test]
    fn test_merge_rejects_bad_toml() {
        let mut config = Config::default();
        assert!(config.merge_str("[api\nbase_url =").is_err());
    }
}
