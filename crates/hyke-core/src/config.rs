//! Hyke status engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{HykeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HykeConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

fn default_database_path() -> String { "~/.hyke/status_engine.db".into() }

impl Default for HykeConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scheduler: SchedulerConfig::default(),
            email: EmailConfig::default(),
            services: ServicesConfig::default(),
        }
    }
}

impl HykeConfig {
    /// Load config from the default path (~/.hyke/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HykeError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| HykeError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| HykeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Hyke home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".hyke")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database_path).to_string())
    }
}

/// What the scheduler does when a handler returns an error.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandlerErrorPolicy {
    /// Log the failure, leave the record scheduled, keep dispatching.
    #[default]
    Continue,
    /// Stop the batch at the first failure.
    Abort,
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Only records whose formation type starts with this are dispatched.
    #[serde(default = "default_formation_prefix")]
    pub formation_prefix: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub on_handler_error: HandlerErrorPolicy,
    /// File-backed connections older than this are reopened before dispatch.
    #[serde(default = "default_connection_max_age")]
    pub connection_max_age_secs: u64,
}

fn default_formation_prefix() -> String { "Hyke System".into() }
fn default_check_interval() -> u64 { 300 }
fn default_connection_max_age() -> u64 { 600 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            formation_prefix: default_formation_prefix(),
            check_interval_secs: default_check_interval(),
            on_handler_error: HandlerErrorPolicy::default(),
            connection_max_age_secs: default_connection_max_age(),
        }
    }
}

/// Transactional email configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from_address: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Template name -> message body. The template name doubles as the subject.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

fn default_smtp_port() -> u16 { 587 }
fn default_display_name() -> String { "Collective".into() }

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: String::new(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from_address: String::new(),
            display_name: default_display_name(),
            templates: BTreeMap::new(),
        }
    }
}

/// Endpoints of the survey, folder and NPS services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub surveys_url: Option<String>,
    #[serde(default)]
    pub folders_url: Option<String>,
    #[serde(default)]
    pub nps_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 { 30 }

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            surveys_url: None,
            folders_url: None,
            nps_url: None,
            api_token: None,
            timeout_secs: default_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HykeConfig::default();
        assert_eq!(config.scheduler.formation_prefix, "Hyke System");
        assert_eq!(config.scheduler.on_handler_error, HandlerErrorPolicy::Continue);
        assert_eq!(config.email.smtp_port, 587);
        assert!(!config.email.enabled);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: HykeConfig = toml::from_str("").unwrap();
        assert_eq!(config.database_path, "~/.hyke/status_engine.db");
        assert_eq!(config.scheduler.check_interval_secs, 300);
        assert_eq!(config.services.timeout_secs, 30);
        assert!(config.services.nps_url.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            database_path = "/var/lib/hyke/engine.db"

            [scheduler]
            on_handler_error = "abort"
            check_interval_secs = 60

            [email]
            enabled = true
            smtp_host = "smtp.example.com"
            from_address = "ops@example.com"

            [email.templates]
            "[Action required] - Please update your payment information" = "Your card was declined."

            [services]
            nps_url = "https://nps.example.com/calculate"
        "#;

        let config: HykeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.on_handler_error, HandlerErrorPolicy::Abort);
        assert_eq!(config.scheduler.check_interval_secs, 60);
        assert_eq!(config.scheduler.formation_prefix, "Hyke System");
        assert!(config.email.enabled);
        assert_eq!(config.email.templates.len(), 1);
        assert_eq!(
            config.services.nps_url.as_deref(),
            Some("https://nps.example.com/calculate")
        );
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/hyke/engine.db"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join("hyke-config-test");
        let path = dir.join("config.toml");
        let mut config = HykeConfig::default();
        config.scheduler.connection_max_age_secs = 42;
        config.save_to(&path).unwrap();

        let loaded = HykeConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.connection_max_age_secs, 42);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = HykeConfig::home_dir();
        assert!(home.to_string_lossy().contains(".hyke"));
    }
}
