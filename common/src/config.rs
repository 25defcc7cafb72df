// Configuration management with layered configuration (file, env, CLI)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub github: GitHubConfig,
    pub watcher: WatcherConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required by the protected API routes
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    /// Personal access token used for private repositories and tag listing
    pub token: Option<String>,
    pub timeout_seconds: u64,
    pub max_tag_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub watch_list_path: String,
    pub run_on_start: bool,
    pub seed_tag_baselines: bool,
    pub timezone: String,
    pub clone_timeout_seconds: u64,
    pub script_timeout_seconds: u64,
    pub docker_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub git_binary: String,
    pub docker_binary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json: bool,
    pub log_directory: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("GITWATCH")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.github.api_url.is_empty() {
            return Err("GitHub api_url cannot be empty".to_string());
        }
        if self.github.timeout_seconds == 0 {
            return Err("GitHub timeout_seconds must be greater than 0".to_string());
        }
        if self.github.max_tag_pages == 0 {
            return Err("GitHub max_tag_pages must be greater than 0".to_string());
        }

        if self.watcher.watch_list_path.is_empty() {
            return Err("Watcher watch_list_path cannot be empty".to_string());
        }
        if self.watcher.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(format!("Unknown watcher timezone '{}'", self.watcher.timezone));
        }
        if self.watcher.clone_timeout_seconds == 0
            || self.watcher.script_timeout_seconds == 0
            || self.watcher.docker_timeout_seconds == 0
        {
            return Err("Watcher timeouts must be greater than 0".to_string());
        }
        if self.watcher.git_binary.is_empty() || self.watcher.docker_binary.is_empty() {
            return Err("Watcher git_binary and docker_binary cannot be empty".to_string());
        }

        if self.observability.metrics_port == Some(0) {
            return Err("Metrics port must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            github: GitHubConfig::default(),
            watcher: WatcherConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            api_token: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://gitwatch.db".to_string(),
            max_connections: 5,
            connect_timeout_seconds: 30,
        }
    }
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: None,
            timeout_seconds: 30,
            max_tag_pages: 50,
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            watch_list_path: "config/repos.yaml".to_string(),
            run_on_start: false,
            seed_tag_baselines: false,
            timezone: "UTC".to_string(),
            clone_timeout_seconds: 300,
            script_timeout_seconds: 1800,
            docker_timeout_seconds: 600,
            shutdown_grace_seconds: 30,
            git_binary: "git".to_string(),
            docker_binary: "docker".to_string(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            log_directory: None,
            metrics_port: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_empty_database_url() {
        let mut settings = Settings::default();
        settings.database.url = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_port() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_unknown_timezone() {
        let mut settings = Settings::default();
        settings.watcher.timezone = "Mars/Olympus_Mons".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_catches_zero_tag_pages() {
        let mut settings = Settings::default();
        settings.github.max_tag_pages = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "[server]\nport = 9100\n\n[watcher]\nrun_on_start = true\n",
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert!(settings.watcher.run_on_start);
        assert_eq!(settings.github.api_url, "https://api.github.com");
        assert_eq!(settings.watcher.git_binary, "git");
    }
}
