//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Deployment environment, selected by `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Test,
    Prod,
}

impl Environment {
    /// `prod`/`production` select production; anything else, including unset, is test.
    pub fn from_app_env(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "prod" || v == "production" => Environment::Prod,
            _ => Environment::Test,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Test => "test",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Create a new configuration loader rooted at the working directory
    pub fn new() -> Self {
        Self {
            config_path: None,
            base_dir: PathBuf::from("."),
        }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
            base_dir: PathBuf::from("."),
        }
    }

    /// Search for config files relative to `dir` instead of the working directory
    pub fn with_base_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Environment::from_app_env(lookup("APP_ENV").as_deref());

        let mut config = match self.find_config_file(environment, &lookup) {
            Some(path) => {
                info!(?path, %environment, "Loading configuration from file");
                AppConfig::from_file(&path)?
            }
            None => {
                info!(%environment, "No configuration file found, using defaults");
                AppConfig::default()
            }
        };
        config.environment = environment;

        apply_env_overrides(&mut config, &lookup)?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file<F>(&self, environment: Environment, lookup: &F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Some(path) = lookup("AMS_CONFIG").map(PathBuf::from) {
            if path.exists() {
                return Some(path);
            }
        }

        let candidates = [
            format!("config/config.{}.toml", environment),
            "config/config.toml".to_string(),
            "config.toml".to_string(),
        ];
        candidates
            .iter()
            .map(|candidate| self.base_dir.join(Path::new(candidate)))
            .find(|path| path.exists())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::EnvError(format!("{} has an invalid value '{}'", key, value)))
}

/// Apply `AMS_*` environment variable overrides
fn apply_env_overrides<F>(config: &mut AppConfig, lookup: &F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // HTTP
    if let Some(val) = lookup("AMS_HTTP_HOST") {
        config.http.host = val;
    }
    if let Some(val) = lookup("AMS_HTTP_PORT") {
        config.http.port = parse_var("AMS_HTTP_PORT", &val)?;
    }

    // Database
    if let Some(val) = lookup("AMS_DATABASE_KIND") {
        config.database.kind = val.parse()?;
    }
    if let Some(val) = lookup("AMS_DATABASE_URL") {
        config.database.url = val;
    }
    if let Some(val) = lookup("AMS_DATABASE_MAX_CONNECTIONS") {
        config.database.max_connections = parse_var("AMS_DATABASE_MAX_CONNECTIONS", &val)?;
    }
    if let Some(val) = lookup("AMS_DATABASE_SEED") {
        config.database.seed = parse_var("AMS_DATABASE_SEED", &val)?;
    }

    // Webhook
    if let Some(val) = lookup("AMS_WEBHOOK_URL") {
        config.webhook.url = val;
    }
    if let Some(val) = lookup("AMS_WEBHOOK_TIMEOUT_SECS") {
        config.webhook.timeout_secs = parse_var("AMS_WEBHOOK_TIMEOUT_SECS", &val)?;
    }
    if let Some(val) = lookup("AMS_WEBHOOK_AUTH_KEY_NAME") {
        config.webhook.auth_key_name = val;
    }
    if let Some(val) = lookup("AMS_WEBHOOK_AUTH_KEY") {
        config.webhook.auth_key = Some(val).filter(|v| !v.is_empty());
    }

    // Redis
    if let Some(val) = lookup("AMS_REDIS_ENABLED") {
        config.redis.enabled = parse_var("AMS_REDIS_ENABLED", &val)?;
    }
    if let Some(val) = lookup("AMS_REDIS_URL") {
        config.redis.url = val;
    }

    // Dispatcher
    if let Some(val) = lookup("AMS_DISPATCHER_AUTO_START") {
        config.dispatcher.auto_start = parse_var("AMS_DISPATCHER_AUTO_START", &val)?;
    }
    if let Some(val) = lookup("AMS_DISPATCHER_POLL_INTERVAL_SECS") {
        config.dispatcher.poll_interval_secs = parse_var("AMS_DISPATCHER_POLL_INTERVAL_SECS", &val)?;
    }
    if let Some(val) = lookup("AMS_DISPATCHER_BATCH_SIZE") {
        config.dispatcher.batch_size = parse_var("AMS_DISPATCHER_BATCH_SIZE", &val)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabaseKind;
    use std::collections::HashMap;
    use std::fs;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_environment_selection() {
        assert_eq!(Environment::from_app_env(None), Environment::Test);
        assert_eq!(Environment::from_app_env(Some("PROD")), Environment::Prod);
        assert_eq!(Environment::from_app_env(Some("production")), Environment::Prod);
        assert_eq!(Environment::from_app_env(Some("staging")), Environment::Test);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigLoader::new()
            .with_base_dir(dir.path())
            .load_with(env_of(&[]))
            .unwrap();
        assert_eq!(config.environment, Environment::Test);
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_environment_specific_file_preferred() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("config")).unwrap();
        fs::write(dir.path().join("config/config.toml"), "[http]\nport = 7000\n").unwrap();
        fs::write(dir.path().join("config/config.prod.toml"), "[http]\nport = 9000\n").unwrap();

        let loader = ConfigLoader::new().with_base_dir(dir.path());

        let prod = loader.load_with(env_of(&[("APP_ENV", "prod")])).unwrap();
        assert_eq!(prod.environment, Environment::Prod);
        assert_eq!(prod.http.port, 9000);

        // No config.test.toml, falls back to config.toml
        let test = loader.load_with(env_of(&[])).unwrap();
        assert_eq!(test.http.port, 7000);
    }

    #[test]
    fn test_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[dispatcher]\nbatch_size = 7\n").unwrap();

        let config = ConfigLoader::with_path(&path).load_with(env_of(&[])).unwrap();
        assert_eq!(config.dispatcher.batch_size, 7);
    }

    #[test]
    fn test_env_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[webhook]\nurl = \"http://file\"\n").unwrap();

        let config = ConfigLoader::with_path(&path)
            .load_with(env_of(&[
                ("AMS_WEBHOOK_URL", "http://env/hook"),
                ("AMS_WEBHOOK_AUTH_KEY", "secret"),
                ("AMS_DATABASE_KIND", "sqlite"),
                ("AMS_DATABASE_URL", "sqlite::memory:"),
                ("AMS_DISPATCHER_POLL_INTERVAL_SECS", "5"),
                ("AMS_REDIS_ENABLED", "false"),
            ]))
            .unwrap();

        assert_eq!(config.webhook.url, "http://env/hook");
        assert_eq!(config.webhook.auth_key.as_deref(), Some("secret"));
        assert_eq!(config.database.kind, DatabaseKind::Sqlite);
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.dispatcher.poll_interval_secs, 5);
        assert!(!config.redis.enabled);
    }

    #[test]
    fn test_invalid_env_value_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigLoader::new()
            .with_base_dir(dir.path())
            .load_with(env_of(&[("AMS_HTTP_PORT", "eighty")]));
        assert!(matches!(result, Err(ConfigError::EnvError(_))));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[http\nport = ").unwrap();
        let result = ConfigLoader::with_path(&path).load_with(env_of(&[]));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
