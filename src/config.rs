use anyhow::{Context, Result};
use dirs::home_dir;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::session::SessionConfig;
use crate::types::TokenRecord;

/// Configuration data stored in ~/.homeconnect.yml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Tokens from the last successful login or refresh
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenRecord>,
}

impl Config {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(&self.client_id);
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(redirect_url) = &self.redirect_url {
            config = config.with_redirect_url(redirect_url);
        }
        if let Some(scope) = &self.scope {
            config = config.with_scope(scope);
        }
        config
    }
}

/// Get the path to the configuration file (~/.homeconnect.yml)
pub fn get_config_path() -> Result<PathBuf> {
    let home = home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".homeconnect.yml"))
}

/// Load configuration from ~/.homeconnect.yml, if it exists
pub fn load_config() -> Result<Option<Config>> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        debug!("No configuration file at {}", path.display());
        return Ok(None);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    debug!("Loaded configuration for client: {}", config.client_id);
    Ok(Some(config))
}

/// Save configuration to ~/.homeconnect.yml
pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<()> {
    let content = serde_yaml::to_string(config).context("Failed to serialize configuration")?;

    fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    debug!("Saved configuration for client: {}", config.client_id);
    Ok(())
}

/// Forget the stored tokens (logout), keeping the rest of the configuration
pub fn clear_tokens() -> Result<()> {
    clear_tokens_at(&get_config_path()?)
}

pub fn clear_tokens_at(path: &Path) -> Result<()> {
    match load_config_from(path)? {
        Some(mut config) if config.tokens.is_some() => {
            config.tokens = None;
            save_config_to(path, &config)?;
            debug!("Stored tokens cleared");
        }
        _ => warn!("No stored tokens, nothing to clear"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn tokens() -> TokenRecord {
        let requested = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        TokenRecord {
            access_token: "access123".to_string(),
            refresh_token: "refresh456".to_string(),
            token_type: Some("Bearer".to_string()),
            scope: Some("IdentifyAppliance Monitor".to_string()),
            requested,
            expires: requested + chrono::TimeDelta::seconds(86400),
        }
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded = load_config_from(&dir.path().join("absent.yml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("homeconnect.yml");
        let config = Config {
            base_url: Some("https://simulator.home-connect.com".to_string()),
            tokens: Some(tokens()),
            ..Config::new("client123")
        };

        save_config_to(&path, &config).unwrap();
        let yaml = fs::read_to_string(&path).unwrap();
        assert!(yaml.contains("client_id: client123"));
        assert!(yaml.contains("access_token: access123"));
        assert!(!yaml.contains("redirect_url"));

        assert_eq!(load_config_from(&path).unwrap(), Some(config));
    }

    #[test]
    fn test_clear_tokens_keeps_client_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("homeconnect.yml");
        let config = Config {
            tokens: Some(tokens()),
            ..Config::new("client123")
        };
        save_config_to(&path, &config).unwrap();

        clear_tokens_at(&path).unwrap();
        let loaded = load_config_from(&path).unwrap().unwrap();
        assert_eq!(loaded.client_id, "client123");
        assert!(loaded.tokens.is_none());

        // Second call is a no-op
        clear_tokens_at(&path).unwrap();
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("homeconnect.yml");
        fs::write(&path, "client_id: [unterminated").unwrap();
        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn test_session_config_overrides() {
        let config = Config {
            base_url: Some("https://simulator.home-connect.com".to_string()),
            scope: Some("IdentifyAppliance Monitor Oven-Control".to_string()),
            ..Config::new("client123")
        };
        let session = crate::Session::new(config.session_config()).unwrap();
        assert_eq!(session.base_url(), "https://simulator.home-connect.com");
        assert_eq!(session.scope(), "IdentifyAppliance Monitor Oven-Control");
        assert_eq!(session.redirect_url(), crate::session::DEFAULT_REDIRECT_URL);
    }
}
