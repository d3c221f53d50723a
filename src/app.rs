use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::api::models::Operator;
use crate::error::ConfigError;
use crate::sync::connection::ReconnectPolicy;
use crate::utils::{normalize_url, push_url_from_api};

/// Log filter used when `RUST_LOG` is not set. Dependencies stay at their warn default.
pub fn default_log_filter() -> &'static str {
    "warn,inbox_sync=info"
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    /// Derived from `api_base_url` when left empty.
    pub socket_url: String,
    pub access_token: String,
    pub operator_id: String,
    pub operator_name: String,
    pub page_size: u32,
    pub echo_tolerance_ms: u64,
    pub reconnect: ReconnectSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            socket_url: String::new(),
            access_token: String::new(),
            operator_id: String::new(),
            operator_name: String::new(),
            page_size: 10,
            echo_tolerance_ms: 10_000,
            reconnect: ReconnectSettings::default(),
        }
    }
}

/// Session file written by older dashboard builds.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySession {
    access_token: String,
    user: LegacyUser,
    #[serde(default)]
    api_base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyUser {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

impl Settings {
    // TOML is the primary format. A legacy JSON session is imported once and re-saved as TOML.
    pub fn default_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("inbox-sync.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "InboxSync")?;
        Some(proj.config_dir().join("session.json"))
    }

    /// An explicit `path` must exist. Without one the default location is
    /// tried first, then the legacy session file.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_toml(&fs::read_to_string(path)?);
        }

        let default = Self::default_path().ok_or(ConfigError::NoConfigDir)?;
        if default.exists() {
            return Self::from_toml(&fs::read_to_string(&default)?);
        }

        if let Some(legacy) = Self::legacy_json_path().filter(|p| p.exists()) {
            let settings = Self::from_legacy_json(&fs::read(&legacy)?)?;
            match settings.save(&default) {
                Ok(()) => info!("Imported legacy session into {}", default.display()),
                Err(e) => warn!("Could not persist imported session: {e}"),
            }
            return Ok(settings);
        }

        Ok(Self::default())
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_legacy_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let legacy: LegacySession = serde_json::from_slice(bytes)?;
        let operator_name = legacy
            .user
            .name
            .or(legacy.user.email)
            .unwrap_or_else(|| "Support".to_string());
        Ok(Self {
            api_base_url: legacy.api_base_url.unwrap_or_default(),
            access_token: legacy.access_token,
            operator_id: legacy.user.id,
            operator_name,
            ..Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Missing("api_base_url"));
        }
        if self.access_token.trim().is_empty() {
            return Err(ConfigError::Missing("access_token"));
        }
        if self.operator_id.trim().is_empty() {
            return Err(ConfigError::Missing("operator_id"));
        }
        Ok(())
    }

    pub fn api_base_url(&self) -> String {
        normalize_url(&self.api_base_url)
    }

    pub fn socket_url(&self) -> Result<String, ConfigError> {
        if !self.socket_url.trim().is_empty() {
            return Ok(self.socket_url.trim().to_string());
        }
        push_url_from_api(&self.api_base_url()).ok_or(ConfigError::Missing("socket_url"))
    }

    pub fn operator(&self) -> Operator {
        let display_name = if self.operator_name.trim().is_empty() {
            "Support".to_string()
        } else {
            self.operator_name.clone()
        };
        Operator {
            id: self.operator_id.clone(),
            display_name,
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    pub fn echo_tolerance(&self) -> Duration {
        Duration::from_millis(self.echo_tolerance_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_uses_defaults() {
        let settings = Settings::from_toml(
            r#"
            api_base_url = "support.shop.test"
            access_token = "t0k"
            operator_id = "op"

            [reconnect]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.page_size, 10);
        assert_eq!(settings.echo_tolerance(), Duration::from_secs(10));
        assert_eq!(settings.api_base_url(), "https://support.shop.test");
        assert_eq!(settings.socket_url().unwrap(), "wss://support.shop.test/");
        assert_eq!(settings.operator().display_name, "Support");

        let policy = settings.reconnect_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
    }

    #[test]
    fn missing_identity_is_reported() {
        let settings = Settings::from_toml("api_base_url = \"https://x.test\"\naccess_token = \"t\"").unwrap();
        assert!(matches!(settings.validate(), Err(ConfigError::Missing("operator_id"))));
        assert!(matches!(Settings::default().validate(), Err(ConfigError::Missing("api_base_url"))));
        assert!(Settings::from_toml("page_size = \"ten\"").is_err());
    }

    #[test]
    fn legacy_session_is_imported_and_saved_as_toml() {
        let settings = Settings::from_legacy_json(
            br#"{"accessToken": "abc", "user": {"_id": "op7", "email": "admin@shop.test"}}"#,
        )
        .unwrap();
        assert_eq!(settings.access_token, "abc");
        assert_eq!(settings.operator().id, "op7");
        assert_eq!(settings.operator().display_name, "admin@shop.test");

        let path = std::env::temp_dir().join(format!("inbox-sync-test-{}.toml", std::process::id()));
        settings.save(&path).unwrap();
        let reloaded = Settings::load(Some(&path)).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn default_log_filter_is_valid() {
        let filter = tracing_subscriber::EnvFilter::try_new(default_log_filter()).unwrap();
        assert!(filter.to_string().contains("inbox_sync=info"));
    }

    #[test]
    fn explicit_socket_url_wins() {
        let settings = Settings {
            api_base_url: "http://localhost:5000".into(),
            socket_url: "ws://localhost:5001/ws".into(),
            ..Settings::default()
        };
        assert_eq!(settings.socket_url().unwrap(), "ws://localhost:5001/ws");
        let derived = Settings {
            socket_url: String::new(),
            ..settings
        };
        assert_eq!(derived.socket_url().unwrap(), "ws://localhost:5000/");
    }
}
