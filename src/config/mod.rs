mod error;
mod tautulli;
mod update;

pub use error::{ConfigError, Result};
pub use tautulli::{AggregationConfig, TautulliConfig};
pub use update::SettingsUpdate;

use crate::probe::SmtpSettings;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Outcome of the last connection test for a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Unknown,
    Ok,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Plex,
    Tautulli,
    Smtp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LastTest {
    #[serde(deserialize_with = "lenient")]
    pub plex: TestStatus,
    #[serde(deserialize_with = "lenient")]
    pub tautulli: TestStatus,
    #[serde(deserialize_with = "lenient")]
    pub smtp: TestStatus,
}

/// A value of the wrong shape reads as the type's default instead of failing the document
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

// Ports typed into a form often arrive as strings
fn lenient_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let port = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    Ok(port.unwrap_or(DEFAULT_SMTP_PORT))
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

const DEFAULT_SMTP_PORT: u16 = 587;

/// The persisted settings document.
///
/// Every field has a default so partial or older files still load, a field
/// holding a bad value falls back on its own, and keys this version does not
/// know are carried through saves untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_host: String,
    #[serde(deserialize_with = "lenient_port")]
    pub smtp_port: u16,
    /// true => implicit TLS (usually 465); false => STARTTLS or plaintext
    #[serde(deserialize_with = "lenient_bool")]
    pub smtp_secure: bool,
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_user: String,
    /// Never returned to the client
    #[serde(deserialize_with = "lenient_string")]
    pub smtp_pass: String,
    #[serde(deserialize_with = "lenient_string")]
    pub from_address: String,

    #[serde(deserialize_with = "lenient_string")]
    pub plex_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub plex_token: String,
    #[serde(deserialize_with = "lenient_string")]
    pub tautulli_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub tautulli_api_key: String,

    #[serde(deserialize_with = "lenient")]
    pub last_test: LastTest,

    #[serde(deserialize_with = "lenient")]
    pub aggregation: AggregationConfig,

    /// Keys owned by other tools or newer versions
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: DEFAULT_SMTP_PORT,
            smtp_secure: false,
            smtp_user: String::new(),
            smtp_pass: String::new(),
            from_address: String::new(),
            plex_url: String::new(),
            plex_token: String::new(),
            tautulli_url: String::new(),
            tautulli_api_key: String::new(),
            last_test: LastTest::default(),
            aggregation: AggregationConfig::default(),
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io(e)
            }
        })?;
        let settings = Self::parse(&contents)?;
        settings.aggregation.validate()?;
        Ok(settings)
    }

    /// Parse a settings document without validating the tunables
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Tautulli connection, with environment overrides applied
    pub fn tautulli_config(&self) -> TautulliConfig {
        TautulliConfig::resolve(&self.tautulli_url, &self.tautulli_api_key, |name| {
            std::env::var(name).ok()
        })
    }

    pub fn smtp_settings(&self) -> SmtpSettings {
        SmtpSettings {
            host: self.smtp_host.clone(),
            port: self.smtp_port,
            secure: self.smtp_secure,
            user: self.smtp_user.clone(),
            pass: self.smtp_pass.clone(),
            from: self.from_address.clone(),
        }
    }
}

/// Connection status as shown on the settings card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub email_ok: bool,
    pub plex_ok: bool,
    pub tautulli_ok: bool,
}

/// Settings document bound to the file it is persisted in
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    settings: Settings,
}

impl ConfigStore {
    /// Open an existing config file, failing on any read, parse or validation error
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            settings: Settings::from_file(path)?,
        })
    }

    /// Load settings, falling back to defaults when the file is missing or unusable.
    ///
    /// Invalid aggregation tunables only reset the tunables; the rest of the
    /// document is kept so the next save does not wipe stored credentials.
    pub fn load(path: &Path) -> Self {
        let settings = match Settings::from_file(path) {
            Ok(settings) => settings,
            Err(ConfigError::Invalid { field, reason }) => {
                tracing::warn!("Resetting {field} in {}: {reason}", path.display());
                fs::read_to_string(path)
                    .map_err(ConfigError::from)
                    .and_then(|contents| Settings::parse(&contents))
                    .map(|mut settings| {
                        settings.aggregation = AggregationConfig::default();
                        settings
                    })
                    .unwrap_or_default()
            }
            Err(ConfigError::NotFound { .. }) => {
                tracing::info!("No config at {}, starting with defaults", path.display());
                Settings::default()
            }
            Err(e) => {
                tracing::warn!("Ignoring unusable config {}: {e}", path.display());
                Settings::default()
            }
        };

        Self {
            path: path.to_path_buf(),
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Write the whole document, replacing the file atomically
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.settings)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!("Saved config to {}", self.path.display());
        Ok(())
    }

    /// Settings as sent to the client: everything except the SMTP password
    pub fn public_view(&self) -> Value {
        let mut value = serde_json::to_value(&self.settings).unwrap_or(Value::Null);
        if let Some(map) = value.as_object_mut() {
            map.remove("smtpPass");
        }
        value
    }

    pub fn apply_update(&mut self, update: &SettingsUpdate) {
        update.apply_to(&mut self.settings);
    }

    pub fn record_test(&mut self, service: Service, ok: bool) -> Result<()> {
        let status = if ok { TestStatus::Ok } else { TestStatus::Fail };
        let last = &mut self.settings.last_test;
        match service {
            Service::Plex => last.plex = status,
            Service::Tautulli => last.tautulli = status,
            Service::Smtp => last.smtp = status,
        }
        self.save()
    }

    pub fn status(&self) -> StatusView {
        let last = &self.settings.last_test;
        StatusView {
            email_ok: last.smtp == TestStatus::Ok,
            plex_ok: last.plex == TestStatus::Ok,
            tautulli_ok: last.tautulli == TestStatus::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        fs::write(&path, contents).expect("Should write config");
        path
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::load(&dir.path().join("missing.json"));
        assert_eq!(store.settings(), &Settings::default());
        assert_eq!(store.settings().smtp_port, 587);
    }

    #[test]
    fn test_load_corrupt_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "{ not json");
        let store = ConfigStore::load(&path);
        assert_eq!(store.settings(), &Settings::default());
    }

    #[test]
    fn test_open_reports_errors() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "{ not json");
        assert!(matches!(
            ConfigStore::open(&path),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            ConfigStore::open(&dir.path().join("missing.json")),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_open_rejects_invalid_aggregation() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"aggregation": {"max_pages": 0}}"#);
        assert!(matches!(
            ConfigStore::open(&path),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_bad_field_values_fall_back_individually() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{
                "plexUrl": "http://plex:32400",
                "plexToken": "tok",
                "smtpPort": "2525",
                "smtpSecure": "yes",
                "smtpHost": 42,
                "lastTest": {"plex": "pending", "smtp": "ok"},
                "aggregation": "fast"
            }"#,
        );
        let store = ConfigStore::load(&path);
        let settings = store.settings();

        assert_eq!(settings.plex_url, "http://plex:32400");
        assert_eq!(settings.plex_token, "tok");
        assert_eq!(settings.smtp_port, 2525);
        assert!(!settings.smtp_secure);
        assert_eq!(settings.smtp_host, "42");
        assert_eq!(settings.last_test.plex, TestStatus::Unknown);
        assert_eq!(settings.last_test.smtp, TestStatus::Ok);
        assert_eq!(settings.aggregation, AggregationConfig::default());
    }

    #[test]
    fn test_unparsable_port_uses_default() {
        let settings = Settings::parse(r#"{"smtpPort": "submission"}"#).expect("Should parse");
        assert_eq!(settings.smtp_port, 587);
        let settings = Settings::parse(r#"{"smtpPort": 70000}"#).expect("Should parse");
        assert_eq!(settings.smtp_port, 587);
    }

    #[test]
    fn test_unknown_keys_survive_save() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{"plexUrl": "http://plex:32400", "plexToken": "tok", "smtpPort": "587", "schedule": {"day": "fri", "hour": 9}}"#,
        );
        let mut store = ConfigStore::load(&path);
        store.apply_update(&SettingsUpdate::from_value(&json!({
            "fromAddress": "news@example.com"
        })));
        store.save().expect("Should save");

        let saved = fs::read_to_string(&path).expect("Should read");
        let saved: Value = serde_json::from_str(&saved).expect("Should parse");
        assert_eq!(saved["plexUrl"], "http://plex:32400");
        assert_eq!(saved["plexToken"], "tok");
        assert_eq!(saved["smtpPort"], 587);
        assert_eq!(saved["fromAddress"], "news@example.com");
        assert_eq!(saved["schedule"], json!({"day": "fri", "hour": 9}));
        assert_eq!(store.public_view()["schedule"]["day"], "fri");
    }

    #[test]
    fn test_load_keeps_credentials_when_tunables_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, r#"{"plexToken": "tok", "aggregation": {"page_length": 0}}"#);
        let store = ConfigStore::load(&path);
        assert_eq!(store.settings().plex_token, "tok");
        assert_eq!(store.settings().aggregation, AggregationConfig::default());
    }

    #[test]
    fn test_partial_document_merges_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"{"plexUrl": "http://plex:32400", "lastTest": {"plex": "ok"}}"#,
        );
        let store = ConfigStore::open(&path).expect("Should open");
        let settings = store.settings();

        assert_eq!(settings.plex_url, "http://plex:32400");
        assert_eq!(settings.smtp_port, 587);
        assert_eq!(settings.last_test.plex, TestStatus::Ok);
        assert_eq!(settings.last_test.tautulli, TestStatus::Unknown);
        assert_eq!(settings.aggregation, AggregationConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.json");
        let mut store = ConfigStore::load(&path);

        store.apply_update(&SettingsUpdate::from_value(&json!({
            "tautulliUrl": "http://tautulli:8181",
            "tautulliApiKey": "key",
            "smtpPass": "secret"
        })));
        store.save().expect("Should save");

        let reloaded = ConfigStore::open(&path).expect("Should reopen");
        assert_eq!(reloaded.settings().tautulli_url, "http://tautulli:8181");
        assert_eq!(reloaded.settings().smtp_pass, "secret");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_public_view_hides_password() {
        let dir = TempDir::new().unwrap();
        let mut store = ConfigStore::load(&dir.path().join("config.json"));
        store.apply_update(&SettingsUpdate::from_value(&json!({
            "smtpPass": "secret",
            "smtpHost": "smtp.example.com"
        })));

        let view = store.public_view();
        assert!(view.get("smtpPass").is_none());
        assert_eq!(view["smtpHost"], "smtp.example.com");
        assert_eq!(view["lastTest"]["smtp"], "unknown");
    }

    #[test]
    fn test_record_test_updates_status_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let mut store = ConfigStore::load(&path);

        store.record_test(Service::Plex, true).expect("Should save");
        store.record_test(Service::Smtp, false).expect("Should save");

        let status = store.status();
        assert!(status.plex_ok);
        assert!(!status.email_ok);
        assert!(!status.tautulli_ok);

        let reloaded = ConfigStore::open(&path).expect("Should reopen");
        assert_eq!(reloaded.settings().last_test.smtp, TestStatus::Fail);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = StatusView {
            email_ok: true,
            plex_ok: false,
            tautulli_ok: true,
        };
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            json!({"emailOk": true, "plexOk": false, "tautulliOk": true})
        );
    }
}
