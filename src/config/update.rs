use super::Settings;
use serde_json::Value;

/// Partial settings sent by the UI.
///
/// Accepts both the stored schema (`smtpHost`, `smtpUser`, ...) and the form
/// schema used by the settings page (`smtpServer`, `smtpEmailLogin`, ...).
/// Fields carrying the wrong JSON type are ignored rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub plex_url: Option<String>,
    pub plex_token: Option<String>,
    pub tautulli_url: Option<String>,
    pub tautulli_api_key: Option<String>,

    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_secure: Option<bool>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub from_address: Option<String>,
}

fn string_field(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Passwords are only replaced by non-empty values
fn secret_field(body: &Value, key: &str) -> Option<String> {
    string_field(body, key).filter(|s| !s.is_empty())
}

impl SettingsUpdate {
    pub fn from_value(body: &Value) -> Self {
        let smtp_port = body
            .get("smtpPort")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok());

        let smtp_secure = body
            .get("smtpEncryption")
            .and_then(Value::as_str)
            .map(|enc| enc.eq_ignore_ascii_case("TLS/SSL"))
            .or_else(|| body.get("smtpSecure").and_then(Value::as_bool));

        Self {
            plex_url: string_field(body, "plexUrl"),
            plex_token: string_field(body, "plexToken"),
            tautulli_url: string_field(body, "tautulliUrl"),
            tautulli_api_key: string_field(body, "tautulliApiKey"),

            smtp_host: string_field(body, "smtpServer").or_else(|| string_field(body, "smtpHost")),
            smtp_port,
            smtp_secure,
            smtp_user: string_field(body, "smtpEmailLogin")
                .or_else(|| string_field(body, "smtpUser")),
            smtp_pass: secret_field(body, "smtpEmailPassword")
                .or_else(|| secret_field(body, "smtpPass")),
            from_address: string_field(body, "fromAddress"),
        }
    }

    /// Only the SMTP part of the update
    pub fn smtp_only(&self) -> Self {
        Self {
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            smtp_secure: self.smtp_secure,
            smtp_user: self.smtp_user.clone(),
            smtp_pass: self.smtp_pass.clone(),
            from_address: self.from_address.clone(),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, settings: &mut Settings) {
        fn set<T: Clone>(target: &mut T, value: Option<&T>) {
            if let Some(value) = value {
                target.clone_from(value);
            }
        }

        set(&mut settings.plex_url, self.plex_url.as_ref());
        set(&mut settings.plex_token, self.plex_token.as_ref());
        set(&mut settings.tautulli_url, self.tautulli_url.as_ref());
        set(&mut settings.tautulli_api_key, self.tautulli_api_key.as_ref());

        set(&mut settings.smtp_host, self.smtp_host.as_ref());
        set(&mut settings.smtp_port, self.smtp_port.as_ref());
        set(&mut settings.smtp_secure, self.smtp_secure.as_ref());
        set(&mut settings.smtp_user, self.smtp_user.as_ref());
        set(&mut settings.smtp_pass, self.smtp_pass.as_ref());
        set(&mut settings.from_address, self.from_address.as_ref());
    }
}
