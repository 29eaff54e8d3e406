use crate::error::{AppError, Result};
use chrono::Utc;
use lettre::message::{Mailbox, MultiPart, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use std::time::Duration;

pub const TEST_SUBJECT: &str = "Plex Newsletter SMTP Test";
const TEST_BODY: &str = "This is a test email confirming your SMTP settings are working.";
const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Outgoing mail server settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,

    /// Implicit TLS (usually port 465)
    pub secure: bool,

    pub user: String,
    pub pass: String,
    pub from: String,
}

/// How the connection is secured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// TLS from the first byte
    Implicit,
    /// STARTTLS must succeed
    StartTls,
    /// STARTTLS when the server offers it
    Opportunistic,
    /// Plain connection on port 25
    Plain,
}

impl SmtpSettings {
    pub fn security(&self) -> Security {
        match (self.secure, self.port) {
            (true, _) => Security::Implicit,
            (false, 25) => Security::Plain,
            (false, 587) => Security::StartTls,
            (false, _) => Security::Opportunistic,
        }
    }

    /// Check required fields before any connection is attempted
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(AppError::Incomplete("Missing SMTP server/port"));
        }
        if self.from.trim().is_empty() {
            return Err(AppError::Incomplete("Missing From Address"));
        }
        Ok(())
    }
}

/// A message handed to the relay endpoint; at least one of the bodies is set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

/// Recipients the server took, and addresses dropped before sending
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub message_id: String,
    pub accepted: Vec<String>,
    pub rejected: Vec<String>,
}

/// SMTP sender built from stored settings
pub struct Mailer {
    settings: SmtpSettings,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl Mailer {
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        settings.validate()?;
        let transport = build_transport(&settings)?;
        Ok(Self {
            settings,
            transport,
        })
    }

    /// Connect, negotiate and authenticate without sending anything
    pub async fn verify(&self) -> Result<()> {
        tracing::debug!(
            "Verifying SMTP {}:{} ({:?})",
            self.settings.host,
            self.settings.port,
            self.settings.security()
        );

        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::Smtp(format!(
                "{} did not accept the connection",
                self.settings.host
            ))),
            Err(e) => Err(AppError::Smtp(e.to_string())),
        }
    }

    pub async fn send_test(&self, to: &str) -> Result<()> {
        let from: Mailbox = self
            .settings
            .from
            .trim()
            .parse()
            .map_err(|e| AppError::Smtp(format!("Invalid From Address: {e}")))?;
        let to_mailbox: Mailbox = to
            .trim()
            .parse()
            .map_err(|e| AppError::Smtp(format!("Invalid recipient '{to}': {e}")))?;

        let email = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(TEST_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(TEST_BODY.to_string())
            .map_err(|e| AppError::Smtp(format!("Failed to build email: {e}")))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| AppError::Smtp(format!("Send to '{to}' failed: {e}")))?;

        tracing::info!("Sent SMTP test message to {to}");
        Ok(())
    }

    /// Send a composed message; unparsable recipients are reported as rejected
    pub async fn send(&self, email: &OutgoingEmail) -> Result<Delivery> {
        let (message, delivery) = self.compose(email)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| AppError::Smtp(format!("Send failed: {e}")))?;

        tracing::info!(
            "Sent {} to {} recipient(s), server replied {}",
            delivery.message_id,
            delivery.accepted.len(),
            response.code()
        );
        Ok(delivery)
    }

    fn compose(&self, email: &OutgoingEmail) -> Result<(Message, Delivery)> {
        let from_raw = Some(email.from.trim())
            .filter(|f| !f.is_empty())
            .unwrap_or(self.settings.from.trim());
        let from: Mailbox = from_raw
            .parse()
            .map_err(|e| AppError::Smtp(format!("Invalid From Address: {e}")))?;

        let mut recipients = Vec::new();
        let mut rejected = Vec::new();
        let candidates = email.to.iter().map(String::as_str).map(str::trim);
        for to in candidates.filter(|t| !t.is_empty()) {
            match to.parse::<Mailbox>() {
                Ok(mailbox) => recipients.push(mailbox),
                Err(e) => {
                    tracing::warn!("Dropping recipient '{to}': {e}");
                    rejected.push(to.to_string());
                }
            }
        }
        if recipients.is_empty() {
            return Err(AppError::Smtp("No valid recipients".to_string()));
        }

        let message_id = format!(
            "<{}.{}@{}>",
            Utc::now().timestamp_micros(),
            std::process::id(),
            from.email.domain()
        );
        let accepted = recipients.iter().map(|m| m.email.to_string()).collect();

        let mut builder = Message::builder()
            .from(from)
            .subject(email.subject.trim())
            .message_id(Some(message_id.clone()));
        for mailbox in recipients {
            builder = builder.to(mailbox);
        }

        let built = match (&email.html, &email.text) {
            (Some(html), Some(text)) => {
                builder.multipart(MultiPart::alternative_plain_html(text.clone(), html.clone()))
            }
            (Some(html), None) => builder.header(ContentType::TEXT_HTML).body(html.clone()),
            (None, Some(text)) => builder.header(ContentType::TEXT_PLAIN).body(text.clone()),
            (None, None) => return Err(AppError::Incomplete("Missing email body")),
        };
        let message = built.map_err(|e| AppError::Smtp(format!("Failed to build email: {e}")))?;

        Ok((
            message,
            Delivery {
                message_id,
                accepted,
                rejected,
            },
        ))
    }
}

fn build_transport(settings: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
    let host = settings.host.trim();
    let connection_error = |e: lettre::transport::smtp::Error| {
        AppError::Smtp(format!("SMTP connection error: {e}"))
    };

    let builder = match settings.security() {
        Security::Implicit => {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(connection_error)?
        }
        Security::StartTls => {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(connection_error)?
        }
        Security::Opportunistic => {
            let tls = TlsParameters::new(host.to_string()).map_err(connection_error)?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .tls(Tls::Opportunistic(tls))
        }
        Security::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
    };

    let mut builder = builder.port(settings.port).timeout(Some(SMTP_TIMEOUT));
    if !settings.user.trim().is_empty() {
        builder = builder.credentials(Credentials::new(
            settings.user.trim().to_string(),
            settings.pass.clone(),
        ));
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(port: u16, secure: bool) -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            port,
            secure,
            user: String::new(),
            pass: String::new(),
            from: "newsletter@example.com".to_string(),
        }
    }

    #[test]
    fn test_security_selection() {
        assert_eq!(settings(465, true).security(), Security::Implicit);
        assert_eq!(settings(587, true).security(), Security::Implicit);
        assert_eq!(settings(587, false).security(), Security::StartTls);
        assert_eq!(settings(25, false).security(), Security::Plain);
        assert_eq!(settings(2525, false).security(), Security::Opportunistic);
    }

    #[test]
    fn test_missing_host() {
        let mut s = settings(587, false);
        s.host = "  ".to_string();
        let err = Mailer::new(s).err().expect("Should reject missing host");
        assert_eq!(err.to_string(), "Missing SMTP server/port");
    }

    #[test]
    fn test_missing_port() {
        let err = Mailer::new(settings(0, false))
            .err()
            .expect("Should reject missing port");
        assert_eq!(err.to_string(), "Missing SMTP server/port");
    }

    #[test]
    fn test_missing_from() {
        let mut s = settings(587, false);
        s.from = String::new();
        let err = Mailer::new(s).err().expect("Should reject missing from");
        assert_eq!(err.to_string(), "Missing From Address");
    }

    #[test]
    fn test_host_checked_before_from() {
        let s = SmtpSettings::default();
        assert_eq!(
            s.validate().unwrap_err().to_string(),
            "Missing SMTP server/port"
        );
    }

    #[tokio::test]
    async fn test_transport_builds_for_every_mode() {
        for (port, secure) in [(465, true), (587, false), (25, false), (2525, false)] {
            let mut s = settings(port, secure);
            s.user = "mailer".to_string();
            s.pass = "secret".to_string();
            assert!(Mailer::new(s).is_ok(), "port {port} secure {secure}");
        }
    }

    fn outgoing(to: &[&str]) -> OutgoingEmail {
        OutgoingEmail {
            from: "Weekly <weekly@example.com>".to_string(),
            to: to.iter().map(|t| t.to_string()).collect(),
            subject: "This week on Plex".to_string(),
            html: Some("<h1>Hello</h1>".to_string()),
            text: None,
        }
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    #[tokio::test]
    async fn test_compose_html_message() {
        let mailer = Mailer::new(settings(587, false)).expect("Should build mailer");
        let (message, delivery) = mailer
            .compose(&outgoing(&["a@example.com", "B <b@example.com>"]))
            .expect("Should compose");

        assert_eq!(delivery.accepted, vec!["a@example.com", "b@example.com"]);
        assert!(delivery.rejected.is_empty());
        assert!(delivery.message_id.starts_with('<'));
        assert!(delivery.message_id.ends_with("@example.com>"));

        let raw = formatted(&message);
        assert!(raw.contains("Subject: This week on Plex"));
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains(&delivery.message_id));
    }

    #[tokio::test]
    async fn test_compose_reports_unparsable_recipients() {
        let mailer = Mailer::new(settings(587, false)).expect("Should build mailer");
        let (_, delivery) = mailer
            .compose(&outgoing(&["a@example.com", "nobody", " "]))
            .expect("Should compose");
        assert_eq!(delivery.accepted, vec!["a@example.com"]);
        assert_eq!(delivery.rejected, vec!["nobody"]);

        let err = mailer.compose(&outgoing(&["nobody"])).unwrap_err();
        assert_eq!(err.to_string(), "SMTP error: No valid recipients");
    }

    #[tokio::test]
    async fn test_compose_both_bodies_is_alternative() {
        let mailer = Mailer::new(settings(587, false)).expect("Should build mailer");
        let mut email = outgoing(&["a@example.com"]);
        email.text = Some("Hello".to_string());
        let (message, _) = mailer.compose(&email).expect("Should compose");

        let raw = formatted(&message);
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/plain"));
        assert!(raw.contains("text/html"));
    }

    #[tokio::test]
    async fn test_compose_falls_back_to_configured_sender() {
        let mailer = Mailer::new(settings(587, false)).expect("Should build mailer");
        let mut email = outgoing(&["a@example.com"]);
        email.from = String::new();
        email.html = None;
        email.text = Some("Hello".to_string());
        let (message, _) = mailer.compose(&email).expect("Should compose");
        assert!(formatted(&message).contains("From: newsletter@example.com"));

        email.text = None;
        let err = mailer.compose(&email).unwrap_err();
        assert_eq!(err.to_string(), "Missing email body");
    }

    #[tokio::test]
    async fn test_send_test_rejects_bad_recipient() {
        let mailer = Mailer::new(settings(25, false)).expect("Should build mailer");
        let err = mailer.send_test("not an address").await.unwrap_err();
        assert!(err.to_string().contains("Invalid recipient"));
    }
}
