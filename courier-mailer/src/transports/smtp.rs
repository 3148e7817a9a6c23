use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};

use crate::email::build_message;
use crate::{DeliveryReceipt, Email, MailerError, Transport, TransportError};

/// How the connection to the relay is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsConfig {
    /// Plain text. Only for local relays and test servers.
    None,
    #[default]
    StartTls,
    /// Implicit TLS, usually port 465.
    Tls,
}

impl FromStr for TlsConfig {
    type Err = MailerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(TlsConfig::None),
            "starttls" | "start_tls" => Ok(TlsConfig::StartTls),
            "tls" => Ok(TlsConfig::Tls),
            other => Err(MailerError::Config(format!(
                "unknown TLS mode '{other}', expected none, starttls or tls"
            ))),
        }
    }
}

/// Connection settings for an SMTP relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Socket timeout for each SMTP command, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SmtpSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            username: None,
            password: None,
            tls: TlsConfig::default(),
            timeout_secs: None,
        }
    }
}

/// Delivers through an SMTP relay using lettre's tokio transport.
///
/// Connections are pooled by lettre; [`Transport::check`] issues a NOOP on
/// one of them.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    relay: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpTransport {
    pub fn connect(settings: &SmtpSettings) -> Result<Self, MailerError> {
        let host = settings.host.as_str();
        let mut relay = match settings.tls {
            TlsConfig::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
            TlsConfig::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?,
            TlsConfig::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
        };

        if let Some(port) = settings.port {
            relay = relay.port(port);
        }
        match (&settings.username, &settings.password) {
            (Some(user), Some(pass)) => {
                relay = relay.credentials(Credentials::new(user.clone(), pass.clone()));
            }
            (None, None) => {}
            _ => {
                return Err(MailerError::Config(
                    "SMTP username and password must be set together".to_string(),
                ));
            }
        }
        relay = relay.timeout(settings.timeout_secs.map(Duration::from_secs));

        tracing::debug!(host, port = ?settings.port, tls = ?settings.tls, "SMTP transport configured");
        Ok(Self {
            relay: relay.build(),
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, email: &Email) -> Result<DeliveryReceipt, TransportError> {
        let message = build_message(email)?;
        let response = self.relay.send(message).await?;

        let text = response.first_line().unwrap_or_default();
        Ok(DeliveryReceipt::new(format!("{} {text}", response.code())))
    }

    async fn check(&self) -> Result<(), TransportError> {
        match self.relay.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(TransportError::Unavailable(
                "SMTP server did not answer NOOP".to_string(),
            )),
            Err(e) => Err(TransportError::Unavailable(e.to_string())),
        }
    }
}
