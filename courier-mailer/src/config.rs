//! Transport selection from configuration or the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::transports::{SmtpSettings, TlsConfig};
use crate::{FileTransport, MailerError, SmtpTransport, Transport};

const DEFAULT_OUTBOX: &str = "./outbox";
const DEFAULT_FROM: &str = "noreply@example.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailerConfig {
    pub transport: TransportConfig,
    pub from_address: String,
    #[serde(default)]
    pub from_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Smtp(SmtpSettings),
    /// Write every message as a file instead of sending it
    File { output_dir: PathBuf },
}

impl MailerConfig {
    /// Read the mailer configuration from `COURIER_*` environment variables.
    ///
    /// `COURIER_SMTP_HOST` selects SMTP; otherwise messages go to
    /// `COURIER_FILE_OUTPUT_DIR`, or `./outbox` when that is unset too.
    pub fn from_env() -> Result<Self, MailerError> {
        let transport = match env("COURIER_SMTP_HOST") {
            Some(host) => TransportConfig::Smtp(SmtpSettings {
                port: parse_env("COURIER_SMTP_PORT")?,
                username: env("COURIER_SMTP_USERNAME"),
                password: env("COURIER_SMTP_PASSWORD"),
                tls: parse_env::<TlsConfig>("COURIER_SMTP_TLS")?.unwrap_or_default(),
                timeout_secs: parse_env("COURIER_SMTP_TIMEOUT_SECS")?,
                ..SmtpSettings::new(host)
            }),
            None => TransportConfig::File {
                output_dir: env("COURIER_FILE_OUTPUT_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTBOX)),
            },
        };

        Ok(Self {
            transport,
            from_address: env("COURIER_FROM_ADDRESS").unwrap_or_else(|| DEFAULT_FROM.to_string()),
            from_name: env("COURIER_FROM_NAME"),
        })
    }

    pub fn build_transport(&self) -> Result<Arc<dyn Transport>, MailerError> {
        Ok(match &self.transport {
            TransportConfig::Smtp(settings) => Arc::new(SmtpTransport::connect(settings)?),
            TransportConfig::File { output_dir } => Arc::new(FileTransport::new(output_dir)?),
        })
    }

    /// The sender mailbox, with the display name when one is configured.
    pub fn get_from_address(&self) -> String {
        match &self.from_name {
            Some(name) => format!("{name} <{}>", self.from_address),
            None => self.from_address.clone(),
        }
    }
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::File {
                output_dir: PathBuf::from(DEFAULT_OUTBOX),
            },
            from_address: DEFAULT_FROM.to_string(),
            from_name: None,
        }
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>, MailerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env(key)
        .map(|raw| {
            raw.parse()
                .map_err(|e| MailerError::Config(format!("invalid {key} '{raw}': {e}")))
        })
        .transpose()
}
