use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while configuring or constructing a transport.
#[derive(Error, Debug)]
pub enum MailerError {
    #[error("Email transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("Email address error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email builder error: {0}")]
    Builder(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a failed send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The receiving side refused this particular address or message.
    AddressRejected,
    /// A temporary problem; re-running the mailing may succeed.
    Transient,
    /// The transport itself could not be reached.
    Unavailable,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::AddressRejected => "address_rejected",
            FailureKind::Transient => "transient",
            FailureKind::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "address_rejected" => Some(FailureKind::AddressRejected),
            "transient" => Some(FailureKind::Transient),
            "unavailable" => Some(FailureKind::Unavailable),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure to deliver one message to one address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Address rejected: {0}")]
    AddressRejected(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn kind(&self) -> FailureKind {
        match self {
            TransportError::AddressRejected(_) => FailureKind::AddressRejected,
            TransportError::Transient(_) => FailureKind::Transient,
            TransportError::Unavailable(_) => FailureKind::Unavailable,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            TransportError::AddressRejected(d)
            | TransportError::Transient(d)
            | TransportError::Unavailable(d) => d,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

impl From<lettre::transport::smtp::Error> for TransportError {
    fn from(e: lettre::transport::smtp::Error) -> Self {
        let detail = e.to_string();

        // 530-535 are authentication failures: every recipient would fail the same way
        let auth_failure = e
            .status()
            .map(|code| code.to_string().starts_with("53"))
            .unwrap_or(false);

        if auth_failure {
            TransportError::Unavailable(detail)
        } else if e.is_permanent() {
            TransportError::AddressRejected(detail)
        } else if e.is_transient() || e.is_timeout() {
            TransportError::Transient(detail)
        } else {
            TransportError::Unavailable(detail)
        }
    }
}

impl From<lettre::address::AddressError> for TransportError {
    fn from(e: lettre::address::AddressError) -> Self {
        TransportError::AddressRejected(e.to_string())
    }
}

impl From<lettre::error::Error> for TransportError {
    fn from(e: lettre::error::Error) -> Self {
        TransportError::AddressRejected(format!("Message could not be built: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, MailerError>;
