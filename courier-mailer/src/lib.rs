//! Delivery transports for courier.
//!
//! A [`Transport`] delivers one [`Email`] to one address and classifies every
//! failure as a [`FailureKind`], so callers can tell a rejected recipient from a
//! transport that is down.
pub mod config;
pub mod email;
pub mod error;
pub mod transport;
pub mod transports;

pub use config::{MailerConfig, TransportConfig};
pub use email::{Email, EmailBuilder};
pub use error::{FailureKind, MailerError, TransportError};
pub use transport::{DeliveryReceipt, Transport};
pub use transports::{FileTransport, MockTransport, SmtpSettings, SmtpTransport, TlsConfig};

pub mod prelude {
    pub use crate::{
        DeliveryReceipt, Email, EmailBuilder, FailureKind, FileTransport, MailerConfig,
        MailerError, MockTransport, SmtpTransport, Transport, TransportError,
    };
}
