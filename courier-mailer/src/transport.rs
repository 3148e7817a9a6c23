use async_trait::async_trait;

use crate::{Email, TransportError};

/// What the receiving side said when it accepted a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub response: String,
}

impl DeliveryReceipt {
    pub fn new<S: Into<String>>(response: S) -> Self {
        Self {
            response: response.into(),
        }
    }
}

/// Sends one message to one address.
///
/// Implementations must classify every failure (see [`TransportError`]) so the
/// dispatch engine can tell a per-recipient problem from an outage.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, email: &Email) -> Result<DeliveryReceipt, TransportError>;

    /// Cheap reachability probe run before a mailing starts sending.
    async fn check(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, email: &Email) -> Result<DeliveryReceipt, TransportError> {
        (**self).send(email).await
    }

    async fn check(&self) -> Result<(), TransportError> {
        (**self).check().await
    }
}
