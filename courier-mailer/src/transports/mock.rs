use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::{DeliveryReceipt, Email, Transport, TransportError};

/// In-process transport for tests.
///
/// Records every send call, can be told to fail specific addresses, to stall
/// for a while before answering, or to behave as if the server were down.
#[derive(Debug, Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Email>>,
    failures: Mutex<HashMap<String, TransportError>>,
    unavailable: AtomicBool,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long inside every `send` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every send to `address` fail with `error`.
    pub fn fail_address(&self, address: &str, error: TransportError) {
        self.failures
            .lock()
            .unwrap()
            .insert(address.to_string(), error);
    }

    /// Simulate a full outage: `check` and every `send` fail as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every message handed to `send`, successful or not, in call order.
    pub fn calls(&self) -> Vec<Email> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// How many times `address` was contacted.
    pub fn calls_to(&self, address: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|email| email.to == address)
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, email: &Email) -> Result<DeliveryReceipt, TransportError> {
        self.calls.lock().unwrap().push(email.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable(
                "connection refused".to_string(),
            ));
        }

        if let Some(error) = self.failures.lock().unwrap().get(&email.to) {
            return Err(error.clone());
        }

        Ok(DeliveryReceipt::new("250 2.0.0 OK queued"))
    }

    async fn check(&self) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(TransportError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}
