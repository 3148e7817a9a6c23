use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lettre::Transport as _;
use lettre::transport::file::FileTransport as LettreFileTransport;

use crate::email::build_message;
use crate::{DeliveryReceipt, Email, MailerError, Transport, TransportError};

/// Writes every message as an `.eml` file; meant for development.
#[derive(Debug, Clone)]
pub struct FileTransport {
    writer: LettreFileTransport,
    output_dir: PathBuf,
}

impl FileTransport {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, MailerError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            writer: LettreFileTransport::new(&output_dir),
            output_dir,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn send(&self, email: &Email) -> Result<DeliveryReceipt, TransportError> {
        let message = build_message(email)?;

        // lettre writes synchronously
        let writer = self.writer.clone();
        let message_id = tokio::task::spawn_blocking(move || writer.send(&message))
            .await
            .map_err(|e| TransportError::Transient(format!("File writer task failed: {e}")))?
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        Ok(DeliveryReceipt::new(format!(
            "written to {}/{message_id}.eml",
            self.output_dir.display()
        )))
    }

    async fn check(&self) -> Result<(), TransportError> {
        if self.output_dir.is_dir() {
            Ok(())
        } else {
            Err(TransportError::Unavailable(format!(
                "Output directory {} does not exist",
                self.output_dir.display()
            )))
        }
    }
}
