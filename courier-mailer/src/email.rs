use serde::{Deserialize, Serialize};

use crate::MailerError;

/// One plain-text message addressed to a single recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    pub fn builder() -> EmailBuilder {
        EmailBuilder::default()
    }

    pub fn validate(&self) -> Result<(), MailerError> {
        if self.to.is_empty() {
            return Err(MailerError::Builder("Recipient is required".to_string()));
        }

        if self.from.is_empty() {
            return Err(MailerError::Builder("From address is required".to_string()));
        }

        if self.subject.is_empty() {
            return Err(MailerError::Builder("Subject is required".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct EmailBuilder {
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    body: Option<String>,
}

impl EmailBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from<S: Into<String>>(mut self, email: S) -> Self {
        self.from = Some(email.into());
        self
    }

    pub fn to<S: Into<String>>(mut self, email: S) -> Self {
        self.to = Some(email.into());
        self
    }

    pub fn subject<S: Into<String>>(mut self, subject: S) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn body<S: Into<String>>(mut self, body: S) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn build(self) -> Result<Email, MailerError> {
        let email = Email {
            from: self
                .from
                .ok_or_else(|| MailerError::Builder("From address is required".to_string()))?,
            to: self
                .to
                .ok_or_else(|| MailerError::Builder("Recipient is required".to_string()))?,
            subject: self
                .subject
                .ok_or_else(|| MailerError::Builder("Subject is required".to_string()))?,
            body: self.body.unwrap_or_default(),
        };

        email.validate()?;
        Ok(email)
    }
}

/// Convert an [`Email`] into a lettre message.
pub(crate) fn build_message(email: &Email) -> Result<lettre::Message, crate::TransportError> {
    let message = lettre::Message::builder()
        .from(email.from.parse()?)
        .to(email.to.parse()?)
        .subject(email.subject.clone())
        .header(lettre::message::header::ContentType::TEXT_PLAIN)
        .body(email.body.clone())?;

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FailureKind;

    #[test]
    fn test_email_builder() {
        let email = Email::builder()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Spring sale")
            .body("Everything must go")
            .build()
            .unwrap();

        assert_eq!(email.from, "sender@example.com");
        assert_eq!(email.to, "recipient@example.com");
        assert_eq!(email.subject, "Spring sale");
        assert_eq!(email.body, "Everything must go");
    }

    #[test]
    fn test_email_validation() {
        let result = Email::builder()
            .from("sender@example.com")
            .subject("Test")
            .build();
        assert!(result.is_err());

        let result = Email::builder()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_message_rejects_bad_recipient() {
        let email = Email {
            from: "sender@example.com".to_string(),
            to: "not-an-address".to_string(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
        };

        let err = build_message(&email).unwrap_err();
        assert_eq!(err.kind(), FailureKind::AddressRejected);
    }

    #[test]
    fn test_build_message() {
        let email = Email {
            from: "Shop <sender@example.com>".to_string(),
            to: "recipient@example.com".to_string(),
            subject: "Hello".to_string(),
            body: "Body".to_string(),
        };

        assert!(build_message(&email).is_ok());
    }
}
