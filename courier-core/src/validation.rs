use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Practical subset of RFC 5322, compiled once and shared.
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .expect("Invalid email regex pattern")
});

const MAX_SUBJECT_LENGTH: usize = 255;
const MAX_DISPLAY_NAME_LENGTH: usize = 150;

/// Validates an email address
///
/// # Examples
///
/// ```rust
/// use courier_core::validation::validate_email;
///
/// assert!(validate_email("user@example.com").is_ok());
/// assert!(validate_email("invalid-email").is_err());
/// ```
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.is_empty() {
        return Err(ValidationError::MissingField(
            "Email is required".to_string(),
        ));
    }

    if email.len() > 254 {
        return Err(ValidationError::InvalidEmail(
            "Email is too long".to_string(),
        ));
    }

    if EMAIL_REGEX.is_match(email) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEmail(format!(
            "Invalid email format: {email}"
        )))
    }
}

/// Validates a recipient's display name
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::MissingField(
            "Display name is required".to_string(),
        ));
    }

    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ValidationError::InvalidField(format!(
            "Display name must be at most {MAX_DISPLAY_NAME_LENGTH} characters"
        )));
    }

    Ok(())
}

/// Validates a template subject line
pub fn validate_subject(subject: &str) -> Result<(), ValidationError> {
    if subject.trim().is_empty() {
        return Err(ValidationError::MissingField(
            "Subject is required".to_string(),
        ));
    }

    if subject.chars().count() > MAX_SUBJECT_LENGTH {
        return Err(ValidationError::InvalidField(format!(
            "Subject must be at most {MAX_SUBJECT_LENGTH} characters"
        )));
    }

    // Header injection
    if subject.contains(['\r', '\n']) {
        return Err(ValidationError::InvalidField(
            "Subject must be a single line".to_string(),
        ));
    }

    Ok(())
}

/// Validates a template body
pub fn validate_body(body: &str) -> Result<(), ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::MissingField("Body is required".to_string()));
    }

    Ok(())
}

/// Validates a scheduling window: the end must come strictly after the start.
pub fn validate_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if end <= start {
        return Err(ValidationError::InvalidSchedule(format!(
            "scheduled end {end} must be after scheduled start {start}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("first.last+tag@mail.example.org").is_ok());

        assert!(matches!(
            validate_email(""),
            Err(ValidationError::MissingField(_))
        ));
        assert!(matches!(
            validate_email("not-an-email"),
            Err(ValidationError::InvalidEmail(_))
        ));
        assert!(validate_email("user@localhost").is_err());

        let long = format!("{}@example.com", "a".repeat(250));
        assert!(validate_email(&long).is_err());
    }

    #[test]
    fn test_validate_subject() {
        assert!(validate_subject("Spring sale").is_ok());
        assert!(validate_subject("   ").is_err());
        assert!(validate_subject("Hello\r\nBcc: everyone@example.com").is_err());
        assert!(validate_subject(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Ada Lovelace").is_ok());
        assert!(validate_display_name("").is_err());
        assert!(validate_display_name(&"n".repeat(151)).is_err());
    }

    #[test]
    fn test_validate_body() {
        assert!(validate_body("Hi there").is_ok());
        assert!(validate_body("\n\t").is_err());
    }

    #[test]
    fn test_validate_window() {
        let start = Utc::now();
        assert!(validate_window(start, start + Duration::hours(1)).is_ok());
        assert!(matches!(
            validate_window(start, start),
            Err(ValidationError::InvalidSchedule(_))
        ));
        assert!(validate_window(start, start - Duration::seconds(1)).is_err());
    }
}
