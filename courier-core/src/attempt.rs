//! Durable records of one recipient's delivery outcome for one execution.
//!
//! Attempts are append-only. Storage enforces at most one attempt per
//! (mailing, recipient, execution).
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use courier_mailer::FailureKind;

use crate::{
    Mailing, MailingId, MailingStatus, RecipientId, error::ValidationError, id::prefixed_id,
};

prefixed_id!(
    /// A unique, stable identifier for an attempt
    AttemptId,
    "att"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
        }
    }
}

impl FromStr for AttemptOutcome {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(AttemptOutcome::Success),
            "failure" => Ok(AttemptOutcome::Failure),
            _ => Err(ValidationError::InvalidField(format!(
                "Unknown attempt outcome: {s}"
            ))),
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: AttemptId,
    pub mailing_id: MailingId,
    pub recipient_id: RecipientId,
    /// Address the message was sent to, as it was at send time.
    pub recipient_email: String,
    pub execution: u32,
    pub outcome: AttemptOutcome,
    /// Set only for failures.
    pub failure_kind: Option<FailureKind>,
    /// Transport response on success, error text on failure.
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }

    /// Failed because the transport could not be reached at all.
    pub fn is_unavailable_failure(&self) -> bool {
        self.failure_kind == Some(FailureKind::Unavailable)
    }
}

#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub id: AttemptId,
    pub mailing_id: MailingId,
    pub recipient_id: RecipientId,
    pub recipient_email: String,
    pub execution: u32,
    pub outcome: AttemptOutcome,
    pub failure_kind: Option<FailureKind>,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

impl NewAttempt {
    pub fn success(
        mailing_id: MailingId,
        recipient_id: RecipientId,
        recipient_email: String,
        execution: u32,
        detail: String,
    ) -> Self {
        Self {
            id: AttemptId::new_random(),
            mailing_id,
            recipient_id,
            recipient_email,
            execution,
            outcome: AttemptOutcome::Success,
            failure_kind: None,
            detail,
            created_at: Utc::now(),
        }
    }

    pub fn failure(
        mailing_id: MailingId,
        recipient_id: RecipientId,
        recipient_email: String,
        execution: u32,
        kind: FailureKind,
        detail: String,
    ) -> Self {
        Self {
            id: AttemptId::new_random(),
            mailing_id,
            recipient_id,
            recipient_email,
            execution,
            outcome: AttemptOutcome::Failure,
            failure_kind: Some(kind),
            detail,
            created_at: Utc::now(),
        }
    }
}

/// A worker's claim on one recipient of one execution.
///
/// Only the holder of a live reservation sends. A reservation whose lease ran
/// out without an attempt being recorded can be taken over by another worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub mailing_id: MailingId,
    pub recipient_id: RecipientId,
    pub execution: u32,
    pub holder: String,
    pub reserved_at: DateTime<Utc>,
    pub lease_until: DateTime<Utc>,
}

/// Counts for one execution of a mailing, as seen by `execute` and `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub mailing_id: MailingId,
    pub execution: u32,
    pub status: MailingStatus,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// Fold the attempts of the mailing's current execution into counts.
    ///
    /// Attempts from other executions are ignored.
    pub fn from_attempts(mailing: &Mailing, attempts: &[Attempt]) -> Self {
        let current = attempts
            .iter()
            .filter(|attempt| attempt.execution == mailing.execution);

        let (mut succeeded, mut failed) = (0u64, 0u64);
        for attempt in current {
            match attempt.outcome {
                AttemptOutcome::Success => succeeded += 1,
                AttemptOutcome::Failure => failed += 1,
            }
        }

        Self {
            mailing_id: mailing.id.clone(),
            execution: mailing.execution,
            status: mailing.status,
            attempted: succeeded + failed,
            succeeded,
            failed,
            started_at: mailing.started_at,
            finished_at: mailing.finished_at,
        }
    }
}
