//! Mailings and their status machine.
//!
//! A mailing pairs a [`MessageTemplate`](crate::MessageTemplate) with a set of
//! recipients and a scheduling window. Its status moves along these edges:
//!
//! ```text
//! Created ──► Scheduled ──► InProgress ──► Completed
//!    │            │  ▲           │
//!    │            │  └─ Failed ◄─┘   (reschedule starts a new execution)
//!    └────────────┴──► Completed / Failed   (administrative force-finish)
//! ```
//!
//! Every successful claim (`Scheduled -> InProgress`) bumps the mailing's
//! `execution` counter; attempts are unique per (mailing, recipient, execution).
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error, OwnerId, RecipientId, TemplateId,
    error::ValidationError,
    id::prefixed_id,
    validation::validate_window,
};

prefixed_id!(
    /// A unique, stable identifier for a mailing
    MailingId,
    "mlg"
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailingStatus {
    Created,
    Scheduled,
    InProgress,
    Completed,
    Failed,
}

impl MailingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailingStatus::Created => "created",
            MailingStatus::Scheduled => "scheduled",
            MailingStatus::InProgress => "in_progress",
            MailingStatus::Completed => "completed",
            MailingStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: MailingStatus) -> bool {
        use MailingStatus::*;

        matches!(
            (self, next),
            (Created, Scheduled)
                | (Created, Completed)
                | (Created, Failed)
                | (Scheduled, InProgress)
                | (Scheduled, Completed)
                | (Scheduled, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (Failed, Scheduled)
        )
    }

    /// No dispatch will happen from this status without operator action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MailingStatus::Completed | MailingStatus::Failed)
    }

    /// Template, recipients and window may only change in these statuses.
    pub fn is_editable(&self) -> bool {
        matches!(
            self,
            MailingStatus::Created | MailingStatus::Scheduled | MailingStatus::Failed
        )
    }
}

impl FromStr for MailingStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(MailingStatus::Created),
            "scheduled" => Ok(MailingStatus::Scheduled),
            "in_progress" => Ok(MailingStatus::InProgress),
            "completed" => Ok(MailingStatus::Completed),
            "failed" => Ok(MailingStatus::Failed),
            _ => Err(ValidationError::InvalidField(format!(
                "Unknown mailing status: {s}"
            ))),
        }
    }
}

impl fmt::Display for MailingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a mailing ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    TransportUnavailable,
    WindowMissed,
    Cancelled,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::TransportUnavailable => "transport_unavailable",
            FailureReason::WindowMissed => "window_missed",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

impl FromStr for FailureReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport_unavailable" => Ok(FailureReason::TransportUnavailable),
            "window_missed" => Ok(FailureReason::WindowMissed),
            "cancelled" => Ok(FailureReason::Cancelled),
            _ => Err(ValidationError::InvalidField(format!(
                "Unknown failure reason: {s}"
            ))),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of an administrative force-finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Completed,
    Failed,
}

impl From<FinalStatus> for MailingStatus {
    fn from(status: FinalStatus) -> Self {
        match status {
            FinalStatus::Completed => MailingStatus::Completed,
            FinalStatus::Failed => MailingStatus::Failed,
        }
    }
}

impl FromStr for FinalStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(FinalStatus::Completed),
            "failed" => Ok(FinalStatus::Failed),
            _ => Err(ValidationError::InvalidField(format!(
                "Final status must be 'completed' or 'failed', got: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailing {
    pub id: MailingId,
    pub template_id: TemplateId,
    /// Sorted and free of duplicates.
    pub recipient_ids: Vec<RecipientId>,
    pub owner_id: OwnerId,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub status: MailingStatus,
    pub failure_reason: Option<FailureReason>,
    /// Number of claims so far; 0 until the first dispatch begins.
    pub execution: u32,
    /// Time of the latest claim.
    pub started_at: Option<DateTime<Utc>>,
    /// Time of the last recorded attempt once the latest execution finished.
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mailing {
    /// Scheduled and inside its window at `now` (both ends inclusive).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == MailingStatus::Scheduled
            && self.scheduled_start <= now
            && now <= self.scheduled_end
    }

    /// Scheduled but the window closed before it ever started.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == MailingStatus::Scheduled && self.scheduled_end < now
    }
}

#[derive(Debug, Clone)]
pub struct NewMailing {
    pub id: MailingId,
    pub template_id: TemplateId,
    pub recipient_ids: Vec<RecipientId>,
    pub owner_id: OwnerId,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
}

impl NewMailing {
    pub fn builder() -> NewMailingBuilder {
        NewMailingBuilder::default()
    }
}

#[derive(Default)]
pub struct NewMailingBuilder {
    id: Option<MailingId>,
    template_id: Option<TemplateId>,
    recipient_ids: BTreeSet<RecipientId>,
    owner_id: Option<OwnerId>,
    scheduled_start: Option<DateTime<Utc>>,
    scheduled_end: Option<DateTime<Utc>>,
}

impl NewMailingBuilder {
    pub fn id(mut self, id: MailingId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn template_id(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn recipient(mut self, recipient_id: RecipientId) -> Self {
        self.recipient_ids.insert(recipient_id);
        self
    }

    pub fn recipients(mut self, recipient_ids: impl IntoIterator<Item = RecipientId>) -> Self {
        self.recipient_ids.extend(recipient_ids);
        self
    }

    pub fn owner_id(mut self, owner_id: OwnerId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.scheduled_start = Some(start);
        self.scheduled_end = Some(end);
        self
    }

    pub fn build(self) -> Result<NewMailing, Error> {
        let scheduled_start = self.scheduled_start.ok_or(ValidationError::MissingField(
            "Scheduled start is required".to_string(),
        ))?;
        let scheduled_end = self.scheduled_end.ok_or(ValidationError::MissingField(
            "Scheduled end is required".to_string(),
        ))?;
        validate_window(scheduled_start, scheduled_end)?;

        if self.recipient_ids.is_empty() {
            return Err(ValidationError::MissingField(
                "At least one recipient is required".to_string(),
            )
            .into());
        }

        Ok(NewMailing {
            id: self.id.unwrap_or_else(MailingId::new_random),
            template_id: self.template_id.ok_or(ValidationError::MissingField(
                "Template is required".to_string(),
            ))?,
            recipient_ids: self.recipient_ids.into_iter().collect(),
            owner_id: self.owner_id.ok_or(ValidationError::MissingField(
                "Owner is required".to_string(),
            ))?,
            scheduled_start,
            scheduled_end,
        })
    }
}

/// Changes to a mailing's definition. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct MailingUpdate {
    pub template_id: Option<TemplateId>,
    pub recipient_ids: Option<Vec<RecipientId>>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
}

impl MailingUpdate {
    /// Apply onto `mailing`, re-validating the window and recipient set.
    pub fn apply_to(self, mailing: &mut Mailing) -> Result<(), ValidationError> {
        if let Some(template_id) = self.template_id {
            mailing.template_id = template_id;
        }

        if let Some(recipient_ids) = self.recipient_ids {
            let unique: BTreeSet<_> = recipient_ids.into_iter().collect();
            if unique.is_empty() {
                return Err(ValidationError::MissingField(
                    "At least one recipient is required".to_string(),
                ));
            }
            mailing.recipient_ids = unique.into_iter().collect();
        }

        if let Some(start) = self.scheduled_start {
            mailing.scheduled_start = start;
        }
        if let Some(end) = self.scheduled_end {
            mailing.scheduled_end = end;
        }

        validate_window(mailing.scheduled_start, mailing.scheduled_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            MailingStatus::Created,
            MailingStatus::Scheduled,
            MailingStatus::InProgress,
            MailingStatus::Completed,
            MailingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MailingStatus>().unwrap(), status);
        }
        assert!("running".parse::<MailingStatus>().is_err());
    }

    #[test]
    fn test_status_transitions() {
        use MailingStatus::*;

        assert!(Created.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Scheduled));

        assert!(!Created.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Scheduled));
        assert!(!Completed.can_transition_to(Scheduled));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(InProgress));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&MailingStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_builder_deduplicates_recipients() {
        let start = Utc::now();
        let mailing = NewMailing::builder()
            .template_id(TemplateId::new("tpl_1"))
            .owner_id(OwnerId::new("own_1"))
            .recipient(RecipientId::new("rcp_b"))
            .recipients([RecipientId::new("rcp_a"), RecipientId::new("rcp_b")])
            .window(start, start + Duration::hours(1))
            .build()
            .unwrap();

        assert_eq!(
            mailing.recipient_ids,
            vec![RecipientId::new("rcp_a"), RecipientId::new("rcp_b")]
        );
    }

    #[test]
    fn test_builder_rejects_inverted_window() {
        let start = Utc::now();
        let result = NewMailing::builder()
            .template_id(TemplateId::new("tpl_1"))
            .owner_id(OwnerId::new("own_1"))
            .recipient(RecipientId::new("rcp_a"))
            .window(start, start - Duration::minutes(5))
            .build();

        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::InvalidSchedule(_)))
        ));
    }

    #[test]
    fn test_builder_rejects_empty_recipient_set() {
        let start = Utc::now();
        let result = NewMailing::builder()
            .template_id(TemplateId::new("tpl_1"))
            .owner_id(OwnerId::new("own_1"))
            .window(start, start + Duration::hours(1))
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_due_and_expired() {
        let start = Utc::now();
        let mut mailing = Mailing {
            id: MailingId::new_random(),
            template_id: TemplateId::new("tpl_1"),
            recipient_ids: vec![RecipientId::new("rcp_a")],
            owner_id: OwnerId::new("own_1"),
            scheduled_start: start,
            scheduled_end: start + Duration::hours(1),
            status: MailingStatus::Scheduled,
            failure_reason: None,
            execution: 0,
            started_at: None,
            finished_at: None,
            created_at: start,
            updated_at: start,
        };

        assert!(mailing.is_due(start));
        assert!(mailing.is_due(start + Duration::hours(1)));
        assert!(!mailing.is_due(start - Duration::seconds(1)));
        assert!(mailing.is_expired(start + Duration::hours(2)));

        mailing.status = MailingStatus::Created;
        assert!(!mailing.is_due(start));
        assert!(!mailing.is_expired(start + Duration::hours(2)));
    }
}
