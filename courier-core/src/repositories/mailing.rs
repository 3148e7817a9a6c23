use crate::{
    Error, FailureReason, Mailing, MailingId, MailingStatus, NewMailing, OwnerId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// New status written by [`MailingRepository::transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: MailingStatus,
    /// Replaces the stored reason (cleared when `None`).
    pub failure_reason: Option<FailureReason>,
    /// Written only when `Some`; an existing value is kept otherwise.
    pub finished_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn to(status: MailingStatus) -> Self {
        Self {
            status,
            failure_reason: None,
            finished_at: None,
        }
    }

    pub fn failed(reason: FailureReason, at: DateTime<Utc>) -> Self {
        Self {
            status: MailingStatus::Failed,
            failure_reason: Some(reason),
            finished_at: Some(at),
        }
    }

    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: MailingStatus::Completed,
            failure_reason: None,
            finished_at: Some(at),
        }
    }
}

/// Repository for mailing data access
///
/// Every status write is a compare-and-set against the persisted status, so
/// concurrent callers racing on the same mailing see exactly one winner.
#[async_trait]
pub trait MailingRepository: Send + Sync + 'static {
    /// Create a mailing in `Created` status together with its recipient set
    async fn create(&self, mailing: NewMailing) -> Result<Mailing, Error>;

    async fn find_by_id(&self, id: &MailingId) -> Result<Option<Mailing>, Error>;

    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Mailing>, Error>;

    /// IDs of mailings in `status`, oldest scheduled start first
    async fn find_by_status(&self, status: MailingStatus) -> Result<Vec<MailingId>, Error>;

    /// `Scheduled` mailings with start <= now <= end, ordered by start then ID
    async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error>;

    /// `Scheduled` mailings whose end lies before `now`
    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<MailingId>, Error>;

    /// Current status only; used for cheap cancellation checks
    async fn status_of(&self, id: &MailingId) -> Result<Option<MailingStatus>, Error>;

    /// Replace template, recipient set and window.
    ///
    /// Only applies while the stored status is `Created`, `Scheduled` or
    /// `Failed`; returns `None` otherwise.
    async fn update_definition(&self, mailing: &Mailing) -> Result<Option<Mailing>, Error>;

    /// Atomically move `Scheduled -> InProgress`, bumping the execution counter,
    /// stamping `started_at = now` and clearing `finished_at` and the failure reason.
    ///
    /// Returns `None` when the mailing was not `Scheduled` (someone else won).
    async fn claim(&self, id: &MailingId, now: DateTime<Utc>) -> Result<Option<Mailing>, Error>;

    /// Atomically apply `change` if the stored status still equals `from`.
    async fn transition(
        &self,
        id: &MailingId,
        from: MailingStatus,
        change: StatusChange,
    ) -> Result<Option<Mailing>, Error>;

    /// Delete a mailing unless it is `InProgress`. Returns whether a row was removed.
    async fn delete(&self, id: &MailingId) -> Result<bool, Error>;
}
