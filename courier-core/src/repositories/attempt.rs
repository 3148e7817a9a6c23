use crate::{Attempt, Error, MailingId, NewAttempt, OwnerId, Reservation};
use async_trait::async_trait;

/// Repository for attempt history and per-recipient send reservations
#[async_trait]
pub trait AttemptRepository: Send + Sync + 'static {
    /// Reserve one recipient of one execution for sending.
    ///
    /// Succeeds when nobody holds the recipient, when the same holder asks
    /// again, or when the previous holder's lease expired without an attempt
    /// being recorded. Returns `false` otherwise.
    async fn reserve(&self, reservation: &Reservation) -> Result<bool, Error>;

    /// Append an attempt, or return `None` if one already exists for its
    /// (mailing, recipient, execution).
    async fn record(&self, attempt: NewAttempt) -> Result<Option<Attempt>, Error>;

    async fn find_by_execution(
        &self,
        mailing_id: &MailingId,
        execution: u32,
    ) -> Result<Vec<Attempt>, Error>;

    /// Full history of a mailing, oldest first
    async fn find_by_mailing(&self, mailing_id: &MailingId) -> Result<Vec<Attempt>, Error>;

    /// Every attempt of every mailing an owner has
    async fn find_by_owner(&self, owner_id: &OwnerId) -> Result<Vec<Attempt>, Error>;
}
