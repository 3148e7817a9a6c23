use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    Attempt, Error, MailingId, MailingStatus, OwnerId,
    error::StorageError,
    repositories::{AttemptRepository, MailingRepository, RecipientRepository},
};

/// Per-owner counts derived from mailings and attempt history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerSummary {
    pub mailings_count: u64,
    pub in_progress_count: u64,
    /// Size of the owner's recipient directory
    pub recipients_count: u64,
    /// Distinct recipients with at least one successful attempt, across all
    /// of the owner's mailings and executions
    pub unique_recipients_reached: u64,
    pub total_success: u64,
    pub total_failure: u64,
}

/// Attempt history of a single mailing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailingReport {
    pub mailing_id: MailingId,
    pub status: MailingStatus,
    pub executions: u32,
    /// Oldest first
    pub attempts: Vec<Attempt>,
    pub total_success: u64,
    pub total_failure: u64,
}

/// Read-only aggregation over mailings and attempts.
///
/// Never writes, so it is safe to run alongside dispatch; counts reflect
/// whatever attempts were durable at the time of the call.
pub struct StatisticsService<M, A, R>
where
    M: MailingRepository,
    A: AttemptRepository,
    R: RecipientRepository,
{
    mailings: Arc<M>,
    attempts: Arc<A>,
    recipients: Arc<R>,
}

impl<M, A, R> StatisticsService<M, A, R>
where
    M: MailingRepository,
    A: AttemptRepository,
    R: RecipientRepository,
{
    pub fn new(mailings: Arc<M>, attempts: Arc<A>, recipients: Arc<R>) -> Self {
        Self {
            mailings,
            attempts,
            recipients,
        }
    }

    pub async fn summarize(&self, owner_id: &OwnerId) -> Result<OwnerSummary, Error> {
        let mailings = self.mailings.find_by_owner(owner_id).await?;
        let attempts = self.attempts.find_by_owner(owner_id).await?;
        let recipients_count = self.recipients.count_by_owner(owner_id).await?;

        let (total_success, total_failure) = count_outcomes(&attempts);
        let reached: HashSet<_> = attempts
            .iter()
            .filter(|a| a.is_success())
            .map(|a| &a.recipient_id)
            .collect();

        Ok(OwnerSummary {
            mailings_count: mailings.len() as u64,
            in_progress_count: mailings
                .iter()
                .filter(|m| m.status == MailingStatus::InProgress)
                .count() as u64,
            recipients_count,
            unique_recipients_reached: reached.len() as u64,
            total_success,
            total_failure,
        })
    }

    pub async fn mailing_report(&self, mailing_id: &MailingId) -> Result<MailingReport, Error> {
        let mailing = self
            .mailings
            .find_by_id(mailing_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        let mut attempts = self.attempts.find_by_mailing(mailing_id).await?;
        attempts.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let (total_success, total_failure) = count_outcomes(&attempts);
        Ok(MailingReport {
            mailing_id: mailing.id,
            status: mailing.status,
            executions: mailing.execution,
            attempts,
            total_success,
            total_failure,
        })
    }
}

fn count_outcomes(attempts: &[Attempt]) -> (u64, u64) {
    let success = attempts.iter().filter(|a| a.is_success()).count() as u64;
    (success, attempts.len() as u64 - success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;
    use crate::services::testing::Fixture;
    use crate::{FailureKind, NewAttempt, Recipient};
    use chrono::Utc;

    fn statistics(fixture: &Fixture) -> StatisticsService<MemoryStore, MemoryStore, MemoryStore> {
        StatisticsService::new(
            fixture.store.clone(),
            fixture.store.clone(),
            fixture.store.clone(),
        )
    }

    async fn record(
        fixture: &Fixture,
        mailing: &MailingId,
        recipient: &Recipient,
        success: bool,
    ) {
        let attempt = if success {
            NewAttempt::success(
                mailing.clone(),
                recipient.id.clone(),
                recipient.email.clone(),
                1,
                "250 OK".to_string(),
            )
        } else {
            NewAttempt::failure(
                mailing.clone(),
                recipient.id.clone(),
                recipient.email.clone(),
                1,
                FailureKind::AddressRejected,
                "550 rejected".to_string(),
            )
        };
        fixture.store.record(attempt).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unique_recipients_counted_once_across_mailings() {
        let fixture = Fixture::with_recipients(&["a@example.com", "b@example.com"]).await;
        let a = &fixture.recipients[0];
        let b = &fixture.recipients[1];

        let first = fixture.scheduled_mailing().await;
        let second = fixture.scheduled_mailing().await;
        record(&fixture, &first.id, a, true).await;
        record(&fixture, &second.id, a, true).await;
        record(&fixture, &second.id, b, false).await;

        let summary = statistics(&fixture).summarize(&fixture.owner).await.unwrap();

        assert_eq!(summary.mailings_count, 2);
        assert_eq!(summary.total_success, 2);
        assert_eq!(summary.total_failure, 1);
        assert_eq!(summary.unique_recipients_reached, 1);
        assert_eq!(summary.recipients_count, 2);
    }

    #[tokio::test]
    async fn test_in_progress_count() {
        let fixture = Fixture::with_recipients(&["a@example.com"]).await;
        let running = fixture.scheduled_mailing().await;
        fixture.scheduled_mailing().await;
        fixture.store.claim(&running.id, Utc::now()).await.unwrap();

        let summary = statistics(&fixture).summarize(&fixture.owner).await.unwrap();
        assert_eq!(summary.mailings_count, 2);
        assert_eq!(summary.in_progress_count, 1);
        assert_eq!(summary.unique_recipients_reached, 0);
    }

    #[tokio::test]
    async fn test_summary_scoped_to_owner() {
        let fixture = Fixture::with_recipients(&["a@example.com"]).await;
        let mailing = fixture.scheduled_mailing().await;
        record(&fixture, &mailing.id, &fixture.recipients[0], true).await;

        let summary = statistics(&fixture)
            .summarize(&OwnerId::new("own_nobody"))
            .await
            .unwrap();
        assert_eq!(summary, OwnerSummary::default());
    }

    #[tokio::test]
    async fn test_mailing_report() {
        let fixture = Fixture::with_recipients(&["a@example.com", "b@example.com"]).await;
        let mailing = fixture.scheduled_mailing().await;
        record(&fixture, &mailing.id, &fixture.recipients[0], true).await;
        record(&fixture, &mailing.id, &fixture.recipients[1], false).await;

        let report = statistics(&fixture)
            .mailing_report(&mailing.id)
            .await
            .unwrap();
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.total_success, 1);
        assert_eq!(report.total_failure, 1);
        assert!(report.attempts[0].created_at <= report.attempts[1].created_at);

        let missing = statistics(&fixture)
            .mailing_report(&MailingId::new("mlg_missing"))
            .await;
        assert!(missing.unwrap_err().is_not_found());
    }
}
