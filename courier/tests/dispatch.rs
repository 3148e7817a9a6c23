//! End-to-end dispatch against SQLite storage and a mock transport

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use courier::{
    Courier, CourierBuilder, FailureKind, FailureReason, FinalStatus, MailingId, MailingStatus,
    MockTransport, NewMailing, NewRecipient, NewTemplate, OwnerId, SqliteRepositoryProvider,
    TransportError,
};

struct Harness {
    courier: Courier<SqliteRepositoryProvider>,
    transport: Arc<MockTransport>,
    owner: OwnerId,
    emails: Vec<String>,
}

async fn harness(emails: &[&str], transport: MockTransport) -> Harness {
    let _ = tracing_subscriber::fmt::try_init();
    let transport = Arc::new(transport);
    let courier = CourierBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .unwrap()
        .with_transport(transport.clone())
        .apply_migrations(true)
        .build()
        .await
        .unwrap();

    Harness {
        courier,
        transport,
        owner: OwnerId::new_random(),
        emails: emails.iter().map(|e| e.to_string()).collect(),
    }
}

impl Harness {
    /// A scheduled mailing to every harness address, due right now.
    async fn scheduled_mailing(&self) -> MailingId {
        let template = self
            .courier
            .create_template(NewTemplate::new(
                self.owner.clone(),
                "Spring sale",
                "Everything must go",
            ))
            .await
            .unwrap();

        let mut recipients = Vec::new();
        for email in &self.emails {
            let recipient = match self
                .courier
                .recipients()
                .list_recipients(&self.owner)
                .await
                .unwrap()
                .into_iter()
                .find(|r| &r.email == email)
            {
                Some(existing) => existing,
                None => self
                    .courier
                    .create_recipient(
                        NewRecipient::builder()
                            .email(email.as_str())
                            .owner_id(self.owner.clone())
                            .build()
                            .unwrap(),
                    )
                    .await
                    .unwrap(),
            };
            recipients.push(recipient.id);
        }

        let now = Utc::now();
        let mailing = self
            .courier
            .create_mailing(
                NewMailing::builder()
                    .template_id(template.id)
                    .owner_id(self.owner.clone())
                    .recipients(recipients)
                    .window(now - ChronoDuration::minutes(5), now + ChronoDuration::hours(1))
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
        self.courier.schedule(&mailing.id).await.unwrap();
        mailing.id
    }
}

#[tokio::test]
async fn test_execute_sends_once_and_is_idempotent() {
    let h = harness(
        &["a@example.com", "b@example.com", "c@example.com"],
        MockTransport::new(),
    )
    .await;
    let id = h.scheduled_mailing().await;

    let result = h.courier.execute(&id).await.unwrap();
    assert_eq!(result.status, MailingStatus::Completed);
    assert_eq!(result.attempted, 3);
    assert_eq!(result.succeeded, 3);
    assert_eq!(h.transport.call_count(), 3);

    let again = h.courier.execute(&id).await.unwrap();
    assert_eq!(again.status, MailingStatus::Completed);
    assert_eq!(again.execution, result.execution);
    assert_eq!(again.succeeded, 3);
    assert_eq!(h.transport.call_count(), 3);

    let overview = h.courier.status(&id).await.unwrap();
    assert_eq!(overview.mailing.status, MailingStatus::Completed);
    assert!(overview.mailing.finished_at.is_some());
}

#[tokio::test]
async fn test_concurrent_execute_contacts_each_recipient_once() {
    let emails: Vec<String> = (0..10).map(|i| format!("user{i}@example.com")).collect();
    let refs: Vec<&str> = emails.iter().map(String::as_str).collect();
    let h = harness(
        &refs,
        MockTransport::new().with_delay(Duration::from_millis(10)),
    )
    .await;
    let id = h.scheduled_mailing().await;

    let (first, second) = tokio::join!(h.courier.execute(&id), h.courier.execute(&id));
    first.unwrap();
    second.unwrap();

    for email in &emails {
        assert_eq!(h.transport.calls_to(email), 1, "{email} contacted twice");
    }
    let overview = h.courier.status(&id).await.unwrap();
    assert_eq!(overview.mailing.status, MailingStatus::Completed);
    assert_eq!(overview.latest.attempted, emails.len() as u64);
}

#[tokio::test]
async fn test_rejected_address_does_not_stop_others() {
    let h = harness(
        &["a@example.com", "b@example.com", "c@example.com"],
        MockTransport::new(),
    )
    .await;
    h.transport.fail_address(
        "b@example.com",
        TransportError::AddressRejected("550 no such user".to_string()),
    );
    let id = h.scheduled_mailing().await;

    let result = h.courier.execute(&id).await.unwrap();
    assert_eq!(result.status, MailingStatus::Completed);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 1);

    let report = h.courier.mailing_report(&id).await.unwrap();
    assert_eq!(report.attempts.len(), 3);
    let rejected: Vec<_> = report
        .attempts
        .iter()
        .filter(|a| !a.is_success())
        .collect();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].recipient_email, "b@example.com");
    assert_eq!(rejected[0].failure_kind, Some(FailureKind::AddressRejected));
}

#[tokio::test]
async fn test_outage_fails_mailing_and_reschedule_starts_fresh_execution() {
    let h = harness(&["a@example.com", "b@example.com"], MockTransport::new()).await;
    let id = h.scheduled_mailing().await;

    h.transport.set_unavailable(true);
    let error = h.courier.execute(&id).await.unwrap_err();
    assert!(error.is_retryable());

    let overview = h.courier.status(&id).await.unwrap();
    assert_eq!(overview.mailing.status, MailingStatus::Failed);
    assert_eq!(
        overview.mailing.failure_reason,
        Some(FailureReason::TransportUnavailable)
    );
    assert_eq!(h.transport.call_count(), 0);

    h.transport.set_unavailable(false);
    let now = Utc::now();
    h.courier
        .reschedule(&id, now - ChronoDuration::minutes(1), now + ChronoDuration::hours(1))
        .await
        .unwrap();

    let result = h.courier.execute(&id).await.unwrap();
    assert_eq!(result.status, MailingStatus::Completed);
    assert_eq!(result.succeeded, 2);
    assert_eq!(h.transport.call_count(), 2);
}

#[tokio::test]
async fn test_run_due_sweeps_missed_windows() {
    let h = harness(&["a@example.com"], MockTransport::new()).await;
    let id = h.scheduled_mailing().await;

    // Two hours later the one-hour window has closed without a run.
    let report = h
        .courier
        .run_due_at(Utc::now() + ChronoDuration::hours(2))
        .await
        .unwrap();
    assert_eq!(report.expired, vec![id.clone()]);
    assert!(report.executed.is_empty());

    let overview = h.courier.status(&id).await.unwrap();
    assert_eq!(overview.mailing.status, MailingStatus::Failed);
    assert_eq!(
        overview.mailing.failure_reason,
        Some(FailureReason::WindowMissed)
    );

    let error = h.courier.execute(&id).await.unwrap_err();
    assert!(error.is_dispatch_error());
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test]
async fn test_run_due_executes_due_mailings() {
    let h = harness(&["a@example.com", "b@example.com"], MockTransport::new()).await;
    let first = h.scheduled_mailing().await;
    let second = h.scheduled_mailing().await;

    let report = h.courier.run_due().await.unwrap();
    assert_eq!(report.executed.len(), 2);
    assert!(report.errors.is_empty());

    for id in [&first, &second] {
        let overview = h.courier.status(id).await.unwrap();
        assert_eq!(overview.mailing.status, MailingStatus::Completed);
    }
    // Both mailings reach both recipients.
    assert_eq!(h.transport.calls_to("a@example.com"), 2);

    let report = h.courier.run_due().await.unwrap();
    assert!(report.executed.is_empty());
}

#[tokio::test]
async fn test_force_finish_and_delete() {
    let h = harness(&["a@example.com"], MockTransport::new()).await;
    let id = h.scheduled_mailing().await;

    let mailing = h
        .courier
        .force_finish(&id, FinalStatus::Failed)
        .await
        .unwrap();
    assert_eq!(mailing.status, MailingStatus::Failed);
    assert_eq!(mailing.failure_reason, Some(FailureReason::Cancelled));

    let error = h.courier.execute(&id).await.unwrap_err();
    assert!(error.is_dispatch_error());

    h.courier.delete_mailing(&id).await.unwrap();
    let missing = h.courier.status(&id).await.unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_manual_execute_waits_for_window_to_open() {
    let h = harness(&["a@example.com"], MockTransport::new()).await;
    let id = h.scheduled_mailing().await;

    // Move the window an hour into the future.
    h.courier.force_finish(&id, FinalStatus::Failed).await.unwrap();
    let now = Utc::now();
    h.courier
        .reschedule(&id, now + ChronoDuration::hours(1), now + ChronoDuration::hours(2))
        .await
        .unwrap();

    let error = h.courier.execute_in_window(&id).await.unwrap_err();
    assert!(error.is_dispatch_error());
    assert_eq!(h.transport.call_count(), 0);

    let overview = h.courier.status(&id).await.unwrap();
    assert_eq!(overview.mailing.status, MailingStatus::Scheduled);
    assert_eq!(overview.latest.attempted, 0);
}

#[tokio::test]
async fn test_manual_execute_runs_open_window() {
    let h = harness(&["a@example.com"], MockTransport::new()).await;
    let id = h.scheduled_mailing().await;

    let result = h.courier.execute_in_window(&id).await.unwrap();
    assert_eq!(result.status, MailingStatus::Completed);
    assert_eq!(h.transport.calls_to("a@example.com"), 1);
}
