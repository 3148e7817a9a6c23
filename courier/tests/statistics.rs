//! Owner statistics and the statistics cache

use std::sync::Arc;

use chrono::{Duration, Utc};
use courier::{
    Courier, CourierBuilder, MockTransport, NewMailing, NewRecipient, NewTemplate, OwnerId,
    RecipientId, SqliteRepositoryProvider, TransportError,
};

async fn courier(transport: Arc<MockTransport>) -> Courier<SqliteRepositoryProvider> {
    let _ = tracing_subscriber::fmt::try_init();
    CourierBuilder::new()
        .with_sqlite("sqlite::memory:")
        .await
        .unwrap()
        .with_transport(transport)
        .apply_migrations(true)
        .build()
        .await
        .unwrap()
}

async fn add_recipient(
    courier: &Courier<SqliteRepositoryProvider>,
    owner: &OwnerId,
    email: &str,
) -> RecipientId {
    courier
        .create_recipient(
            NewRecipient::builder()
                .email(email)
                .owner_id(owner.clone())
                .build()
                .unwrap(),
        )
        .await
        .unwrap()
        .id
}

async fn send_mailing(
    courier: &Courier<SqliteRepositoryProvider>,
    owner: &OwnerId,
    recipients: Vec<RecipientId>,
) {
    let template = courier
        .create_template(NewTemplate::new(owner.clone(), "Weekly digest", "Hello"))
        .await
        .unwrap();
    let now = Utc::now();
    let mailing = courier
        .create_mailing(
            NewMailing::builder()
                .template_id(template.id)
                .owner_id(owner.clone())
                .recipients(recipients)
                .window(now - Duration::minutes(5), now + Duration::hours(1))
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    courier.schedule(&mailing.id).await.unwrap();
    courier.execute(&mailing.id).await.unwrap();
}

#[tokio::test]
async fn test_stats_count_unique_recipients_across_mailings() {
    let transport = Arc::new(MockTransport::new());
    let courier = courier(transport.clone()).await;
    let owner = OwnerId::new_random();

    let alice = add_recipient(&courier, &owner, "alice@example.com").await;
    let bob = add_recipient(&courier, &owner, "bob@example.com").await;
    let carol = add_recipient(&courier, &owner, "carol@example.com").await;
    transport.fail_address(
        "carol@example.com",
        TransportError::AddressRejected("550 mailbox unavailable".to_string()),
    );

    send_mailing(&courier, &owner, vec![alice.clone(), bob.clone()]).await;
    send_mailing(&courier, &owner, vec![alice, bob, carol]).await;

    let summary = courier.stats(&owner).await.unwrap();
    assert_eq!(summary.mailings_count, 2);
    assert_eq!(summary.in_progress_count, 0);
    assert_eq!(summary.recipients_count, 3);
    assert_eq!(summary.unique_recipients_reached, 2);
    assert_eq!(summary.total_success, 4);
    assert_eq!(summary.total_failure, 1);
}

#[tokio::test]
async fn test_stats_are_isolated_per_owner() {
    let transport = Arc::new(MockTransport::new());
    let courier = courier(transport).await;
    let owner = OwnerId::new_random();
    let other = OwnerId::new_random();

    let alice = add_recipient(&courier, &owner, "alice@example.com").await;
    send_mailing(&courier, &owner, vec![alice]).await;

    let summary = courier.stats(&other).await.unwrap();
    assert_eq!(summary.mailings_count, 0);
    assert_eq!(summary.total_success, 0);
}

#[tokio::test]
async fn test_cached_stats_refresh_after_commands() {
    let transport = Arc::new(MockTransport::new());
    let courier = courier(transport).await;
    let owner = OwnerId::new_random();

    add_recipient(&courier, &owner, "alice@example.com").await;
    assert_eq!(courier.stats(&owner).await.unwrap().recipients_count, 1);

    // Writes that bypass the Courier commands are not seen until the entry
    // is invalidated or expires.
    courier
        .recipients()
        .create_recipient(
            NewRecipient::builder()
                .email("bob@example.com")
                .owner_id(owner.clone())
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(courier.stats(&owner).await.unwrap().recipients_count, 1);

    add_recipient(&courier, &owner, "carol@example.com").await;
    assert_eq!(courier.stats(&owner).await.unwrap().recipients_count, 3);

    // Executing a mailing drops the owner's entry too.
    let dave = add_recipient(&courier, &owner, "dave@example.com").await;
    assert_eq!(courier.stats(&owner).await.unwrap().total_success, 0);
    send_mailing(&courier, &owner, vec![dave]).await;
    assert_eq!(courier.stats(&owner).await.unwrap().total_success, 1);
}
