//! Fixtures shared by the service tests.
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::{
    Mailing, MailingStatus, NewMailing, NewRecipient, NewTemplate, OwnerId, Recipient,
    repositories::{
        MailingRepository, RecipientRepository, StatusChange, TemplateRepository,
        memory::MemoryStore,
    },
};

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub owner: OwnerId,
    pub recipients: Vec<Recipient>,
    pub template_id: crate::TemplateId,
}

impl Fixture {
    /// An owner with one template and one recipient per email.
    pub async fn with_recipients(emails: &[&str]) -> Self {
        let _ = tracing_subscriber::fmt().try_init();
        let store = Arc::new(MemoryStore::new());
        let owner = OwnerId::new_random();

        let template = TemplateRepository::create(
            &*store,
            NewTemplate::new(owner.clone(), "Spring sale", "Everything must go"),
        )
        .await
        .unwrap();

        let mut recipients = Vec::new();
        for email in emails {
            let recipient = RecipientRepository::create(
                &*store,
                NewRecipient::builder()
                    .email(*email)
                    .owner_id(owner.clone())
                    .build()
                    .unwrap(),
            )
            .await
            .unwrap();
            recipients.push(recipient);
        }

        Self {
            store,
            owner,
            recipients,
            template_id: template.id,
        }
    }

    /// A mailing to every fixture recipient, left in `Created`.
    pub async fn created_mailing(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Mailing {
        let new = NewMailing::builder()
            .template_id(self.template_id.clone())
            .owner_id(self.owner.clone())
            .recipients(self.recipients.iter().map(|r| r.id.clone()))
            .window(start, end)
            .build()
            .unwrap();
        MailingRepository::create(&*self.store, new).await.unwrap()
    }

    pub async fn mailing(&self, id: &crate::MailingId) -> Mailing {
        MailingRepository::find_by_id(&*self.store, id)
            .await
            .unwrap()
            .unwrap()
    }

    /// A mailing to every fixture recipient whose window is open now.
    pub async fn scheduled_mailing(&self) -> Mailing {
        let now = Utc::now();
        self.scheduled_mailing_in(now - Duration::minutes(5), now + Duration::hours(1))
            .await
    }

    pub async fn scheduled_mailing_in(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Mailing {
        let mailing = self.created_mailing(start, end).await;
        self.store
            .transition(
                &mailing.id,
                MailingStatus::Created,
                StatusChange::to(MailingStatus::Scheduled),
            )
            .await
            .unwrap()
            .unwrap()
    }
}
