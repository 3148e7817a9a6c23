//! Recipients ("clients") an owner can address in mailings.
//!
//! | Field          | Type             | Description                                |
//! | -------------- | ---------------- | ------------------------------------------ |
//! | `id`           | `RecipientId`    | Unique identifier.                         |
//! | `email`        | `String`         | Delivery address, unique across the store. |
//! | `display_name` | `String`         | Name shown in reports.                     |
//! | `owner_id`     | `OwnerId`        | The external user that owns the record.    |
//! | `note`         | `Option<String>` | Free-form comment.                         |
//!
//! Attempts keep a copy of the email they were sent to, so editing a recipient
//! only affects future mailings.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, error::ValidationError, id::prefixed_id};

prefixed_id!(
    /// Opaque identifier of the external user owning records. Never interpreted.
    OwnerId,
    "own"
);

prefixed_id!(
    /// A unique, stable identifier for a recipient
    RecipientId,
    "rcp"
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub email: String,
    pub display_name: String,
    pub owner_id: OwnerId,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRecipient {
    pub id: RecipientId,
    pub email: String,
    pub display_name: String,
    pub owner_id: OwnerId,
    pub note: Option<String>,
}

impl NewRecipient {
    pub fn builder() -> NewRecipientBuilder {
        NewRecipientBuilder::default()
    }
}

#[derive(Default)]
pub struct NewRecipientBuilder {
    id: Option<RecipientId>,
    email: Option<String>,
    display_name: Option<String>,
    owner_id: Option<OwnerId>,
    note: Option<String>,
}

impl NewRecipientBuilder {
    pub fn id(mut self, id: RecipientId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn owner_id(mut self, owner_id: OwnerId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn build(self) -> Result<NewRecipient, Error> {
        let email = self.email.ok_or(ValidationError::MissingField(
            "Email is required".to_string(),
        ))?;
        Ok(NewRecipient {
            id: self.id.unwrap_or_else(RecipientId::new_random),
            display_name: self.display_name.unwrap_or_else(|| email.clone()),
            email,
            owner_id: self.owner_id.ok_or(ValidationError::MissingField(
                "Owner is required".to_string(),
            ))?,
            note: self.note.filter(|note| !note.trim().is_empty()),
        })
    }
}
