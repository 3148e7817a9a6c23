//! Reusable message bodies. The body is sent verbatim; there is no templating.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OwnerId, id::prefixed_id};

prefixed_id!(
    /// A unique, stable identifier for a message template
    TemplateId,
    "tpl"
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: TemplateId,
    pub subject: String,
    pub body: String,
    pub owner_id: OwnerId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub id: TemplateId,
    pub subject: String,
    pub body: String,
    pub owner_id: OwnerId,
}

impl NewTemplate {
    pub fn new(owner_id: OwnerId, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: TemplateId::new_random(),
            subject: subject.into(),
            body: body.into(),
            owner_id,
        }
    }
}
