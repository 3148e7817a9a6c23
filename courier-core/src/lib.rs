//! Core functionality for the courier campaign dispatch engine
//!
//! This crate holds the data model ([`Recipient`], [`MessageTemplate`],
//! [`Mailing`], [`Attempt`]), the error taxonomy, the repository traits storage
//! backends implement, and the services built on top of them:
//!
//! - [`services::DispatchService`] sends one mailing to its recipient set and
//!   drives the mailing status machine
//! - [`services::SchedulerService`] finds due mailings and fails expired ones
//! - [`services::StatisticsService`] folds attempt history into per-owner counts
//!
//! Storage backends live in their own crates (see `courier-storage-sqlite`);
//! delivery transports come from `courier-mailer`.
pub mod attempt;
pub mod error;
pub mod id;
pub mod mailing;
pub mod recipient;
pub mod repositories;
pub mod services;
pub mod template;
pub mod validation;

pub use attempt::{
    Attempt, AttemptId, AttemptOutcome, ExecutionResult, FailureKind, NewAttempt, Reservation,
};
pub use error::{DispatchError, Error, StorageError, ValidationError};
pub use mailing::{
    FailureReason, FinalStatus, Mailing, MailingId, MailingStatus, MailingUpdate, NewMailing,
    NewMailingBuilder,
};
pub use recipient::{NewRecipient, NewRecipientBuilder, OwnerId, Recipient, RecipientId};
pub use template::{MessageTemplate, NewTemplate, TemplateId};
