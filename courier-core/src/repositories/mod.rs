//! Storage contracts for courier.
//!
//! Services never see a database. Each entity has a `*Repository` trait, each
//! repository is reached through a `*RepositoryProvider`, and a backend
//! implements [`RepositoryProvider`] to hand all four over at once.
//!
//! The persistence contract the dispatch engine relies on is small: atomic
//! compare-and-set on mailing status ([`MailingRepository::claim`],
//! [`MailingRepository::transition`]) and insert-or-detect-duplicate on
//! attempts and reservations ([`AttemptRepository::record`],
//! [`AttemptRepository::reserve`]).

pub mod adapter;
pub mod attempt;
pub mod mailing;
pub mod recipient;
pub mod template;

#[cfg(test)]
pub(crate) mod memory;

pub use adapter::{
    AttemptRepositoryAdapter, MailingRepositoryAdapter, RecipientRepositoryAdapter,
    TemplateRepositoryAdapter,
};
pub use attempt::AttemptRepository;
pub use mailing::{MailingRepository, StatusChange};
pub use recipient::RecipientRepository;
pub use template::TemplateRepository;

use async_trait::async_trait;

use crate::Error;

/// Access to the recipient directory of a backend.
pub trait RecipientRepositoryProvider: Send + Sync + 'static {
    type RecipientRepo: RecipientRepository;

    fn recipient(&self) -> &Self::RecipientRepo;
}

pub trait TemplateRepositoryProvider: Send + Sync + 'static {
    type TemplateRepo: TemplateRepository;

    fn template(&self) -> &Self::TemplateRepo;
}

pub trait MailingRepositoryProvider: Send + Sync + 'static {
    type MailingRepo: MailingRepository;

    fn mailing(&self) -> &Self::MailingRepo;
}

/// Access to the attempt log and recipient reservations of a backend.
pub trait AttemptRepositoryProvider: Send + Sync + 'static {
    type AttemptRepo: AttemptRepository;

    fn attempt(&self) -> &Self::AttemptRepo;
}

/// Everything a storage backend provides, plus its lifecycle.
///
/// The SQLite backend in `courier-storage-sqlite` is the reference
/// implementation; tests use an in-memory store.
#[async_trait]
pub trait RepositoryProvider:
    RecipientRepositoryProvider
    + TemplateRepositoryProvider
    + MailingRepositoryProvider
    + AttemptRepositoryProvider
{
    /// Bring the schema up to date. Safe to call on every start.
    async fn migrate(&self) -> Result<(), Error>;

    /// Cheap round trip to the backend.
    async fn health_check(&self) -> Result<(), Error>;
}
