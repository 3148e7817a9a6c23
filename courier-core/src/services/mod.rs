//! Service layer for business logic
//!
//! Services are generic over the repository traits and hold them in `Arc`s,
//! so they can be shared across tasks.

pub mod dispatch;
pub mod mailing;
pub mod recipient;
pub mod scheduler;
pub mod statistics;
pub mod template;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{DispatchConfig, DispatchService};
pub use mailing::{MailingOverview, MailingService};
pub use recipient::{RecipientService, RecipientUpdate};
pub use scheduler::{DueMailings, SchedulerConfig, SchedulerService, TickReport};
pub use statistics::{MailingReport, OwnerSummary, StatisticsService};
pub use template::TemplateService;
