mod file;
mod mock;
pub mod smtp;

pub use file::FileTransport;
pub use mock::MockTransport;
pub use smtp::{SmtpSettings, SmtpTransport, TlsConfig};
