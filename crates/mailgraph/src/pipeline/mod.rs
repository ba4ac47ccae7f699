//! The polling driver that ties retrieval, OCR and ingestion together.

pub mod connector;
pub mod driver;
pub mod state;

pub use connector::{GmailConnector, MailboxConnector};
pub use driver::{DriverComponents, PollingDriver};
pub use state::{CycleReport, DriverState};
