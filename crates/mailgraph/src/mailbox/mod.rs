//! Mailbox retrieval.
//!
//! Polls a Gmail mailbox over its REST API, saves new messages of the target
//! category into `threads/<thread_id>/<message_id>/`, and keeps the ledgers
//! that make repeated polling idempotent.

pub mod body;
pub mod client;
pub mod error;
pub mod ledger;
pub mod oauth;
pub mod retriever;
pub mod types;

pub use client::{GmailClient, MailboxApi};
pub use error::MailboxError;
pub use ledger::{NewMessageLog, ThreadLedger, ThreadRecord};
pub use oauth::{fresh_access_token, ClientSecrets, OAuthClient, StoredToken, TokenStore};
pub use retriever::{MailRetriever, RetrievalReport};
