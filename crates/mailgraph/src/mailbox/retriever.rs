//! Pulls new messages from the mailbox into the thread folder tree.

use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};
use tracing::{info_span, Instrument};

use super::body::{
    body_file_name, decode_base64url, extract_body_text, sanitize_filename, strip_quoted_history,
};
use super::client::MailboxApi;
use super::error::{MailboxError, Result};
use super::ledger::{NewMessageLog, ThreadLedger};
use super::types::{Message, MessageMetadata, MessagePart};
use crate::config::MailboxConfig;
use crate::error::StorageError;
use crate::storage::{write_file, write_new_file, DataDir};

/// Outcome of one retrieval pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetrievalReport {
    pub threads_seen: usize,
    pub threads_failed: usize,
    pub messages_saved: Vec<String>,
    pub messages_skipped: usize,
}

enum MessageOutcome {
    Saved,
    SkippedLabel,
}

pub struct MailRetriever<A: MailboxApi> {
    api: A,
    data: DataDir,
    category_label: String,
    list_label_ids: Vec<String>,
    max_threads: u32,
}

impl<A: MailboxApi> MailRetriever<A> {
    pub fn new(api: A, data: DataDir, config: &MailboxConfig) -> Self {
        Self {
            api,
            data,
            category_label: config.category_label.clone(),
            list_label_ids: config.list_label_ids.clone(),
            max_threads: config.max_threads,
        }
    }

    /// Lists the most recent threads and saves every message that carries the
    /// category label and is not yet in the thread ledger. A failure inside a
    /// thread abandons the rest of that thread for this pass only.
    pub async fn retrieve_emails(&self) -> Result<RetrievalReport> {
        let span = info_span!("retrieve_emails", max_threads = self.max_threads);
        self.retrieve_all().instrument(span).await
    }

    async fn retrieve_all(&self) -> Result<RetrievalReport> {
        let mut ledger = ThreadLedger::load(self.data.threads_metadata_path())?;
        let new_log = NewMessageLog::new(self.data.new_emails_path());
        let mut report = RetrievalReport::default();

        let threads = self
            .api
            .list_threads(&self.list_label_ids, self.max_threads)
            .await?;
        info!("Listed {} threads", threads.len());

        for thread_ref in threads {
            report.threads_seen += 1;
            ledger.touch(&thread_ref.id);

            if let Err(e) = self
                .retrieve_thread(&thread_ref.id, &mut ledger, &new_log, &mut report)
                .await
            {
                report.threads_failed += 1;
                warn!("Abandoning thread {} for this pass: {}", thread_ref.id, e);
            }

            ledger.save()?;
        }

        info!(
            "Retrieval finished: {} new messages, {} skipped, {} threads failed",
            report.messages_saved.len(),
            report.messages_skipped,
            report.threads_failed
        );
        Ok(report)
    }

    async fn retrieve_thread(
        &self,
        thread_id: &str,
        ledger: &mut ThreadLedger,
        new_log: &NewMessageLog,
        report: &mut RetrievalReport,
    ) -> Result<()> {
        let thread = self.api.get_thread(thread_id).await?;

        for message in &thread.messages {
            if ledger.is_recorded(thread_id, &message.id) {
                continue;
            }

            match self.save_message(thread_id, message).await? {
                MessageOutcome::Saved => {
                    // the ledger marks the id done, so it must only follow a
                    // successful hand-off to the upload queue
                    new_log.append(&message.id)?;
                    ledger.record(thread_id, &message.id);
                    report.messages_saved.push(message.id.clone());
                }
                MessageOutcome::SkippedLabel => {
                    debug!(
                        "Skipping message {}: no {} label",
                        message.id, self.category_label
                    );
                    report.messages_skipped += 1;
                }
            }
        }

        Ok(())
    }

    async fn save_message(&self, thread_id: &str, message: &Message) -> Result<MessageOutcome> {
        if !message.has_label(&self.category_label) {
            return Ok(MessageOutcome::SkippedLabel);
        }

        let dir = self.data.message_dir(thread_id, &message.id);
        // Leftovers from an attempt that failed before the ledger was updated.
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| StorageError::RemoveFile {
                path: dir.clone(),
                source: e,
            })?;
        }

        let metadata = message_metadata(message);
        let metadata_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| MailboxError::Decode(format!("failed to serialize metadata: {}", e)))?;
        write_file(&dir.join("metadata.json"), &metadata_json)?;

        if let Some(payload) = &message.payload {
            match extract_body_text(payload)? {
                Some(text) => {
                    let name = body_file_name(
                        message.header("From").unwrap_or_default(),
                        message.header("Subject").unwrap_or_default(),
                    );
                    write_file(&dir.join(name), strip_quoted_history(&text).as_bytes())?;
                }
                None => debug!("Message {} has no text body", message.id),
            }

            for part in attachment_parts(payload) {
                let bytes = match part.body.as_ref() {
                    Some(body) if body.attachment_id.is_some() => {
                        let attachment_id = body.attachment_id.as_deref().unwrap_or_default();
                        self.api.get_attachment(&message.id, attachment_id).await?
                    }
                    Some(body) if body.data.is_some() => {
                        decode_base64url(body.data.as_deref().unwrap_or_default())?
                    }
                    _ => continue,
                };
                let path = write_new_file(&dir, &sanitize_filename(&part.filename), &bytes)?;
                debug!("Attachment {} saved", crate::sanitize::redact_path(&path));
            }
        }

        Ok(MessageOutcome::Saved)
    }
}

/// Parts with a file name, depth-first.
fn attachment_parts(part: &MessagePart) -> Vec<&MessagePart> {
    let mut found = Vec::new();
    collect_attachments(part, &mut found);
    found
}

fn collect_attachments<'a>(part: &'a MessagePart, found: &mut Vec<&'a MessagePart>) {
    if !part.filename.is_empty() {
        found.push(part);
    }
    for child in &part.parts {
        collect_attachments(child, found);
    }
}

fn message_metadata(message: &Message) -> MessageMetadata {
    let internal_date = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        });

    MessageMetadata {
        id: message.id.clone(),
        snippet: message.snippet.clone(),
        history_id: message.history_id.clone(),
        internal_date,
        size_estimate: message.size_estimate,
        thread_id: message.thread_id.clone(),
        label_ids: message.label_ids.clone(),
        headers: message.headers(),
    }
}
