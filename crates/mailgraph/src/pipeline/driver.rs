use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{info_span, Instrument};

use super::connector::{GmailConnector, MailboxConnector};
use super::state::{CycleReport, DriverState};
use crate::config::{Config, MailboxConfig};
use crate::error::{Result, StorageError};
use crate::ingest::{
    ChunkedUploader, DbCredentials, ExtractionTrigger, IngestApi, IngestClient, UploadOutcome,
};
use crate::mailbox::{MailRetriever, NewMessageLog, TokenStore};
use crate::processor::{OcrEngine, OcrNormalizer, TesseractEngine};
use crate::sanitize::redact_path;
use crate::storage::{move_into, DataDir};

/// External collaborators of the driver.
pub struct DriverComponents {
    pub mailbox: Arc<dyn MailboxConnector>,
    /// `None` disables OCR normalization.
    pub ocr: Option<Arc<dyn OcrEngine>>,
    pub ingest: Arc<dyn IngestApi>,
}

/// Runs the retrieve, normalize, upload and extract cycle. Cycles never
/// overlap.
pub struct PollingDriver {
    data: DataDir,
    mailbox: Arc<dyn MailboxConnector>,
    mailbox_config: MailboxConfig,
    normalizer: Option<Arc<OcrNormalizer>>,
    uploader: ChunkedUploader,
    trigger: ExtractionTrigger,
    credentials: DbCredentials,
    interval: Duration,
    state: DriverState,
}

impl PollingDriver {
    pub fn new(config: &Config, data: DataDir, components: DriverComponents) -> Result<Self> {
        let normalizer = components
            .ocr
            .map(|engine| Arc::new(OcrNormalizer::new(engine, &config.ocr)));

        Ok(Self {
            data,
            mailbox: components.mailbox,
            mailbox_config: config.mailbox.clone(),
            normalizer,
            uploader: ChunkedUploader::new(Arc::clone(&components.ingest), &config.ingest),
            trigger: ExtractionTrigger::new(
                components.ingest,
                &config.ingest,
                config.ontology.clone(),
            ),
            credentials: DbCredentials::from_config(&config.graph_db)?,
            interval: Duration::from_secs(config.poll_interval_secs.max(1)),
            state: DriverState::Idle,
        })
    }

    /// Production wiring: Gmail, Tesseract and the HTTP ingestion service.
    pub fn from_config(
        config: &Config,
        data: DataDir,
        tokens: Arc<TokenStore>,
        redirect_uri: String,
    ) -> Result<Self> {
        let mailbox = GmailConnector::new(data.clone(), tokens, &config.mailbox, redirect_uri);
        let ocr: Option<Arc<dyn OcrEngine>> = if config.ocr.enabled {
            Some(Arc::new(TesseractEngine::new(&config.ocr.languages)))
        } else {
            None
        };
        let ingest = IngestClient::new(&config.ingest.server_url)?;

        Self::new(
            config,
            data,
            DriverComponents {
                mailbox: Arc::new(mailbox),
                ocr,
                ingest: Arc::new(ingest),
            },
        )
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn set_state(&mut self, state: DriverState) {
        if self.state != state {
            debug!("Driver {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Runs cycles until `shutdown` is set. `wake` starts the next cycle early.
    pub async fn run_forever(&mut self, shutdown: Arc<AtomicBool>, wake: Arc<Notify>) {
        info!(
            "Polling every {}s (data dir {})",
            self.interval.as_secs(),
            redact_path(self.data.root())
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = wake.notified() => debug!("Cycle requested"),
            }
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            if let Err(e) = self.run_cycle().await {
                error!("Cycle failed: {}", e);
            }

            if shutdown.load(Ordering::SeqCst) {
                break;
            }
        }
        info!("Polling stopped");
    }

    /// One full cycle. The driver is back in `Idle` afterwards, whatever the
    /// outcome.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let span = info_span!("cycle");
        let result = self.cycle().instrument(span).await;
        self.set_state(DriverState::Idle);
        result
    }

    async fn cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        let new_messages = NewMessageLog::new(self.data.new_emails_path());
        self.data.ensure_layout()?;

        self.set_state(DriverState::Retrieving);
        match self.mailbox.connect().await {
            Ok(Some(api)) => {
                let retriever = MailRetriever::new(api, self.data.clone(), &self.mailbox_config);
                match retriever.retrieve_emails().await {
                    Ok(retrieval) => report.messages_retrieved = retrieval.messages_saved.len(),
                    Err(e) => warn!("Retrieval failed: {}", e),
                }
            }
            Ok(None) => {
                info!("Mailbox not authorized yet, skipping retrieval");
                report.mailbox_skipped = true;
            }
            Err(e) => warn!("Could not open mailbox session: {}", e),
        }

        let message_dirs: Vec<PathBuf> = if report.mailbox_skipped {
            Vec::new()
        } else {
            new_messages
                .read_ids()?
                .iter()
                .filter_map(|id| {
                    let dir = self.data.find_message_dir(id);
                    if dir.is_none() {
                        warn!("No folder found for message {}", id);
                    }
                    dir
                })
                .collect()
        };
        let inbox = self.data.ocr_inbox();

        self.set_state(DriverState::OcrNormalizing);
        for dir in message_dirs.iter().chain(std::iter::once(&inbox)) {
            report.documents_converted += self.normalize(dir).await;
        }

        let mut message_files = Vec::new();
        for dir in &message_dirs {
            message_files.extend(top_level_text_files(dir)?);
        }
        for file in &message_files {
            self.send(file, &mut report).await;
        }
        // pending ids are done once their files went out, whatever the inbox does
        if !report.mailbox_skipped {
            new_messages.clear()?;
        }

        if let Err(e) = self.send_inbox(&inbox, &mut report).await {
            warn!("OCR inbox left for the next cycle: {}", e);
        }

        info!(
            "Cycle done: {} retrieved, {} converted, {} uploaded ({} failed), {} extracted ({} failed)",
            report.messages_retrieved,
            report.documents_converted,
            report.files_uploaded,
            report.uploads_failed,
            report.extractions_succeeded,
            report.extractions_failed
        );
        Ok(report)
    }

    /// Sends the inbox text files and moves each completed one to
    /// `processed/`.
    async fn send_inbox(
        &mut self,
        inbox: &Path,
        report: &mut CycleReport,
    ) -> std::result::Result<(), StorageError> {
        let processed = self.data.ocr_processed_dir();
        for file in top_level_text_files(inbox)? {
            if self.send(&file, report).await {
                move_into(&file, &processed)?;
            }
        }
        Ok(())
    }

    async fn normalize(&self, dir: &Path) -> usize {
        let Some(normalizer) = self.normalizer.clone() else {
            return 0;
        };
        let dir = dir.to_path_buf();
        match tokio::task::spawn_blocking(move || normalizer.normalize_dir(&dir)).await {
            Ok(normalized) => normalized.converted.len(),
            Err(e) => {
                error!("OCR task failed: {}", e);
                0
            }
        }
    }

    /// Uploads one text file and triggers its extraction. Returns whether the
    /// upload completed.
    async fn send(&mut self, path: &Path, report: &mut CycleReport) -> bool {
        self.set_state(DriverState::Uploading);
        match self.uploader.upload(path, &self.credentials).await {
            Ok(UploadOutcome::Completed { .. }) => report.files_uploaded += 1,
            Ok(UploadOutcome::Rejected { .. }) => {
                report.uploads_failed += 1;
                return false;
            }
            Err(e) => {
                warn!("Upload of {} failed: {}", redact_path(path), e);
                report.uploads_failed += 1;
                return false;
            }
        }

        self.set_state(DriverState::Extracting);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self
            .trigger
            .extract_after_settling(&file_name, &self.credentials)
            .await
        {
            Ok(_) => report.extractions_succeeded += 1,
            Err(_) => report.extractions_failed += 1,
        }
        true
    }
}

/// `.txt` files directly inside `dir`, sorted by name.
fn top_level_text_files(dir: &Path) -> std::result::Result<Vec<PathBuf>, StorageError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).map_err(|e| StorageError::ReadFile {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
        })
        .collect();
    files.sort();
    Ok(files)
}
