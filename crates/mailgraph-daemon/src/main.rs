//! mailgraph daemon
//!
//! Polls the mailbox, normalizes scanned documents and hands text to the
//! knowledge-graph ingestion service. Individual stages are exposed as
//! subcommands for manual runs.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::{watch, Notify};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use mailgraph::config::{Config, ServerConfig};
use mailgraph::graph::GraphExtractor;
use mailgraph::ingest::{
    ChunkedUploader, DbCredentials, ExtractionTrigger, IngestApi, IngestClient, UploadOutcome,
};
use mailgraph::mailbox::{MailRetriever, TokenStore};
use mailgraph::pipeline::{GmailConnector, MailboxConnector, PollingDriver};
use mailgraph::processor::{OcrNormalizer, TesseractEngine};
use mailgraph::server::{self, AppState};
use mailgraph::{load_effective_config, DataDir, TokenEncryptor};

#[derive(Parser)]
#[command(name = "mailgraph")]
#[command(version)]
#[command(about = "Mailbox to knowledge-graph ingestion pipeline", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to $MAILGRAPH_CONFIG, then ./mailgraph.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the authorization server and the polling loop
    Run,

    /// Run a single polling cycle and exit
    Once,

    /// Run only the authorization and upload server
    Serve,

    /// Retrieve new messages without processing them
    Retrieve,

    /// Replace scanned documents under a directory with text files
    Ocr {
        /// Directory to normalize (recursively)
        dir: PathBuf,
    },

    /// Upload a text file to the ingestion service in chunks
    Upload {
        /// File to upload
        file: PathBuf,
    },

    /// Trigger extraction for a previously uploaded file
    Extract {
        /// Name of the uploaded file
        file_name: String,
    },

    /// Extract a knowledge graph locally and print it as JSON
    Graph {
        /// Text file to extract from
        file: PathBuf,

        /// Model id (defaults to the configured ingestion model)
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Print the effective configuration with secrets redacted
    Config,
}

fn init_logging(json: bool) -> Result<()> {
    tracing_log::LogTracer::init().context("Failed to bridge log records")?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))?;
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(false)))?;
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.log_json) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_effective_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => print_config(&config),
        Commands::Ocr { dir } => normalize(&config, &dir),
        Commands::Graph { file, model } => extract_graph(&config, &file, model),
        command => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            let daemon = Daemon::new(config)?;
            runtime.block_on(daemon.dispatch(command))
        }
    }
}

fn print_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

fn normalize(config: &Config, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("'{}' is not a directory", dir.display());
    }
    let engine = Arc::new(TesseractEngine::new(&config.ocr.languages));
    let report = OcrNormalizer::new(engine, &config.ocr).normalize_dir(dir);

    for path in &report.converted {
        println!("{}", path.display());
    }
    info!(
        "{} converted, {} without text, {} failed",
        report.converted.len(),
        report.no_text.len(),
        report.failed.len()
    );
    Ok(())
}

fn extract_graph(config: &Config, file: &Path, model: Option<String>) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read '{}'", file.display()))?;
    let model = model.unwrap_or_else(|| config.ingest.model.clone());
    let source = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let extractor = GraphExtractor::for_model(&model, &config.extraction, config.ontology.clone())?;
    let extraction = extractor.extract(&source, &text)?;
    if extraction.failed > 0 {
        warn!("{} requests produced no graph", extraction.failed);
    }
    println!("{}", serde_json::to_string_pretty(&extraction.documents)?);
    Ok(())
}

/// Shared state of the commands that talk to the mailbox or the ingestion
/// service.
struct Daemon {
    config: Config,
    data: DataDir,
    tokens: Arc<TokenStore>,
    redirect_uri: String,
}

impl Daemon {
    fn new(config: Config) -> Result<Self> {
        let data = DataDir::new(config.data_dir_path());
        data.ensure_layout()?;
        let tokens = Arc::new(TokenStore::new(
            data.token_path(),
            TokenEncryptor::from_env_optional()?,
        ));
        let redirect_uri = server::redirect_uri(&config.server, &config.mailbox.oauth);

        Ok(Self {
            config,
            data,
            tokens,
            redirect_uri,
        })
    }

    async fn dispatch(self, command: Commands) -> Result<()> {
        match command {
            Commands::Run => self.run_daemon().await,
            Commands::Once => self.run_once().await,
            Commands::Serve => self.serve().await,
            Commands::Retrieve => self.retrieve().await,
            Commands::Upload { file } => self.upload(&file).await,
            Commands::Extract { file_name } => self.extract(&file_name).await,
            Commands::Config | Commands::Ocr { .. } | Commands::Graph { .. } => {
                Err(anyhow!("command does not need the async runtime"))
            }
        }
    }

    fn app_state(&self, wake: Arc<Notify>) -> AppState {
        AppState::new(
            self.data.clone(),
            self.config.mailbox.oauth.clone(),
            self.redirect_uri.clone(),
            Arc::clone(&self.tokens),
            wake,
        )
        .with_upload_limit(self.config.server.max_upload_bytes)
    }

    async fn run_daemon(self) -> Result<()> {
        let _lock = self.data.lock()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let stopped = install_ctrlc(Arc::clone(&shutdown), Arc::clone(&wake))?;

        let addr = server_addr(&self.config.server)?;
        let state = self.app_state(Arc::clone(&wake));
        let server = tokio::spawn(async move {
            if let Err(e) = server::serve(state, addr, wait_for(stopped)).await {
                error!("HTTP server stopped: {}", e);
            }
        });

        let mut driver = PollingDriver::from_config(
            &self.config,
            self.data.clone(),
            Arc::clone(&self.tokens),
            self.redirect_uri.clone(),
        )?;
        driver.run_forever(shutdown, wake).await;

        server.await.context("HTTP server task panicked")?;
        Ok(())
    }

    async fn run_once(self) -> Result<()> {
        let _lock = self.data.lock()?;
        let mut driver = PollingDriver::from_config(
            &self.config,
            self.data.clone(),
            Arc::clone(&self.tokens),
            self.redirect_uri.clone(),
        )?;
        let report = driver.run_cycle().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }

    async fn serve(self) -> Result<()> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let wake = Arc::new(Notify::new());
        let stopped = install_ctrlc(shutdown, Arc::clone(&wake))?;

        let addr = server_addr(&self.config.server)?;
        info!("Open http://{}/generate_token to authorize the mailbox", addr);
        server::serve(self.app_state(wake), addr, wait_for(stopped)).await?;
        Ok(())
    }

    async fn retrieve(self) -> Result<()> {
        let _lock = self.data.lock()?;
        let connector = GmailConnector::new(
            self.data.clone(),
            Arc::clone(&self.tokens),
            &self.config.mailbox,
            self.redirect_uri.clone(),
        );
        let Some(api) = connector.connect().await? else {
            bail!(
                "Mailbox is not authorized yet; run `mailgraph serve` and open {}",
                self.redirect_uri.replace("/oauth2callback", "/generate_token")
            );
        };

        let report = MailRetriever::new(api, self.data.clone(), &self.config.mailbox)
            .retrieve_emails()
            .await?;
        for id in &report.messages_saved {
            println!("{}", id);
        }
        info!(
            "{} threads seen ({} failed), {} messages saved, {} skipped",
            report.threads_seen,
            report.threads_failed,
            report.messages_saved.len(),
            report.messages_skipped
        );
        Ok(())
    }

    fn ingest(&self) -> Result<(Arc<dyn IngestApi>, DbCredentials)> {
        let client = IngestClient::new(&self.config.ingest.server_url)?;
        let credentials = DbCredentials::from_config(&self.config.graph_db)?;
        Ok((Arc::new(client), credentials))
    }

    async fn upload(self, file: &Path) -> Result<()> {
        let (api, credentials) = self.ingest()?;
        let uploader = ChunkedUploader::new(api, &self.config.ingest);

        match uploader.upload(file, &credentials).await? {
            UploadOutcome::Completed { chunks } => {
                info!("Uploaded {} in {} chunks", file.display(), chunks);
                Ok(())
            }
            UploadOutcome::Rejected { chunk, message } => {
                bail!("Chunk {} was rejected: {}", chunk, message)
            }
        }
    }

    async fn extract(self, file_name: &str) -> Result<()> {
        let (api, credentials) = self.ingest()?;
        let trigger = ExtractionTrigger::new(api, &self.config.ingest, self.config.ontology.clone());

        let reply = trigger.extract(file_name, &credentials).await?;
        println!("{}", serde_json::to_string_pretty(&reply)?);
        Ok(())
    }
}

/// Sets `shutdown` and wakes the driver on Ctrl-C. The returned receiver
/// flips to `true` at the same moment.
fn install_ctrlc(shutdown: Arc<AtomicBool>, wake: Arc<Notify>) -> Result<watch::Receiver<bool>> {
    let (stop_tx, stop_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        info!("Shutdown requested, finishing the current cycle");
        shutdown.store(true, Ordering::SeqCst);
        wake.notify_one();
        let _ = stop_tx.send(true);
    })
    .context("Failed to install Ctrl-C handler")?;
    Ok(stop_rx)
}

async fn wait_for(mut stopped: watch::Receiver<bool>) {
    while !*stopped.borrow() {
        if stopped.changed().await.is_err() {
            break;
        }
    }
}

fn server_addr(server: &ServerConfig) -> Result<SocketAddr> {
    (server.bind.as_str(), server.port)
        .to_socket_addrs()
        .with_context(|| format!("Invalid bind address '{}'", server.bind))?
        .next()
        .ok_or_else(|| anyhow!("Bind address '{}' resolved to nothing", server.bind))
}
