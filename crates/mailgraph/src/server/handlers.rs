//! HTTP handlers for credential upload, the OAuth callback and the OCR inbox.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    response::{IntoResponse, Json, Redirect},
    routing::{get, post},
    Router,
};
use log::info;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::error::ServerError;
use crate::config::OAuthConfig;
use crate::mailbox::body::sanitize_filename;
use crate::mailbox::{ClientSecrets, OAuthClient, TokenStore};
use crate::storage::{write_file, write_new_file, DataDir};

/// Authorization requests older than this are forgotten.
const PENDING_STATE_TTL: Duration = Duration::from_secs(10 * 60);
const MAX_PENDING_STATES: u64 = 64;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub data: DataDir,
    pub oauth: Arc<OAuthConfig>,
    pub redirect_uri: String,
    pub tokens: Arc<TokenStore>,
    /// `state` values handed out by `/generate_token` and not yet redeemed.
    pub pending: Cache<String, ()>,
    /// Wakes the polling driver so new uploads are processed without waiting
    /// for the next interval.
    pub cycle_trigger: Arc<Notify>,
    /// Body limit for the upload routes; scans are routinely larger than
    /// axum's 2 MB default.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        data: DataDir,
        oauth: OAuthConfig,
        redirect_uri: String,
        tokens: Arc<TokenStore>,
        cycle_trigger: Arc<Notify>,
    ) -> Self {
        Self {
            data,
            oauth: Arc::new(oauth),
            redirect_uri,
            tokens,
            pending: Cache::builder()
                .max_capacity(MAX_PENDING_STATES)
                .time_to_live(PENDING_STATE_TTL)
                .build(),
            cycle_trigger,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_upload_limit(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    fn oauth_client(&self) -> Result<OAuthClient, ServerError> {
        let secrets =
            ClientSecrets::load(&self.data.client_secrets_path())?.with_overrides(&self.oauth)?;
        Ok(OAuthClient::new(secrets, self.redirect_uri.clone())?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub authorization_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// GET /generate_token
async fn generate_token(
    State(state): State<AppState>,
) -> Result<Json<AuthorizationResponse>, ServerError> {
    let client = state.oauth_client()?;
    let csrf_state = uuid::Uuid::new_v4().to_string();
    let authorization_url = client.authorization_url(&csrf_state)?;
    state.pending.insert(csrf_state, ());

    Ok(Json(AuthorizationResponse { authorization_url }))
}

/// GET /oauth2callback
async fn oauth2callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ServerError> {
    if let Some(error) = params.error {
        return Err(ServerError::BadRequest(format!("Authorization denied: {}", error)));
    }
    let csrf_state = params
        .state
        .ok_or_else(|| ServerError::BadRequest("Missing state".to_string()))?;
    if state.pending.remove(&csrf_state).is_none() {
        return Err(ServerError::BadRequest(
            "Unknown or expired authorization state".to_string(),
        ));
    }
    let code = params
        .code
        .ok_or_else(|| ServerError::BadRequest("Missing authorization code".to_string()))?;

    let token = state.oauth_client()?.exchange_code(&code).await?;
    state.tokens.save(&token)?;
    info!("Mailbox token saved");
    state.cycle_trigger.notify_one();

    Ok(Redirect::to("/token_saved"))
}

/// GET /token_saved
async fn token_saved() -> &'static str {
    "Token saved successfully."
}

struct UploadedFile {
    filename: String,
    data: Vec<u8>,
}

async fn read_file_field(mut multipart: Multipart) -> Result<UploadedFile, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ServerError::BadRequest("No selected file".to_string()));
        }
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(e.to_string()))?;
        return Ok(UploadedFile {
            filename,
            data: data.to_vec(),
        });
    }
    Err(ServerError::BadRequest("No file part".to_string()))
}

/// POST /upload_credentials
async fn upload_credentials(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ServerError> {
    let file = read_file_field(multipart).await?;
    if !file.filename.to_lowercase().ends_with(".json") {
        return Err(ServerError::BadRequest(
            "Credentials must be a .json file".to_string(),
        ));
    }
    let content = String::from_utf8(file.data)
        .map_err(|_| ServerError::BadRequest("Credentials are not UTF-8".to_string()))?;
    ClientSecrets::from_json(&content)
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    write_file(&state.data.client_secrets_path(), content.as_bytes())?;
    info!("OAuth client secrets uploaded");
    Ok("File successfully uploaded")
}

/// POST /ocr
async fn upload_ocr(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ServerError> {
    let file = read_file_field(multipart).await?;
    let saved = write_new_file(
        &state.data.ocr_inbox(),
        &sanitize_filename(&file.filename),
        &file.data,
    )?;
    info!(
        "Queued {} for OCR",
        saved.file_name().unwrap_or_default().to_string_lossy()
    );
    state.cycle_trigger.notify_one();
    Ok("File successfully uploaded")
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);
    Router::new()
        .route("/generate_token", get(generate_token))
        .route("/oauth2callback", get(oauth2callback))
        .route("/token_saved", get(token_saved))
        .route("/upload_credentials", post(upload_credentials))
        .route("/ocr", post(upload_ocr))
        .route("/health", get(health))
        .layer(body_limit)
        .with_state(state)
}
