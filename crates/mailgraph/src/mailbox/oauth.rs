//! OAuth2 authorization-code flow and the stored mailbox token.
//!
//! The user uploads the provider's `credentials.json` (client secrets), opens
//! the authorization URL, and the callback exchanges the code for a token that
//! is persisted under the data directory. The retriever later loads the token
//! and refreshes it in place once it has expired.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::client::{create_http_client, truncate_error_body};
use super::error::{MailboxError, Result};
use crate::config::OAuthConfig;
use crate::secrets::TokenEncryptor;
use crate::storage::filesystem::{read_to_string, write_file};

pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Client secrets as downloaded from the provider console. Both the `web`
/// and `installed` application layouts are accepted.
#[derive(Debug, Clone)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: SecretString,
    pub auth_uri: String,
    pub token_uri: String,
    pub redirect_uris: Vec<String>,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    web: Option<ClientSecretsEntry>,
    installed: Option<ClientSecretsEntry>,
}

#[derive(Deserialize)]
struct ClientSecretsEntry {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    auth_uri: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl ClientSecrets {
    pub fn from_json(content: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(content)
            .map_err(|e| MailboxError::Decode(format!("invalid client secrets: {}", e)))?;
        let entry = file.web.or(file.installed).ok_or_else(|| {
            MailboxError::Decode(
                "client secrets must contain a \"web\" or \"installed\" section".to_string(),
            )
        })?;

        Ok(Self {
            client_id: entry.client_id,
            client_secret: SecretString::from(entry.client_secret),
            auth_uri: entry.auth_uri.unwrap_or_else(|| DEFAULT_AUTH_URI.to_string()),
            token_uri: entry.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            redirect_uris: entry.redirect_uris,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MailboxError::MissingClientSecrets(path.to_path_buf()));
        }
        Self::from_json(&read_to_string(path)?)
    }

    /// Applies client id / secret overrides from the config file.
    pub fn with_overrides(mut self, oauth: &OAuthConfig) -> Result<Self> {
        if let Some(client_id) = oauth.client_id.as_ref().filter(|id| !id.is_empty()) {
            self.client_id = client_id.clone();
        }
        if let Some(secret) = oauth.client_secret.resolve_optional()? {
            self.client_secret = secret;
        }
        Ok(self)
    }
}

/// Token as returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// A mailbox access token plus what is needed to renew it.
#[derive(Debug, Clone)]
pub struct StoredToken {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

impl StoredToken {
    fn from_response(response: TokenResponse, previous_refresh: Option<SecretString>) -> Self {
        Self {
            access_token: SecretString::from(response.access_token),
            refresh_token: response.refresh_token.map(SecretString::from).or(previous_refresh),
            expires_at: response
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
            scope: response.scope,
            token_type: response.token_type,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at - ChronoDuration::seconds(EXPIRY_SKEW_SECS) <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

/// On-disk form of [`StoredToken`].
#[derive(Serialize, Deserialize)]
struct TokenFile {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_type: Option<String>,
}

/// Persists the mailbox token, encrypted when a [`TokenEncryptor`] is set.
pub struct TokenStore {
    path: PathBuf,
    encryptor: Option<TokenEncryptor>,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>, encryptor: Option<TokenEncryptor>) -> Self {
        Self {
            path: path.into(),
            encryptor,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<StoredToken> {
        if !self.exists() {
            return Err(MailboxError::TokenNotFound(self.path.clone()));
        }
        let content = read_to_string(&self.path)?;
        let json = match (content.trim_start().starts_with('{'), &self.encryptor) {
            (true, _) => content,
            (false, Some(encryptor)) => encryptor.decrypt(&content)?,
            (false, None) => {
                return Err(MailboxError::OAuth2Error(format!(
                    "token file is encrypted; set {}",
                    crate::secrets::TOKEN_KEY_ENV_VAR
                )))
            }
        };

        let file: TokenFile = serde_json::from_str(&json)
            .map_err(|e| MailboxError::Decode(format!("invalid token file: {}", e)))?;
        Ok(StoredToken {
            access_token: SecretString::from(file.access_token),
            refresh_token: file.refresh_token.map(SecretString::from),
            expires_at: file.expires_at,
            scope: file.scope,
            token_type: file.token_type,
        })
    }

    pub fn save(&self, token: &StoredToken) -> Result<()> {
        let file = TokenFile {
            access_token: token.access_token.expose_secret().to_string(),
            refresh_token: token
                .refresh_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            expires_at: token.expires_at,
            scope: token.scope.clone(),
            token_type: token.token_type.clone(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| MailboxError::Decode(format!("failed to serialize token: {}", e)))?;
        let content = match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(&json)?,
            None => json,
        };
        write_file(&self.path, content.as_bytes())?;
        debug!("Mailbox token saved");
        Ok(())
    }
}

pub struct OAuthClient {
    client: Client,
    secrets: ClientSecrets,
    redirect_uri: String,
}

impl OAuthClient {
    pub fn new(secrets: ClientSecrets, redirect_uri: String) -> Result<Self> {
        Ok(Self {
            client: create_http_client()?,
            secrets,
            redirect_uri,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// URL the user opens to grant read-only mailbox access. `state` is echoed
    /// back to the callback.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.secrets.auth_uri,
            &[
                ("client_id", self.secrets.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", GMAIL_READONLY_SCOPE),
                ("access_type", "offline"),
                ("include_granted_scopes", "true"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| MailboxError::OAuth2Error(format!("invalid auth_uri: {}", e)))?;
        Ok(url.to_string())
    }

    pub async fn exchange_code(&self, code: &str) -> Result<StoredToken> {
        info!("Exchanging authorization code for mailbox token");
        let params = [
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let response = self.request_token(&params).await?;
        Ok(StoredToken::from_response(response, None))
    }

    pub async fn refresh(&self, token: &StoredToken) -> Result<StoredToken> {
        let refresh_token = token.refresh_token.as_ref().ok_or_else(|| {
            MailboxError::OAuth2Error(
                "token expired and no refresh token is stored; re-run the authorization flow"
                    .to_string(),
            )
        })?;

        info!("Refreshing mailbox access token");
        let params = [
            ("client_id", self.secrets.client_id.as_str()),
            ("client_secret", self.secrets.client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ];
        let response = self.request_token(&params).await?;
        Ok(StoredToken::from_response(
            response,
            token.refresh_token.clone(),
        ))
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.secrets.token_uri)
            .form(params)
            .send()
            .await
            .map_err(|e| MailboxError::OAuth2Error(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => format!(
                    "{} - {}",
                    err.error,
                    err.error_description.unwrap_or_default()
                ),
                Err(_) => truncate_error_body(&body),
            };
            return Err(MailboxError::OAuth2Error(format!(
                "Token request failed ({}): {}",
                status, message
            )));
        }

        response
            .json()
            .await
            .map_err(|e| MailboxError::OAuth2Error(format!("Failed to parse token response: {}", e)))
    }
}

/// Loads the stored token, refreshing and re-saving it first if it has
/// expired. Returns the access token to use for this cycle.
pub async fn fresh_access_token(store: &TokenStore, oauth: &OAuthClient) -> Result<SecretString> {
    let token = store.load()?;
    if !token.is_expired() {
        return Ok(token.access_token);
    }

    let refreshed = oauth.refresh(&token).await?;
    store.save(&refreshed)?;
    Ok(refreshed.access_token)
}
