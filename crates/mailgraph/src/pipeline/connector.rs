use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use crate::config::{MailboxConfig, OAuthConfig};
use crate::mailbox::{
    fresh_access_token, ClientSecrets, GmailClient, MailboxApi, MailboxError, OAuthClient,
    TokenStore,
};
use crate::storage::DataDir;

/// Opens an authorized mailbox session for one cycle.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// `None` when the mailbox has not been authorized yet.
    async fn connect(&self) -> Result<Option<Arc<dyn MailboxApi>>, MailboxError>;
}

/// Connects to Gmail with the stored token, refreshing it when expired.
pub struct GmailConnector {
    data: DataDir,
    tokens: Arc<TokenStore>,
    oauth: OAuthConfig,
    redirect_uri: String,
    api_base_url: String,
}

impl GmailConnector {
    pub fn new(
        data: DataDir,
        tokens: Arc<TokenStore>,
        mailbox: &MailboxConfig,
        redirect_uri: String,
    ) -> Self {
        Self {
            data,
            tokens,
            oauth: mailbox.oauth.clone(),
            redirect_uri,
            api_base_url: mailbox.api_base_url.clone(),
        }
    }
}

#[async_trait]
impl MailboxConnector for GmailConnector {
    async fn connect(&self) -> Result<Option<Arc<dyn MailboxApi>>, MailboxError> {
        if !self.tokens.exists() {
            return Ok(None);
        }

        let secrets =
            ClientSecrets::load(&self.data.client_secrets_path())?.with_overrides(&self.oauth)?;
        let oauth = OAuthClient::new(secrets, self.redirect_uri.clone())?;
        let access_token = fresh_access_token(&self.tokens, &oauth).await?;
        debug!("Mailbox session ready");

        let client: Arc<dyn MailboxApi> =
            Arc::new(GmailClient::new(&self.api_base_url, access_token)?);
        Ok(Some(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_token_means_not_authorized() {
        let temp_dir = TempDir::new().unwrap();
        let data = DataDir::new(temp_dir.path());
        let connector = GmailConnector::new(
            data.clone(),
            Arc::new(TokenStore::new(data.token_path(), None)),
            &MailboxConfig::default(),
            String::new(),
        );

        assert!(connector.connect().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_without_client_secrets_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let data = DataDir::new(temp_dir.path());
        data.ensure_layout().unwrap();
        std::fs::write(data.token_path(), r#"{"access_token": "a"}"#).unwrap();

        let connector = GmailConnector::new(
            data.clone(),
            Arc::new(TokenStore::new(data.token_path(), None)),
            &MailboxConfig::default(),
            String::new(),
        );

        assert!(matches!(
            connector.connect().await,
            Err(MailboxError::MissingClientSecrets(_))
        ));
    }
}
