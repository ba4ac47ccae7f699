//! Read-only Gmail REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::body::decode_base64url;
use super::error::{MailboxError, Result};
use super::types::{Attachment, Thread, ThreadList, ThreadRef};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum length for error bodies carried into log lines.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// The three mailbox calls the retriever consumes.
#[async_trait]
pub trait MailboxApi: Send + Sync {
    async fn list_threads(&self, label_ids: &[String], max_results: u32) -> Result<Vec<ThreadRef>>;

    async fn get_thread(&self, thread_id: &str) -> Result<Thread>;

    /// Returns the decoded attachment bytes.
    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: MailboxApi + ?Sized> MailboxApi for Arc<T> {
    async fn list_threads(&self, label_ids: &[String], max_results: u32) -> Result<Vec<ThreadRef>> {
        (**self).list_threads(label_ids, max_results).await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        (**self).get_thread(thread_id).await
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        (**self).get_attachment(message_id, attachment_id).await
    }
}

pub(crate) fn create_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| MailboxError::Request(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn truncate_error_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_LENGTH {
        let truncated: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated)", truncated)
    } else {
        body.to_string()
    }
}

pub struct GmailClient {
    client: Client,
    base_url: String,
    access_token: SecretString,
}

impl GmailClient {
    pub fn new(base_url: &str, access_token: SecretString) -> Result<Self> {
        Ok(Self {
            client: create_http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    fn user_url(&self, path: &str) -> String {
        format!("{}/gmail/v1/users/me/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .bearer_auth(self.access_token.expose_secret())
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailboxError::Api {
                status: status.as_u16(),
                body: truncate_error_body(&body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| MailboxError::Decode(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl MailboxApi for GmailClient {
    async fn list_threads(&self, label_ids: &[String], max_results: u32) -> Result<Vec<ThreadRef>> {
        let mut query: Vec<(&str, String)> = vec![("maxResults", max_results.to_string())];
        query.extend(label_ids.iter().map(|l| ("labelIds", l.clone())));

        let list: ThreadList = self.get_json(&self.user_url("threads"), &query).await?;
        Ok(list.threads)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Thread> {
        let url = self.user_url(&format!("threads/{}", thread_id));
        self.get_json(&url, &[("format", "full".to_string())]).await
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let url = self.user_url(&format!(
            "messages/{}/attachments/{}",
            message_id, attachment_id
        ));
        let attachment: Attachment = self.get_json(&url, &[]).await?;
        decode_base64url(&attachment.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> GmailClient {
        GmailClient::new(&server.base_url(), SecretString::from("access-123".to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_list_threads_sends_labels_and_limit() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock(|when, then| {
                when.method(GET)
                    .path("/gmail/v1/users/me/threads")
                    .query_param("maxResults", "60")
                    .query_param("labelIds", "INBOX")
                    .header("authorization", "Bearer access-123");
                then.status(200)
                    .json_body(serde_json::json!({"threads": [{"id": "t1"}, {"id": "t2"}]}));
            });

        let threads = client(&server)
            .list_threads(&["INBOX".to_string()], 60)
            .await
            .unwrap();

        mock.assert_calls(1);
        let ids: Vec<_> = threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_get_attachment_decodes_data() {
        let server = MockServer::start_async().await;
        server
            .mock(|when, then| {
                when.method(GET)
                    .path("/gmail/v1/users/me/messages/m1/attachments/a1");
                then.status(200)
                    .json_body(serde_json::json!({"data": "JVBERi0", "size": 5}));
            });

        let bytes = client(&server).get_attachment("m1", "a1").await.unwrap();
        assert_eq!(bytes, b"%PDF-");
    }

    #[tokio::test]
    async fn test_api_error_status_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock(|when, then| {
                when.method(GET).path("/gmail/v1/users/me/threads/t404");
                then.status(404).body("Requested entity was not found.");
            });

        let err = client(&server).get_thread("t404").await.unwrap_err();
        assert!(matches!(err, MailboxError::Api { status: 404, .. }));
    }

    #[test]
    fn test_truncate_error_body() {
        let long = "x".repeat(500);
        assert!(truncate_error_body(&long).ends_with("... (truncated)"));
        assert_eq!(truncate_error_body("short"), "short");
    }
}
