//! Small HTTP surface: credential upload, the OAuth authorization flow and the
//! OCR inbox.

pub mod error;
pub mod handlers;

use std::future::Future;
use std::net::SocketAddr;

use log::info;
use tokio::net::TcpListener;

pub use error::{ErrorResponse, ServerError};
pub use handlers::{create_router, AppState};

use crate::config::{OAuthConfig, ServerConfig};

/// Redirect URI registered with the provider. An explicit configuration wins;
/// otherwise it points back at this server.
pub fn redirect_uri(server: &ServerConfig, oauth: &OAuthConfig) -> String {
    if let Some(uri) = oauth.redirect_uri.as_ref().filter(|u| !u.is_empty()) {
        return uri.clone();
    }
    let host = match server.bind.as_str() {
        "0.0.0.0" | "::" | "" => "localhost",
        other => other,
    };
    format!("http://{}:{}/oauth2callback", host, server.port)
}

/// Serves until `shutdown` resolves.
pub async fn serve<F>(state: AppState, addr: SocketAddr, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await.map_err(ServerError::Bind)?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))
}
