//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so the engine does not
//! pick an HTTP library. Bodies are CBOR-encoded protocol messages.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteSyncClient;
use async_trait::async_trait;
use larder_sync_protocol::{SyncRequest, SyncResponse};
use parking_lot::RwLock;
use tracing::warn;

/// Path of the sync endpoint.
pub const SYNC_PATH: &str = "/sync";

/// HTTP client abstraction.
///
/// Implement this trait over reqwest, hyper, a platform HTTP stack, or any
/// other request/response channel.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;
}

/// Remote sync client speaking CBOR over an [`HttpClient`].
pub struct HttpRemoteClient<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpRemoteClient<C> {
    /// Creates a new HTTP remote client.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

#[async_trait]
impl<C: HttpClient> RemoteSyncClient for HttpRemoteClient<C> {
    async fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        let body = request.encode()?;

        let url = format!("{}{}", self.base_url, SYNC_PATH);
        let response_body = match self.client.post(&url, body).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %url, error = %e, "sync request failed");
                *self.last_error.write() = Some(e.clone());
                return Err(SyncError::transport_retryable(e));
            }
        };
        *self.last_error.write() = None;

        Ok(SyncResponse::decode(&response_body)?)
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An HTTP client that routes requests directly to an in-process server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find(SYNC_PATH).map(|i| &url[i..]).unwrap_or(url);
        self.server.handle_post(path, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct TestClient {
        response: Mutex<Option<Vec<u8>>>,
        urls: Mutex<Vec<String>>,
    }

    impl TestClient {
        fn new(response: Option<Vec<u8>>) -> Self {
            Self {
                response: Mutex::new(response),
                urls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn post(&self, url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
            self.urls.lock().push(url.to_string());
            self.response
                .lock()
                .clone()
                .ok_or_else(|| "connection refused".to_string())
        }
    }

    #[tokio::test]
    async fn posts_to_sync_endpoint() {
        let response = SyncResponse::success(Utc::now());
        let client = TestClient::new(Some(response.encode().unwrap()));
        let remote = HttpRemoteClient::new("https://sync.example.com/", client);

        let decoded = remote
            .sync(&SyncRequest::new("home", "device"))
            .await
            .unwrap();

        assert_eq!(decoded, response);
        assert_eq!(remote.base_url(), "https://sync.example.com");
        assert_eq!(
            remote.client.urls.lock().clone(),
            vec!["https://sync.example.com/sync".to_string()]
        );
    }

    #[tokio::test]
    async fn post_failure_is_retryable_transport_error() {
        let remote = HttpRemoteClient::new("https://sync.example.com", TestClient::new(None));

        let result = remote.sync(&SyncRequest::new("home", "device")).await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));
        assert_eq!(remote.last_error().as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn undecodable_body_is_protocol_error() {
        let client = TestClient::new(Some(vec![0xde, 0xad]));
        let remote = HttpRemoteClient::new("https://sync.example.com", client);

        let result = remote.sync(&SyncRequest::new("home", "device")).await;
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    struct EchoServer;

    impl LoopbackServer for EchoServer {
        fn handle_post(&self, path: &str, _body: &[u8]) -> Result<Vec<u8>, String> {
            assert_eq!(path, SYNC_PATH);
            SyncResponse::success(Utc::now())
                .encode()
                .map_err(|e| e.to_string())
        }
    }

    #[tokio::test]
    async fn loopback_routes_to_server() {
        let remote = HttpRemoteClient::new("memory://", LoopbackClient::new(EchoServer));
        let response = remote
            .sync(&SyncRequest::new("home", "device"))
            .await
            .unwrap();
        assert!(response.success);
    }
}
