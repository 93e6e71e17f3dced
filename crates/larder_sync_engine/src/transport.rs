//! Remote sync client abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use larder_sync_protocol::{SyncRequest, SyncResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// The single batched push/pull call to the sync server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing).
/// Implementations return `Err` only when no usable response was received;
/// a response with `success: false` is returned as `Ok` and judged by the
/// engine.
#[async_trait]
pub trait RemoteSyncClient: Send + Sync {
    /// Sends one sync request and waits for the response.
    async fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse>;
}

/// A scripted reply of [`MockRemoteClient`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with this message.
    Respond(SyncResponse),
    /// Fail with a retryable transport error.
    Fail(String),
}

type RequestHook = Box<dyn FnMut(&SyncRequest) + Send>;

/// A mock client for testing.
///
/// Replies are consumed in order. A hook can run while a request is "in
/// flight", which lets tests mutate local state between the moment a request
/// was built and the moment its response is applied.
#[derive(Default)]
pub struct MockRemoteClient {
    disconnected: AtomicBool,
    replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<SyncRequest>>,
    hook: Mutex<Option<RequestHook>>,
}

impl MockRemoteClient {
    /// Creates a new mock client with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: SyncResponse) {
        self.replies.lock().push_back(MockReply::Respond(response));
    }

    /// Queues a transport failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies.lock().push_back(MockReply::Fail(message.into()));
    }

    /// Installs a hook run for every request before its reply is returned.
    pub fn on_request(&self, hook: impl FnMut(&SyncRequest) + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    /// Simulates losing (or regaining) connectivity.
    pub fn set_connected(&self, connected: bool) {
        self.disconnected.store(!connected, Ordering::SeqCst);
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of replies not yet consumed.
    pub fn remaining_replies(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl RemoteSyncClient for MockRemoteClient {
    async fn sync(&self, request: &SyncRequest) -> SyncResult<SyncResponse> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        self.requests.lock().push(request.clone());

        if let Some(hook) = self.hook.lock().as_mut() {
            hook(request);
        }

        match self.replies.lock().pop_front() {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(message)) => Err(SyncError::transport_retryable(message)),
            None => Err(SyncError::Protocol("no mock response set".into())),
        }
    }
}
