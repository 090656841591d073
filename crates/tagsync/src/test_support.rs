//! Scripted in-memory transport for async tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::api::{ApiClient, ApiRequest, Method, RawResponse, Transport};
use crate::error::{SyncError, SyncResult};

enum Scripted {
    Ready(SyncResult<RawResponse>),
    Gated(oneshot::Receiver<SyncResult<RawResponse>>),
}

/// Answers requests from per-route queues keyed by method and path (query
/// string excluded). Unscripted routes answer 404.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn client(self: &Arc<Self>) -> Arc<ApiClient> {
        Arc::new(ApiClient::new(self.clone()))
    }

    fn push(&self, method: Method, path: &str, entry: Scripted) {
        self.routes
            .lock()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(entry);
    }

    pub(crate) fn respond(&self, method: Method, path: &str, response: RawResponse) {
        self.push(method, path, Scripted::Ready(Ok(response)));
    }

    pub(crate) fn respond_json(&self, method: Method, path: &str, value: Value) {
        self.respond(method, path, RawResponse::json(&value));
    }

    pub(crate) fn fail(&self, method: Method, path: &str, error: SyncError) {
        self.push(method, path, Scripted::Ready(Err(error)));
    }

    /// Queues a response that is held back until the returned sender fires.
    pub(crate) fn gate(&self, method: Method, path: &str) -> oneshot::Sender<SyncResult<RawResponse>> {
        let (sender, receiver) = oneshot::channel();
        self.push(method, path, Scripted::Gated(receiver));
        sender
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    pub(crate) fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }

    /// Serves `image` from its metadata route.
    pub(crate) fn serve_image(&self, id: u64, hash: &str, tags: Value) {
        self.respond_json(
            Method::Get,
            &format!("/images/{id}/metadata"),
            json!({ "id": id, "hash": hash, "tags": tags, "attributes": {}, "active": true }),
        );
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: ApiRequest) -> SyncResult<RawResponse> {
        let key = (request.method, request.path.clone());
        self.requests.lock().push(request);
        let next = self.routes.lock().get_mut(&key).and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Ready(result)) => result,
            Some(Scripted::Gated(receiver)) => receiver
                .await
                .unwrap_or_else(|_| Err(SyncError::Transport("gate dropped".to_string()))),
            None => Ok(RawResponse::new(404, "not scripted")),
        }
    }
}
