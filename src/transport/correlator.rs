//! Request/response correlation and event fan-out.
//!
//! The [`Correlator`] owns two registries scoped to one connection owner:
//!
//! - `pending`: request id → [`PendingRequest`], populated when a request is
//!   sent and drained when the matching response arrives.
//! - `listeners`: event name → ordered callbacks registered through
//!   [`Correlator::on`].
//!
//! Both maps are behind async mutexes so the reader task, the session and
//! any spawned request futures can share a single instance via `Arc`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace};

use crate::wire::message::{Event, Response};
use crate::{AppError, Result};

/// Callback invoked synchronously for every dispatched event.
pub type EventListener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Completed request, as delivered to the caller that issued it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    /// Identifier assigned when the request was sent.
    pub id: u64,
    /// Request name.
    pub request: String,
    /// `true` when the debuggee answered without an `error` field.
    pub success: bool,
    /// The `error` payload on failure, the `response` payload otherwise.
    pub response: Value,
    /// Opaque caller data attached at send time.
    pub data: Option<Value>,
}

/// In-flight request awaiting its response.
#[derive(Debug)]
struct PendingRequest {
    request: String,
    data: Option<Value>,
    reply: oneshot::Sender<RequestOutcome>,
}

/// Session-scoped registry of in-flight requests and event listeners.
pub struct Correlator {
    /// Last issued request id; ids start at 1 and are never reused.
    last_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    listeners: Mutex<HashMap<String, Vec<EventListener>>>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("last_id", &self.last_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next request id and record the request as in flight.
    ///
    /// The returned receiver completes exactly once: when a response with the
    /// same id is resolved, or when the request is failed by
    /// [`Correlator::fail_all`].
    pub async fn register(
        &self,
        request: &str,
        data: Option<Value>,
    ) -> (u64, oneshot::Receiver<RequestOutcome>) {
        let id = self.last_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (reply, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingRequest {
                request: request.to_owned(),
                data,
                reply,
            },
        );
        trace!(id, request, "request registered");
        (id, rx)
    }

    /// Forget a request that could not be written.
    pub async fn abandon(&self, id: u64) {
        self.pending.lock().await.remove(&id);
    }

    /// Deliver `response` to the request that issued its id.
    ///
    /// Unknown or late ids are ignored. Returns whether a caller was found.
    pub async fn resolve(&self, response: Response) -> bool {
        let entry = self.pending.lock().await.remove(&response.id);

        let Some(entry) = entry else {
            debug!(id = response.id, "correlator: ignoring response for unknown id");
            return false;
        };

        let success = response.error.is_none();
        let payload = response
            .error
            .or(response.response)
            .unwrap_or(Value::Null);

        let outcome = RequestOutcome {
            id: response.id,
            request: entry.request,
            success,
            response: payload,
            data: entry.data,
        };

        if entry.reply.send(outcome).is_err() {
            debug!(id = response.id, "correlator: caller dropped before response");
        }
        true
    }

    /// Fail every in-flight request with `reason`.
    pub async fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.pending.lock().await.drain().collect();
        let count = drained.len();

        for (id, entry) in drained {
            let outcome = RequestOutcome {
                id,
                request: entry.request,
                success: false,
                response: Value::String(reason.to_owned()),
                data: entry.data,
            };
            // Callers that already went away need no notification.
            let _ = entry.reply.send(outcome);
        }

        if count > 0 {
            debug!(count, reason, "correlator: failed in-flight requests");
        }
        count
    }

    /// Number of requests still awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Register `listener` for events named `event`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if `event` is empty.
    pub async fn on(
        &self,
        event: &str,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<()> {
        if event.is_empty() {
            return Err(AppError::Config("invalid event name".into()));
        }

        self.listeners
            .lock()
            .await
            .entry(event.to_owned())
            .or_default()
            .push(Arc::new(listener));
        Ok(())
    }

    /// Invoke every listener registered for `event.event`, in registration
    /// order. Events without listeners are dropped.
    pub async fn dispatch(&self, event: &Event) -> usize {
        let listeners = self
            .listeners
            .lock()
            .await
            .get(&event.event)
            .cloned()
            .unwrap_or_default();

        for listener in &listeners {
            listener(event);
        }

        trace!(event = %event.event, listeners = listeners.len(), "event dispatched");
        listeners.len()
    }
}
