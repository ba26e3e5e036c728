//! Correlation of outbound requests with the responses that eventually arrive for them.
//!
//! In a normal JSON-RPC transport the response comes back on the same connection the request went
//! out on.  MCP-Link's SSE transport splits these: requests go out as HTTP POSTs which are only
//! acknowledged with a `202 Accepted`, and the actual response shows up some time later as an event
//! on a long-lived stream that is being read by a completely different task.  The
//! [`CorrelationTable`] is the one piece of state those two tasks share.
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use pin_project::{pin_project, pinned_drop};
use tokio::sync::oneshot;

use crate::{JsonRpcError, Result, types};

/// Entry in the table for a single request that's waiting for its response.
#[derive(Debug)]
struct PendingRequest {
    /// Sending half of the slot the response is delivered to.  Taken when the slot is fulfilled,
    /// so a second response with the same ID finds `None` here and is dropped.
    slot: Option<oneshot::Sender<types::ResponsePayload>>,
    created_at: Instant,
}

/// Thread-safe map from request ID to a single-use result slot.
///
/// Cheap to clone; all clones refer to the same table.  Each connection owns its own table, there
/// is no process-wide registry of pending requests.
#[derive(Clone, Debug, Default)]
pub struct CorrelationTable {
    pending: Arc<Mutex<HashMap<types::Id, PendingRequest>>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new pending request, returning the [`PendingCall`] through which its response
    /// will be delivered.
    ///
    /// Fails with [`JsonRpcError::DuplicateId`] if a request with this ID is already pending.
    pub fn register(&self, id: types::Id) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.lock();
            if pending.contains_key(&id) {
                return Err(JsonRpcError::DuplicateId { id });
            }
            pending.insert(
                id.clone(),
                PendingRequest {
                    slot: Some(tx),
                    created_at: Instant::now(),
                },
            );
        }

        Ok(PendingCall {
            receiver: rx,
            id,
            table: self.clone(),
        })
    }

    /// Deliver a response payload to the request pending with this ID, waking whoever is waiting
    /// on it.
    ///
    /// Returns `true` if the payload was delivered.  If there is no such request, or it was
    /// already fulfilled, this is a no-op and returns `false`.
    pub fn fulfill(&self, id: &types::Id, payload: types::ResponsePayload) -> bool {
        let slot = {
            let mut pending = self.lock();
            match pending.get_mut(id) {
                Some(request) => {
                    tracing::trace!(
                        request_id = %id,
                        elapsed = ?request.created_at.elapsed(),
                        "Fulfilling pending request"
                    );
                    request.slot.take()
                }
                None => None,
            }
        };

        // Send outside the lock; it can't block but there's no reason to hold the lock for it
        match slot {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Unconditionally remove the entry for this ID, if there is one.
    ///
    /// Returns `true` if there was an entry to remove.
    pub fn remove(&self, id: &types::Id) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Is there an entry (fulfilled or not) for this ID?
    pub fn contains(&self, id: &types::Id) -> bool {
        self.lock().contains_key(id)
    }

    /// Number of entries currently in the table
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<types::Id, PendingRequest>> {
        // None of the operations on the map can panic part way through and leave it inconsistent,
        // so a poisoned lock is still safe to use.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A request registered in a [`CorrelationTable`], waiting for its response.
///
/// Implements `Future`, resolving to the response payload once [`CorrelationTable::fulfill`] is
/// called for this ID.  Usually [`Self::wait`] is what you want, since it applies a deadline.
///
/// When this is dropped, for any reason (response received, timed out, the caller gave up), the
/// entry is removed from the table.  That's what keeps the table from filling up with requests
/// whose responses will never arrive.
#[derive(Debug)]
#[pin_project(PinnedDrop)]
pub struct PendingCall {
    #[pin]
    receiver: oneshot::Receiver<types::ResponsePayload>,
    id: types::Id,
    table: CorrelationTable,
}

impl PendingCall {
    /// The ID this call was registered with
    pub fn id(&self) -> &types::Id {
        &self.id
    }

    /// Wait up to `timeout` for the response.
    ///
    /// On timeout the entry is removed from the table and [`JsonRpcError::TimedOut`] is
    /// returned; if the response arrives after that it will be silently dropped.
    pub async fn wait(self, timeout: Duration) -> Result<types::ResponsePayload> {
        let id = self.id.clone();

        match tokio::time::timeout(timeout, self).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(request_id = %id, ?timeout, "Timed out waiting for response");
                Err(JsonRpcError::TimedOut { id })
            }
        }
    }
}

impl Future for PendingCall {
    type Output = Result<types::ResponsePayload>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match futures::ready!(this.receiver.poll(cx)) {
            Ok(payload) => Poll::Ready(Ok(payload)),
            Err(_) => Poll::Ready(Err(JsonRpcError::PendingRequestRemoved { id: this.id.clone() })),
        }
    }
}

#[pinned_drop]
impl PinnedDrop for PendingCall {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        this.table.remove(this.id);
    }
}
