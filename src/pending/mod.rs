//! Pending Request Table
//!
//! Tracks outbound requests awaiting a reply. Each entry is a single-use
//! reply slot keyed by the request's message id. Entries are removed exactly
//! once: whichever of reply arrival or expiry takes the entry first resolves
//! the slot, and the other finds nothing and does nothing.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{ConnectionError, Result};
use crate::message::Message;

#[cfg(test)]
mod tests;

/// Write half of a pending reply. Consumed on resolution, so it can only be
/// resolved or rejected once.
#[derive(Debug)]
pub struct ReplySlot {
    tx: oneshot::Sender<Result<Message>>,
}

impl ReplySlot {
    /// Create a slot and the future that observes it
    pub fn new() -> (Self, PendingReply) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, PendingReply { rx })
    }

    /// Deliver a reply. A waiter that has gone away is ignored.
    pub fn resolve(self, message: Message) {
        let _ = self.tx.send(Ok(message));
    }

    /// Deliver a failure. A waiter that has gone away is ignored.
    pub fn reject(self, error: ConnectionError) {
        let _ = self.tx.send(Err(error));
    }

    /// Whether the awaiting caller dropped its future
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read half of a pending reply, returned to the caller of `send`
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Message>>,
}

impl Future for PendingReply {
    type Output = Result<Message>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ConnectionError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Concurrent map from message id to its outstanding reply slot
#[derive(Debug)]
pub struct PendingRequestTable {
    slots: DashMap<String, ReplySlot>,
    /// Admitted entries, reserved before insertion so the limit holds under
    /// concurrent registration
    reserved: AtomicUsize,
    /// 0 = unbounded
    max_pending: usize,
}

impl Default for PendingRequestTable {
    fn default() -> Self {
        Self::new(0)
    }
}

impl PendingRequestTable {
    pub fn new(max_pending: usize) -> Self {
        Self {
            slots: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_pending,
        }
    }

    /// Register a slot for `id` and return the future the caller awaits.
    ///
    /// Fails with `DuplicateId` if `id` is already pending, or with
    /// `TooManyPending` once `max_pending` entries are outstanding.
    pub fn register(&self, id: &str) -> Result<PendingReply> {
        let max = self.max_pending;
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .map_err(|_| ConnectionError::TooManyPending(max))?;

        let (slot, reply) = ReplySlot::new();
        match self.slots.entry(id.to_string()) {
            Entry::Occupied(_) => {
                self.reserved.fetch_sub(1, Ordering::AcqRel);
                return Err(ConnectionError::DuplicateId(id.to_string()));
            }
            Entry::Vacant(entry) => {
                entry.insert(slot);
            }
        }

        // Shard lock must be released before len() walks the shards
        debug!(id, pending = self.slots.len(), "registered pending reply");
        Ok(reply)
    }

    /// Atomically remove and return the slot for `id`, if still present
    pub fn take(&self, id: &str) -> Option<ReplySlot> {
        let (_, slot) = self.slots.remove(id)?;
        self.reserved.fetch_sub(1, Ordering::AcqRel);
        Some(slot)
    }

    /// Resolve the slot for `id`. Returns false if it was already removed.
    pub fn resolve(&self, id: &str, message: Message) -> bool {
        match self.take(id) {
            Some(slot) => {
                slot.resolve(message);
                true
            }
            None => false,
        }
    }

    /// Reject the slot for `id`. Returns false if it was already removed.
    pub fn reject(&self, id: &str, error: ConnectionError) -> bool {
        match self.take(id) {
            Some(slot) => {
                slot.reject(error);
                true
            }
            None => false,
        }
    }

    /// Reject every pending slot, returning how many were rejected
    pub fn reject_all(&self, error: impl Fn() -> ConnectionError) -> usize {
        let ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.reject(id, error())).count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
