//! Pending-request registry.
//!
//! Maps each outstanding `RequestId` to a one-shot completion slot. The task
//! that asked for a connection holds the receiving `Waiter`; the accept loop
//! hands the matching inbound connection over with [`Registry::deliver`].
//!
//! # Exactly once
//!
//! An entry leaves the map exactly once. `deliver`, `unregister` and `close`
//! all go through `DashMap::remove`, so when they race on one id a single
//! caller gets the slot and the others see nothing:
//!
//! - `deliver` wins: the connection is sent to the waiter. A waiter whose
//!   deadline fired meanwhile finds its `unregister` empty-handed and takes
//!   the connection instead of reporting a timeout.
//! - `unregister` wins: `deliver` gets the connection back and the caller
//!   closes it as unmatched.
//!
//! No lock is held across an await; the shard lock only covers the map
//! mutation itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{Error, Result};
use crate::id::RequestId;

/// Concurrent map of pending requests to their completion slots.
#[derive(Debug)]
pub struct Registry<C> {
    waiters: DashMap<RequestId, oneshot::Sender<C>>,
    closed: AtomicBool,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            waiters: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh completion slot for `id`.
    ///
    /// Fails with `DuplicateId` if `id` is already pending and with `Closed`
    /// after [`close`](Self::close).
    pub fn register(self: &Arc<Self>, id: RequestId) -> Result<Waiter<C>> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let (tx, rx) = oneshot::channel();
        match self.waiters.entry(id) {
            Entry::Occupied(_) => return Err(Error::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        // close() may have drained the map between the check and the insert
        if self.is_closed() {
            self.waiters.remove(&id);
            return Err(Error::Closed);
        }
        trace!(id = %id, "registered waiter");
        Ok(Waiter {
            id,
            rx,
            registered_at: Instant::now(),
            registry: Arc::clone(self),
        })
    }

    /// Hands `conn` to the waiter for `id` and removes the entry.
    ///
    /// Returns the connection as `Err` when nobody is waiting for it (late,
    /// duplicate or forged id); the caller must close it. Never creates an
    /// entry.
    pub fn deliver(&self, id: RequestId, conn: C) -> std::result::Result<(), C> {
        match self.waiters.remove(&id) {
            Some((_, tx)) => tx.send(conn),
            None => Err(conn),
        }
    }

    /// Removes the entry for `id`. Returns whether one was present.
    pub fn unregister(&self, id: RequestId) -> bool {
        self.waiters.remove(&id).is_some()
    }

    /// Drops every pending slot, waking their waiters with `Closed`, and
    /// refuses further registrations. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.waiters.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of pending waiters.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Receiving side of a registration.
///
/// Dropping a `Waiter` unregisters its id, so a cancelled wait never leaves
/// an entry behind.
#[derive(Debug)]
pub struct Waiter<C> {
    id: RequestId,
    rx: oneshot::Receiver<C>,
    registered_at: Instant,
    registry: Arc<Registry<C>>,
}

impl<C> Waiter<C> {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Waits for the connection until `deadline`.
    ///
    /// Fails with `Timeout` if the deadline passes with the entry still in
    /// place and with `Closed` if the registry is closed first.
    pub async fn wait_until(mut self, deadline: Instant) -> Result<C> {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(_)) => Err(Error::Closed),
            Err(_) => {
                if self.registry.unregister(self.id) {
                    trace!(id = %self.id, "wait timed out");
                    return Err(Error::Timeout(self.registered_at.elapsed()));
                }
                // The slot was already taken by deliver (connection in
                // flight) or by close (sender dropped); either resolves now.
                (&mut self.rx).await.map_err(|_| Error::Closed)
            }
        }
    }
}

impl<C> Drop for Waiter<C> {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
