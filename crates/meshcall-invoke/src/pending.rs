//! Results waiting for a connector to travel back on.
//!
//! While local code runs an incoming call, the table records the connector
//! its result should be written to. A resume request from the caller can
//! swap in a fresher connector at any time; the delivery loop takes the
//! connector out of the table before writing, so at most one task ever
//! writes to it.
//!
//! Entries are grouped per origin system. Each origin has one [`Notify`]
//! and every mutation wakes all of its waiters, because several
//! invocations from the same origin share that waiter set.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meshcall_protocol::{InvocationId, SystemId};
use meshcall_transport::Connector;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

#[derive(Default)]
struct Origin {
    notify: Arc<Notify>,
    /// `None` while the connector is checked out or after it failed.
    slots: HashMap<InvocationId, Option<Connector>>,
}

/// What a non-blocking look at one entry found.
enum Slot {
    Ready(Connector),
    Empty(Arc<Notify>),
    Gone,
}

/// Pending invocations, keyed by origin system then invocation id.
#[derive(Default)]
pub struct PendingInvocations {
    origins: Mutex<HashMap<SystemId, Origin>>,
}

impl PendingInvocations {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SystemId, Origin>> {
        self.origins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `conn` as the result connector for `(source, id)`.
    pub fn register(&self, source: SystemId, id: InvocationId, conn: Connector) {
        let mut origins = self.lock();
        let origin = origins.entry(source).or_default();
        origin.slots.insert(id, Some(conn));
        origin.notify.notify_waiters();
        trace!(%source, %id, "invocation pending");
    }

    /// Replaces the connector of an existing entry and wakes its waiters.
    ///
    /// Returns `false`, dropping `conn`, if no such entry exists (the
    /// result was already delivered or abandoned).
    pub fn resume(&self, source: SystemId, id: InvocationId, conn: Connector) -> bool {
        let mut origins = self.lock();
        let Some(origin) = origins.get_mut(&source) else {
            return false;
        };
        let Some(slot) = origin.slots.get_mut(&id) else {
            return false;
        };
        // Any connector still parked here is stale; dropping it releases it.
        *slot = Some(conn);
        origin.notify.notify_waiters();
        trace!(%source, %id, "invocation resumed");
        true
    }

    /// Forgets `(source, id)` and wakes the origin's waiters. Any parked
    /// connector is released.
    pub fn remove(&self, source: SystemId, id: InvocationId) {
        let mut origins = self.lock();
        let Some(origin) = origins.get_mut(&source) else {
            return;
        };
        origin.slots.remove(&id);
        origin.notify.notify_waiters();
        if origin.slots.is_empty() {
            origins.remove(&source);
        }
    }

    /// `true` while `(source, id)` is registered.
    pub fn contains(&self, source: SystemId, id: InvocationId) -> bool {
        self.lock()
            .get(&source)
            .is_some_and(|origin| origin.slots.contains_key(&id))
    }

    /// Number of pending invocations across all origins.
    pub fn len(&self) -> usize {
        self.lock().values().map(|origin| origin.slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn peek(&self, source: SystemId, id: InvocationId) -> Slot {
        let mut origins = self.lock();
        let Some(origin) = origins.get_mut(&source) else {
            return Slot::Gone;
        };
        match origin.slots.get_mut(&id) {
            None => Slot::Gone,
            Some(slot) => match slot.take() {
                Some(conn) => Slot::Ready(conn),
                None => Slot::Empty(Arc::clone(&origin.notify)),
            },
        }
    }

    /// Checks out the connector for `(source, id)`, waiting for a resume
    /// to supply one if the slot is empty.
    ///
    /// Returns `None` once `deadline` passes or the entry disappears. The
    /// entry itself stays registered either way.
    pub async fn checkout(
        &self,
        source: SystemId,
        id: InvocationId,
        deadline: Instant,
    ) -> Option<Connector> {
        loop {
            let notify = match self.peek(source, id) {
                Slot::Ready(conn) => return Some(conn),
                Slot::Gone => return None,
                Slot::Empty(notify) => notify,
            };

            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // A resume may have landed between the first look and `enable`.
            match self.peek(source, id) {
                Slot::Ready(conn) => return Some(conn),
                Slot::Gone => return None,
                Slot::Empty(_) => {}
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

/// Removes its entry from the table when dropped.
pub(crate) struct PendingEntry<'a> {
    table: &'a PendingInvocations,
    source: SystemId,
    id: InvocationId,
}

impl<'a> PendingEntry<'a> {
    pub(crate) fn register(
        table: &'a PendingInvocations,
        source: SystemId,
        id: InvocationId,
        conn: Connector,
    ) -> Self {
        table.register(source, id, conn);
        Self { table, source, id }
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.table.remove(self.source, self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    const SOURCE: SystemId = SystemId(1);

    #[tokio::test]
    async fn test_checkout_returns_registered_connector_once() {
        let table = PendingInvocations::new();
        let (conn, _peer) = Connector::pair();
        let expected = conn.id();
        table.register(SOURCE, InvocationId(7), conn);
        let deadline = Instant::now() + Duration::from_millis(10);

        let got = table.checkout(SOURCE, InvocationId(7), deadline).await;

        assert_eq!(got.map(|c| c.id()), Some(expected));
        assert!(table.contains(SOURCE, InvocationId(7)));
    }

    #[test]
    fn test_resume_without_entry_is_rejected() {
        let table = PendingInvocations::new();
        let (conn, _peer) = Connector::pair();

        assert!(!table.resume(SOURCE, InvocationId(1), conn));
        assert!(table.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_wakes_on_resume() {
        let table = Arc::new(PendingInvocations::new());
        let (first, _p1) = Connector::pair();
        table.register(SOURCE, InvocationId(3), first);
        // Check out the original connector, as a failed write would.
        let deadline = Instant::now() + Duration::from_secs(5);
        drop(table.checkout(SOURCE, InvocationId(3), deadline).await);

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.checkout(SOURCE, InvocationId(3), deadline).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (fresh, _p2) = Connector::pair();
        let fresh_id = fresh.id();
        assert!(table.resume(SOURCE, InvocationId(3), fresh));

        let got = waiter.await.unwrap();
        assert_eq!(got.map(|c| c.id()), Some(fresh_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_empty_slot_times_out() {
        let table = PendingInvocations::new();
        let (conn, _peer) = Connector::pair();
        table.register(SOURCE, InvocationId(4), conn);
        let deadline = Instant::now() + Duration::from_millis(500);
        drop(table.checkout(SOURCE, InvocationId(4), deadline).await);

        let got = table.checkout(SOURCE, InvocationId(4), deadline).await;

        assert!(got.is_none());
        assert!(Instant::now() >= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkout_returns_none_when_entry_removed() {
        let table = Arc::new(PendingInvocations::new());
        let (conn, _peer) = Connector::pair();
        table.register(SOURCE, InvocationId(5), conn);
        let deadline = Instant::now() + Duration::from_secs(5);
        drop(table.checkout(SOURCE, InvocationId(5), deadline).await);

        let waiter = {
            let table = Arc::clone(&table);
            tokio::spawn(async move { table.checkout(SOURCE, InvocationId(5), deadline).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        table.remove(SOURCE, InvocationId(5));

        assert!(waiter.await.unwrap().is_none());
    }

    #[test]
    fn test_pending_entry_removes_on_drop() {
        let table = PendingInvocations::new();
        let (conn, _peer) = Connector::pair();
        {
            let _entry = PendingEntry::register(&table, SOURCE, InvocationId(9), conn);
            assert_eq!(table.len(), 1);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_entries_from_one_origin_are_independent() {
        let table = PendingInvocations::new();
        let (a, _pa) = Connector::pair();
        let (b, _pb) = Connector::pair();
        table.register(SOURCE, InvocationId(1), a);
        table.register(SOURCE, InvocationId(2), b);

        table.remove(SOURCE, InvocationId(1));

        assert!(!table.contains(SOURCE, InvocationId(1)));
        assert!(table.contains(SOURCE, InvocationId(2)));
    }
}
