//! Per-request execution context.
//!
//! A [`RequestContext`] travels explicitly through every storage and central
//! call. Clones share the same transaction guard, so a workflow composed of
//! several transactional calls observes the guard set by the outermost one
//! without any process-wide or thread-local state.
//!
//! Work that must only happen once the outermost transaction commits, such
//! as casting to the zone manager, is queued with [`RequestContext::defer`].
//! The transaction runner drains the queue after commit and drops it on
//! rollback.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

type Deferred = BoxFuture<'static, ()>;

/// Execution context for one unit of work.
#[derive(Clone)]
pub struct RequestContext {
    request_id: Uuid,
    edit_managed_records: bool,
    transaction: Arc<AtomicBool>,
    deferred: Arc<Mutex<Vec<Deferred>>>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("edit_managed_records", &self.edit_managed_records)
            .field("transaction_held", &self.transaction_held())
            .field("deferred", &self.deferred.lock().len())
            .finish()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestContext {
    /// Fresh context with no transaction held.
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            edit_managed_records: false,
            transaction: Arc::new(AtomicBool::new(false)),
            deferred: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Copy for work that outlives the caller's transaction.
    ///
    /// Keeps the request id and the managed-records flag but gets its own
    /// transaction guard and deferred queue, so transactions opened under it
    /// never nest into the caller's.
    pub fn detached(&self) -> Self {
        Self {
            request_id: self.request_id,
            edit_managed_records: self.edit_managed_records,
            transaction: Arc::new(AtomicBool::new(false)),
            deferred: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fresh admin context allowed to edit reconciler-owned records.
    pub fn managed() -> Self {
        Self::new().with_managed_records()
    }

    /// Copy of this context that may edit managed records.
    ///
    /// The transaction guard stays shared with `self`.
    pub fn with_managed_records(mut self) -> Self {
        self.edit_managed_records = true;
        self
    }

    /// Request id used in logs.
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Whether managed records may be changed under this context.
    pub fn edit_managed_records(&self) -> bool {
        self.edit_managed_records
    }

    /// True while an outer transaction is open on this context.
    pub fn transaction_held(&self) -> bool {
        self.transaction.load(Ordering::Acquire)
    }

    /// Queue `work` to run after the outermost transaction commits.
    ///
    /// Queued work is dropped unrun if that transaction rolls back.
    pub fn defer(&self, work: BoxFuture<'static, ()>) {
        self.deferred.lock().push(work);
    }

    pub(crate) fn take_deferred(&self) -> Vec<BoxFuture<'static, ()>> {
        std::mem::take(&mut *self.deferred.lock())
    }

    pub(crate) fn discard_deferred(&self) {
        self.deferred.lock().clear();
    }

    /// Claim the transaction guard.
    ///
    /// Returns `None` if an outer caller already holds it. The guard is
    /// released when the returned value is dropped.
    pub(crate) fn hold_transaction(&self) -> Option<TransactionGuard> {
        self.transaction
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TransactionGuard {
                flag: Arc::clone(&self.transaction),
            })
    }
}

/// Releases the transaction guard on drop.
#[derive(Debug)]
pub(crate) struct TransactionGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_is_exclusive_and_shared_by_clones() {
        let ctx = RequestContext::new();
        let clone = ctx.clone();

        let guard = ctx.hold_transaction().expect("first claim");
        assert!(clone.transaction_held());
        assert!(clone.hold_transaction().is_none());

        drop(guard);
        assert!(!ctx.transaction_held());
        assert!(clone.hold_transaction().is_some());
    }

    #[test]
    fn test_independent_contexts_do_not_share_guard() {
        let a = RequestContext::new();
        let b = RequestContext::new();

        let _guard = a.hold_transaction().unwrap();
        assert!(!b.transaction_held());
    }

    #[test]
    fn test_detached_keeps_identity_but_not_guard() {
        let ctx = RequestContext::managed();
        let _guard = ctx.hold_transaction().unwrap();

        let detached = ctx.detached();
        assert_eq!(detached.request_id(), ctx.request_id());
        assert!(detached.edit_managed_records());
        assert!(!detached.transaction_held());
        assert!(detached.hold_transaction().is_some());
    }

    #[tokio::test]
    async fn test_deferred_work_is_shared_by_clones() {
        let ctx = RequestContext::new();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        ctx.clone().defer(Box::pin(async move {
            flag.store(true, Ordering::SeqCst);
        }));
        assert!(ctx.detached().take_deferred().is_empty());

        for work in ctx.take_deferred() {
            work.await;
        }
        assert!(ran.load(Ordering::SeqCst));
        assert!(ctx.take_deferred().is_empty());
    }

    #[test]
    fn test_managed_flag() {
        assert!(!RequestContext::new().edit_managed_records());
        assert!(RequestContext::managed().edit_managed_records());
    }
}
