//! Directory of live namespaces
//!
//! Readers load an immutable snapshot; writers serialize on a short lock and
//! publish a new vector. Insertion order is creation order, which is what
//! makes the teardown horizon meaningful: anything appended after the
//! horizon was created after the batch was unlinked.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tether_core::Cookie;

use crate::namespace::{Namespace, NamespaceRef};

/// Published list of every namespace that completed creation and has not
/// been unlinked by a teardown pass
#[derive(Debug)]
pub struct NamespaceDirectory {
    members: ArcSwap<Vec<Arc<Namespace>>>,
    writer: Mutex<()>,
}

impl NamespaceDirectory {
    pub(crate) fn new() -> Self {
        Self {
            members: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(()),
        }
    }

    /// Number of linked namespaces
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.load().len()
    }

    /// Whether the directory is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.load().is_empty()
    }

    /// Current snapshot, oldest first. Entries may already be dying.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Arc<Namespace>>> {
        self.members.load_full()
    }

    /// Whether `ns` is linked
    #[must_use]
    pub fn contains(&self, ns: &Namespace) -> bool {
        self.members.load().iter().any(|m| std::ptr::eq(&**m, ns))
    }

    /// Active reference to the namespace tagged `cookie`, if it is still alive
    #[must_use]
    pub fn find(&self, cookie: Cookie) -> Option<NamespaceRef> {
        self.members
            .load()
            .iter()
            .find(|ns| ns.cookie() == cookie)
            .and_then(Namespace::try_get)
    }

    pub(crate) fn insert(&self, ns: Arc<Namespace>) {
        let _writer = self.writer.lock();
        let mut next = Vec::clone(&self.members.load());
        next.push(ns);
        self.members.store(Arc::new(next));
    }

    /// Remove every member of `batch` and return the newest remaining
    /// namespace: the horizon for the peer-id sweep.
    pub(crate) fn unlink(&self, batch: &[Arc<Namespace>]) -> Option<Arc<Namespace>> {
        let _writer = self.writer.lock();
        let next: Vec<_> = self
            .members
            .load()
            .iter()
            .filter(|m| !batch.iter().any(|b| Arc::ptr_eq(b, m)))
            .cloned()
            .collect();
        let horizon = next.last().cloned();
        self.members.store(Arc::new(next));
        horizon
    }

    /// Linked namespaces up to and including `horizon`
    pub(crate) fn up_to(&self, horizon: &Arc<Namespace>) -> Vec<Arc<Namespace>> {
        let snapshot = self.members.load();
        let mut out = Vec::with_capacity(snapshot.len());
        for ns in snapshot.iter() {
            out.push(Arc::clone(ns));
            if Arc::ptr_eq(ns, horizon) {
                break;
            }
        }
        out
    }
}
