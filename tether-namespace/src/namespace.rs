//! The namespace object and its two reference counts
//!
//! - **active** gates use and visibility. [`NamespaceRef`] owns one active
//!   count. When the last one drops, the namespace is queued for the
//!   teardown worker instead of being torn down in place.
//! - **passive** keeps the structure alive after logical death. The
//!   namespace holds one passive count of its own, released by the teardown
//!   pass; [`PassiveRef`] holds extra ones. When passive reaches zero the
//!   extension table is released and the namespace is `Freed`.
//!
//! Transition rules:
//! - active goes 1 → 0 exactly once and never increases from 0
//!   ([`Namespace::try_get`] refuses).
//! - passive only reaches 0 after the teardown pass, or after a failed
//!   create that never published the namespace.

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering, fence};

use parking_lot::Mutex;
use tether_core::{Cookie, SlotId};
use tether_security::Principal;

use crate::extension::ExtensionTable;
use crate::lifecycle::CleanupQueue;
use crate::peer_id::PeerIdTable;

/// Per-namespace lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum NamespaceState {
    /// Structure allocated, no subsystem has seen it
    Allocated = 0,
    /// Init hooks are running
    Initializing = 1,
    /// Published and usable
    Live = 2,
    /// Last active reference dropped, waiting for the teardown worker
    Unhooking = 3,
    /// Unlinked; teardown hooks are running
    TearingDown = 4,
    /// Torn down, held by passive references
    PassiveWait = 5,
    /// Passive count reached zero
    Freed = 6,
}

impl NamespaceState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Allocated,
            1 => Self::Initializing,
            2 => Self::Live,
            3 => Self::Unhooking,
            4 => Self::TearingDown,
            5 => Self::PassiveWait,
            _ => Self::Freed,
        }
    }
}

impl fmt::Display for NamespaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Allocated => "allocated",
            Self::Initializing => "initializing",
            Self::Live => "live",
            Self::Unhooking => "unhooking",
            Self::TearingDown => "tearing-down",
            Self::PassiveWait => "passive-wait",
            Self::Freed => "freed",
        };
        f.write_str(name)
    }
}

/// An isolated instance of namespaced state
pub struct Namespace {
    cookie: Cookie,
    active: AtomicUsize,
    passive: AtomicUsize,
    state: AtomicU8,
    extensions: ExtensionTable,
    peer_ids: PeerIdTable,
    owner: Mutex<Option<Arc<Principal>>>,
    queue: Arc<CleanupQueue>,
}

impl Namespace {
    pub(crate) fn new(
        cookie: Cookie,
        owner: Arc<Principal>,
        slots: usize,
        queue: Arc<CleanupQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cookie,
            active: AtomicUsize::new(1),
            passive: AtomicUsize::new(1),
            state: AtomicU8::new(NamespaceState::Allocated as u8),
            extensions: ExtensionTable::with_capacity(slots),
            peer_ids: PeerIdTable::new(),
            owner: Mutex::new(Some(owner)),
            queue,
        })
    }

    /// Unique cookie
    #[must_use]
    pub const fn cookie(&self) -> Cookie {
        self.cookie
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> NamespaceState {
        NamespaceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, next: NamespaceState) {
        let prev = NamespaceState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        tracing::trace!(cookie = %self.cookie, from = %prev, to = %next, "Namespace state change");
    }

    /// Current active count
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Current passive count
    #[must_use]
    pub fn passive_count(&self) -> usize {
        self.passive.load(Ordering::Acquire)
    }

    /// Whether the namespace can still be used
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.active_count() > 0
    }

    /// Principal owning this namespace, until the teardown pass releases it
    #[must_use]
    pub fn owner(&self) -> Option<Arc<Principal>> {
        self.owner.lock().clone()
    }

    /// The extension table
    #[must_use]
    pub const fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }

    /// Payload a subsystem stored in `slot`
    #[must_use]
    pub fn extension<T: Any + Send + Sync>(&self, slot: SlotId) -> Option<Arc<T>> {
        self.extensions.get(slot)
    }

    /// Peer ids assigned by this namespace
    #[must_use]
    pub const fn peer_ids(&self) -> &PeerIdTable {
        &self.peer_ids
    }

    /// Upgrade a borrowed reference into an active one.
    ///
    /// Fails once the active count has reached zero.
    #[must_use]
    pub fn try_get(self: &Arc<Self>) -> Option<NamespaceRef> {
        self.active
            .fetch_update(Ordering::Acquire, Ordering::Relaxed, |n| {
                (n > 0).then_some(n + 1)
            })
            .ok()
            .map(|_| NamespaceRef {
                ns: Arc::clone(self),
            })
    }

    /// Keep the structure alive past teardown.
    ///
    /// Fails once the passive count has reached zero and the namespace is
    /// freed.
    #[must_use]
    pub fn hold_passive(self: &Arc<Self>) -> Option<PassiveRef> {
        self.passive
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n > 0).then_some(n + 1)
            })
            .ok()
            .map(|_| PassiveRef {
                ns: Arc::clone(self),
            })
    }

    /// Wrap the initial active count created by [`Namespace::new`]
    pub(crate) fn adopt(self: Arc<Self>) -> NamespaceRef {
        NamespaceRef { ns: self }
    }

    /// Give up the initial active count without queueing teardown; used
    /// when a namespace is discarded before it was ever published.
    pub(crate) fn abandon(&self) {
        self.active.store(0, Ordering::Release);
    }

    pub(crate) fn release_owner(&self) {
        if let Some(owner) = self.owner.lock().take() {
            owner.uncharge_namespace();
        }
    }

    pub(crate) fn passive_dec(&self) {
        if self.passive.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        self.extensions.release_all();
        self.set_state(NamespaceState::Freed);
        self.queue.record_free();
        tracing::debug!(cookie = %self.cookie, "Namespace freed");
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("cookie", &self.cookie)
            .field("state", &self.state())
            .field("active", &self.active_count())
            .field("passive", &self.passive_count())
            .finish_non_exhaustive()
    }
}

/// Strong (active) reference; each one must be dropped exactly once
pub struct NamespaceRef {
    ns: Arc<Namespace>,
}

impl NamespaceRef {
    /// Borrowed (non-active) handle to the same namespace
    #[must_use]
    pub fn as_arc(&self) -> &Arc<Namespace> {
        &self.ns
    }

    /// Whether two references name the same namespace
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ns, &other.ns)
    }
}

impl Clone for NamespaceRef {
    fn clone(&self) -> Self {
        self.ns.active.fetch_add(1, Ordering::Relaxed);
        Self {
            ns: Arc::clone(&self.ns),
        }
    }
}

impl Deref for NamespaceRef {
    type Target = Namespace;

    fn deref(&self) -> &Namespace {
        &self.ns
    }
}

impl Drop for NamespaceRef {
    fn drop(&mut self) {
        if self.ns.active.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        fence(Ordering::Acquire);
        self.ns.set_state(NamespaceState::Unhooking);
        self.ns.queue.enqueue(Arc::clone(&self.ns));
    }
}

impl fmt::Debug for NamespaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.ns, f)
    }
}

/// Passive reference: keeps the namespace structure from being freed
pub struct PassiveRef {
    ns: Arc<Namespace>,
}

impl PassiveRef {
    /// The namespace being held
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }
}

impl Drop for PassiveRef {
    fn drop(&mut self) {
        self.ns.passive_dec();
    }
}

impl fmt::Debug for PassiveRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PassiveRef").field(&self.ns.cookie).finish()
    }
}
