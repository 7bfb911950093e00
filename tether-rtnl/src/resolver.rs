//! Peer namespace resolution by process id or handle
//!
//! Requests name a peer either by a process living in it or by an open
//! handle. Where those come from is outside this crate; handlers only see
//! the [`PeerResolver`] trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tether_core::{Error, ProcessId, Result};
use tether_namespace::{Namespace, NamespaceRef};

/// Source of peer namespaces for `PID` and `FD` attributes
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; handlers share them across tasks.
#[async_trait]
pub trait PeerResolver: Send + Sync {
    /// Namespace of process `pid`
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the process or its namespace is gone
    async fn by_pid(&self, pid: ProcessId) -> Result<NamespaceRef>;

    /// Namespace referred to by handle `fd`
    ///
    /// # Errors
    /// Returns [`Error::NotFound`] if the handle is unknown or its
    /// namespace is gone
    async fn by_fd(&self, fd: u32) -> Result<NamespaceRef>;
}

/// In-memory resolver with explicit bindings
///
/// Bindings hold the namespace structure but no active reference, so a
/// bound namespace is still torn down normally once everyone else drops it.
///
/// # Example
/// ```no_run
/// # async fn demo(ns: tether_namespace::NamespaceRef) {
/// use tether_core::ProcessId;
/// use tether_rtnl::{PeerResolver, StaticResolver};
///
/// let resolver = StaticResolver::new();
/// resolver.bind_pid(ProcessId::from_raw(42), &ns);
/// let peer = resolver.by_pid(ProcessId::from_raw(42)).await.unwrap();
/// assert!(peer.ptr_eq(&ns));
/// # }
/// ```
#[derive(Clone, Default)]
pub struct StaticResolver {
    state: Arc<RwLock<StaticState>>,
}

#[derive(Default)]
struct StaticState {
    pids: HashMap<ProcessId, Arc<Namespace>>,
    fds: HashMap<u32, Arc<Namespace>>,
    lookups: usize,
}

impl StaticResolver {
    /// Create an empty resolver
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `pid` resolve to `ns`
    pub fn bind_pid(&self, pid: ProcessId, ns: &NamespaceRef) {
        self.state.write().pids.insert(pid, Arc::clone(ns.as_arc()));
    }

    /// Make `fd` resolve to `ns`
    pub fn bind_fd(&self, fd: u32, ns: &NamespaceRef) {
        self.state.write().fds.insert(fd, Arc::clone(ns.as_arc()));
    }

    /// Number of lookups served (for testing)
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.state.read().lookups
    }

    fn resolve(
        &self,
        found: impl FnOnce(&StaticState) -> Option<Arc<Namespace>>,
        what: String,
    ) -> Result<NamespaceRef> {
        let ns = {
            let mut state = self.state.write();
            state.lookups += 1;
            found(&state)
        };
        let Some(ns) = ns else {
            return Err(Error::not_found(what));
        };
        ns.try_get()
            .ok_or_else(|| Error::not_found(format!("{what} is being torn down")))
    }
}

#[async_trait]
impl PeerResolver for StaticResolver {
    async fn by_pid(&self, pid: ProcessId) -> Result<NamespaceRef> {
        self.resolve(|s| s.pids.get(&pid).cloned(), format!("namespace of pid {pid}"))
    }

    async fn by_fd(&self, fd: u32) -> Result<NamespaceRef> {
        self.resolve(|s| s.fds.get(&fd).cloned(), format!("namespace handle {fd}"))
    }
}

impl std::fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("StaticResolver")
            .field("pids", &state.pids.len())
            .field("fds", &state.fds.len())
            .finish_non_exhaustive()
    }
}
