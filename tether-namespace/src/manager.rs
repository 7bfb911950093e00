//! Namespace manager: the service object tying registry, directory,
//! peer-id exchange and the teardown worker together
//!
//! There is no process-wide instance. Callers construct one with
//! [`NamespaceManager::start`] inside a tokio runtime and share it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tether_core::{Cookie, CookieAllocator, Error, NsId, NsidEvent, Result};
use tether_security::Principal;
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::ManagerConfig;
use crate::directory::NamespaceDirectory;
use crate::grace::{GraceDomain, ReadGuard};
use crate::lifecycle::{self, CleanupQueue, Undo};
use crate::namespace::{Namespace, NamespaceRef, NamespaceState};
use crate::peer_id;
use crate::registry::{self, Registry};
use crate::subsystem::{SubsystemDescriptor, SubsystemKind};

/// State shared between the manager handle and the teardown worker
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: ManagerConfig,
    pub(crate) registry: RwLock<Registry>,
    pub(crate) directory: NamespaceDirectory,
    pub(crate) grace: GraceDomain,
    pub(crate) queue: Arc<CleanupQueue>,
    pub(crate) events: broadcast::Sender<NsidEvent>,
    cookies: CookieAllocator,
    created: AtomicU64,
}

impl Shared {
    fn undo(&self) -> Undo<'_> {
        Undo {
            grace: &self.grace,
            yield_between: self.config.yield_between_hooks,
        }
    }
}

/// Counters describing a manager's lifetime activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// Namespaces successfully created
    pub created: u64,
    /// Namespaces whose passive count reached zero
    pub freed: u64,
    /// Teardown passes completed
    pub teardown_passes: u64,
    /// Namespaces queued or being torn down
    pub pending: usize,
    /// Namespaces currently linked in the directory
    pub live: usize,
}

/// Namespace lifecycle service
pub struct NamespaceManager {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl NamespaceManager {
    /// Validate `config`, build the manager and spawn its teardown worker
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the configuration is invalid or
    /// no tokio runtime is running
    pub fn start(config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::invalid(format!("namespace manager needs a tokio runtime: {e}")))?;

        let (queue, rx) = CleanupQueue::new();
        let (events, _) = broadcast::channel(config.event_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            grace: GraceDomain::new(config.barrier_poll()),
            config,
            registry: RwLock::new(Registry::new()),
            directory: NamespaceDirectory::new(),
            queue,
            events,
            cookies: CookieAllocator::new(),
            created: AtomicU64::new(0),
        });

        let worker = runtime.spawn(lifecycle::run_worker(Arc::clone(&shared), rx, shutdown_rx));
        tracing::info!(
            initial_slots = shared.config.initial_slots,
            "Namespace manager started"
        );

        Ok(Self {
            shared,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The configuration in use
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Register a subsystem, initializing it for every existing namespace
    ///
    /// # Errors
    /// - [`Error::AlreadyExists`] if `desc` is already registered
    /// - [`Error::InvalidArgument`] for a zero-sized slot
    /// - [`Error::InitFailure`] if init fails for an existing namespace; the
    ///   descriptor is unregistered and the namespaces it already reached
    ///   are torn down for it
    pub async fn register(&self, desc: &Arc<SubsystemDescriptor>) -> Result<()> {
        self.register_as(desc, SubsystemKind::Subsystem).await
    }

    /// Register a device-class subsystem (appended after every subsystem)
    ///
    /// # Errors
    /// Same as [`NamespaceManager::register`]
    pub async fn register_device(&self, desc: &Arc<SubsystemDescriptor>) -> Result<()> {
        self.register_as(desc, SubsystemKind::Device).await
    }

    async fn register_as(&self, desc: &Arc<SubsystemDescriptor>, kind: SubsystemKind) -> Result<()> {
        let task = tokio::spawn(register_task(Arc::clone(&self.shared), Arc::clone(desc), kind));
        task.await?
    }

    /// Unregister a subsystem and tear it down in every linked namespace.
    ///
    /// Unknown descriptors are ignored. The teardown runs on its own task,
    /// so it completes even if this future is dropped.
    pub async fn unregister(&self, desc: &Arc<SubsystemDescriptor>) {
        let task = tokio::spawn(unregister_task(Arc::clone(&self.shared), Arc::clone(desc)));
        if let Err(e) = task.await {
            tracing::error!(subsystem = desc.name(), error = %e, "Unregister task failed");
        }
    }

    /// Create a namespace owned by `owner`
    ///
    /// Creation runs on its own task: dropping this future never leaves a
    /// half-initialized namespace or a stray quota charge behind.
    ///
    /// # Errors
    /// - [`Error::NoSpace`] if `owner`'s namespace quota is exhausted
    /// - [`Error::InitFailure`] if a subsystem fails init; every subsystem
    ///   initialized before it is torn down again and the namespace is never
    ///   published
    /// - [`Error::TaskJoin`] if an init hook panicked
    pub async fn create(&self, owner: &Arc<Principal>) -> Result<NamespaceRef> {
        let task = tokio::spawn(create_task(Arc::clone(&self.shared), Arc::clone(owner)));
        task.await?
    }

    /// Return `current` when not isolating, or a fresh namespace otherwise
    ///
    /// # Errors
    /// Same as [`NamespaceManager::create`]
    pub async fn copy_namespace(
        &self,
        owner: &Arc<Principal>,
        isolate: bool,
        current: &NamespaceRef,
    ) -> Result<NamespaceRef> {
        if !isolate {
            return Ok(current.clone());
        }
        self.create(owner).await
    }

    /// Active reference to the linked namespace tagged `cookie`
    #[must_use]
    pub fn find(&self, cookie: Cookie) -> Option<NamespaceRef> {
        self.shared.directory.find(cookie)
    }

    /// The directory of linked namespaces
    #[must_use]
    pub fn directory(&self) -> &NamespaceDirectory {
        &self.shared.directory
    }

    /// Active references to every namespace that is still alive
    #[must_use]
    pub fn live_namespaces(&self) -> Vec<NamespaceRef> {
        self.shared
            .directory
            .snapshot()
            .iter()
            .filter_map(Namespace::try_get)
            .collect()
    }

    /// Enter a read section of the manager's reclamation domain
    pub fn read_section(&self) -> ReadGuard<'_> {
        self.shared.grace.read()
    }

    /// Wait until every read section that began before the call has ended
    pub async fn synchronize(&self) {
        self.shared.grace.synchronize().await;
    }

    /// Wait for any in-flight registration change or teardown pass
    pub async fn barrier(&self) {
        drop(self.shared.registry.write().await);
    }

    /// Wait until every queued namespace has been through a teardown pass
    pub async fn wait_idle(&self) {
        self.shared.queue.wait_idle().await;
    }

    /// Snapshot of the manager's counters
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        let shared = &self.shared;
        ManagerStats {
            created: shared.created.load(Ordering::Relaxed),
            freed: shared.queue.freed(),
            teardown_passes: shared.queue.passes(),
            pending: shared.queue.pending(),
            live: shared.directory.len(),
        }
    }

    /// Subscribe to peer-id notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<NsidEvent> {
        self.shared.events.subscribe()
    }

    /// Allocate a peer id for `peer` in `owner`'s table and broadcast it
    ///
    /// # Errors
    /// See [`peer_id::allocate`]
    pub fn allocate_id(
        &self,
        owner: &NamespaceRef,
        peer: &Arc<Namespace>,
        requested: Option<NsId>,
        portid: u32,
    ) -> Result<NsId> {
        let nsid = peer_id::allocate(owner, peer, requested)?;
        lifecycle::publish(
            &self.shared,
            NsidEvent::New {
                owner: owner.cookie(),
                peer: peer.cookie(),
                nsid,
                portid,
            },
        );
        Ok(nsid)
    }

    /// Active reference to the peer `owner` calls `id`
    #[must_use]
    pub fn resolve_id(&self, owner: &Namespace, id: NsId) -> Option<NamespaceRef> {
        let _section = self.shared.grace.read();
        peer_id::resolve(owner, id)
    }

    /// Id `owner` uses for `peer`, if any
    #[must_use]
    pub fn lookup_id(&self, owner: &Namespace, peer: &Namespace) -> Option<NsId> {
        let _section = self.shared.grace.read();
        owner.peer_ids().lookup(peer)
    }

    /// Id `owner` uses for `peer`, allocating one if needed.
    ///
    /// `None` when either namespace is dying or no id is left.
    #[must_use]
    pub fn id_or_alloc(&self, owner: &Namespace, peer: &Arc<Namespace>) -> Option<NsId> {
        let (nsid, allocated) = peer_id::get_or_allocate(owner, peer)?;
        if allocated {
            lifecycle::publish(
                &self.shared,
                NsidEvent::New {
                    owner: owner.cookie(),
                    peer: peer.cookie(),
                    nsid,
                    portid: 0,
                },
            );
        }
        Some(nsid)
    }

    /// Whether `owner` has an id for `peer`
    #[must_use]
    pub fn has_id(&self, owner: &Namespace, peer: &Namespace) -> bool {
        self.lookup_id(owner, peer).is_some()
    }

    /// Drain the teardown queue and stop the worker
    pub async fn shutdown(&self) {
        self.wait_idle().await;
        let _ = self.shutdown.send(true);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Teardown worker ended abnormally");
            }
        }
        tracing::info!(stats = ?self.stats(), "Namespace manager stopped");
    }
}

async fn register_task(
    shared: Arc<Shared>,
    desc: Arc<SubsystemDescriptor>,
    kind: SubsystemKind,
) -> Result<()> {
    let mut reg = shared.registry.write().await;
    let at = reg.insert(&desc, kind)?;
    tracing::info!(
        subsystem = desc.name(),
        kind = ?kind,
        position = at,
        slot = ?desc.slot_id(),
        "Subsystem registered"
    );

    if !desc.needs_init() {
        return Ok(());
    }

    let hint = reg.slot_hint();
    let members = shared.directory.snapshot();
    let mut done = Vec::with_capacity(members.len());
    for ns in members.iter() {
        if let Err(e) = registry::init_one(&desc, ns, hint) {
            reg.remove(&desc);
            shared
                .undo()
                .run(std::slice::from_ref(&desc), 1, &done)
                .await;
            tracing::warn!(
                subsystem = desc.name(),
                rolled_back = done.len(),
                error = %e,
                "Subsystem registration rolled back"
            );
            return Err(e);
        }
        done.push(Arc::clone(ns));
    }
    Ok(())
}

async fn unregister_task(shared: Arc<Shared>, desc: Arc<SubsystemDescriptor>) {
    let mut reg = shared.registry.write().await;
    if reg.remove(&desc).is_none() {
        tracing::warn!(subsystem = desc.name(), "Unregister of unknown subsystem");
        return;
    }

    let members = shared.directory.snapshot();
    shared
        .undo()
        .run(std::slice::from_ref(&desc), 1, &members)
        .await;
    drop(reg);
    tracing::info!(
        subsystem = desc.name(),
        namespaces = members.len(),
        "Subsystem unregistered"
    );
}

async fn create_task(shared: Arc<Shared>, owner: Arc<Principal>) -> Result<NamespaceRef> {
    let reg = shared.registry.read().await;
    // the namespace takes over the charge; `release_owner` returns it
    owner.charge_namespace()?;
    let cookie = shared.cookies.next();
    let hint = reg.slot_hint();
    let ns = Namespace::new(
        cookie,
        Arc::clone(&owner),
        shared.config.initial_slots.max(hint),
        Arc::clone(&shared.queue),
    );
    ns.set_state(NamespaceState::Initializing);

    for (i, desc) in reg.ops().iter().enumerate() {
        if let Err(e) = registry::init_one(desc, &ns, hint) {
            tracing::warn!(
                cookie = %cookie,
                subsystem = desc.name(),
                rolled_back = i,
                error = %e,
                "Namespace creation rolled back"
            );
            ns.abandon();
            shared
                .undo()
                .run(&reg.ops()[..i], reg.first_device().min(i), std::slice::from_ref(&ns))
                .await;
            drop(reg);
            ns.release_owner();
            ns.passive_dec();
            return Err(e);
        }
    }

    shared.directory.insert(Arc::clone(&ns));
    drop(reg);
    ns.set_state(NamespaceState::Live);
    shared.created.fetch_add(1, Ordering::Relaxed);
    tracing::info!(cookie = %cookie, owner = owner.name(), "Namespace created");

    Ok(ns.adopt())
}

impl fmt::Debug for NamespaceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceManager")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
