//! Deferred teardown
//!
//! Dropping the last [`NamespaceRef`](crate::NamespaceRef) pushes the
//! namespace onto the cleanup queue. A single worker task drains the queue
//! into batches and runs one teardown pass per batch:
//!
//! 1. Unlink the batch from the directory and note the horizon.
//! 2. Remove every peer-id entry that names a batch member, in namespaces
//!    up to the horizon, and empty the members' own tables.
//! 3. Undo every registered subsystem across the batch (reverse order).
//! 4. Wait for a grace period, then drop the owner and passive references.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tether_core::NsidEvent;
use tokio::sync::{Notify, mpsc, watch};

use crate::grace::GraceDomain;
use crate::manager::Shared;
use crate::namespace::{Namespace, NamespaceState};
use crate::subsystem::SubsystemDescriptor;

/// Pending-destroy list shared by every namespace of one manager
#[derive(Debug)]
pub(crate) struct CleanupQueue {
    tx: mpsc::UnboundedSender<Arc<Namespace>>,
    pending: AtomicUsize,
    idle: Notify,
    freed: AtomicU64,
    passes: AtomicU64,
}

impl CleanupQueue {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Arc<Namespace>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            tx,
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            freed: AtomicU64::new(0),
            passes: AtomicU64::new(0),
        });
        (queue, rx)
    }

    /// Queue with no worker behind it
    #[cfg(test)]
    pub(crate) fn detached() -> Arc<Self> {
        Self::new().0
    }

    pub(crate) fn enqueue(&self, ns: Arc<Namespace>) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let cookie = ns.cookie();
        if self.tx.send(ns).is_err() {
            tracing::warn!(cookie = %cookie, "Teardown worker is gone, namespace will not be torn down");
            self.complete(1);
            return;
        }
        tracing::debug!(cookie = %cookie, "Namespace queued for teardown");
    }

    pub(crate) fn record_free(&self) {
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }

    pub(crate) fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    fn complete(&self, n: usize) {
        self.pending.fetch_sub(n, Ordering::AcqRel);
        self.idle.notify_waiters();
    }

    /// Resolve once nothing is queued or being torn down
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Runs subsystem undo sequences over a set of namespaces
pub(crate) struct Undo<'a> {
    pub(crate) grace: &'a GraceDomain,
    pub(crate) yield_between: bool,
}

impl Undo<'_> {
    /// Undo `ops` for every namespace in `batch`.
    ///
    /// `ops[..first_device]` is the subsystem segment, the rest are devices.
    /// Pre-teardown runs across the subsystem segment then the device
    /// segment, each in reverse. After one grace period, teardown and
    /// batch-teardown run per descriptor in reverse over the whole list, and
    /// finally the slots are released in reverse.
    pub(crate) async fn run(
        &self,
        ops: &[Arc<SubsystemDescriptor>],
        first_device: usize,
        batch: &[Arc<Namespace>],
    ) {
        if ops.is_empty() || batch.is_empty() {
            return;
        }
        let split = first_device.min(ops.len());
        let (subsystems, devices) = ops.split_at(split);

        for desc in subsystems.iter().rev().chain(devices.iter().rev()) {
            if let Some(hook) = desc.pre_teardown_hook() {
                for ns in batch {
                    hook(ns);
                    self.pace().await;
                }
            }
        }

        self.grace.synchronize().await;

        for desc in ops.iter().rev() {
            if let Some(hook) = desc.teardown_hook() {
                for ns in batch {
                    hook(ns);
                    self.pace().await;
                }
            }
            if let Some(hook) = desc.batch_teardown_hook() {
                hook(batch);
            }
        }

        for desc in ops.iter().rev() {
            if let Some(id) = desc.slot_id() {
                for ns in batch {
                    ns.extensions().clear(id);
                }
            }
        }
    }

    async fn pace(&self) {
        if self.yield_between {
            tokio::task::yield_now().await;
        }
    }
}

/// Teardown worker loop; exits on shutdown or when every sender is gone
pub(crate) async fn run_worker(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Arc<Namespace>>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Teardown worker started");
    loop {
        tokio::select! {
            biased;
            first = rx.recv() => {
                let Some(first) = first else { break };
                let mut batch = vec![first];
                while let Ok(ns) = rx.try_recv() {
                    batch.push(ns);
                }
                teardown_pass(&shared, batch).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Teardown worker stopped");
}

/// Destroy one batch of namespaces whose active count reached zero
pub(crate) async fn teardown_pass(shared: &Shared, batch: Vec<Arc<Namespace>>) {
    let size = batch.len();
    tracing::debug!(batch = size, "Teardown pass started");

    {
        let registry = shared.registry.read().await;

        let horizon = shared.directory.unlink(&batch);
        for ns in &batch {
            ns.set_state(NamespaceState::TearingDown);
        }

        if let Some(horizon) = horizon {
            for tmp in shared.directory.up_to(&horizon) {
                for dead in &batch {
                    if let Some(nsid) = tmp.peer_ids().remove_peer(dead) {
                        publish(shared, NsidEvent::Deleted {
                            owner: tmp.cookie(),
                            peer: dead.cookie(),
                            nsid,
                        });
                    }
                }
            }
        }
        for ns in &batch {
            ns.peer_ids().clear();
        }

        let undo = Undo {
            grace: &shared.grace,
            yield_between: shared.config.yield_between_hooks,
        };
        undo.run(registry.ops(), registry.first_device(), &batch)
            .await;
    }

    shared.grace.synchronize().await;

    for ns in &batch {
        ns.release_owner();
        ns.set_state(NamespaceState::PassiveWait);
        ns.passive_dec();
    }
    drop(batch);

    shared.queue.passes.fetch_add(1, Ordering::Relaxed);
    shared.queue.complete(size);
    tracing::debug!(batch = size, "Teardown pass finished");
}

pub(crate) fn publish(shared: &Shared, event: NsidEvent) {
    event.emit_trace();
    // no subscribers is fine
    let _ = shared.events.send(event);
}
