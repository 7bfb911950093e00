//! Ordered list of registered subsystems
//!
//! The list is split in two segments: subsystems first, then devices.
//! `first_device` is the index of the first device (equal to the length
//! when there is none). Init walks the list forward, teardown backward.

use std::sync::Arc;

use tether_core::{Error, Result, SlotId};

use crate::namespace::Namespace;
use crate::subsystem::{SubsystemDescriptor, SubsystemKind};

/// Registered descriptors plus slot-id bookkeeping
#[derive(Debug, Default)]
pub(crate) struct Registry {
    ops: Vec<Arc<SubsystemDescriptor>>,
    first_device: usize,
    next_slot: u32,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ops(&self) -> &[Arc<SubsystemDescriptor>] {
        &self.ops
    }

    pub(crate) const fn first_device(&self) -> usize {
        self.first_device
    }

    /// Extension-table length that covers every slot handed out so far
    pub(crate) const fn slot_hint(&self) -> usize {
        self.next_slot as usize
    }

    pub(crate) fn contains(&self, desc: &Arc<SubsystemDescriptor>) -> bool {
        self.ops.iter().any(|d| Arc::ptr_eq(d, desc))
    }

    /// Validate `desc`, give it a slot id if it wants one, and link it into
    /// its segment. Returns the position it was linked at.
    pub(crate) fn insert(
        &mut self,
        desc: &Arc<SubsystemDescriptor>,
        kind: SubsystemKind,
    ) -> Result<usize> {
        if self.contains(desc) {
            return Err(Error::already_exists(format!(
                "subsystem {} is already registered",
                desc.name()
            )));
        }
        if let Some(spec) = desc.slot() {
            if spec.size() == 0 {
                return Err(Error::invalid(format!(
                    "subsystem {} requests a zero-sized slot",
                    desc.name()
                )));
            }
            if desc.slot_id().is_none() && self.next_slot == u32::MAX {
                return Err(Error::AllocationFailure {
                    what: format!("slot id for subsystem {}", desc.name()),
                });
            }
            let next_slot = &mut self.next_slot;
            desc.bind_slot(|| {
                let id = SlotId::from_raw(*next_slot);
                *next_slot += 1;
                id
            });
        }

        let at = match kind {
            SubsystemKind::Subsystem => {
                let at = self.first_device;
                self.ops.insert(at, Arc::clone(desc));
                self.first_device += 1;
                at
            }
            SubsystemKind::Device => {
                self.ops.push(Arc::clone(desc));
                self.ops.len() - 1
            }
        };
        Ok(at)
    }

    /// Unlink `desc`; returns its former position and whether it was a
    /// subsystem-segment entry
    pub(crate) fn remove(&mut self, desc: &Arc<SubsystemDescriptor>) -> Option<(usize, SubsystemKind)> {
        let at = self.ops.iter().position(|d| Arc::ptr_eq(d, desc))?;
        self.ops.remove(at);
        let kind = if at < self.first_device {
            self.first_device -= 1;
            SubsystemKind::Subsystem
        } else {
            SubsystemKind::Device
        };
        Some((at, kind))
    }
}

/// Populate `desc`'s slot for `ns` and run its init hook.
///
/// On failure the slot is emptied again before the error is returned.
pub(crate) fn init_one(desc: &SubsystemDescriptor, ns: &Namespace, hint: usize) -> Result<()> {
    let slot = desc.slot().zip(desc.slot_id());
    if let Some((spec, id)) = slot {
        ns.extensions()
            .assign(id, spec.allocate(), hint)
            .map_err(|e| Error::init_failure(desc.name(), e))?;
    }

    let Some(init) = desc.init_hook() else {
        return Ok(());
    };
    if let Err(e) = init(ns) {
        if let Some((_, id)) = slot {
            ns.extensions().clear(id);
        }
        tracing::warn!(
            subsystem = desc.name(),
            cookie = %ns.cookie(),
            error = %e,
            "Subsystem init failed"
        );
        return Err(Error::init_failure(desc.name(), e));
    }
    Ok(())
}
