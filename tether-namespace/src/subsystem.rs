//! Subsystem descriptors
//!
//! A descriptor is the tagged interface a subsystem registers: an optional
//! private slot plus four optional hooks. Hooks are plain closures; init may
//! fail, the teardown hooks may not.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

use tether_core::{Result, SlotId};

use crate::extension::Payload;
use crate::namespace::Namespace;

/// Runs when a namespace gains this subsystem
pub type InitHook = Arc<dyn Fn(&Namespace) -> Result<()> + Send + Sync>;
/// Runs per namespace during pre-teardown and teardown
pub type ExitHook = Arc<dyn Fn(&Namespace) + Send + Sync>;
/// Runs once per teardown batch with every member present
pub type BatchHook = Arc<dyn Fn(&[Arc<Namespace>]) + Send + Sync>;

/// Which registry segment a descriptor lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemKind {
    /// Core per-namespace state, initialized before any device
    Subsystem,
    /// Device-class state, initialized after every subsystem
    Device,
}

/// Private per-namespace state a subsystem reserves
#[derive(Clone, Copy)]
pub struct SlotSpec {
    size: usize,
    make: fn() -> Payload,
}

impl SlotSpec {
    /// Payload of type `T`, default-constructed for each namespace
    #[must_use]
    pub fn of<T: Default + Any + Send + Sync>() -> Self {
        fn make<T: Default + Any + Send + Sync>() -> Payload {
            Arc::new(T::default())
        }
        Self {
            size: std::mem::size_of::<T>(),
            make: make::<T>,
        }
    }

    /// Payload size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn allocate(&self) -> Payload {
        (self.make)()
    }
}

impl fmt::Debug for SlotSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotSpec").field("size", &self.size).finish()
    }
}

/// A registered (or registrable) extension point
pub struct SubsystemDescriptor {
    name: String,
    slot: Option<SlotSpec>,
    slot_id: OnceLock<SlotId>,
    init: Option<InitHook>,
    pre_teardown: Option<ExitHook>,
    teardown: Option<ExitHook>,
    batch_teardown: Option<BatchHook>,
}

impl SubsystemDescriptor {
    /// Start describing a subsystem called `name`
    #[must_use]
    pub fn builder(name: impl Into<String>) -> SubsystemBuilder {
        SubsystemBuilder {
            descriptor: Self {
                name: name.into(),
                slot: None,
                slot_id: OnceLock::new(),
                init: None,
                pre_teardown: None,
                teardown: None,
                batch_teardown: None,
            },
        }
    }

    /// Subsystem name, used in logs and errors
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot reserved by this subsystem, once registered
    #[must_use]
    pub fn slot_id(&self) -> Option<SlotId> {
        self.slot_id.get().copied()
    }

    /// Payload size, present exactly when a slot is requested
    #[must_use]
    pub fn slot_size(&self) -> Option<usize> {
        self.slot.map(|s| s.size())
    }

    /// Whether registering must touch namespaces that already exist
    #[must_use]
    pub const fn needs_init(&self) -> bool {
        self.init.is_some() || self.slot.is_some()
    }

    pub(crate) const fn slot(&self) -> Option<&SlotSpec> {
        self.slot.as_ref()
    }

    pub(crate) fn bind_slot(&self, next: impl FnOnce() -> SlotId) -> SlotId {
        *self.slot_id.get_or_init(next)
    }

    pub(crate) fn init_hook(&self) -> Option<&InitHook> {
        self.init.as_ref()
    }

    pub(crate) fn pre_teardown_hook(&self) -> Option<&ExitHook> {
        self.pre_teardown.as_ref()
    }

    pub(crate) fn teardown_hook(&self) -> Option<&ExitHook> {
        self.teardown.as_ref()
    }

    pub(crate) fn batch_teardown_hook(&self) -> Option<&BatchHook> {
        self.batch_teardown.as_ref()
    }
}

impl fmt::Debug for SubsystemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemDescriptor")
            .field("name", &self.name)
            .field("slot", &self.slot)
            .field("slot_id", &self.slot_id())
            .field("init", &self.init.is_some())
            .field("pre_teardown", &self.pre_teardown.is_some())
            .field("teardown", &self.teardown.is_some())
            .field("batch_teardown", &self.batch_teardown.is_some())
            .finish()
    }
}

/// Builder for [`SubsystemDescriptor`]
#[must_use]
pub struct SubsystemBuilder {
    descriptor: SubsystemDescriptor,
}

impl SubsystemBuilder {
    /// Reserve a private slot holding a default-constructed `T`
    pub fn slot<T: Default + Any + Send + Sync>(mut self) -> Self {
        self.descriptor.slot = Some(SlotSpec::of::<T>());
        self
    }

    /// Reserve a private slot described by `spec`
    pub const fn slot_spec(mut self, spec: SlotSpec) -> Self {
        self.descriptor.slot = Some(spec);
        self
    }

    /// Set the init hook
    pub fn init<F>(mut self, f: F) -> Self
    where
        F: Fn(&Namespace) -> Result<()> + Send + Sync + 'static,
    {
        self.descriptor.init = Some(Arc::new(f));
        self
    }

    /// Set the pre-teardown hook
    pub fn pre_teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&Namespace) + Send + Sync + 'static,
    {
        self.descriptor.pre_teardown = Some(Arc::new(f));
        self
    }

    /// Set the teardown hook
    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&Namespace) + Send + Sync + 'static,
    {
        self.descriptor.teardown = Some(Arc::new(f));
        self
    }

    /// Set the batch-teardown hook
    pub fn batch_teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Arc<Namespace>]) + Send + Sync + 'static,
    {
        self.descriptor.batch_teardown = Some(Arc::new(f));
        self
    }

    /// Finish the descriptor
    #[must_use]
    pub fn build(self) -> Arc<SubsystemDescriptor> {
        Arc::new(self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_builder_sets_hooks() {
        let desc = SubsystemDescriptor::builder("loopback")
            .slot::<AtomicU64>()
            .init(|_| Ok(()))
            .teardown(|_| {})
            .build();

        assert_eq!(desc.name(), "loopback");
        assert_eq!(desc.slot_size(), Some(8));
        assert!(desc.needs_init());
        assert!(desc.init_hook().is_some());
        assert!(desc.pre_teardown_hook().is_none());
        assert!(desc.teardown_hook().is_some());
        assert!(desc.batch_teardown_hook().is_none());
        assert_eq!(desc.slot_id(), None);
    }

    #[test]
    fn test_hookless_descriptor_needs_no_init() {
        let desc = SubsystemDescriptor::builder("notifier")
            .batch_teardown(|_| {})
            .build();
        assert!(!desc.needs_init());
        assert_eq!(desc.slot_size(), None);
    }

    #[test]
    fn test_slot_binds_once() {
        let desc = SubsystemDescriptor::builder("x").slot::<u32>().build();
        assert_eq!(desc.bind_slot(|| SlotId::from_raw(4)), SlotId::from_raw(4));
        assert_eq!(desc.bind_slot(|| SlotId::from_raw(9)), SlotId::from_raw(4));
        assert_eq!(desc.slot_id(), Some(SlotId::from_raw(4)));
    }

    #[test]
    fn test_slot_spec_allocates_default() {
        let spec = SlotSpec::of::<[u8; 16]>();
        assert_eq!(spec.size(), 16);
        let payload = spec.allocate();
        assert_eq!(payload.downcast::<[u8; 16]>().ok().as_deref(), Some(&[0u8; 16]));
    }
}
