//! Per-namespace extension table
//!
//! Each registered subsystem with private state owns one [`SlotId`]. A
//! namespace stores that subsystem's payload at the same index of its
//! table. The slot array is published through an [`ArcSwap`]:
//!
//! - **Reads** load the current array without locking and index it.
//! - **Writes that fit** store into the existing entry (one pointer swap,
//!   no other slot is touched).
//! - **Writes that do not fit** build a larger array, copy the entries,
//!   and publish it in one swap. The previous array lives on until the last
//!   reader holding it lets go.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use tether_core::{Error, Result, SlotId};

/// Type-erased subsystem payload
pub type Payload = Arc<dyn Any + Send + Sync>;

/// One populated slot
struct Entry(Payload);

/// Immutable-length slot array
struct Slots {
    entries: Box<[ArcSwapOption<Entry>]>,
}

impl Slots {
    fn empty(len: usize) -> Self {
        Self {
            entries: (0..len).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    fn grown_from(old: &Self, len: usize) -> Self {
        let grown = Self::empty(len);
        for (dst, src) in grown.entries.iter().zip(old.entries.iter()) {
            dst.store(src.load_full());
        }
        grown
    }
}

/// Growable, snapshot-published slot array
pub struct ExtensionTable {
    slots: ArcSwap<Slots>,
    writer: Mutex<()>,
    generation: AtomicU64,
}

impl ExtensionTable {
    /// Create a table with `capacity` empty slots
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: ArcSwap::from_pointee(Slots::empty(capacity)),
            writer: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current length of the published array
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.load().entries.len()
    }

    /// Number of arrays published after the initial one
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of populated slots
    #[must_use]
    pub fn populated(&self) -> usize {
        self.slots
            .load()
            .entries
            .iter()
            .filter(|e| e.load().is_some())
            .count()
    }

    /// Lock-free lookup of the raw payload at `id`
    #[must_use]
    pub fn get_raw(&self, id: SlotId) -> Option<Payload> {
        let slots = self.slots.load();
        let entry = slots.entries.get(id.index())?.load_full()?;
        Some(Arc::clone(&entry.0))
    }

    /// Lock-free lookup downcast to the owning subsystem's type
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, id: SlotId) -> Option<Arc<T>> {
        self.get_raw(id)?.downcast::<T>().ok()
    }

    /// Store `payload` at `id`, growing the table if needed.
    ///
    /// `hint` is the length the registry expects every table to reach; a
    /// grown table is never smaller than it.
    ///
    /// # Errors
    /// Returns [`Error::AllocationFailure`] if the grown length overflows
    pub fn assign(&self, id: SlotId, payload: Payload, hint: usize) -> Result<()> {
        let _writer = self.writer.lock();
        let current = self.slots.load();
        if let Some(entry) = current.entries.get(id.index()) {
            entry.store(Some(Arc::new(Entry(payload))));
            return Ok(());
        }

        let needed = id
            .index()
            .checked_add(1)
            .and_then(usize::checked_next_power_of_two)
            .ok_or_else(|| Error::AllocationFailure {
                what: format!("extension table for {id}"),
            })?;
        let len = needed.max(hint);

        let grown = Slots::grown_from(&current, len);
        grown.entries[id.index()].store(Some(Arc::new(Entry(payload))));
        self.slots.store(Arc::new(grown));
        self.generation.fetch_add(1, Ordering::AcqRel);

        tracing::trace!(slot = %id, old_len = current.entries.len(), new_len = len, "Extension table grown");
        Ok(())
    }

    /// Empty the slot at `id`, returning what it held
    pub fn clear(&self, id: SlotId) -> Option<Payload> {
        let _writer = self.writer.lock();
        let slots = self.slots.load();
        let entry = slots.entries.get(id.index())?.swap(None)?;
        Some(Arc::clone(&entry.0))
    }

    /// Drop every payload and shrink to an empty array
    pub fn release_all(&self) {
        let _writer = self.writer.lock();
        self.slots.store(Arc::new(Slots::empty(0)));
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for ExtensionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionTable")
            .field("capacity", &self.capacity())
            .field("populated", &self.populated())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn payload<T: Any + Send + Sync>(value: T) -> Payload {
        Arc::new(value)
    }

    #[test]
    fn test_assign_in_place_keeps_generation() {
        let table = ExtensionTable::with_capacity(4);
        table.assign(SlotId::from_raw(2), payload(7u32), 4).unwrap();

        assert_eq!(table.generation(), 0);
        assert_eq!(table.get::<u32>(SlotId::from_raw(2)).as_deref(), Some(&7));
        assert_eq!(table.populated(), 1);
    }

    #[test]
    fn test_assign_grows_and_copies() {
        let table = ExtensionTable::with_capacity(2);
        table.assign(SlotId::from_raw(0), payload("zero"), 2).unwrap();
        table.assign(SlotId::from_raw(9), payload(9u64), 2).unwrap();

        assert_eq!(table.generation(), 1);
        assert!(table.capacity() >= 10);
        assert_eq!(
            table.get::<&str>(SlotId::from_raw(0)).as_deref(),
            Some(&"zero")
        );
        assert_eq!(table.get::<u64>(SlotId::from_raw(9)).as_deref(), Some(&9));
    }

    #[test]
    fn test_growth_respects_hint() {
        let table = ExtensionTable::with_capacity(1);
        table.assign(SlotId::from_raw(1), payload(()), 32).unwrap();
        assert_eq!(table.capacity(), 32);
    }

    #[test]
    fn test_wrong_type_downcast_is_none() {
        let table = ExtensionTable::with_capacity(1);
        table.assign(SlotId::from_raw(0), payload(1u8), 1).unwrap();
        assert!(table.get::<u16>(SlotId::from_raw(0)).is_none());
        assert!(table.get_raw(SlotId::from_raw(0)).is_some());
    }

    #[test]
    fn test_clear_and_release() {
        let table = ExtensionTable::with_capacity(2);
        table.assign(SlotId::from_raw(1), payload(AtomicU32::new(3)), 2).unwrap();

        let old = table.clear(SlotId::from_raw(1)).unwrap();
        assert!(old.downcast::<AtomicU32>().is_ok());
        assert!(table.get_raw(SlotId::from_raw(1)).is_none());
        assert!(table.clear(SlotId::from_raw(1)).is_none());
        assert!(table.clear(SlotId::from_raw(100)).is_none());

        table.release_all();
        assert_eq!(table.capacity(), 0);
    }

    #[test]
    fn test_readers_hold_old_snapshot_across_growth() {
        let table = ExtensionTable::with_capacity(1);
        table.assign(SlotId::from_raw(0), payload(1i32), 1).unwrap();

        let held = table.get_raw(SlotId::from_raw(0)).unwrap();
        table.assign(SlotId::from_raw(5), payload(5i32), 1).unwrap();

        assert_eq!(held.downcast::<i32>().ok().as_deref(), Some(&1));
    }

    #[test]
    fn test_concurrent_readers_never_see_missing_entry() {
        let table = Arc::new(ExtensionTable::with_capacity(1));
        table.assign(SlotId::from_raw(0), payload(42u32), 1).unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        let v = table.get::<u32>(SlotId::from_raw(0));
                        assert_eq!(v.as_deref(), Some(&42));
                    }
                })
            })
            .collect();

        for id in 1..200 {
            table.assign(SlotId::from_raw(id), payload(id), 1).unwrap();
        }

        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(table.populated(), 200);
    }
}
