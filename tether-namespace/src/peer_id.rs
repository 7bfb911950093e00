//! Peer-id tables
//!
//! Every namespace keeps a map from small non-negative ids to the peer
//! namespaces it has named. Entries are non-owning ([`Weak`]); the teardown
//! pass removes every entry that points at a namespace it is destroying, so
//! a live table never names a freed namespace.
//!
//! Mutation happens under the table's own lock and publishes a fresh map.
//! Lookups read the published map and never take the lock.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, MutexGuard};
use tether_core::{Error, NsId, Result};

use crate::namespace::{Namespace, NamespaceRef};

type IdMap = BTreeMap<NsId, Weak<Namespace>>;

/// Per-owner id → peer map
pub struct PeerIdTable {
    lock: Mutex<()>,
    ids: ArcSwap<IdMap>,
}

impl PeerIdTable {
    pub(crate) fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            ids: ArcSwap::from_pointee(IdMap::new()),
        }
    }

    /// Number of assigned ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.load().len()
    }

    /// Whether no id is assigned
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.load().is_empty()
    }

    /// Id naming `peer`, if one is assigned
    #[must_use]
    pub fn lookup(&self, peer: &Namespace) -> Option<NsId> {
        Self::scan(&self.ids.load(), peer)
    }

    /// Borrowed reference stored under `id`
    #[must_use]
    pub fn get(&self, id: NsId) -> Option<Weak<Namespace>> {
        self.ids.load().get(&id).cloned()
    }

    /// Snapshot of every entry in ascending id order
    #[must_use]
    pub fn entries(&self) -> Vec<(NsId, Weak<Namespace>)> {
        self.ids
            .load()
            .iter()
            .map(|(id, peer)| (*id, Weak::clone(peer)))
            .collect()
    }

    fn scan(map: &IdMap, peer: &Namespace) -> Option<NsId> {
        map.iter()
            .find(|(_, w)| std::ptr::eq(w.as_ptr(), peer))
            .map(|(id, _)| *id)
    }

    fn locked(&self) -> Locked<'_> {
        Locked {
            _guard: self.lock.lock(),
            table: self,
        }
    }

    /// Remove the entry naming `peer`
    pub(crate) fn remove_peer(&self, peer: &Namespace) -> Option<NsId> {
        let locked = self.locked();
        let id = locked.lookup(peer)?;
        locked.update(|map| {
            map.remove(&id);
        });
        Some(id)
    }

    /// Drop every entry
    pub(crate) fn clear(&self) {
        self.locked().update(BTreeMap::clear);
    }
}

impl std::fmt::Debug for PeerIdTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.ids.load().iter().map(|(id, w)| {
                (*id, w.upgrade().map(|ns| ns.cookie()))
            }))
            .finish()
    }
}

/// Writer view of a table, held while the owner's fine lock is taken
struct Locked<'a> {
    _guard: MutexGuard<'a, ()>,
    table: &'a PeerIdTable,
}

impl Locked<'_> {
    fn lookup(&self, peer: &Namespace) -> Option<NsId> {
        PeerIdTable::scan(&self.table.ids.load(), peer)
    }

    fn contains(&self, id: NsId) -> bool {
        self.table.ids.load().contains_key(&id)
    }

    fn smallest_free(&self) -> Option<NsId> {
        let map = self.table.ids.load();
        let mut candidate = 0u32;
        for id in map.keys() {
            if id.as_raw() != candidate {
                break;
            }
            candidate = candidate.checked_add(1)?;
        }
        NsId::new(candidate).ok()
    }

    fn update(&self, f: impl FnOnce(&mut IdMap)) {
        let mut next = IdMap::clone(&self.table.ids.load());
        f(&mut next);
        self.table.ids.store(Arc::new(next));
    }
}

/// Assign an id for `peer` in `owner`'s table.
///
/// `requested` is honored if free; otherwise the smallest free id is used.
///
/// # Errors
/// - [`Error::NotFound`] if `peer` already began teardown
/// - [`Error::AlreadyExists`] if `peer` already has an id in `owner`
/// - [`Error::NoSpace`] if `requested` is taken or no id is left
pub fn allocate(owner: &NamespaceRef, peer: &Arc<Namespace>, requested: Option<NsId>) -> Result<NsId> {
    let _peer_ref = peer
        .try_get()
        .ok_or_else(|| Error::not_found(format!("peer {} is being torn down", peer.cookie())))?;

    let table = owner.peer_ids();
    let locked = table.locked();

    if let Some(existing) = locked.lookup(peer) {
        return Err(Error::already_exists(format!(
            "peer {} already has nsid {existing} in {}",
            peer.cookie(),
            owner.cookie()
        )));
    }

    let id = match requested {
        Some(id) if locked.contains(id) => {
            return Err(Error::no_space(format!(
                "nsid {id} is already used in {}",
                owner.cookie()
            )));
        }
        Some(id) => id,
        None => locked
            .smallest_free()
            .ok_or_else(|| Error::no_space(format!("nsid space of {}", owner.cookie())))?,
    };

    locked.update(|map| {
        map.insert(id, Arc::downgrade(peer));
    });
    Ok(id)
}

/// Return the id naming `peer`, allocating the smallest free one if needed.
///
/// Returns `None` when either side is dying or the id space is exhausted.
/// The flag is `true` when a new id was allocated.
pub fn get_or_allocate(owner: &Namespace, peer: &Arc<Namespace>) -> Option<(NsId, bool)> {
    if !owner.is_alive() {
        return None;
    }
    let table = owner.peer_ids();
    let locked = table.locked();
    if let Some(id) = locked.lookup(peer) {
        return Some((id, false));
    }

    let _peer_ref = peer.try_get()?;
    let id = locked.smallest_free()?;
    locked.update(|map| {
        map.insert(id, Arc::downgrade(peer));
    });
    Some((id, true))
}

/// Resolve `id` in `owner`'s table into an active reference
#[must_use]
pub fn resolve(owner: &Namespace, id: NsId) -> Option<NamespaceRef> {
    owner.peer_ids().get(id)?.upgrade()?.try_get()
}
