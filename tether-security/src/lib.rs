//! Security features for namespace management
//!
//! This crate provides:
//! - Principals that own namespaces
//! - Capability sets and capability checks relative to a namespace owner
//! - Per-principal namespace quotas

#![warn(missing_docs, clippy::all, clippy::pedantic)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tether_core::{Error, Result};

/// A single privilege a principal may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Administer network namespaces (assign peer ids, read foreign tables)
    NetAdmin,
}

impl Capability {
    const fn bit(self) -> CapabilitySet {
        match self {
            Self::NetAdmin => CapabilitySet::NET_ADMIN,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetAdmin => write!(f, "CAP_NET_ADMIN"),
        }
    }
}

/// Capability flags for bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(u32);

impl CapabilitySet {
    /// Network administration
    pub const NET_ADMIN: Self = Self(0b0000_0001);
    /// All capabilities
    pub const ALL: Self = Self(0b0000_0001);
    /// No capabilities
    pub const NONE: Self = Self(0);

    /// Create from raw value
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Get raw value
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Check if flag is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if the set grants `cap`
    #[must_use]
    pub const fn grants(self, cap: Capability) -> bool {
        self.contains(cap.bit())
    }
}

impl std::ops::BitOr for CapabilitySet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for CapabilitySet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl From<Capability> for CapabilitySet {
    fn from(cap: Capability) -> Self {
        cap.bit()
    }
}

/// The identity that owns namespaces and issues requests
///
/// A principal with `parent == None` is the initial principal and is
/// considered an ancestor of every other principal.
pub struct Principal {
    name: String,
    uid: u32,
    capabilities: CapabilitySet,
    parent: Option<Arc<Principal>>,
    namespace_limit: Option<usize>,
    namespaces: AtomicUsize,
}

impl Principal {
    /// The initial, fully privileged principal
    #[must_use]
    pub fn root() -> Arc<Self> {
        Arc::new(Self {
            name: "root".to_string(),
            uid: 0,
            capabilities: CapabilitySet::ALL,
            parent: None,
            namespace_limit: None,
            namespaces: AtomicUsize::new(0),
        })
    }

    /// Create a principal nested under `parent`
    #[must_use]
    pub fn child(
        parent: &Arc<Self>,
        name: impl Into<String>,
        uid: u32,
        capabilities: CapabilitySet,
    ) -> Self {
        Self {
            name: name.into(),
            uid,
            capabilities,
            parent: Some(Arc::clone(parent)),
            namespace_limit: None,
            namespaces: AtomicUsize::new(0),
        }
    }

    /// Cap the number of namespaces this principal may own
    #[must_use]
    pub const fn with_namespace_limit(mut self, limit: usize) -> Self {
        self.namespace_limit = Some(limit);
        self
    }

    /// Principal name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Numeric user id
    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }

    /// Capabilities held in the principal's own scope
    #[must_use]
    pub const fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    /// Number of namespaces currently charged to this principal
    #[must_use]
    pub fn namespace_count(&self) -> usize {
        self.namespaces.load(Ordering::Relaxed)
    }

    /// Whether `self` is `other` or one of its ancestors
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        let mut cursor = Some(other);
        while let Some(p) = cursor {
            if std::ptr::eq(self, p) {
                return true;
            }
            cursor = p.parent.as_deref();
        }
        false
    }

    /// Charge one namespace against the quota
    ///
    /// # Errors
    /// Returns [`Error::NoSpace`] if the quota is exhausted
    pub fn charge_namespace(&self) -> Result<()> {
        let limit = self.namespace_limit.unwrap_or(usize::MAX);
        self.namespaces
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|n| {
                tracing::debug!(principal = %self.name, owned = n, "Namespace quota exhausted");
                Error::no_space(format!("namespace quota of {} for {}", limit, self.name))
            })
    }

    /// Return a charge taken by [`Principal::charge_namespace`]
    pub fn uncharge_namespace(&self) {
        let prev = self.namespaces.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "namespace charge underflow");
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("name", &self.name)
            .field("uid", &self.uid)
            .field("capabilities", &self.capabilities)
            .field("namespaces", &self.namespace_count())
            .finish_non_exhaustive()
    }
}

/// Capability check seam
///
/// `target_owner` is the principal owning the namespace the operation
/// acts on.
pub trait CapabilityCheck: Send + Sync {
    /// Whether `principal` holds `cap` over objects owned by `target_owner`
    fn is_capable(&self, principal: &Principal, target_owner: &Principal, cap: Capability)
    -> bool;

    /// Check and convert a refusal into [`Error::PermissionDenied`]
    ///
    /// # Errors
    /// Returns error if the capability is not held
    fn require(
        &self,
        principal: &Principal,
        target_owner: &Principal,
        cap: Capability,
        operation: &str,
    ) -> Result<()> {
        if self.is_capable(principal, target_owner, cap) {
            return Ok(());
        }
        tracing::debug!(
            principal = %principal.name(),
            target_owner = %target_owner.name(),
            capability = %cap,
            operation,
            "Capability check failed"
        );
        Err(Error::denied(format!("{operation} requires {cap}")))
    }
}

/// Default policy: a principal is capable over a target when it holds the
/// capability and owns the target or one of the target owner's ancestors.
#[derive(Debug, Default, Clone, Copy)]
pub struct SecurityManager;

impl SecurityManager {
    /// Create a new security manager
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl CapabilityCheck for SecurityManager {
    fn is_capable(
        &self,
        principal: &Principal,
        target_owner: &Principal,
        cap: Capability,
    ) -> bool {
        principal.capabilities().grants(cap) && principal.is_ancestor_of(target_owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_set_ops() {
        let set = CapabilitySet::NONE | CapabilitySet::NET_ADMIN;
        assert_eq!(set, CapabilitySet::ALL);
        assert!(set.grants(Capability::NetAdmin));
        assert!(!CapabilitySet::NONE.grants(Capability::NetAdmin));
        assert!(CapabilitySet::ALL.contains(CapabilitySet::NET_ADMIN));
        assert_eq!(
            (set & CapabilitySet::NET_ADMIN).bits(),
            CapabilitySet::NET_ADMIN.bits()
        );
    }

    #[test]
    fn test_root_is_capable_everywhere() {
        let root = Principal::root();
        let tenant = Arc::new(Principal::child(
            &root,
            "tenant",
            1000,
            CapabilitySet::NET_ADMIN,
        ));

        let policy = SecurityManager::new();
        assert!(policy.is_capable(&root, &tenant, Capability::NetAdmin));
        assert!(policy.is_capable(&tenant, &tenant, Capability::NetAdmin));
        assert!(!policy.is_capable(&tenant, &root, Capability::NetAdmin));
    }

    #[test]
    fn test_missing_capability_is_denied() {
        let root = Principal::root();
        let guest = Principal::child(&root, "guest", 2000, CapabilitySet::NONE);

        let err = SecurityManager::new()
            .require(&guest, &guest, Capability::NetAdmin, "assign nsid")
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
    }

    #[test]
    fn test_namespace_quota() {
        let root = Principal::root();
        let tenant =
            Principal::child(&root, "tenant", 1000, CapabilitySet::NONE).with_namespace_limit(2);

        tenant.charge_namespace().unwrap();
        tenant.charge_namespace().unwrap();
        assert!(matches!(
            tenant.charge_namespace(),
            Err(Error::NoSpace { .. })
        ));

        tenant.uncharge_namespace();
        assert_eq!(tenant.namespace_count(), 1);
        assert!(tenant.charge_namespace().is_ok());
    }
}
