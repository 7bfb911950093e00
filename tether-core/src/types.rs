//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, Result};

/// Unique, monotonically increasing namespace identifier
///
/// Cookies are never reused for the lifetime of the allocator that
/// produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct Cookie(u64);

impl Cookie {
    /// Create from raw value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get raw value
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns#{}", self.0)
    }
}

/// Source of fresh [`Cookie`]s
#[derive(Debug)]
pub struct CookieAllocator {
    next: AtomicU64,
}

impl CookieAllocator {
    /// Create an allocator whose first cookie is 1
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Hand out the next cookie
    pub fn next(&self) -> Cookie {
        Cookie(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CookieAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Peer namespace id: a small non-negative integer naming another namespace
/// relative to an owner namespace
///
/// "Not assigned" is never encoded in the value; APIs return
/// `Option<NsId>` and only the wire format uses `-1`.
///
/// # Example
/// ```
/// use tether_core::NsId;
///
/// let id = NsId::new(0).unwrap();
/// assert_eq!(NsId::to_wire(Some(id)), 0);
/// assert_eq!(NsId::to_wire(None), -1);
/// assert_eq!(NsId::from_wire(-1).unwrap(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "i32", into = "i32")]
pub struct NsId(u32);

impl NsId {
    /// Largest assignable id
    pub const MAX: Self = Self(i32::MAX as u32);

    /// Wire value meaning "not assigned"
    pub const NOT_ASSIGNED: i32 = -1;

    /// Create with validation
    ///
    /// # Errors
    /// Returns error if the id does not fit the wire's non-negative `i32`
    pub fn new(id: u32) -> Result<Self> {
        if id > Self::MAX.0 {
            return Err(Error::invalid(format!("nsid {id} out of range")));
        }
        Ok(Self(id))
    }

    /// Decode a wire value; negative values mean "not assigned"
    ///
    /// # Errors
    /// Never fails for `i32` input; kept fallible for symmetry with
    /// [`NsId::new`].
    pub fn from_wire(raw: i32) -> Result<Option<Self>> {
        if raw < 0 {
            return Ok(None);
        }
        #[allow(clippy::cast_sign_loss)]
        Ok(Some(Self(raw as u32)))
    }

    /// Encode for the wire
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn to_wire(id: Option<Self>) -> i32 {
        match id {
            Some(id) => id.0 as i32,
            None => Self::NOT_ASSIGNED,
        }
    }

    /// Get raw value
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i32> for NsId {
    type Error = Error;

    fn try_from(raw: i32) -> Result<Self> {
        Self::from_wire(raw)?.ok_or_else(|| Error::invalid(format!("nsid {raw} is negative")))
    }
}

impl From<NsId> for i32 {
    fn from(id: NsId) -> Self {
        NsId::to_wire(Some(id))
    }
}

/// Extension slot index reserved once per subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct SlotId(u32);

impl SlotId {
    /// Create from raw index
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Index into an extension table
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Get raw value
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        Self(nix::unistd::getpid().as_raw())
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        nix::unistd::Pid::from_raw(pid.0)
    }
}
