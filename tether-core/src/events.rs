//! Peer-id notifications with structured tracing

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Cookie, NsId};

/// Events broadcast when a peer id is added to or removed from a
/// namespace's id table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NsidEvent {
    /// A peer id was allocated
    New {
        /// Namespace whose table changed
        owner: Cookie,
        /// Namespace the id now names
        peer: Cookie,
        /// Allocated id
        nsid: NsId,
        /// Requesting port, 0 for in-kernel style allocations
        portid: u32,
    },

    /// A peer id was removed because its peer was torn down
    Deleted {
        /// Namespace whose table changed
        owner: Cookie,
        /// Namespace the id used to name
        peer: Cookie,
        /// Released id
        nsid: NsId,
    },
}

impl NsidEvent {
    /// Namespace whose id table changed
    #[must_use]
    pub const fn owner(&self) -> Cookie {
        match self {
            Self::New { owner, .. } | Self::Deleted { owner, .. } => *owner,
        }
    }

    /// The id carried by the event
    #[must_use]
    pub const fn nsid(&self) -> NsId {
        match self {
            Self::New { nsid, .. } | Self::Deleted { nsid, .. } => *nsid,
        }
    }

    /// Emit structured tracing event
    pub fn emit_trace(&self) {
        match self {
            Self::New {
                owner,
                peer,
                nsid,
                portid,
            } => {
                tracing::debug!(
                    owner = %owner,
                    peer = %peer,
                    nsid = nsid.as_raw(),
                    portid,
                    event = "nsid_new",
                    "Peer id allocated"
                );
            }
            Self::Deleted { owner, peer, nsid } => {
                tracing::debug!(
                    owner = %owner,
                    peer = %peer,
                    nsid = nsid.as_raw(),
                    event = "nsid_del",
                    "Peer id removed"
                );
            }
        }
    }
}

impl fmt::Display for NsidEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New {
                owner, peer, nsid, ..
            } => write!(f, "{owner}: nsid {nsid} -> {peer}"),
            Self::Deleted { owner, peer, nsid } => {
                write!(f, "{owner}: nsid {nsid} (was {peer}) deleted")
            }
        }
    }
}
