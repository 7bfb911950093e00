//! Peer-id wire protocol
//!
//! Framing, attribute encoding and request handling for `RTM_NEWNSID` and
//! `RTM_GETNSID`, plus the notifications published when peer ids come and
//! go. Requests are handled against a
//! [`NamespaceManager`](tether_namespace::NamespaceManager); transport is
//! left to the embedder.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod attr;
pub mod config;
pub mod message;
pub mod resolver;
pub mod service;
pub mod status;

pub use attr::{Attr, NetnsAttrs};
pub use config::RtnlConfig;
pub use message::{Header, Message, Payload};
pub use resolver::{PeerResolver, StaticResolver};
pub use service::{Caller, DumpCursor, NsidService, notification};
pub use status::status_code;
