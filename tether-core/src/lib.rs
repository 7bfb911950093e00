//! Tether Core - Foundation types, errors, and events
//!
//! This crate provides the core abstractions shared by the namespace
//! manager, the peer-id wire protocol and the CLI.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use events::NsidEvent;
pub use types::{Cookie, CookieAllocator, NsId, ProcessId, SlotId};
