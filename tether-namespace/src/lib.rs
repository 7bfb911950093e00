//! Namespace lifecycle core
//!
//! This crate manages isolated namespace instances and the subsystems that
//! keep private state in them:
//! - Extension tables - per-namespace slot arrays, read without locks
//! - Subsystem registry - ordered init, reverse-ordered teardown
//! - Namespace directory - snapshot-published list of live namespaces
//! - Peer ids - small per-owner integers naming other namespaces
//! - Lifecycle - creation with rollback, batched asynchronous teardown

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod directory;
pub mod extension;
pub mod grace;
mod lifecycle;
pub mod manager;
pub mod namespace;
pub mod peer_id;
mod registry;
pub mod subsystem;

pub use config::ManagerConfig;
pub use directory::NamespaceDirectory;
pub use extension::{ExtensionTable, Payload};
pub use grace::{GraceDomain, ReadGuard};
pub use manager::{ManagerStats, NamespaceManager};
pub use namespace::{Namespace, NamespaceRef, NamespaceState, PassiveRef};
pub use peer_id::PeerIdTable;
pub use subsystem::{SlotSpec, SubsystemBuilder, SubsystemDescriptor, SubsystemKind};
