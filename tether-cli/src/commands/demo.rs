//! Demo command implementation

use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use tether_core::Error;
use tether_namespace::{NamespaceManager, SubsystemDescriptor};
use tether_security::Principal;

use crate::config::Settings;

pub async fn execute(count: usize, config: Option<&Path>) -> Result<()> {
    let settings = Settings::load(config)?;
    let manager =
        NamespaceManager::start(settings.manager).context("Failed to start namespace manager")?;
    let root = Principal::root();

    // "counter" stamps each namespace with its cookie; "loopback" is a device
    let counter_slot = Arc::new(OnceLock::new());
    let slot = Arc::clone(&counter_slot);
    let counter = SubsystemDescriptor::builder("counter")
        .slot::<AtomicU64>()
        .init(move |ns| {
            let id = slot
                .get()
                .copied()
                .ok_or_else(|| Error::not_found("counter slot"))?;
            let value = ns
                .extension::<AtomicU64>(id)
                .ok_or_else(|| Error::not_found("counter payload"))?;
            value.store(ns.cookie().as_raw(), Ordering::Relaxed);
            Ok(())
        })
        .teardown(|ns| tracing::debug!(cookie = %ns.cookie(), "counter teardown"))
        .build();

    let batches = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&batches);
    let loopback = SubsystemDescriptor::builder("loopback")
        .pre_teardown(|ns| tracing::debug!(cookie = %ns.cookie(), "loopback going down"))
        .batch_teardown(move |batch| {
            seen.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(batch = batch.len(), "loopback batch teardown");
        })
        .build();

    manager
        .register(&counter)
        .await
        .context("Failed to register counter")?;
    counter_slot
        .set(counter.slot_id().context("counter has no slot")?)
        .map_err(|_| anyhow::anyhow!("counter slot bound twice"))?;
    manager
        .register_device(&loopback)
        .await
        .context("Failed to register loopback")?;

    let mut namespaces = Vec::with_capacity(count);
    for _ in 0..count {
        namespaces.push(
            manager
                .create(&root)
                .await
                .context("Failed to create namespace")?,
        );
    }

    for owner in &namespaces {
        for peer in &namespaces {
            if !owner.ptr_eq(peer) {
                let _ = manager.id_or_alloc(owner, peer.as_arc());
            }
        }
    }

    println!("\nNamespaces");
    println!("{:-<60}", "");
    for ns in manager.live_namespaces() {
        let stamp = counter
            .slot_id()
            .and_then(|id| ns.extension::<AtomicU64>(id))
            .map_or(0, |v| v.load(Ordering::Relaxed));
        let peers: Vec<String> = ns
            .peer_ids()
            .entries()
            .iter()
            .filter_map(|(id, peer)| peer.upgrade().map(|p| format!("{id}->{}", p.cookie())))
            .collect();
        println!(
            "  {} [{}] counter={} peers: {}",
            ns.cookie(),
            ns.state(),
            stamp,
            peers.join(", ")
        );
    }
    println!("{:-<60}", "");

    drop(namespaces);
    manager.wait_idle().await;

    let stats = manager.stats();
    println!("\nAfter teardown");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("loopback batches: {}", batches.load(Ordering::Relaxed));

    manager.unregister(&loopback).await;
    manager.unregister(&counter).await;
    manager.shutdown().await;
    Ok(())
}
