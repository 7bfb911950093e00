//! Read-side sections and reclamation barriers
//!
//! Readers of published snapshots (directory, peer-id tables, extension
//! tables) pin the domain with [`GraceDomain::read`]. A writer that has
//! unpublished something calls [`GraceDomain::synchronize`], which returns
//! once every read section that began before the call has ended. Memory
//! itself is reference counted; the barrier only orders *observations*.
//!
//! The domain keeps two reader counters and an epoch. `synchronize` flips
//! the epoch twice, each time waiting for the counter of the previous
//! parity to drain. The first flip drains the parity current at the call.
//! Readers can still be open in the other parity from before the call
//! (they sampled the epoch ahead of an earlier flip), and the second flip
//! drains those.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Number of cooperative yields before the barrier starts sleeping
const SPIN_YIELDS: u32 = 64;

/// Epoch-based reader/writer rendezvous
#[derive(Debug)]
pub struct GraceDomain {
    epoch: AtomicUsize,
    readers: [AtomicUsize; 2],
    writer: tokio::sync::Mutex<()>,
    poll: Duration,
}

/// Active read section; the section ends on drop
#[must_use = "the read section ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    domain: &'a GraceDomain,
    parity: usize,
}

impl GraceDomain {
    /// Create a domain that sleeps `poll` between checks once spinning gave up
    #[must_use]
    pub fn new(poll: Duration) -> Self {
        Self {
            epoch: AtomicUsize::new(0),
            readers: [AtomicUsize::new(0), AtomicUsize::new(0)],
            writer: tokio::sync::Mutex::new(()),
            poll,
        }
    }

    /// Enter a read section. Never blocks.
    pub fn read(&self) -> ReadGuard<'_> {
        let parity = self.epoch.load(Ordering::SeqCst) & 1;
        self.readers[parity].fetch_add(1, Ordering::SeqCst);
        ReadGuard {
            domain: self,
            parity,
        }
    }

    /// Number of read sections currently open
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.readers[0].load(Ordering::SeqCst) + self.readers[1].load(Ordering::SeqCst)
    }

    /// Wait until every read section that started before this call has ended.
    ///
    /// Must not be called from inside a read section of the same domain.
    pub async fn synchronize(&self) {
        let _writer = self.writer.lock().await;
        for _ in 0..2 {
            let old = self.epoch.fetch_add(1, Ordering::SeqCst) & 1;
            self.drain(old).await;
        }
    }

    async fn drain(&self, parity: usize) {
        let mut spins = 0u32;
        while self.readers[parity].load(Ordering::SeqCst) != 0 {
            if spins < SPIN_YIELDS {
                spins += 1;
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.poll).await;
            }
        }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.domain.readers[self.parity].fetch_sub(1, Ordering::SeqCst);
    }
}
