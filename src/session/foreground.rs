//! Foreground/background execution shim.
//!
//! Keeps the sending process able to run network and location code while
//! it is not in the foreground. On mobile this is an OS service; here the
//! contract is the [`ForegroundService`] trait and an RAII
//! [`ExecutionLease`] held by an active sender session.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;

/// Platform keep-alive provider.
pub trait ForegroundService: Send + Sync {
    /// Claim the right to keep running.
    fn acquire(&self) -> Result<()>;

    /// Give the claim back.
    fn release(&self);
}

/// Held for exactly as long as a sender session is active.
///
/// Dropping the lease releases it, once.
#[must_use = "dropping the lease releases it immediately"]
pub struct ExecutionLease {
    service: Arc<dyn ForegroundService>,
}

impl ExecutionLease {
    /// Acquire a lease from `service`.
    pub fn acquire(service: Arc<dyn ForegroundService>) -> Result<Self> {
        service.acquire()?;
        Ok(Self { service })
    }
}

impl fmt::Debug for ExecutionLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLease").finish_non_exhaustive()
    }
}

impl Drop for ExecutionLease {
    fn drop(&mut self) {
        self.service.release();
    }
}

/// Desktop implementation: nothing to keep alive, so it logs and counts.
#[derive(Debug, Default)]
pub struct LoggingForeground {
    held: AtomicU32,
    acquired: AtomicU32,
    released: AtomicU32,
}

impl LoggingForeground {
    /// Create a shim with no outstanding leases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Leases currently held.
    #[must_use]
    pub fn held(&self) -> u32 {
        self.held.load(Ordering::SeqCst)
    }

    /// Total acquisitions.
    #[must_use]
    pub fn acquired(&self) -> u32 {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Total releases.
    #[must_use]
    pub fn released(&self) -> u32 {
        self.released.load(Ordering::SeqCst)
    }
}

impl ForegroundService for LoggingForeground {
    fn acquire(&self) -> Result<()> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let held = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("[Foreground] Execution lease acquired ({} held)", held);
        Ok(())
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .held
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        log::info!(
            "[Foreground] Execution lease released ({} held)",
            previous.saturating_sub(1)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refusing;

    impl ForegroundService for Refusing {
        fn acquire(&self) -> Result<()> {
            anyhow::bail!("notification permission missing")
        }

        fn release(&self) {
            panic!("release without acquire");
        }
    }

    #[test]
    fn test_lease_releases_once_on_drop() {
        let service = Arc::new(LoggingForeground::new());
        let lease = ExecutionLease::acquire(service.clone()).unwrap();
        assert_eq!(service.held(), 1);

        drop(lease);
        assert_eq!(service.held(), 0);
        assert_eq!(service.acquired(), 1);
        assert_eq!(service.released(), 1);
    }

    #[test]
    fn test_failed_acquire_yields_no_lease() {
        let result = ExecutionLease::acquire(Arc::new(Refusing));
        assert!(result.is_err());
    }
}
