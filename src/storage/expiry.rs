//! Background Expiry Sweeper
//!
//! This module implements a background task that periodically scans the
//! keyspace for expired entries and removes them. This is called "active
//! expiry" as opposed to "lazy expiry" (treating an entry as absent on read).
//!
//! ## Why Do We Need This?
//!
//! Reads never delete anything, so a key that expires and is never written
//! again would stay in memory forever. The sweeper reclaims it.
//!
//! ## Design
//!
//! The sweeper runs as a Tokio task and:
//! 1. Sleeps for a fixed interval (default: 1s)
//! 2. Takes the store's write lock and removes every expired entry
//! 3. Logs how many entries it removed
//!
//! It competes for the write lock on the same terms as any client write.

use crate::storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Time between sweeps (default: 1s)
    pub interval: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the expiry sweeper as a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use ledgerkv::storage::{Store, ExpirySweeper, ExpiryConfig};
    /// use std::sync::Arc;
    ///
    /// let store = Arc::new(Store::new());
    /// let sweeper = ExpirySweeper::start(store, ExpiryConfig::default());
    ///
    /// // Dropping the sweeper will stop it
    /// drop(sweeper);
    /// ```
    pub fn start(store: Arc<Store>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(store, config.clone(), shutdown_rx));

        info!(interval_ms = config.interval.as_millis(), "Background expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(store: Arc<Store>, config: ExpiryConfig, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let expired = store.clean_expired();
        if expired > 0 {
            debug!(
                expired = expired,
                keys_remaining = store.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let store = Arc::new(Store::new());

        for i in 0..10 {
            store.set(format!("key{}", i), "value".to_string(), 1).unwrap();
        }
        store.set("persistent".to_string(), "value".to_string(), 0).unwrap();
        assert_eq!(store.len(), 11);

        let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast());

        tokio::time::sleep(Duration::from_millis(1300)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("persistent"), Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let store = Arc::new(Store::new());

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&store), fast());
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        store.set("key".to_string(), "value".to_string(), 1).unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;

        // Nobody swept it, but reads still treat it as gone
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("key"), None);
    }
}
