//! Shared, reloadable configuration values.

use std::sync::Arc;
use tokio::sync::watch;

/// Holds the current value of a reloadable config section.
///
/// Readers take cheap snapshots; long-running workers can
/// [`subscribe`](ConfigStore::subscribe) and wake up on reload.
#[derive(Debug)]
pub struct ConfigStore<T> {
    tx: Arc<watch::Sender<T>>,
}

/// Receives notifications when a [`ConfigStore`] is updated.
#[derive(Debug)]
pub struct ConfigWatcher<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the value and wake every watcher.
    pub fn update(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Copy of the current value.
    pub fn snapshot(&self) -> T {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> ConfigWatcher<T> {
        ConfigWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T: Clone> ConfigWatcher<T> {
    /// Wait for the next update and return the new value.
    ///
    /// Fails once every [`ConfigStore`] handle has been dropped.
    pub async fn changed(&mut self) -> Result<T, watch::error::RecvError> {
        self.rx.changed().await?;
        Ok(self.rx.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_wakes_watchers() {
        let store = ConfigStore::new(1u32);
        let mut watcher = store.subscribe();
        let handle = store.clone();

        handle.update(2);
        assert_eq!(watcher.changed().await.unwrap(), 2);
        assert_eq!(store.snapshot(), 2);
    }

    #[tokio::test]
    async fn test_watcher_fails_after_store_dropped() {
        let store = ConfigStore::new("a".to_string());
        let mut watcher = store.subscribe();
        drop(store);
        assert!(watcher.changed().await.is_err());
    }
}
