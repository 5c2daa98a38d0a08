use tokio::sync::watch;

use crate::models::ProgressSnapshot;

/// Reactive holder of the signed-in user's progress snapshot.
///
/// Consumers either read the latest value or subscribe to be woken on change.
/// Writers replace the whole snapshot; there is never a partially-applied
/// state visible to readers.
#[derive(Debug)]
pub struct ProgressStore {
    tx: watch::Sender<ProgressSnapshot>,
}

impl ProgressStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ProgressSnapshot::default());
        Self { tx }
    }

    pub fn get(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn publish(&self, snapshot: ProgressSnapshot) {
        self.tx.send_replace(snapshot);
    }

    /// Apply `f` to the current snapshot and notify subscribers only if it
    /// reports a change.
    pub fn update(&self, f: impl FnOnce(&mut ProgressSnapshot) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    pub fn clear(&self) {
        self.publish(ProgressSnapshot::default());
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Amount;

    #[tokio::test]
    async fn test_subscribers_see_latest_snapshot() {
        let store = ProgressStore::new();
        let mut rx = store.subscribe();

        let mut snapshot = ProgressSnapshot::new("u1");
        snapshot.balance = Amount::from_cents(500);
        store.publish(snapshot);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().balance, Amount::from_cents(500));
        assert_eq!(store.get().user_id, "u1");
    }

    #[tokio::test]
    async fn test_unmodified_update_does_not_notify() {
        let store = ProgressStore::new();
        let mut rx = store.subscribe();
        rx.borrow_and_update();

        assert!(!store.update(|_| false));
        assert!(!rx.has_changed().unwrap());

        assert!(store.update(|s| {
            s.dirty = true;
            true
        }));
        assert!(rx.has_changed().unwrap());
        assert!(store.get().dirty);
    }
}
