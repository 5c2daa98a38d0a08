//! Sync coordination between in-memory state, the local cache and the remote.
//!
//! Every change is applied to the [`ProgressStore`] first so readers see it
//! at once, then pushed to the remote with one immediate retry, then written
//! to the local cache. A failed remote write leaves the snapshot `dirty`; the
//! next [`SyncCoordinator::flush`] pushes the full state again.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::clock::Clock;
use crate::constants::cache;
use crate::models::{Activity, ActivityQuota, Amount, Cooldown, ProgressSnapshot, Transaction};
use crate::remote::{
    retry_once, CooldownRow, ProgressRow, RemoteResult, RemoteStore, TransactionRow,
};
use crate::store::{user_key, LocalCache, ProgressStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CooldownChange {
    Started(Cooldown),
    Cleared(Activity),
}

impl CooldownChange {
    pub fn activity(&self) -> Activity {
        match self {
            Self::Started(cooldown) => cooldown.activity,
            Self::Cleared(activity) => *activity,
        }
    }
}

/// Partial update of a user's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPatch {
    pub balance: Option<Amount>,
    pub quotas: Vec<ActivityQuota>,
    pub cooldowns: Vec<CooldownChange>,
}

impl SyncPatch {
    pub fn balance(mut self, balance: Amount) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn quota(mut self, quota: ActivityQuota) -> Self {
        self.quotas.push(quota);
        self
    }

    pub fn cooldown(mut self, change: CooldownChange) -> Self {
        self.cooldowns.push(change);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.balance.is_none() && self.quotas.is_empty() && self.cooldowns.is_empty()
    }

    fn touches_progress_row(&self) -> bool {
        self.balance.is_some() || !self.quotas.is_empty()
    }

    fn apply(&self, snapshot: &mut ProgressSnapshot) {
        if let Some(balance) = self.balance {
            snapshot.balance = balance;
        }
        for quota in &self.quotas {
            snapshot.quotas.insert(quota.activity, quota.clone());
        }
        for change in &self.cooldowns {
            match change {
                CooldownChange::Started(cooldown) => {
                    snapshot.cooldowns.insert(cooldown.activity, cooldown.clone());
                }
                CooldownChange::Cleared(activity) => {
                    snapshot.cooldowns.remove(activity);
                }
            }
        }
    }
}

/// Everything the remote knows about one user, fetched together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    pub progress: Option<ProgressRow>,
    pub cooldowns: Vec<CooldownRow>,
    pub transactions: Vec<Transaction>,
}

pub struct SyncCoordinator {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<LocalCache>,
    progress: Arc<ProgressStore>,
    clock: Arc<dyn Clock>,
    /// Serializes remote writes for the progress row and cooldowns.
    write_lock: AsyncMutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        cache: Arc<LocalCache>,
        progress: Arc<ProgressStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            cache,
            progress,
            clock,
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    // ===== Local cache =====

    pub fn cached_progress(&self, user_id: &str) -> Option<ProgressSnapshot> {
        self.cache
            .get::<ProgressSnapshot>(&user_key(user_id, cache::PROGRESS_KEY))
            .filter(|s| s.user_id == user_id)
    }

    pub fn cached_transactions(&self, user_id: &str) -> Vec<Transaction> {
        self.cache
            .get(&user_key(user_id, cache::TRANSACTIONS_KEY))
            .unwrap_or_default()
    }

    pub fn cache_transactions(&self, user_id: &str, transactions: &[Transaction]) {
        self.cache
            .set(&user_key(user_id, cache::TRANSACTIONS_KEY), &transactions);
    }

    /// Replace the in-memory snapshot and mirror it to the cache.
    pub fn install(&self, snapshot: ProgressSnapshot) {
        self.cache
            .set(&user_key(&snapshot.user_id, cache::PROGRESS_KEY), &snapshot);
        self.progress.publish(snapshot);
    }

    pub fn is_dirty(&self) -> bool {
        self.progress.get().dirty
    }

    // ===== Remote writes =====

    pub async fn insert_transaction(&self, user_id: &str, txn: &Transaction) -> RemoteResult<()> {
        let row = TransactionRow::from_transaction(user_id, txn);
        retry_once("insert_transaction", || {
            self.remote.insert_transaction(row.clone())
        })
        .await
    }

    /// Apply `patch` locally, push it to the remote and cache the result.
    ///
    /// Returns `true` when the remote accepted every write. On `false` the
    /// local state is kept and marked dirty.
    pub async fn persist(&self, user_id: &str, patch: SyncPatch) -> bool {
        if patch.is_empty() {
            return true;
        }
        let now = self.clock.now_ms();
        let applied = self.progress.update(|snapshot| {
            if snapshot.user_id != user_id {
                return false;
            }
            patch.apply(snapshot);
            snapshot.updated_at = now;
            true
        });
        if !applied {
            tracing::warn!("sync: dropping patch for {} (not the active user)", user_id);
            return false;
        }

        let _writer = self.write_lock.lock().await;
        let snapshot = self.progress.get();
        if snapshot.user_id != user_id {
            return false;
        }
        // Earlier writes were lost; push everything rather than just this patch.
        let ok = if snapshot.dirty {
            self.push_all(user_id).await
        } else {
            self.push_patch(user_id, &patch).await
        };
        self.finish(user_id, ok)
    }

    /// Push the full local snapshot. Clears the dirty flag on success.
    pub async fn flush(&self, user_id: &str) -> bool {
        let _writer = self.write_lock.lock().await;
        if self.progress.get().user_id != user_id {
            return false;
        }
        let ok = self.push_all(user_id).await;
        if ok {
            tracing::info!("sync: flushed local state for {}", user_id);
        }
        self.finish(user_id, ok)
    }

    async fn push_all(&self, user_id: &str) -> bool {
        let mut ok = self.push_progress_row(user_id).await;
        for activity in Activity::ALL {
            ok &= self.push_cooldown(user_id, activity).await;
        }
        ok
    }

    async fn push_patch(&self, user_id: &str, patch: &SyncPatch) -> bool {
        let mut ok = true;
        if patch.touches_progress_row() {
            ok &= self.push_progress_row(user_id).await;
        }
        let activities: BTreeSet<Activity> = patch.cooldowns.iter().map(|c| c.activity()).collect();
        for activity in activities {
            ok &= self.push_cooldown(user_id, activity).await;
        }
        ok
    }

    /// Upsert the progress row from the snapshot as it is now. Callers hold
    /// `write_lock`, so a row built earlier can never land after a newer one.
    async fn push_progress_row(&self, user_id: &str) -> bool {
        let snapshot = self.progress.get();
        if snapshot.user_id != user_id {
            return false;
        }
        let row = ProgressRow::from_quotas(
            user_id,
            snapshot.balance,
            snapshot.quotas.values(),
            self.clock.now_ms(),
        );
        match retry_once("upsert_progress", || self.remote.upsert_progress(row.clone())).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("sync: progress write failed for {}: {}", user_id, e);
                false
            }
        }
    }

    /// Mirror the current cooldown of `activity`: upsert it, or delete the
    /// remote row when there is none locally.
    async fn push_cooldown(&self, user_id: &str, activity: Activity) -> bool {
        let current = self.progress.get();
        if current.user_id != user_id {
            return false;
        }
        let result = match current.cooldown(activity) {
            Some(cooldown) => {
                let row = CooldownRow::from_cooldown(user_id, cooldown);
                retry_once("upsert_cooldown", || self.remote.upsert_cooldown(row.clone())).await
            }
            None => {
                retry_once("delete_cooldown", || {
                    self.remote.delete_cooldown(user_id, activity)
                })
                .await
            }
        };
        if let Err(e) = &result {
            tracing::warn!("sync: {} cooldown write failed for {}: {}", activity, user_id, e);
        }
        result.is_ok()
    }

    /// Record the outcome in the dirty flag and write the snapshot to cache.
    fn finish(&self, user_id: &str, ok: bool) -> bool {
        self.progress.update(|s| {
            if s.user_id != user_id {
                return false;
            }
            let dirty = !ok;
            let changed = s.dirty != dirty;
            s.dirty = dirty;
            changed
        });
        let snapshot = self.progress.get();
        if snapshot.user_id == user_id {
            self.cache
                .set(&user_key(user_id, cache::PROGRESS_KEY), &snapshot);
        }
        ok
    }

    // ===== Remote reads =====

    pub async fn fetch_remote(&self, user_id: &str) -> RemoteResult<RemoteState> {
        let (progress, cooldowns, rows) = futures::try_join!(
            self.remote.fetch_progress(user_id),
            self.remote.fetch_cooldowns(user_id),
            self.remote.list_transactions(user_id),
        )?;
        let transactions = rows
            .into_iter()
            .map(TransactionRow::into_transaction)
            .collect();
        Ok(RemoteState {
            progress,
            cooldowns,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{Category, TransactionStatus};
    use crate::remote::MemoryRemote;

    const NOW: u64 = 1_700_000_000_000;

    struct Fixture {
        remote: Arc<MemoryRemote>,
        cache: Arc<LocalCache>,
        sync: SyncCoordinator,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemote::new());
        let cache = Arc::new(LocalCache::in_memory());
        let progress = Arc::new(ProgressStore::new());
        let sync = SyncCoordinator::new(
            remote.clone(),
            cache.clone(),
            progress,
            Arc::new(ManualClock::new(NOW)),
        );
        sync.install(ProgressSnapshot::new("u1"));
        Fixture {
            remote,
            cache,
            sync,
        }
    }

    fn quota(count: u32) -> ActivityQuota {
        ActivityQuota {
            activity: Activity::Like,
            completed_count: count,
            daily_limit: 20,
            window_start: NOW,
            window_id: 0,
        }
    }

    #[tokio::test]
    async fn test_persist_writes_remote_and_cache() {
        let f = fixture();
        let ok = f
            .sync
            .persist("u1", SyncPatch::default().balance(Amount::from_cents(150)).quota(quota(1)))
            .await;

        assert!(ok);
        let row = f.remote.progress_for("u1").unwrap();
        assert_eq!(row.balance, Amount::from_cents(150));
        assert_eq!(row.completed_counts[&Activity::Like], 1);

        let cached = f.sync.cached_progress("u1").unwrap();
        assert_eq!(cached.balance, Amount::from_cents(150));
        assert!(!cached.dirty);
    }

    #[tokio::test]
    async fn test_single_failure_is_retried() {
        let f = fixture();
        f.remote.fail_next_writes(1);
        assert!(f.sync.persist("u1", SyncPatch::default().quota(quota(2))).await);
        assert!(!f.sync.is_dirty());
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_state_dirty() {
        let f = fixture();
        f.remote.set_offline(true);
        let cooldown = Cooldown {
            activity: Activity::Like,
            end_time: NOW + 1000,
        };
        let ok = f
            .sync
            .persist(
                "u1",
                SyncPatch::default()
                    .quota(quota(20))
                    .cooldown(CooldownChange::Started(cooldown.clone())),
            )
            .await;

        assert!(!ok);
        let local = f.sync.progress().get();
        assert!(local.dirty);
        assert_eq!(local.cooldown(Activity::Like), Some(&cooldown));
        assert!(f.sync.cached_progress("u1").unwrap().dirty);
        assert!(f.remote.progress_for("u1").is_none());

        f.remote.set_offline(false);
        assert!(f.sync.flush("u1").await);
        assert!(!f.sync.is_dirty());
        assert_eq!(f.remote.cooldowns_for("u1").len(), 1);
        assert_eq!(f.remote.progress_for("u1").unwrap().completed_counts[&Activity::Like], 20);
    }

    #[tokio::test]
    async fn test_dirty_state_triggers_full_push() {
        let f = fixture();
        f.remote.set_offline(true);
        f.sync
            .persist(
                "u1",
                SyncPatch::default().cooldown(CooldownChange::Started(Cooldown {
                    activity: Activity::Wheel,
                    end_time: NOW + 5,
                })),
            )
            .await;
        f.remote.set_offline(false);

        // Only a balance change, but the lost cooldown goes up too
        assert!(f.sync.persist("u1", SyncPatch::default().balance(Amount::from_cents(1))).await);
        assert_eq!(f.remote.cooldowns_for("u1")[0].activity, Activity::Wheel);
    }

    #[tokio::test]
    async fn test_patch_for_other_user_is_dropped() {
        let f = fixture();
        let ok = f.sync.persist("u2", SyncPatch::default().quota(quota(1))).await;
        assert!(!ok);
        assert!(f.remote.progress_for("u2").is_none());
        assert!(f.sync.progress().get().quotas.is_empty());
    }

    #[tokio::test]
    async fn test_insert_transaction_and_fetch_remote() {
        let f = fixture();
        let txn = Transaction::new(
            Category::Like,
            Amount::from_cents(75),
            TransactionStatus::Completed,
            NOW,
        );
        f.sync.insert_transaction("u1", &txn).await.unwrap();
        f.sync.cache_transactions("u1", std::slice::from_ref(&txn));

        let state = f.sync.fetch_remote("u1").await.unwrap();
        assert_eq!(state.transactions, vec![txn.clone()]);
        assert!(state.progress.is_none());
        assert_eq!(f.sync.cached_transactions("u1"), vec![txn]);
        assert!(f.cache.keys().iter().all(|k| k.starts_with("payday:u1:")));
    }
}
