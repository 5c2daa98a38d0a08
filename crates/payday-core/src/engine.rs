//! Rewards engine
//!
//! Wires the session bootstrapper, ledger, quota tracker and sync coordinator
//! into the activity flow:
//!
//! `can_perform -> reserve quota slot -> record pending reward -> remote insert
//! -> settle -> persist progress -> broadcast events`
//!
//! All per-user state lives in one [`UserState`] behind a mutex that is never
//! held across an await. Background tasks (the auth listener and the periodic
//! reset check) hold a clone of the engine; call [`RewardsEngine::teardown`]
//! to stop them.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{Rejection, Result};
use crate::events::EngineEvent;
use crate::models::{
    Activity, Amount, Category, Cooldown, ProgressSnapshot, SessionState, Transaction,
    TransactionStatus,
};
use crate::remote::{AuthEvent, RemoteStore};
use crate::rewards::RewardPolicy;
use crate::session::SessionBootstrapper;
use crate::store::{Ledger, LocalCache, ProgressStore, QuotaReset, QuotaStatus, QuotaTracker};
use crate::sync::{CooldownChange, SyncCoordinator, SyncPatch};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Result of one accepted activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOutcome {
    pub activity: Activity,
    /// `completed`, or `failed` when the remote never confirmed the reward
    pub transaction: Transaction,
    pub quota: QuotaStatus,
    pub cooldown_started: Option<Cooldown>,
    /// Whether the progress update reached the remote
    pub synced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub user_id: String,
    pub balance: Amount,
    pub earned: Amount,
    pub withdrawn: Amount,
    pub by_category: BTreeMap<Category, Amount>,
    pub quotas: Vec<QuotaStatus>,
    pub pending: usize,
    /// Local changes not yet on the remote
    pub dirty: bool,
    /// Identity came from cache and the remote has not been reached since
    pub stale: bool,
}

struct UserState {
    user_id: String,
    ledger: Ledger,
    quotas: QuotaTracker,
}

/// A spawned task stopped through a watch channel.
struct BackgroundTask {
    cancel_tx: watch::Sender<bool>,
    _handle: JoinHandle<()>,
}

impl BackgroundTask {
    fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(f(cancel_rx));
        Self {
            cancel_tx,
            _handle: handle,
        }
    }

    fn cancel(self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// Resolves once cancellation is requested or the sender is gone.
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    while !*cancel_rx.borrow() {
        if cancel_rx.changed().await.is_err() {
            return;
        }
    }
}

struct Inner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    remote: Arc<dyn RemoteStore>,
    session: SessionBootstrapper,
    sync: SyncCoordinator,
    rewards: RewardPolicy,
    user: Mutex<Option<UserState>>,
    events: broadcast::Sender<EngineEvent>,
    listener: Mutex<Option<BackgroundTask>>,
    reset_timer: Mutex<Option<BackgroundTask>>,
}

#[derive(Clone)]
pub struct RewardsEngine {
    inner: Arc<Inner>,
}

impl RewardsEngine {
    pub fn new(config: EngineConfig, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let cache = LocalCache::open(&config.data_dir);
        let rewards = RewardPolicy::new(&config);
        Self::with_parts(config, remote, cache, Arc::new(SystemClock), rewards)
    }

    pub fn with_parts(
        config: EngineConfig,
        remote: Arc<dyn RemoteStore>,
        cache: LocalCache,
        clock: Arc<dyn Clock>,
        rewards: RewardPolicy,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(cache);
        let progress = Arc::new(ProgressStore::new());
        let session = SessionBootstrapper::new(remote.clone(), cache.clone(), &config);
        let sync = SyncCoordinator::new(remote.clone(), cache, progress, clock.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                clock,
                remote,
                session,
                sync,
                rewards,
                user: Mutex::new(None),
                events,
                listener: Mutex::new(None),
                reset_timer: Mutex::new(None),
            }),
        })
    }

    // ===== Observation =====

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn session(&self) -> SessionState {
        self.inner.session.state()
    }

    pub fn watch_session(&self) -> watch::Receiver<SessionState> {
        self.inner.session.subscribe()
    }

    pub fn watch_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.sync.progress().subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn current_user_id(&self) -> Option<String> {
        self.inner.user.lock().as_ref().map(|u| u.user_id.clone())
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    // ===== Lifecycle =====

    /// Resolve the session and load the user's state. Never fails; an
    /// unreachable remote yields cached or signed-out state.
    pub async fn bootstrap(&self) -> SessionState {
        let state = self.inner.session.resolve().await;
        self.emit(EngineEvent::SessionChanged(state.clone()));
        if let Some(identity) = &state.identity {
            self.load_user(&identity.id).await;
        }
        state
    }

    /// Start applying remote identity changes in the background. Replaces a
    /// previously started listener.
    pub fn spawn_session_listener(&self) {
        let mut auth_rx = self.inner.remote.subscribe_auth();
        let engine = self.clone();
        let task = BackgroundTask::spawn(move |mut cancel_rx| async move {
            loop {
                tokio::select! {
                    _ = cancelled(&mut cancel_rx) => break,
                    event = auth_rx.recv() => match event {
                        Ok(event) => engine.handle_auth_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("engine: auth listener skipped {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("engine: auth listener stopped");
        });
        if let Some(previous) = self.inner.listener.lock().replace(task) {
            previous.cancel();
        }
    }

    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match &event {
            AuthEvent::SignedOut | AuthEvent::SessionDestroyed => self.unload_user(),
            AuthEvent::SignedIn(hint) | AuthEvent::UserUpdated(hint) => {
                if self.current_user_id().is_some_and(|id| id != hint.id) {
                    self.unload_user();
                }
            }
            AuthEvent::TokenRefreshed => {}
        }

        let Some(state) = self.inner.session.handle_auth_event(&event).await else {
            return;
        };
        self.emit(EngineEvent::SessionChanged(state.clone()));
        match &state.identity {
            Some(identity) => self.load_user(&identity.id).await,
            None => self.unload_user(),
        }
    }

    /// Stop background tasks and drop in-memory user state.
    pub fn teardown(&self) {
        if let Some(task) = self.inner.listener.lock().take() {
            task.cancel();
        }
        self.unload_user();
    }

    async fn load_user(&self, user_id: &str) {
        if self.current_user_id().as_deref() == Some(user_id) {
            return;
        }
        self.unload_user();

        let now = self.now();
        let config = &self.inner.config;
        let cached = self.inner.sync.cached_progress(user_id);
        let ledger = Ledger::from_transactions(self.inner.sync.cached_transactions(user_id));
        let quotas = match &cached {
            Some(snapshot) => QuotaTracker::from_snapshot(config, snapshot, now),
            None => QuotaTracker::new(config, now),
        };

        let balance = ledger.balance();
        if let Some(snapshot) = &cached {
            if snapshot.balance != balance {
                tracing::warn!(
                    "engine: cached balance {} disagrees with ledger {} for {}, using ledger",
                    snapshot.balance,
                    balance,
                    user_id
                );
            }
        }
        let mut snapshot = ProgressSnapshot::new(user_id);
        snapshot.balance = balance;
        snapshot.dirty = cached.as_ref().is_some_and(|s| s.dirty);
        snapshot.updated_at = now;
        quotas.write_snapshot(&mut snapshot);

        *self.inner.user.lock() = Some(UserState {
            user_id: user_id.to_string(),
            ledger,
            quotas,
        });
        self.inner.sync.install(snapshot);
        tracing::info!("engine: loaded {} (balance {})", user_id, balance);
        self.emit(EngineEvent::BalanceChanged { balance });

        self.start_reset_timer(user_id);
        self.reconcile(user_id).await;
        self.apply_resets(Some(user_id)).await;
    }

    fn unload_user(&self) {
        if let Some(task) = self.inner.reset_timer.lock().take() {
            task.cancel();
        }
        let previous = self.inner.user.lock().take();
        if let Some(user) = previous {
            tracing::info!("engine: unloaded {}", user.user_id);
            self.inner.sync.progress().clear();
        }
    }

    fn start_reset_timer(&self, user_id: &str) {
        let interval = self.inner.config.reset_check_interval();
        let engine = self.clone();
        let user_id = user_id.to_string();
        let task = BackgroundTask::spawn(move |mut cancel_rx| async move {
            loop {
                tokio::select! {
                    _ = cancelled(&mut cancel_rx) => break,
                    _ = tokio::time::sleep(interval) => {
                        if engine.current_user_id().as_deref() != Some(user_id.as_str()) {
                            break;
                        }
                        engine.apply_resets(Some(&user_id)).await;
                    }
                }
            }
            tracing::debug!("engine: reset timer for {} stopped", user_id);
        });
        if let Some(previous) = self.inner.reset_timer.lock().replace(task) {
            previous.cancel();
        }
    }

    // ===== Activities =====

    /// Whether `activity` may run now. Applies any due reset first.
    pub async fn can_perform(&self, activity: Activity) -> bool {
        self.apply_resets(None).await;
        let now = self.now();
        self.inner
            .user
            .lock()
            .as_mut()
            .is_some_and(|u| u.quotas.can_perform(activity, now))
    }

    /// Run one activity and credit its reward.
    ///
    /// The quota slot is taken before the reward is persisted, so concurrent
    /// calls can never overshoot the daily limit. A reward the remote never
    /// confirmed is returned as `failed` and does not count toward the
    /// balance; the slot stays used.
    pub async fn perform_activity(&self, activity: Activity) -> Result<ActivityOutcome> {
        let now = self.now();
        let (user_id, completion, pending) = {
            let mut guard = self.inner.user.lock();
            let user = guard.as_mut().ok_or(Rejection::NotSignedIn)?;
            let completion = user.quotas.record_completion(activity, now)?;
            let amount = self.inner.rewards.draw(activity);
            let pending = user
                .ledger
                .record(activity.into(), amount, TransactionStatus::Pending, now);
            (user.user_id.clone(), completion, pending)
        };

        if let Some(reset) = &completion.reset {
            self.emit_reset(reset);
        }
        self.emit(EngineEvent::TransactionRecorded(pending.clone()));
        self.emit(EngineEvent::QuotaChanged(completion.quota.clone()));
        if let Some(cooldown) = &completion.cooldown_started {
            self.emit(EngineEvent::CooldownStarted(cooldown.clone()));
        }

        let transaction = self.confirm(&user_id, pending).await?;

        let (patch, quota) = {
            let guard = self.inner.user.lock();
            let user = guard
                .as_ref()
                .filter(|u| u.user_id == user_id)
                .ok_or(Rejection::NotSignedIn)?;
            let mut patch = SyncPatch::default()
                .balance(user.ledger.balance())
                .quota(user.quotas.quota(activity).clone());
            patch = match user.quotas.cooldown(activity) {
                Some(cooldown) => patch.cooldown(CooldownChange::Started(cooldown.clone())),
                None => patch.cooldown(CooldownChange::Cleared(activity)),
            };
            (patch, user.quotas.status(activity, self.now()))
        };

        let synced = self.persist(&user_id, patch).await;
        Ok(ActivityOutcome {
            activity,
            transaction,
            quota,
            cooldown_started: completion.cooldown_started,
            synced,
        })
    }

    /// Withdraw `amount` from the user's earnings.
    pub async fn withdraw(&self, amount: Amount) -> Result<Transaction> {
        if !amount.is_positive() {
            return Err(Rejection::InvalidAmount.into());
        }
        let now = self.now();
        let (user_id, pending) = {
            let mut guard = self.inner.user.lock();
            let user = guard.as_mut().ok_or(Rejection::NotSignedIn)?;
            // In-flight withdrawals count against what is available
            let reserved: Amount = user
                .ledger
                .pending()
                .filter(|t| t.category == Category::Withdrawal)
                .map(|t| t.amount.abs())
                .sum();
            user.ledger
                .withdrawable(amount + reserved, self.inner.config.min_withdraw_earned)
                .into_result()?;
            let pending =
                user.ledger
                    .record(Category::Withdrawal, -amount, TransactionStatus::Pending, now);
            (user.user_id.clone(), pending)
        };
        self.emit(EngineEvent::TransactionRecorded(pending.clone()));

        let transaction = self.confirm(&user_id, pending).await?;
        if transaction.is_completed() {
            tracing::info!("engine: {} withdrew {}", user_id, amount);
        }
        let balance = self.balance_of(&user_id).ok_or(Rejection::NotSignedIn)?;
        self.persist(&user_id, SyncPatch::default().balance(balance))
            .await;
        Ok(transaction)
    }

    /// Insert the confirmed row remotely, then settle the local pending copy.
    async fn confirm(&self, user_id: &str, pending: Transaction) -> Result<Transaction> {
        let confirmed = Transaction {
            status: TransactionStatus::Completed,
            ..pending.clone()
        };
        let status = match self.inner.sync.insert_transaction(user_id, &confirmed).await {
            Ok(()) => TransactionStatus::Completed,
            Err(e) => {
                tracing::warn!(
                    "engine: {} not persisted, marking failed: {}",
                    pending.id,
                    e
                );
                self.emit(EngineEvent::SyncWarning {
                    message: format!("{} {} could not be saved", pending.category, pending.amount),
                });
                TransactionStatus::Failed
            }
        };

        let (settled, balance) = {
            let mut guard = self.inner.user.lock();
            let user = guard
                .as_mut()
                .filter(|u| u.user_id == user_id)
                .ok_or(Rejection::NotSignedIn)?;
            let settled = user
                .ledger
                .settle(&pending.id, status)
                .unwrap_or_else(|| Transaction { status, ..pending });
            self.inner
                .sync
                .cache_transactions(user_id, user.ledger.history());
            (settled, user.ledger.balance())
        };
        self.emit(EngineEvent::TransactionSettled(settled.clone()));
        self.emit(EngineEvent::BalanceChanged { balance });
        Ok(settled)
    }

    async fn persist(&self, user_id: &str, patch: SyncPatch) -> bool {
        let synced = self.inner.sync.persist(user_id, patch).await;
        if !synced {
            self.emit(EngineEvent::SyncWarning {
                message: "progress saved locally; will sync when the remote is reachable".into(),
            });
        } else {
            self.inner.session.mark_fresh();
        }
        synced
    }

    // ===== Resets =====

    /// Apply every due quota reset for the signed-in user.
    pub async fn check_resets(&self) -> Vec<QuotaReset> {
        self.apply_resets(None).await
    }

    async fn apply_resets(&self, only_user: Option<&str>) -> Vec<QuotaReset> {
        let now = self.now();
        let (user_id, resets, patch) = {
            let mut guard = self.inner.user.lock();
            let Some(user) = guard.as_mut() else {
                return Vec::new();
            };
            if only_user.is_some_and(|id| id != user.user_id) {
                return Vec::new();
            }
            let resets = user.quotas.refresh_all(now);
            let mut patch = SyncPatch::default();
            for reset in &resets {
                patch = patch.quota(user.quotas.quota(reset.activity).clone());
                if reset.cleared_cooldown {
                    patch = patch.cooldown(CooldownChange::Cleared(reset.activity));
                }
            }
            (user.user_id.clone(), resets, patch)
        };
        if resets.is_empty() {
            return resets;
        }

        for reset in &resets {
            self.emit_reset(reset);
        }
        for quota in &patch.quotas {
            self.emit(EngineEvent::QuotaChanged(quota.clone()));
        }
        self.persist(&user_id, patch).await;
        resets
    }

    fn emit_reset(&self, reset: &QuotaReset) {
        self.emit(EngineEvent::QuotaReset {
            activity: reset.activity,
            window_id: reset.window_id,
        });
        if reset.cleared_cooldown {
            self.emit(EngineEvent::CooldownCleared {
                activity: reset.activity,
            });
        }
    }

    // ===== Sync =====

    /// Push unsynced local state, then replace counters and cooldowns with
    /// the remote's and recompute the balance from merged history.
    ///
    /// Returns `Ok(false)` when the remote could not be reached.
    pub async fn reconnect(&self) -> Result<bool> {
        let user_id = self.current_user_id().ok_or(Rejection::NotSignedIn)?;
        Ok(self.reconcile(&user_id).await)
    }

    async fn reconcile(&self, user_id: &str) -> bool {
        let sync = &self.inner.sync;
        if sync.is_dirty() && !sync.flush(user_id).await {
            tracing::warn!("engine: {} still has unsynced changes, keeping local state", user_id);
            return false;
        }
        let remote = match sync.fetch_remote(user_id).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!("engine: reconcile for {} failed: {}", user_id, e);
                return false;
            }
        };

        let now = self.now();
        let (snapshot, resets, needs_push) = {
            let mut guard = self.inner.user.lock();
            let Some(user) = guard.as_mut().filter(|u| u.user_id == user_id) else {
                return false;
            };

            let merged = user.ledger.merge_remote(remote.transactions);
            if merged > 0 {
                tracing::info!("engine: merged {} remote transactions for {}", merged, user_id);
            }

            let cooldown_ends: BTreeMap<Activity, u64> = remote
                .cooldowns
                .iter()
                .map(|row| (row.activity, row.end_time))
                .collect();
            if let Some(row) = &remote.progress {
                for activity in Activity::ALL {
                    let count = row.completed_counts.get(&activity).copied().unwrap_or(0);
                    let window_start = row
                        .window_starts
                        .get(&activity)
                        .copied()
                        .unwrap_or(row.last_reset_at);
                    let cooldown_end = cooldown_ends.get(&activity).copied();
                    let local = user.quotas.quota(activity).completed_count;
                    if local != count {
                        tracing::info!(
                            "engine: remote {} count {} replaces local {}",
                            activity,
                            count,
                            local
                        );
                    }
                    user.quotas
                        .adopt(activity, count, window_start, cooldown_end, now);
                }
            }
            let resets = user.quotas.refresh_all(now);

            let balance = user.ledger.balance();
            let needs_push = match &remote.progress {
                Some(row) if row.balance != balance => {
                    tracing::warn!(
                        "engine: remote balance {} disagrees with ledger {} for {}, overwriting",
                        row.balance,
                        balance,
                        user_id
                    );
                    true
                }
                Some(_) => !resets.is_empty(),
                None => true,
            };

            let mut snapshot = ProgressSnapshot::new(user_id);
            snapshot.balance = balance;
            snapshot.updated_at = now;
            user.quotas.write_snapshot(&mut snapshot);
            sync.cache_transactions(user_id, user.ledger.history());
            (snapshot, resets, needs_push)
        };

        let balance = snapshot.balance;
        sync.install(snapshot);
        for reset in &resets {
            self.emit_reset(reset);
        }
        if needs_push && !sync.flush(user_id).await {
            self.emit(EngineEvent::SyncWarning {
                message: "reconciled state could not be pushed".into(),
            });
        }
        self.inner.session.mark_fresh();
        self.emit(EngineEvent::Reconciled { balance });
        self.emit(EngineEvent::BalanceChanged { balance });
        true
    }

    // ===== Queries =====

    fn balance_of(&self, user_id: &str) -> Option<Amount> {
        self.inner
            .user
            .lock()
            .as_ref()
            .filter(|u| u.user_id == user_id)
            .map(|u| u.ledger.balance())
    }

    pub fn balance(&self) -> Result<Amount> {
        let guard = self.inner.user.lock();
        let user = guard.as_ref().ok_or(Rejection::NotSignedIn)?;
        Ok(user.ledger.balance())
    }

    pub fn summary(&self) -> Result<Summary> {
        let now = self.now();
        let dirty = self.inner.sync.is_dirty();
        let stale = self.inner.session.state().is_stale();
        let guard = self.inner.user.lock();
        let user = guard.as_ref().ok_or(Rejection::NotSignedIn)?;

        Ok(Summary {
            user_id: user.user_id.clone(),
            balance: user.ledger.balance(),
            earned: user.ledger.earned(),
            withdrawn: user.ledger.withdrawn(),
            by_category: Category::ALL
                .iter()
                .map(|&c| (c, user.ledger.total_by_category(c)))
                .collect(),
            quotas: Activity::ALL
                .iter()
                .map(|&a| user.quotas.status(a, now))
                .collect(),
            pending: user.ledger.pending().count(),
            dirty,
            stale,
        })
    }

    /// Most recent transactions first.
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<Transaction>> {
        let guard = self.inner.user.lock();
        let user = guard.as_ref().ok_or(Rejection::NotSignedIn)?;
        let limit = limit.unwrap_or(usize::MAX);
        Ok(user.ledger.recent(limit).into_iter().cloned().collect())
    }
}
