//! In-process remote store.
//!
//! Holds the three tables in memory, optionally mirrored to a JSON file so a
//! CLI session can pick up where the last one left off. Failure injection
//! (`set_offline`, `fail_next_writes`, `set_latency`, `hang_session_lookup`)
//! lets callers exercise the engine's degraded paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{AuthEvent, CooldownRow, ProgressRow, RemoteResult, RemoteStore, TransactionRow};
use crate::error::RemoteError;
use crate::models::{Activity, Identity};

const AUTH_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default, Serialize, Deserialize)]
struct RemoteTables {
    /// Registered users keyed by email
    users: BTreeMap<String, Identity>,
    /// User id of the active session
    session: Option<String>,
    transactions: Vec<TransactionRow>,
    progress: BTreeMap<String, ProgressRow>,
    /// user_id -> activity -> row
    cooldowns: BTreeMap<String, BTreeMap<Activity, CooldownRow>>,
}

pub struct MemoryRemote {
    tables: Mutex<RemoteTables>,
    path: Option<PathBuf>,
    auth_tx: broadcast::Sender<AuthEvent>,
    offline: AtomicBool,
    hang_session: AtomicBool,
    failing_writes: AtomicU32,
    latency_ms: AtomicU64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let (auth_tx, _) = broadcast::channel(AUTH_CHANNEL_CAPACITY);
        Self {
            tables: Mutex::new(RemoteTables::default()),
            path: None,
            auth_tx,
            offline: AtomicBool::new(false),
            hang_session: AtomicBool::new(false),
            failing_writes: AtomicU32::new(0),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Open a file-backed store. A missing file starts empty; a corrupt one
    /// is reported as an error rather than silently discarded.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let tables = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => RemoteTables::default(),
            Err(e) => return Err(e),
        };
        let mut remote = Self::new();
        remote.tables = Mutex::new(tables);
        remote.path = Some(path.to_path_buf());
        Ok(remote)
    }

    // ===== Failure injection =====

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// The next `n` write operations fail with `Unavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Session lookups never answer while set.
    pub fn hang_session_lookup(&self, hang: bool) {
        self.hang_session.store(hang, Ordering::SeqCst);
    }

    // ===== Auth =====

    /// Sign in by email, registering the user on first use.
    pub fn sign_in(&self, email: &str, display_name: Option<&str>) -> Identity {
        let identity = {
            let mut tables = self.tables.lock();
            let identity = tables
                .users
                .entry(email.to_string())
                .or_insert_with(|| Identity::new(format!("user-{}", Uuid::new_v4()), email))
                .clone();
            let identity = match display_name {
                Some(name) if name != identity.display_name => {
                    let updated = identity.with_display_name(name);
                    tables.users.insert(email.to_string(), updated.clone());
                    updated
                }
                _ => identity,
            };
            tables.session = Some(identity.id.clone());
            identity
        };
        self.persist();
        tracing::info!("remote: signed in {}", identity.id);
        let _ = self.auth_tx.send(AuthEvent::SignedIn(identity.clone()));
        identity
    }

    pub fn sign_out(&self) {
        self.tables.lock().session = None;
        self.persist();
        let _ = self.auth_tx.send(AuthEvent::SignedOut);
    }

    pub fn destroy_session(&self) {
        self.tables.lock().session = None;
        self.persist();
        let _ = self.auth_tx.send(AuthEvent::SessionDestroyed);
    }

    // ===== Inspection =====

    pub fn transactions_for(&self, user_id: &str) -> Vec<TransactionRow> {
        self.tables
            .lock()
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn progress_for(&self, user_id: &str) -> Option<ProgressRow> {
        self.tables.lock().progress.get(user_id).cloned()
    }

    pub fn cooldowns_for(&self, user_id: &str) -> Vec<CooldownRow> {
        self.tables
            .lock()
            .cooldowns
            .get(user_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    // ===== Internals =====

    async fn simulate_network(&self) -> RemoteResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.is_offline() {
            return Err(RemoteError::Unavailable("remote offline".into()));
        }
        Ok(())
    }

    async fn begin_write(&self) -> RemoteResult<()> {
        self.simulate_network().await?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RemoteError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    /// Write the tables to disk (temp file then rename). Failures are logged.
    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let json = match serde_json::to_string_pretty(&*self.tables.lock()) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("remote: failed to serialize tables: {}", e);
                return;
            }
        };
        let temp = path.with_extension("json.tmp");
        if let Err(e) = std::fs::write(&temp, json).and_then(|_| std::fs::rename(&temp, path)) {
            tracing::error!("remote: failed to save {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn current_session(&self) -> RemoteResult<Option<Identity>> {
        if self.hang_session.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.simulate_network().await?;
        let tables = self.tables.lock();
        Ok(tables
            .session
            .as_ref()
            .and_then(|id| tables.users.values().find(|u| &u.id == id).cloned()))
    }

    fn subscribe_auth(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    async fn insert_transaction(&self, row: TransactionRow) -> RemoteResult<()> {
        self.begin_write().await?;
        {
            let mut tables = self.tables.lock();
            if tables.transactions.iter().any(|t| t.id == row.id) {
                return Err(RemoteError::Rejected(format!("duplicate transaction {}", row.id)));
            }
            tables.transactions.push(row);
        }
        self.persist();
        Ok(())
    }

    async fn list_transactions(&self, user_id: &str) -> RemoteResult<Vec<TransactionRow>> {
        self.simulate_network().await?;
        Ok(self.transactions_for(user_id))
    }

    async fn fetch_progress(&self, user_id: &str) -> RemoteResult<Option<ProgressRow>> {
        self.simulate_network().await?;
        Ok(self.progress_for(user_id))
    }

    async fn upsert_progress(&self, row: ProgressRow) -> RemoteResult<()> {
        self.begin_write().await?;
        self.tables
            .lock()
            .progress
            .insert(row.user_id.clone(), row);
        self.persist();
        Ok(())
    }

    async fn fetch_cooldowns(&self, user_id: &str) -> RemoteResult<Vec<CooldownRow>> {
        self.simulate_network().await?;
        Ok(self.cooldowns_for(user_id))
    }

    async fn upsert_cooldown(&self, row: CooldownRow) -> RemoteResult<()> {
        self.begin_write().await?;
        self.tables
            .lock()
            .cooldowns
            .entry(row.user_id.clone())
            .or_default()
            .insert(row.activity, row);
        self.persist();
        Ok(())
    }

    async fn delete_cooldown(&self, user_id: &str, activity: Activity) -> RemoteResult<()> {
        self.begin_write().await?;
        if let Some(rows) = self.tables.lock().cooldowns.get_mut(user_id) {
            rows.remove(&activity);
        }
        self.persist();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amount, Category, TransactionStatus};

    fn row(id: &str, user_id: &str) -> TransactionRow {
        TransactionRow {
            id: id.to_string(),
            user_id: user_id.to_string(),
            amount: Amount::from_cents(100),
            category: Category::Like,
            status: TransactionStatus::Completed,
            created_at: 1,
        }
    }

    #[tokio::test]
    async fn test_sign_in_reuses_registered_user() {
        let remote = MemoryRemote::new();
        let mut rx = remote.subscribe_auth();

        let first = remote.sign_in("ada@example.com", None);
        remote.sign_out();
        let second = remote.sign_in("ada@example.com", Some("Ada"));

        assert_eq!(first.id, second.id);
        assert_eq!(second.display_name, "Ada");
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::SignedIn(first));
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::SignedOut);
        assert_eq!(remote.current_session().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_offline_fails_every_call() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        assert!(remote.current_session().await.is_err());
        assert!(remote.insert_transaction(row("t1", "u1")).await.is_err());
        remote.set_offline(false);
        assert!(remote.insert_transaction(row("t1", "u1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_write_failures_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_next_writes(1);
        assert!(remote.insert_transaction(row("t1", "u1")).await.is_err());
        assert!(remote.insert_transaction(row("t1", "u1")).await.is_ok());
        // Reads are never affected by injected write failures
        remote.fail_next_writes(1);
        assert_eq!(remote.list_transactions("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_transaction_rejected() {
        let remote = MemoryRemote::new();
        remote.insert_transaction(row("t1", "u1")).await.unwrap();
        assert!(matches!(
            remote.insert_transaction(row("t1", "u1")).await,
            Err(RemoteError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_cooldowns_unique_per_user_and_activity() {
        let remote = MemoryRemote::new();
        for end_time in [10, 20] {
            remote
                .upsert_cooldown(CooldownRow {
                    user_id: "u1".into(),
                    activity: Activity::Wheel,
                    end_time,
                })
                .await
                .unwrap();
        }
        let rows = remote.fetch_cooldowns("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].end_time, 20);

        remote.delete_cooldown("u1", Activity::Wheel).await.unwrap();
        assert!(remote.fetch_cooldowns("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");

        let user = {
            let remote = MemoryRemote::open(&path).unwrap();
            let user = remote.sign_in("bo@example.com", None);
            remote.insert_transaction(row("t1", &user.id)).await.unwrap();
            user
        };

        let reopened = MemoryRemote::open(&path).unwrap();
        assert_eq!(reopened.current_session().await.unwrap(), Some(user.clone()));
        assert_eq!(reopened.transactions_for(&user.id).len(), 1);
    }
}
