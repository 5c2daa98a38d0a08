//! Remote store contract.
//!
//! The remote is the eventual source of truth. It exposes three logical
//! tables (`transactions`, `progress`, `cooldowns`) plus a session lookup and
//! a stream of identity-change notifications. The concrete technology is
//! behind [`RemoteStore`]; [`MemoryRemote`] is the in-process implementation.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::sync::broadcast;

use crate::error::RemoteError;
use crate::models::{
    Activity, ActivityQuota, Amount, Category, Cooldown, Identity, Transaction, TransactionStatus,
};

pub use memory::MemoryRemote;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Identity-change notifications pushed by the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
    /// The server invalidated the session (expiry, revocation).
    SessionDestroyed,
    TokenRefreshed,
    UserUpdated(Identity),
}

/// Row of the `transactions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: String,
    pub user_id: String,
    pub amount: Amount,
    pub category: Category,
    pub status: TransactionStatus,
    pub created_at: u64,
}

impl TransactionRow {
    pub fn from_transaction(user_id: &str, txn: &Transaction) -> Self {
        Self {
            id: txn.id.clone(),
            user_id: user_id.to_string(),
            amount: txn.amount,
            category: txn.category,
            status: txn.status,
            created_at: txn.timestamp,
        }
    }

    pub fn into_transaction(self) -> Transaction {
        Transaction {
            id: self.id,
            timestamp: self.created_at,
            amount: self.amount,
            category: self.category,
            status: self.status,
        }
    }
}

/// Per-user singleton row of the `progress` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRow {
    pub user_id: String,
    pub balance: Amount,
    pub completed_counts: BTreeMap<Activity, u32>,
    /// Start of each activity's rolling window (unix millis).
    #[serde(default)]
    pub window_starts: BTreeMap<Activity, u64>,
    pub wheels_remaining: u32,
    /// Most recent window start across activities.
    pub last_reset_at: u64,
    pub updated_at: u64,
}

impl ProgressRow {
    pub fn from_quotas<'a>(
        user_id: &str,
        balance: Amount,
        quotas: impl IntoIterator<Item = &'a ActivityQuota>,
        now_ms: u64,
    ) -> Self {
        let mut row = ProgressRow {
            user_id: user_id.to_string(),
            balance,
            updated_at: now_ms,
            ..Default::default()
        };
        for quota in quotas {
            row.completed_counts
                .insert(quota.activity, quota.completed_count);
            row.window_starts.insert(quota.activity, quota.window_start);
            row.last_reset_at = row.last_reset_at.max(quota.window_start);
            if quota.activity == Activity::Wheel {
                row.wheels_remaining = quota.remaining();
            }
        }
        row
    }
}

/// Row of the `cooldowns` table, unique on `(user_id, activity)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownRow {
    pub user_id: String,
    pub activity: Activity,
    pub end_time: u64,
}

impl CooldownRow {
    pub fn from_cooldown(user_id: &str, cooldown: &Cooldown) -> Self {
        Self {
            user_id: user_id.to_string(),
            activity: cooldown.activity,
            end_time: cooldown.end_time,
        }
    }

    pub fn into_cooldown(self) -> Cooldown {
        Cooldown {
            activity: self.activity,
            end_time: self.end_time,
        }
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// The active session, if any. `Ok(None)` means the remote answered and
    /// nobody is signed in.
    async fn current_session(&self) -> RemoteResult<Option<Identity>>;

    fn subscribe_auth(&self) -> broadcast::Receiver<AuthEvent>;

    async fn insert_transaction(&self, row: TransactionRow) -> RemoteResult<()>;
    async fn list_transactions(&self, user_id: &str) -> RemoteResult<Vec<TransactionRow>>;

    async fn fetch_progress(&self, user_id: &str) -> RemoteResult<Option<ProgressRow>>;
    async fn upsert_progress(&self, row: ProgressRow) -> RemoteResult<()>;

    async fn fetch_cooldowns(&self, user_id: &str) -> RemoteResult<Vec<CooldownRow>>;
    async fn upsert_cooldown(&self, row: CooldownRow) -> RemoteResult<()>;
    async fn delete_cooldown(&self, user_id: &str, activity: Activity) -> RemoteResult<()>;
}

/// Run a remote operation, retrying at most once immediately on failure.
pub async fn retry_once<T, F, Fut>(label: &str, mut op: F) -> RemoteResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RemoteResult<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::debug!("remote: {} failed ({}), retrying once", label, first);
            op().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_once_recovers_from_single_failure() {
        let calls = AtomicU32::new(0);
        let result = retry_once("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RemoteError::Timeout)
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_once_gives_up_after_second_failure() {
        let calls = AtomicU32::new(0);
        let result: RemoteResult<()> = retry_once("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RemoteError::Unavailable("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_progress_row_from_quotas() {
        let quotas = [
            ActivityQuota {
                activity: Activity::Like,
                completed_count: 4,
                daily_limit: 20,
                window_start: 100,
                window_id: 0,
            },
            ActivityQuota {
                activity: Activity::Wheel,
                completed_count: 1,
                daily_limit: 3,
                window_start: 300,
                window_id: 2,
            },
        ];
        let row = ProgressRow::from_quotas("u1", Amount::from_cents(250), &quotas, 999);
        assert_eq!(row.completed_counts[&Activity::Like], 4);
        assert_eq!(row.wheels_remaining, 2);
        assert_eq!(row.last_reset_at, 300);
        assert_eq!(row.updated_at, 999);
    }
}
