use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Activity, ActivityQuota, Amount, Cooldown};

/// Local copy of one user's progress: cached balance, quotas and cooldowns.
///
/// `balance` is only a cache of the ledger fold; readers that need the true
/// value recompute it from transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub user_id: String,
    pub balance: Amount,
    pub quotas: BTreeMap<Activity, ActivityQuota>,
    pub cooldowns: BTreeMap<Activity, Cooldown>,
    /// Local changes not yet confirmed by the remote store.
    #[serde(default)]
    pub dirty: bool,
    pub updated_at: u64,
}

impl ProgressSnapshot {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn quota(&self, activity: Activity) -> Option<&ActivityQuota> {
        self.quotas.get(&activity)
    }

    pub fn cooldown(&self, activity: Activity) -> Option<&Cooldown> {
        self.cooldowns.get(&activity)
    }
}
