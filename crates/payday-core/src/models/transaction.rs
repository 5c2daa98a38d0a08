use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{Activity, Amount};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Like,
    Inspector,
    Wheel,
    Withdrawal,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Like,
        Category::Inspector,
        Category::Wheel,
        Category::Withdrawal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Inspector => "inspector",
            Self::Wheel => "wheel",
            Self::Withdrawal => "withdrawal",
        }
    }

    pub fn is_earning(&self) -> bool {
        !matches!(self, Self::Withdrawal)
    }
}

impl From<Activity> for Category {
    fn from(activity: Activity) -> Self {
        match activity {
            Activity::Like => Self::Like,
            Activity::Inspector => Self::Inspector,
            Activity::Wheel => Self::Wheel,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Completed and failed transactions are immutable.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One balance-affecting event in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    /// Unix millis at which the ledger accepted the transaction.
    pub timestamp: u64,
    pub amount: Amount,
    pub category: Category,
    pub status: TransactionStatus,
}

impl Transaction {
    pub fn new(
        category: Category,
        amount: Amount,
        status: TransactionStatus,
        timestamp: u64,
    ) -> Self {
        Self {
            id: format!("txn-{}", Uuid::new_v4()),
            timestamp,
            amount,
            category,
            status,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}
