use std::collections::HashMap;

use crate::error::Rejection;
use crate::models::{Amount, Category, Transaction, TransactionStatus};

/// Outcome of a withdrawal eligibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalCheck {
    pub reason: Option<Rejection>,
}

impl WithdrawalCheck {
    fn allowed() -> Self {
        Self { reason: None }
    }

    fn rejected(reason: Rejection) -> Self {
        Self {
            reason: Some(reason),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.reason.is_none()
    }

    pub fn into_result(self) -> Result<(), Rejection> {
        match self.reason {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}

/// Append-only transaction log for one identity.
///
/// Balance, category totals and withdrawal eligibility are pure folds over
/// `completed` transactions, so they do not depend on the order in which
/// remote persistence finished. The only mutation allowed on an existing
/// entry is settling a `pending` transaction.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    transactions: Vec<Transaction>,
    index: HashMap<String, usize>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a cached or fetched history, keeping the given order.
    pub fn from_transactions(transactions: Vec<Transaction>) -> Self {
        let mut ledger = Self::new();
        for txn in transactions {
            ledger.push(txn);
        }
        ledger
    }

    fn push(&mut self, txn: Transaction) {
        if self.index.contains_key(&txn.id) {
            return;
        }
        self.index.insert(txn.id.clone(), self.transactions.len());
        self.transactions.push(txn);
    }

    // ===== Mutation Methods =====

    /// Append a new transaction. Existing entries are never touched.
    pub fn record(
        &mut self,
        category: Category,
        amount: Amount,
        status: TransactionStatus,
        now_ms: u64,
    ) -> Transaction {
        let txn = Transaction::new(category, amount, status, now_ms);
        self.push(txn.clone());
        txn
    }

    /// Move a pending transaction to `completed` or `failed`.
    /// Returns the updated transaction, or `None` if it was unknown or already settled.
    pub fn settle(&mut self, id: &str, status: TransactionStatus) -> Option<Transaction> {
        if !status.is_settled() {
            return None;
        }
        let idx = *self.index.get(id)?;
        let txn = &mut self.transactions[idx];
        if txn.status.is_settled() {
            return None;
        }
        txn.status = status;
        Some(txn.clone())
    }

    /// Fold a remote history into the local one. The remote's record of a
    /// transaction wins over a local one; unknown remote entries are appended
    /// in `created_at` order. Returns the number of entries added or changed.
    pub fn merge_remote(&mut self, mut remote: Vec<Transaction>) -> usize {
        remote.sort_by_key(|t| t.timestamp);
        let mut changed = 0;
        for txn in remote {
            match self.index.get(&txn.id) {
                Some(&idx) => {
                    let local = &mut self.transactions[idx];
                    if local.status != txn.status {
                        if local.status.is_settled() {
                            tracing::warn!(
                                "ledger: remote status {} overrides local {} for {}",
                                txn.status,
                                local.status,
                                txn.id
                            );
                        }
                        local.status = txn.status;
                        changed += 1;
                    }
                }
                None => {
                    self.push(txn);
                    changed += 1;
                }
            }
        }
        changed
    }

    // ===== Query Methods =====

    fn completed(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|t| t.is_completed())
    }

    /// Sum of `amount` over completed transactions.
    pub fn balance(&self) -> Amount {
        self.completed().map(|t| t.amount).sum()
    }

    pub fn total_by_category(&self, category: Category) -> Amount {
        self.completed()
            .filter(|t| t.category == category)
            .map(|t| t.amount)
            .sum()
    }

    /// Completed earnings across every non-withdrawal category.
    pub fn earned(&self) -> Amount {
        self.completed()
            .filter(|t| t.category.is_earning())
            .map(|t| t.amount)
            .sum()
    }

    /// Completed withdrawals as a positive amount.
    pub fn withdrawn(&self) -> Amount {
        self.completed()
            .filter(|t| t.category == Category::Withdrawal)
            .map(|t| t.amount.abs())
            .sum()
    }

    /// Allowed iff `earned >= min_earned` and `amount <= earned - withdrawn`.
    pub fn withdrawable(&self, amount: Amount, min_earned: Amount) -> WithdrawalCheck {
        if !amount.is_positive() {
            return WithdrawalCheck::rejected(Rejection::InvalidAmount);
        }
        let earned = self.earned();
        if earned < min_earned {
            return WithdrawalCheck::rejected(Rejection::BelowMinimumEarned {
                earned,
                required: min_earned,
            });
        }
        let available = earned - self.withdrawn();
        if amount > available {
            return WithdrawalCheck::rejected(Rejection::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        WithdrawalCheck::allowed()
    }

    /// All transactions in insertion order.
    pub fn history(&self) -> &[Transaction] {
        &self.transactions
    }

    /// The `n` most recent transactions, newest first.
    pub fn recent(&self, n: usize) -> Vec<&Transaction> {
        self.transactions.iter().rev().take(n).collect()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Pending)
    }
}
