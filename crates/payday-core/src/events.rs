use crate::models::{Activity, ActivityQuota, Amount, Cooldown, SessionState, Transaction};

/// Change notifications broadcast to every consumer of the engine.
///
/// A balance display and an activity screen subscribe independently and see
/// the same sequence without polling.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SessionChanged(SessionState),
    TransactionRecorded(Transaction),
    /// A pending transaction became completed or failed
    TransactionSettled(Transaction),
    BalanceChanged { balance: Amount },
    QuotaChanged(ActivityQuota),
    QuotaReset { activity: Activity, window_id: u64 },
    CooldownStarted(Cooldown),
    CooldownCleared { activity: Activity },
    /// A remote write failed; local state kept and marked dirty
    SyncWarning { message: String },
    /// Local state was replaced by a fresh remote fetch
    Reconciled { balance: Amount },
}
