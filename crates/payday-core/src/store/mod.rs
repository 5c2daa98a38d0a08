pub mod ledger;
pub mod local_cache;
pub mod progress;
pub mod quota;

pub use ledger::{Ledger, WithdrawalCheck};
pub use local_cache::{identity_key, user_key, LocalCache};
pub use progress::ProgressStore;
pub use quota::{Completion, QuotaReset, QuotaStatus, QuotaTracker, ResetReason};
