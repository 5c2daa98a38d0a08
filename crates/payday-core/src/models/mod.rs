pub mod activity;
pub mod amount;
pub mod identity;
pub mod progress;
pub mod session;
pub mod transaction;

pub use activity::{Activity, ActivityQuota, Cooldown};
pub use amount::{Amount, ParseAmountError};
pub use identity::Identity;
pub use progress::ProgressSnapshot;
pub use session::{SessionOrigin, SessionState};
pub use transaction::{Category, Transaction, TransactionStatus};
