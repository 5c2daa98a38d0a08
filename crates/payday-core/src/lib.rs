//! Reward ledger and quota/cooldown engine.
//!
//! Users perform bounded daily activities to earn money. The engine decides
//! who the user is ([`session`]), whether an activity may run ([`store::quota`]),
//! what the user has earned ([`store::ledger`]) and keeps the local cache and
//! the remote store in step ([`sync`]). [`RewardsEngine`] wires them together.

pub mod clock;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod remote;
pub mod rewards;
pub mod session;
pub mod store;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, RewardRange};
pub use engine::{ActivityOutcome, RewardsEngine, Summary};
pub use error::{CacheError, EngineError, Rejection, RemoteError, Result};
pub use events::EngineEvent;
pub use models::{
    Activity, ActivityQuota, Amount, Category, Cooldown, Identity, ProgressSnapshot,
    SessionOrigin, SessionState, Transaction, TransactionStatus,
};
pub use remote::{AuthEvent, MemoryRemote, RemoteStore};
pub use rewards::RewardPolicy;
pub use session::SessionBootstrapper;
pub use store::{Ledger, LocalCache, ProgressStore, QuotaStatus, QuotaTracker};
pub use sync::{SyncCoordinator, SyncPatch};
