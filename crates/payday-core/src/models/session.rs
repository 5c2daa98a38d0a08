use serde::{Deserialize, Serialize};

use super::Identity;

/// Where the current identity came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOrigin {
    Remote,
    /// Adopted from the local cache because the remote did not answer in time.
    /// Remote-derived fields should be treated as possibly stale.
    Cache,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub origin: SessionOrigin,
    pub initializing: bool,
}

impl SessionState {
    pub fn initializing() -> Self {
        Self {
            identity: None,
            origin: SessionOrigin::None,
            initializing: true,
        }
    }

    pub fn resolved(identity: Identity, origin: SessionOrigin) -> Self {
        Self {
            identity: Some(identity),
            origin,
            initializing: false,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            identity: None,
            origin: SessionOrigin::None,
            initializing: false,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }

    pub fn is_stale(&self) -> bool {
        self.origin == SessionOrigin::Cache
    }
}
