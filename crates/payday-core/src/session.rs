//! Session bootstrap and identity tracking.
//!
//! At startup the remote session lookup races a deadline; the last identity
//! seen is kept in the local cache so the app still knows who the user is
//! when offline. After bootstrap, remote [`AuthEvent`]s are applied through
//! [`SessionBootstrapper::handle_auth_event`], which runs the same lookup with
//! a shorter deadline.
//!
//! State machine: `Resolving -> Resolved(identity) | Resolved(null)`, published
//! on a `watch` channel so any number of readers observe the same state.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::error::RemoteError;
use crate::models::{Identity, SessionOrigin, SessionState};
use crate::remote::{AuthEvent, RemoteStore};
use crate::store::{identity_key, LocalCache};

/// Outcome of racing the remote lookup against the deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Found(Identity),
    /// The remote answered: nobody is signed in.
    SignedOut,
    /// Error or deadline; the remote said nothing usable.
    NoAnswer,
}

pub struct SessionBootstrapper {
    remote: Arc<dyn RemoteStore>,
    cache: Arc<LocalCache>,
    state_tx: watch::Sender<SessionState>,
    bootstrap_deadline: Duration,
    listener_deadline: Duration,
}

impl SessionBootstrapper {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        cache: Arc<LocalCache>,
        config: &EngineConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::initializing());
        Self {
            remote,
            cache,
            state_tx,
            bootstrap_deadline: config.bootstrap_deadline(),
            listener_deadline: config.listener_deadline(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn cached_identity(&self) -> Option<Identity> {
        self.cache.get(&identity_key())
    }

    /// Resolve the current user at startup. Always terminates within the
    /// bootstrap deadline and never returns an error.
    pub async fn resolve(&self) -> SessionState {
        self.state_tx.send_replace(SessionState::initializing());

        let previous = self.cached_identity();
        let state = match self.lookup(self.bootstrap_deadline).await {
            Lookup::Found(identity) => {
                if let Some(stale) = previous.filter(|p| p.id != identity.id) {
                    tracing::info!("session: remote user replaces cached {}, purging", stale.id);
                    self.cache.purge_user(&stale.id);
                }
                self.adopt_remote(identity)
            }
            Lookup::SignedOut => {
                if let Some(stale) = previous {
                    tracing::info!(
                        "session: remote reports no session, dropping cached {}",
                        stale.id
                    );
                    self.cache.purge_user(&stale.id);
                }
                SessionState::signed_out()
            }
            Lookup::NoAnswer => match previous {
                Some(identity) => {
                    tracing::info!(
                        "session: using cached identity {} (possibly stale)",
                        identity.id
                    );
                    SessionState::resolved(identity, SessionOrigin::Cache)
                }
                None => SessionState::signed_out(),
            },
        };

        self.state_tx.send_replace(state.clone());
        state
    }

    /// Apply one identity-change notification.
    ///
    /// Returns the new state when it differs from the current one. On
    /// sign-out the departing user's cached state is purged before the
    /// identity is cleared.
    pub async fn handle_auth_event(&self, event: &AuthEvent) -> Option<SessionState> {
        let next = match event {
            AuthEvent::SignedIn(hint) | AuthEvent::UserUpdated(hint) => {
                match self.lookup(self.listener_deadline).await {
                    Lookup::Found(identity) => self.adopt_remote(identity),
                    Lookup::SignedOut => return self.clear_identity(),
                    // The notification itself came from the remote.
                    Lookup::NoAnswer => self.adopt_remote(hint.clone()),
                }
            }
            AuthEvent::SignedOut | AuthEvent::SessionDestroyed => {
                tracing::info!("session: {:?} received", event);
                return self.clear_identity();
            }
            AuthEvent::TokenRefreshed => {
                tracing::debug!("session: token refreshed");
                return None;
            }
        };

        let previous = self.state();
        if previous == next {
            return None;
        }
        if let Some(old_id) = previous.user_id() {
            if Some(old_id) != next.user_id() {
                tracing::info!("session: identity switched from {}, purging its cache", old_id);
                self.cache.purge_user(old_id);
            }
        }
        self.state_tx.send_replace(next.clone());
        Some(next)
    }

    /// Purge the current user's cached state, then publish the signed-out
    /// state. Returns `None` if already signed out.
    pub fn clear_identity(&self) -> Option<SessionState> {
        let previous = self.state();
        if previous.identity.is_none() && !previous.initializing {
            return None;
        }
        if let Some(user_id) = previous.user_id() {
            let removed = self.cache.purge_user(user_id);
            tracing::info!("session: signed out {}, purged {} cache entries", user_id, removed);
        }
        let next = SessionState::signed_out();
        self.state_tx.send_replace(next.clone());
        Some(next)
    }

    /// Record a successful contact with the remote for the current identity.
    pub fn mark_fresh(&self) {
        self.state_tx.send_if_modified(|state| {
            if state.origin == SessionOrigin::Cache {
                state.origin = SessionOrigin::Remote;
                true
            } else {
                false
            }
        });
    }

    fn adopt_remote(&self, identity: Identity) -> SessionState {
        self.cache.set(&identity_key(), &identity);
        SessionState::resolved(identity, SessionOrigin::Remote)
    }

    /// The deadline timer is dropped as soon as the lookup answers, so it can
    /// never fire into a later session.
    async fn lookup(&self, deadline: Duration) -> Lookup {
        let result = tokio::time::timeout(deadline, self.remote.current_session())
            .await
            .unwrap_or(Err(RemoteError::Timeout));
        match result {
            Ok(Some(identity)) => Lookup::Found(identity),
            Ok(None) => Lookup::SignedOut,
            Err(e) => {
                tracing::warn!("session: remote lookup within {:?} failed: {}", deadline, e);
                Lookup::NoAnswer
            }
        }
    }
}
