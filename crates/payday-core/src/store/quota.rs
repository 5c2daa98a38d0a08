//! Per-activity quota and cooldown tracking.
//!
//! Each activity cycles through
//! `Active` (quota available) → `Exhausted` (limit hit, cooldown running) →
//! `Active`, returning to `Active` on cooldown expiry or when the rolling
//! window elapses, whichever comes first.
//!
//! Resets are keyed by the quota's `window_id`: a reset only applies to the
//! window it was computed against, so duplicate triggers (a timer tick and
//! a mount-time check in the same tick, or two registrations of the same
//! timer) collapse into one reset.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::EngineConfig;
use crate::error::Rejection;
use crate::models::{Activity, ActivityQuota, Cooldown, ProgressSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    WindowElapsed,
    CooldownExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaReset {
    pub activity: Activity,
    /// Id of the window that starts with this reset
    pub window_id: u64,
    pub reason: ResetReason,
    pub cleared_cooldown: bool,
}

/// Result of accepting one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub quota: ActivityQuota,
    pub cooldown_started: Option<Cooldown>,
    /// A reset applied just before the completion was counted
    pub reset: Option<QuotaReset>,
}

/// Read-only view for UI layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub activity: Activity,
    pub completed: u32,
    pub daily_limit: u32,
    pub remaining: u32,
    pub cooldown_remaining_ms: Option<u64>,
    /// Millis until the rolling window elapses
    pub window_remaining_ms: u64,
}

/// Single writer for one identity's quotas and cooldowns.
#[derive(Debug, Clone)]
pub struct QuotaTracker {
    quotas: BTreeMap<Activity, ActivityQuota>,
    cooldowns: BTreeMap<Activity, Cooldown>,
    cooldown_ms: BTreeMap<Activity, u64>,
    window_ms: u64,
}

impl QuotaTracker {
    pub fn new(config: &EngineConfig, now_ms: u64) -> Self {
        let quotas = Activity::ALL
            .iter()
            .map(|&a| (a, ActivityQuota::new(a, config.daily_limit(a), now_ms)))
            .collect();
        let cooldown_ms = Activity::ALL
            .iter()
            .map(|&a| (a, config.cooldown_duration(a).as_millis() as u64))
            .collect();
        Self {
            quotas,
            cooldowns: BTreeMap::new(),
            cooldown_ms,
            window_ms: config.reset_window().as_millis() as u64,
        }
    }

    /// Restore from a cached snapshot. Limits always come from `config`, so a
    /// lowered limit takes effect immediately.
    pub fn from_snapshot(config: &EngineConfig, snapshot: &ProgressSnapshot, now_ms: u64) -> Self {
        let mut tracker = Self::new(config, now_ms);
        for (activity, cached) in &snapshot.quotas {
            tracker.adopt(
                *activity,
                cached.completed_count,
                cached.window_start,
                snapshot.cooldowns.get(activity).map(|c| c.end_time),
                now_ms,
            );
            if let Some(quota) = tracker.quotas.get_mut(activity) {
                quota.window_id = cached.window_id;
            }
        }
        tracker
    }

    // ===== Query Methods =====

    pub fn quota(&self, activity: Activity) -> &ActivityQuota {
        // Every activity gets a quota in `new`
        &self.quotas[&activity]
    }

    pub fn cooldown(&self, activity: Activity) -> Option<&Cooldown> {
        self.cooldowns.get(&activity)
    }

    pub fn status(&self, activity: Activity, now_ms: u64) -> QuotaStatus {
        let quota = self.quota(activity);
        QuotaStatus {
            activity,
            completed: quota.completed_count,
            daily_limit: quota.daily_limit,
            remaining: quota.remaining(),
            cooldown_remaining_ms: self
                .cooldown(activity)
                .filter(|c| c.is_active(now_ms))
                .map(|c| c.remaining_ms(now_ms)),
            window_remaining_ms: (quota.window_start + self.window_ms).saturating_sub(now_ms),
        }
    }

    /// Whether a completion would be accepted right now. Applies any due
    /// reset first, so an expired cooldown or an elapsed window never blocks.
    pub fn can_perform(&mut self, activity: Activity, now_ms: u64) -> bool {
        self.refresh(activity, now_ms);
        self.check(activity, now_ms).is_ok()
    }

    fn check(&self, activity: Activity, now_ms: u64) -> Result<(), Rejection> {
        if let Some(cooldown) = self.cooldowns.get(&activity) {
            if cooldown.is_active(now_ms) {
                return Err(Rejection::OnCooldown {
                    activity,
                    until: cooldown.end_time,
                });
            }
        }
        if self.quota(activity).is_exhausted() {
            return Err(Rejection::QuotaExhausted { activity });
        }
        Ok(())
    }

    // ===== Mutation Methods =====

    /// Count one completion. Starts the activity's cooldown when this
    /// completion reaches the daily limit.
    pub fn record_completion(
        &mut self,
        activity: Activity,
        now_ms: u64,
    ) -> Result<Completion, Rejection> {
        let reset = self.refresh(activity, now_ms);
        self.check(activity, now_ms)?;

        let cooldown_ms = self.cooldown_ms.get(&activity).copied().unwrap_or(0);
        let quota = self
            .quotas
            .get_mut(&activity)
            .ok_or(Rejection::QuotaExhausted { activity })?;
        quota.completed_count += 1;
        let quota = quota.clone();

        let cooldown_started = if quota.is_exhausted() {
            let cooldown = Cooldown {
                activity,
                end_time: now_ms + cooldown_ms,
            };
            tracing::info!(
                "quota: {} exhausted ({}/{}), cooldown until {}",
                activity,
                quota.completed_count,
                quota.daily_limit,
                cooldown.end_time
            );
            self.cooldowns.insert(activity, cooldown.clone());
            Some(cooldown)
        } else {
            None
        };

        Ok(Completion {
            quota,
            cooldown_started,
            reset,
        })
    }

    /// Reset the activity if its rolling window has elapsed.
    pub fn maybe_reset(&mut self, activity: Activity, now_ms: u64) -> Option<QuotaReset> {
        let quota = self.quotas.get(&activity)?;
        if !quota.is_stale(now_ms, self.window_ms) {
            return None;
        }
        let window_id = quota.window_id;
        self.reset_if_current(activity, window_id, ResetReason::WindowElapsed, now_ms)
    }

    /// Apply whichever reset is due: an expired cooldown or an elapsed window.
    pub fn refresh(&mut self, activity: Activity, now_ms: u64) -> Option<QuotaReset> {
        let expired = self
            .cooldowns
            .get(&activity)
            .is_some_and(|c| !c.is_active(now_ms));
        if expired {
            let window_id = self.quota(activity).window_id;
            return self.reset_if_current(activity, window_id, ResetReason::CooldownExpired, now_ms);
        }
        self.maybe_reset(activity, now_ms)
    }

    pub fn refresh_all(&mut self, now_ms: u64) -> Vec<QuotaReset> {
        Activity::ALL
            .iter()
            .filter_map(|&a| self.refresh(a, now_ms))
            .collect()
    }

    /// Reset `activity` only if it is still in window `expected_window_id`.
    /// A caller holding an outdated window id gets `None`.
    pub fn reset_if_current(
        &mut self,
        activity: Activity,
        expected_window_id: u64,
        reason: ResetReason,
        now_ms: u64,
    ) -> Option<QuotaReset> {
        let quota = self.quotas.get_mut(&activity)?;
        if quota.window_id != expected_window_id {
            return None;
        }
        quota.completed_count = 0;
        quota.window_start = now_ms;
        quota.window_id += 1;
        let window_id = quota.window_id;
        let cleared_cooldown = self.cooldowns.remove(&activity).is_some();

        tracing::info!(
            "quota: reset {} ({:?}) -> window {}",
            activity,
            reason,
            window_id
        );
        Some(QuotaReset {
            activity,
            window_id,
            reason,
            cleared_cooldown,
        })
    }

    /// Overwrite local state with values from the remote, which is trusted over
    /// the local copy for these safety limits. Keeps the cooldown/quota
    /// exclusivity: an exhausted quota always has a cooldown and a cooldown
    /// implies an exhausted quota.
    pub fn adopt(
        &mut self,
        activity: Activity,
        completed_count: u32,
        window_start: u64,
        cooldown_end: Option<u64>,
        now_ms: u64,
    ) {
        let window_ms = self.window_ms;
        let cooldown_ms = self.cooldown_ms.get(&activity).copied().unwrap_or(0);
        let Some(quota) = self.quotas.get_mut(&activity) else {
            return;
        };

        if quota.window_start != window_start {
            quota.window_id += 1;
        }
        quota.window_start = window_start;
        quota.completed_count = completed_count.min(quota.daily_limit);

        match cooldown_end {
            Some(end_time) => {
                quota.completed_count = quota.daily_limit;
                self.cooldowns.insert(activity, Cooldown { activity, end_time });
            }
            None if quota.is_exhausted() => {
                let end_time = (now_ms + cooldown_ms).min(window_start + window_ms);
                self.cooldowns.insert(activity, Cooldown { activity, end_time });
            }
            None => {
                self.cooldowns.remove(&activity);
            }
        }
    }

    /// Write quotas and cooldowns into a snapshot, replacing what was there.
    pub fn write_snapshot(&self, snapshot: &mut ProgressSnapshot) {
        snapshot.quotas = self.quotas.clone();
        snapshot.cooldowns = self.cooldowns.clone();
    }
}
