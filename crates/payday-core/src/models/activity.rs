use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A bounded daily task that earns currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    /// Liking / reviewing a product
    Like,
    /// Inspecting a product
    Inspector,
    /// Spinning the wheel
    Wheel,
}

impl Activity {
    pub const ALL: [Activity; 3] = [Activity::Like, Activity::Inspector, Activity::Wheel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Inspector => "inspector",
            Self::Wheel => "wheel",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" | "review" => Ok(Self::Like),
            "inspector" | "inspect" => Ok(Self::Inspector),
            "wheel" | "spin" => Ok(Self::Wheel),
            other => Err(format!("unknown activity: {}", other)),
        }
    }
}

/// Completion counter for one activity inside its rolling window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityQuota {
    pub activity: Activity,
    pub completed_count: u32,
    pub daily_limit: u32,
    /// Unix millis of the last reset.
    pub window_start: u64,
    /// Monotonic id of the current window. Advances by exactly one per reset.
    #[serde(default)]
    pub window_id: u64,
}

impl ActivityQuota {
    pub fn new(activity: Activity, daily_limit: u32, now_ms: u64) -> Self {
        Self {
            activity,
            completed_count: 0,
            daily_limit,
            window_start: now_ms,
            window_id: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.completed_count)
    }

    pub fn is_exhausted(&self) -> bool {
        self.completed_count >= self.daily_limit
    }

    pub fn is_stale(&self, now_ms: u64, window_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start) >= window_ms
    }
}

/// Exists only while the matching quota is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    pub activity: Activity,
    /// Unix millis at which the activity becomes available again.
    pub end_time: u64,
}

impl Cooldown {
    pub fn is_active(&self, now_ms: u64) -> bool {
        now_ms < self.end_time
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.end_time.saturating_sub(now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_parse_aliases() {
        assert_eq!("like".parse::<Activity>().unwrap(), Activity::Like);
        assert_eq!("Spin".parse::<Activity>().unwrap(), Activity::Wheel);
        assert_eq!("inspect".parse::<Activity>().unwrap(), Activity::Inspector);
        assert!("chat".parse::<Activity>().is_err());
    }

    #[test]
    fn test_quota_staleness() {
        let quota = ActivityQuota::new(Activity::Like, 10, 1_000);
        assert!(!quota.is_stale(1_000 + 99, 100));
        assert!(quota.is_stale(1_000 + 100, 100));
    }

    #[test]
    fn test_cooldown_expiry_boundary() {
        let cooldown = Cooldown {
            activity: Activity::Wheel,
            end_time: 500,
        };
        assert!(cooldown.is_active(499));
        assert!(!cooldown.is_active(500));
        assert_eq!(cooldown.remaining_ms(200), 300);
        assert_eq!(cooldown.remaining_ms(900), 0);
    }
}
