use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::error::{EngineError, Result};
use crate::models::{Activity, Amount};

/// Inclusive reward range for one activity, in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardRange {
    pub min_cents: i64,
    pub max_cents: i64,
}

impl RewardRange {
    pub const fn new(min_cents: i64, max_cents: i64) -> Self {
        Self {
            min_cents,
            max_cents,
        }
    }

    pub fn contains(&self, amount: Amount) -> bool {
        (self.min_cents..=self.max_cents).contains(&amount.cents())
    }
}

/// Engine configuration. Every limit and duration is named and overridable;
/// fields missing from a config file fall back to `constants`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub daily_limit_per_activity: BTreeMap<Activity, u32>,
    /// Seconds
    pub cooldown_duration_per_activity: BTreeMap<Activity, u64>,
    /// Lifetime earnings required before withdrawing, in currency units.
    #[serde(serialize_with = "units::serialize", deserialize_with = "units::deserialize")]
    pub min_withdraw_earned: Amount,
    pub reset_window_secs: u64,
    pub bootstrap_deadline_ms: u64,
    pub listener_deadline_ms: u64,
    pub reset_check_interval_secs: u64,
    pub reward_ranges: BTreeMap<Activity, RewardRange>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let daily_limit_per_activity = BTreeMap::from([
            (Activity::Like, constants::DAILY_LIMIT_LIKE),
            (Activity::Inspector, constants::DAILY_LIMIT_INSPECTOR),
            (Activity::Wheel, constants::DAILY_LIMIT_WHEEL),
        ]);
        let cooldown_duration_per_activity = BTreeMap::from([
            (Activity::Like, constants::COOLDOWN_LIKE_SECS),
            (Activity::Inspector, constants::COOLDOWN_INSPECTOR_SECS),
            (Activity::Wheel, constants::COOLDOWN_WHEEL_SECS),
        ]);
        let reward_ranges = BTreeMap::from([
            (Activity::Like, range(constants::REWARD_LIKE_CENTS)),
            (Activity::Inspector, range(constants::REWARD_INSPECTOR_CENTS)),
            (Activity::Wheel, range(constants::REWARD_WHEEL_CENTS)),
        ]);

        Self {
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
            daily_limit_per_activity,
            cooldown_duration_per_activity,
            min_withdraw_earned: Amount::from_cents(constants::MIN_WITHDRAW_EARNED_CENTS),
            reset_window_secs: constants::RESET_WINDOW_SECS,
            bootstrap_deadline_ms: constants::BOOTSTRAP_DEADLINE_MS,
            listener_deadline_ms: constants::LISTENER_DEADLINE_MS,
            reset_check_interval_secs: constants::RESET_CHECK_INTERVAL_SECS,
            reward_ranges,
        }
    }
}

fn range((min, max): (i64, i64)) -> RewardRange {
    RewardRange::new(min, max)
}

impl EngineConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Load config from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for activity in Activity::ALL {
            if self.daily_limit(activity) == 0 {
                return Err(EngineError::Config(format!(
                    "daily limit for {} must be at least 1",
                    activity
                )));
            }
            let r = self.reward_range(activity);
            if r.min_cents < 0 || r.min_cents > r.max_cents {
                return Err(EngineError::Config(format!(
                    "invalid reward range for {}: {}..={}",
                    activity, r.min_cents, r.max_cents
                )));
            }
        }
        if self.reset_window_secs == 0 {
            return Err(EngineError::Config("resetWindowSecs must be positive".into()));
        }
        if self.bootstrap_deadline_ms == 0 || self.listener_deadline_ms == 0 {
            return Err(EngineError::Config("deadlines must be positive".into()));
        }
        if self.min_withdraw_earned.is_negative() {
            return Err(EngineError::Config("minWithdrawEarned must not be negative".into()));
        }
        Ok(())
    }

    pub fn daily_limit(&self, activity: Activity) -> u32 {
        self.daily_limit_per_activity
            .get(&activity)
            .copied()
            .unwrap_or_else(|| match activity {
                Activity::Like => constants::DAILY_LIMIT_LIKE,
                Activity::Inspector => constants::DAILY_LIMIT_INSPECTOR,
                Activity::Wheel => constants::DAILY_LIMIT_WHEEL,
            })
    }

    pub fn cooldown_duration(&self, activity: Activity) -> Duration {
        let secs = self
            .cooldown_duration_per_activity
            .get(&activity)
            .copied()
            .unwrap_or_else(|| match activity {
                Activity::Like => constants::COOLDOWN_LIKE_SECS,
                Activity::Inspector => constants::COOLDOWN_INSPECTOR_SECS,
                Activity::Wheel => constants::COOLDOWN_WHEEL_SECS,
            });
        Duration::from_secs(secs)
    }

    pub fn reward_range(&self, activity: Activity) -> RewardRange {
        self.reward_ranges
            .get(&activity)
            .copied()
            .unwrap_or_else(|| match activity {
                Activity::Like => range(constants::REWARD_LIKE_CENTS),
                Activity::Inspector => range(constants::REWARD_INSPECTOR_CENTS),
                Activity::Wheel => range(constants::REWARD_WHEEL_CENTS),
            })
    }

    pub fn reset_window(&self) -> Duration {
        Duration::from_secs(self.reset_window_secs)
    }

    pub fn bootstrap_deadline(&self) -> Duration {
        Duration::from_millis(self.bootstrap_deadline_ms)
    }

    pub fn listener_deadline(&self) -> Duration {
        Duration::from_millis(self.listener_deadline_ms)
    }

    pub fn reset_check_interval(&self) -> Duration {
        Duration::from_secs(self.reset_check_interval_secs.max(1))
    }
}

/// `Amount` as a plain decimal number of currency units (`1000` or `12.5`).
mod units {
    use super::*;

    pub fn serialize<S: Serializer>(amount: &Amount, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_f64(amount.to_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Amount, D::Error> {
        let value = f64::deserialize(d)?;
        Amount::from_f64(value)
            .ok_or_else(|| serde::de::Error::custom("amount must be a finite number"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_observed_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.min_withdraw_earned, Amount::from_units(1000));
        assert_eq!(config.reset_window(), Duration::from_secs(24 * 3600));
        assert_eq!(config.cooldown_duration(Activity::Like), Duration::from_secs(6 * 3600));
        assert_eq!(config.cooldown_duration(Activity::Wheel), Duration::from_secs(24 * 3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let json = r#"{
            "dailyLimitPerActivity": {"like": 10},
            "cooldownDurationPerActivity": {"wheel": 60},
            "minWithdrawEarned": 250.5
        }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.daily_limit(Activity::Like), 10);
        // Activities missing from the map keep their defaults
        assert_eq!(config.daily_limit(Activity::Inspector), constants::DAILY_LIMIT_INSPECTOR);
        assert_eq!(config.cooldown_duration(Activity::Wheel), Duration::from_secs(60));
        assert_eq!(config.min_withdraw_earned, Amount::from_cents(25_050));
        assert_eq!(config.bootstrap_deadline_ms, constants::BOOTSTRAP_DEADLINE_MS);
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let json = r#"{"dailyLimitPerActivity": {"wheel": 0}}"#;
        assert!(matches!(
            EngineConfig::from_json(json),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let json = r#"{"rewardRanges": {"like": {"minCents": 10, "maxCents": 5}}}"#;
        assert!(EngineConfig::from_json(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payday.json");
        std::fs::write(&path, r#"{"resetWindowSecs": 3600}"#).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.reset_window(), Duration::from_secs(3600));

        assert!(EngineConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_roundtrip_json() {
        let config = EngineConfig::new("/tmp/payday");
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"minWithdrawEarned\":1000.0"));
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }
}
