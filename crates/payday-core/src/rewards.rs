use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::config::{EngineConfig, RewardRange};
use crate::models::{Activity, Amount};

/// Draws the reward for one completed activity, uniformly within the
/// activity's configured range.
#[derive(Debug)]
pub struct RewardPolicy {
    ranges: BTreeMap<Activity, RewardRange>,
    rng: Mutex<StdRng>,
}

impl RewardPolicy {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic draws for tests and replays.
    pub fn seeded(config: &EngineConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &EngineConfig, rng: StdRng) -> Self {
        let ranges = Activity::ALL
            .iter()
            .map(|&a| (a, config.reward_range(a)))
            .collect();
        Self {
            ranges,
            rng: Mutex::new(rng),
        }
    }

    pub fn range(&self, activity: Activity) -> RewardRange {
        self.ranges[&activity]
    }

    pub fn draw(&self, activity: Activity) -> Amount {
        let range = self.range(activity);
        if range.min_cents >= range.max_cents {
            return Amount::from_cents(range.min_cents);
        }
        let cents = self.rng.lock().gen_range(range.min_cents..=range.max_cents);
        Amount::from_cents(cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draws_stay_in_range() {
        let config = EngineConfig::default();
        let policy = RewardPolicy::seeded(&config, 7);
        for activity in Activity::ALL {
            let range = config.reward_range(activity);
            for _ in 0..500 {
                assert!(range.contains(policy.draw(activity)));
            }
        }
    }

    #[test]
    fn test_degenerate_range_is_fixed() {
        let mut config = EngineConfig::default();
        config
            .reward_ranges
            .insert(Activity::Like, RewardRange::new(125, 125));
        let policy = RewardPolicy::seeded(&config, 1);
        assert_eq!(policy.draw(Activity::Like), Amount::from_cents(125));
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let config = EngineConfig::default();
        let a = RewardPolicy::seeded(&config, 42);
        let b = RewardPolicy::seeded(&config, 42);
        let xs: Vec<_> = (0..10).map(|_| a.draw(Activity::Wheel)).collect();
        let ys: Vec<_> = (0..10).map(|_| b.draw(Activity::Wheel)).collect();
        assert_eq!(xs, ys);
    }
}
