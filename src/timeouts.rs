use std::collections::HashSet;
use std::time::Duration;

/// A named set of dialog ids that get a non-default timeout.
#[derive(Debug, Clone)]
pub struct TimeoutOverride {
    pub name: String,
    pub timeout: Duration,
    pub ids: HashSet<i64>,
}

/// Maps a dialog id to its effective scan timeout.
///
/// Pure and lock-free: lookups take `&self` only, so the policy can be shared
/// across all in-flight scan tasks without synchronization.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    default: Duration,
    overrides: Vec<TimeoutOverride>,
}

impl TimeoutPolicy {
    pub fn new(default: Duration, overrides: Vec<TimeoutOverride>) -> Self {
        Self { default, overrides }
    }

    /// Effective timeout for one dialog. Of all override sets containing the
    /// id, the longest duration wins; with no match the default applies.
    pub fn timeout_for(&self, id: i64) -> Duration {
        self.overrides
            .iter()
            .filter(|o| o.ids.contains(&id))
            .map(|o| o.timeout)
            .max()
            .unwrap_or(self.default)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[i64]) -> HashSet<i64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn default_applies_without_overrides() {
        let policy = TimeoutPolicy::new(Duration::from_secs(100), Vec::new());
        assert_eq!(policy.timeout_for(5), Duration::from_secs(100));
    }

    #[test]
    fn matching_override_applies_even_when_shorter_than_default() {
        let policy = TimeoutPolicy::new(
            Duration::from_secs(100),
            vec![TimeoutOverride {
                name: "quick".into(),
                timeout: Duration::from_secs(10),
                ids: set(&[7]),
            }],
        );
        assert_eq!(policy.timeout_for(7), Duration::from_secs(10));
        assert_eq!(policy.timeout_for(8), Duration::from_secs(100));
    }

    #[test]
    fn longest_override_wins_when_id_is_in_several_sets() {
        let policy = TimeoutPolicy::new(
            Duration::from_secs(100),
            vec![
                TimeoutOverride {
                    name: "long-timeout".into(),
                    timeout: Duration::from_secs(50),
                    ids: set(&[3, 4]),
                },
                TimeoutOverride {
                    name: "extended-stats".into(),
                    timeout: Duration::from_secs(10),
                    ids: set(&[4, 5]),
                },
            ],
        );
        assert_eq!(policy.timeout_for(4), Duration::from_secs(50));
        assert_eq!(policy.timeout_for(3), Duration::from_secs(50));
        assert_eq!(policy.timeout_for(5), Duration::from_secs(10));
    }
}
