//! Explicit random stream for the rule search.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::compute::{Rule, RuleSpace};

/// Master random stream of a search run.
///
/// Every mutation is drawn from this stream on the orchestrating thread.
/// Parallel work receives its own [`StdRng`] through [`SearchRng::stream`].
#[derive(Debug, Clone)]
pub struct SearchRng {
    rng: StdRng,
}

impl SearchRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw a seed for a derived stream.
    pub fn next_seed(&mut self) -> u64 {
        self.rng.r#gen()
    }

    /// Independent stream for one parallel task.
    pub fn stream(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.next_seed())
    }

    /// Uniformly random rule.
    pub fn random_rule(&mut self, space: &RuleSpace) -> Rule {
        Rule::random(space, &mut self.rng)
    }

    /// Mutated copy of `rule`.
    pub fn mutate(&mut self, rule: &Rule, rate: f64) -> Rule {
        rule.mutated(rate, &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AutomatonConfig;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SearchRng::new(42);
        let mut b = SearchRng::new(42);
        assert_eq!(a.next_seed(), b.next_seed());

        let mut sa = a.stream();
        let mut sb = b.stream();
        assert_eq!(sa.r#gen::<u64>(), sb.r#gen::<u64>());
    }

    #[test]
    fn test_streams_differ() {
        let mut rng = SearchRng::new(7);
        let mut first = rng.stream();
        let mut second = rng.stream();
        assert_ne!(first.r#gen::<u64>(), second.r#gen::<u64>());
    }

    #[test]
    fn test_random_rule_and_mutation() {
        let space = RuleSpace::from_config(&AutomatonConfig::default()).unwrap();
        let mut rng = SearchRng::new(3);
        let rule = rng.random_rule(&space);
        assert_eq!(rule.len(), space.size());

        let same = rng.mutate(&rule, 0.0);
        assert_eq!(same, rule);

        let changed = rng.mutate(&rule, 1.0);
        assert_eq!(changed.len(), rule.len());
        assert!(
            changed
                .table()
                .iter()
                .zip(rule.table())
                .all(|(a, b)| a != b)
        );
    }
}
