//! Population of candidate rules and child generation.

use crate::compute::Rule;
use crate::schema::PopulationConfig;

use super::rng::SearchRng;

/// A mutated copy of one population member.
#[derive(Debug, Clone)]
pub struct Child {
    /// Index of the parent in the population.
    pub parent: usize,
    /// The mutated rule.
    pub rule: Rule,
}

/// Owns the current generation's rules.
#[derive(Debug, Clone)]
pub struct PopulationManager {
    config: PopulationConfig,
    population: Vec<Rule>,
}

impl PopulationManager {
    /// Create an empty manager.
    pub fn new(config: PopulationConfig) -> Self {
        Self {
            population: Vec::with_capacity(config.size),
            config,
        }
    }

    /// Fill the population with `size` independent mutations of `seed_rule`.
    pub fn initialize(&mut self, seed_rule: &Rule, rng: &mut SearchRng) -> &[Rule] {
        self.population = (0..self.config.size)
            .map(|_| rng.mutate(seed_rule, self.config.mutation_rate))
            .collect();
        &self.population
    }

    /// `children` mutated copies of every member, parent-major.
    ///
    /// Child `k * children + d` descends from member `k`.
    pub fn spawn_children(&self, rng: &mut SearchRng) -> Vec<Child> {
        let mut children = Vec::with_capacity(self.config.total_children());
        for (parent, rule) in self.population.iter().enumerate() {
            for _ in 0..self.config.children {
                children.push(Child {
                    parent,
                    rule: rng.mutate(rule, self.config.mutation_rate),
                });
            }
        }
        children
    }

    /// Replace the population wholesale.
    pub fn replace(&mut self, survivors: Vec<Rule>) {
        debug_assert_eq!(survivors.len(), self.config.size);
        self.population = survivors;
    }

    /// Current members.
    pub fn members(&self) -> &[Rule] {
        &self.population
    }

    /// Fingerprints of the current members, in order.
    pub fn fingerprints(&self) -> Vec<u64> {
        self.population.iter().map(Rule::fingerprint).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::RuleSpace;
    use crate::schema::AutomatonConfig;

    fn space() -> RuleSpace {
        RuleSpace::from_config(&AutomatonConfig::default()).unwrap()
    }

    fn manager(size: usize, children: usize, rate: f64) -> PopulationManager {
        PopulationManager::new(PopulationConfig {
            size,
            children,
            mutation_rate: rate,
            ..Default::default()
        })
    }

    #[test]
    fn test_initialize_size() {
        let mut pm = manager(4, 3, 0.05);
        let mut rng = SearchRng::new(1);
        let seed = rng.random_rule(&space());
        let members = pm.initialize(&seed, &mut rng);
        assert_eq!(members.len(), 4);
        assert!(members.iter().all(|r| r.len() == seed.len()));
    }

    #[test]
    fn test_zero_rate_copies_seed() {
        let mut pm = manager(3, 2, 0.0);
        let mut rng = SearchRng::new(2);
        let seed = rng.random_rule(&space());
        pm.initialize(&seed, &mut rng);
        assert!(pm.members().iter().all(|r| *r == seed));

        let children = pm.spawn_children(&mut rng);
        assert!(children.iter().all(|c| c.rule == seed));
    }

    #[test]
    fn test_children_trace_to_parents() {
        let mut pm = manager(3, 4, 0.01);
        let mut rng = SearchRng::new(3);
        let seed = rng.random_rule(&space());
        pm.initialize(&seed, &mut rng);

        let children = pm.spawn_children(&mut rng);
        assert_eq!(children.len(), 12);
        for (i, child) in children.iter().enumerate() {
            assert_eq!(child.parent, i / 4);
            // At rate 0.01 over 512 entries a child stays close to its parent.
            let parent = &pm.members()[child.parent];
            let diff = parent
                .table()
                .iter()
                .zip(child.rule.table())
                .filter(|(a, b)| a != b)
                .count();
            assert!(diff < 40, "child {i} differs in {diff} entries");
        }
    }

    #[test]
    fn test_replace() {
        let mut pm = manager(2, 1, 0.01);
        let mut rng = SearchRng::new(4);
        let a = rng.random_rule(&space());
        let b = rng.random_rule(&space());
        pm.replace(vec![a.clone(), b.clone()]);
        assert_eq!(pm.members(), &[a.clone(), b.clone()]);
        assert_eq!(pm.fingerprints(), vec![a.fingerprint(), b.fingerprint()]);
    }
}
