//! Fitness oracle: predictability of a rule's dynamics at fixed checkpoints.

use rand::rngs::StdRng;

use crate::compute::{
    Classifier, ClassifierError, Dataset, IndependentRuns, Rule, RuleSpace, SimulationError,
    SnapshotPair, SnapshotSource,
};
use crate::schema::{AutomatonConfig, CHECKPOINTS, CheckpointErrors, ErrorStatistics, TrainingConfig};

/// Errors raised while evaluating one candidate.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationError),
    #[error("Classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error("Evaluation panicked: {0}")]
    Panicked(String),
    #[error("Evaluation exceeded {0}s")]
    TimedOut(u64),
}

/// One checkpoint training session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Session {
    /// Simulation depth of the snapshots.
    pub checkpoint: u64,
    /// Final-epoch train error and held-out error.
    pub errors: CheckpointErrors,
}

/// Result of evaluating one rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Errors per checkpoint; unreached checkpoints stay zero.
    pub stats: ErrorStatistics,
    /// Sessions in checkpoint order, one per reached checkpoint.
    pub sessions: Vec<Session>,
}

/// Scores rules by training a fresh classifier at each checkpoint.
#[derive(Debug, Clone)]
pub struct FitnessOracle<S = IndependentRuns> {
    space: RuleSpace,
    automaton: AutomatonConfig,
    training: TrainingConfig,
    source: S,
}

impl<S: SnapshotSource> FitnessOracle<S> {
    /// Create an oracle.
    pub fn new(
        space: RuleSpace,
        automaton: AutomatonConfig,
        training: TrainingConfig,
        source: S,
    ) -> Self {
        Self {
            space,
            automaton,
            training,
            source,
        }
    }

    pub fn space(&self) -> &RuleSpace {
        &self.space
    }

    /// Simulate `rule` and train one classifier per reached checkpoint.
    ///
    /// All randomness (initial grids, weights, shuffles) comes from `rng`.
    pub fn evaluate(
        &self,
        rule: &Rule,
        rng: &mut StdRng,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<Evaluation, EvaluationError> {
        let snapshots = self.source.snapshots(
            rule,
            &self.space,
            &self.automaton,
            &CHECKPOINTS,
            rng,
            interrupted,
        )?;

        let mut evaluation = Evaluation::default();
        for (&checkpoint, pair) in CHECKPOINTS.iter().zip(snapshots) {
            let Some(pair) = pair else {
                log::debug!("Checkpoint {} not reached", checkpoint);
                continue;
            };
            let errors = self.train_checkpoint(&pair, rng, interrupted)?;
            log::debug!(
                "Checkpoint {}: train error {:.6}, test error {:.6}",
                checkpoint,
                errors.train,
                errors.test
            );
            evaluation.stats.record(checkpoint, errors);
            evaluation.sessions.push(Session { checkpoint, errors });
        }

        Ok(evaluation)
    }

    /// Train a fresh classifier on the training grid and evaluate it on the test grid.
    pub fn train_checkpoint(
        &self,
        pair: &SnapshotPair,
        rng: &mut StdRng,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<CheckpointErrors, ClassifierError> {
        let train = Dataset::from_grid(&pair.train, &self.space);
        let test = Dataset::from_grid(&pair.test, &self.space);

        let mut classifier = Classifier::for_space(&self.space, self.training.clone(), rng);
        let report = classifier.train(&train, rng, interrupted)?;
        let test_error = classifier.evaluate(&test)?;

        Ok(CheckpointErrors {
            train: report.final_error,
            test: test_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::Grid;
    use rand::SeedableRng;

    fn config() -> AutomatonConfig {
        AutomatonConfig {
            size: 16,
            ..Default::default()
        }
    }

    fn oracle() -> FitnessOracle {
        oracle_with(config())
    }

    fn oracle_with(automaton: AutomatonConfig) -> FitnessOracle {
        let space = RuleSpace::from_config(&automaton).unwrap();
        FitnessOracle::new(space, automaton, TrainingConfig::default(), IndependentRuns)
    }

    /// Source that replays fixed grids at every checkpoint.
    struct FixedGrids(Grid);

    impl SnapshotSource for FixedGrids {
        fn snapshots(
            &self,
            _rule: &Rule,
            _space: &RuleSpace,
            _config: &AutomatonConfig,
            checkpoints: &[u64],
            _rng: &mut StdRng,
            _interrupted: &dyn Fn() -> bool,
        ) -> Result<Vec<Option<SnapshotPair>>, SimulationError> {
            Ok(checkpoints
                .iter()
                .map(|_| {
                    Some(SnapshotPair {
                        train: self.0.clone(),
                        test: self.0.clone(),
                    })
                })
                .collect())
        }
    }

    #[test]
    fn test_random_rule_trains_every_checkpoint() {
        let oracle = oracle_with(AutomatonConfig {
            early_stop: false,
            ..config()
        });
        let mut rng = StdRng::seed_from_u64(1);
        let rule = Rule::random(oracle.space(), &mut rng);

        let evaluation = oracle.evaluate(&rule, &mut rng, &|| false).unwrap();
        assert_eq!(evaluation.sessions.len(), 3);
        let checkpoints: Vec<u64> = evaluation.sessions.iter().map(|s| s.checkpoint).collect();
        assert_eq!(checkpoints, CHECKPOINTS);
        for session in &evaluation.sessions {
            assert!(session.errors.train > 0.0);
            assert!(session.errors.test.is_finite());
            assert_eq!(evaluation.stats.get(session.checkpoint), Some(session.errors));
        }
    }

    #[test]
    fn test_fixed_point_leaves_checkpoints_unreached() {
        let oracle = oracle();
        let mut rng = StdRng::seed_from_u64(2);
        let rule = Rule::constant(oracle.space(), 0);

        let evaluation = oracle.evaluate(&rule, &mut rng, &|| false).unwrap();
        assert!(evaluation.sessions.is_empty());
        assert_eq!(evaluation.stats, ErrorStatistics::default());
    }

    #[test]
    fn test_deterministic_for_same_stream() {
        let oracle = oracle();
        let mut rng = StdRng::seed_from_u64(3);
        let rule = Rule::random(oracle.space(), &mut rng);

        let a = oracle
            .evaluate(&rule, &mut StdRng::seed_from_u64(9), &|| false)
            .unwrap();
        let b = oracle
            .evaluate(&rule, &mut StdRng::seed_from_u64(9), &|| false)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_pluggable_source() {
        let space = RuleSpace::from_config(&config()).unwrap();
        let oracle = FitnessOracle::new(
            space,
            config(),
            TrainingConfig {
                learning_rate: 0.01,
                ..Default::default()
            },
            FixedGrids(Grid::filled(16, 1)),
        );
        let mut rng = StdRng::seed_from_u64(4);
        let rule = Rule::random(&space, &mut rng);

        let evaluation = oracle.evaluate(&rule, &mut rng, &|| false).unwrap();
        assert_eq!(evaluation.sessions.len(), 3);
        assert!(evaluation.stats.train_300 < 0.1);
        assert!(evaluation.stats.test_300 < 0.1);
    }

    #[test]
    fn test_interrupt_propagates() {
        let oracle = oracle();
        let mut rng = StdRng::seed_from_u64(5);
        let rule = Rule::random(oracle.space(), &mut rng);
        assert!(matches!(
            oracle.evaluate(&rule, &mut rng, &|| true),
            Err(EvaluationError::Simulation(SimulationError::Interrupted(_)))
        ));
    }
}
