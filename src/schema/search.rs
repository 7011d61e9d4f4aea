//! Search configuration and result types for the evolutionary rule search.
//!
//! The search mutates a population of rules, scores every child with a
//! neural predictor trained at fixed simulation checkpoints, and keeps a
//! fixed number of children per generation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{AutomatonConfig, ConfigError};

/// Simulation depths at which grids are snapshotted for fitness evaluation.
pub const CHECKPOINTS: [u64; 3] = [5, 50, 300];

/// Top-level configuration for an evolutionary rule search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Automaton parameters (states, horizon, grid size, ...).
    #[serde(default)]
    pub automaton: AutomatonConfig,
    /// Population and generation settings.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Classifier training hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Root directory for genealogy logs, results streams and snapshots.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Random seed for reproducibility. Drawn from entropy when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Abort a single candidate evaluation after this many seconds.
    #[serde(default)]
    pub candidate_timeout_secs: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            automaton: AutomatonConfig::default(),
            population: PopulationConfig::default(),
            training: TrainingConfig::default(),
            data_root: default_data_root(),
            random_seed: None,
            candidate_timeout_secs: None,
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data_2d")
}

/// Population settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Number of rules kept per generation (P).
    #[serde(default = "default_population_size")]
    pub size: usize,
    /// Children spawned per parent (D).
    #[serde(default = "default_children")]
    pub children: usize,
    /// Number of generations to run.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Per-entry probability of replacing a rule value during mutation.
    #[serde(default = "default_mutation_rate")]
    pub mutation_rate: f64,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            size: default_population_size(),
            children: default_children(),
            generations: default_generations(),
            mutation_rate: default_mutation_rate(),
        }
    }
}

impl PopulationConfig {
    /// Number of children evaluated per generation (P×D).
    #[inline]
    pub fn total_children(&self) -> usize {
        self.size * self.children
    }
}

fn default_population_size() -> usize {
    5
}
fn default_children() -> usize {
    5
}
fn default_generations() -> usize {
    1000
}
fn default_mutation_rate() -> f64 {
    0.01
}

/// Hyperparameters for one classifier training session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of passes over the training set.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Mini-batch size. Incomplete trailing batches are dropped.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Step size applied to the averaged batch gradient.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Nesterov momentum coefficient.
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    /// L2 penalty coefficient.
    #[serde(default)]
    pub l2: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            learning_rate: default_learning_rate(),
            momentum: default_momentum(),
            l2: 0.0,
        }
    }
}

fn default_epochs() -> usize {
    10
}
fn default_batch_size() -> usize {
    8
}
fn default_learning_rate() -> f64 {
    5e-4
}
fn default_momentum() -> f64 {
    0.9
}

// ============================================================================
// Evaluation results
// ============================================================================

/// Train and test cross-entropy of one checkpoint training session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointErrors {
    /// Mean training error of the final epoch.
    pub train: f64,
    /// Mean error of a forward pass over the held-out grid.
    pub test: f64,
}

/// Per-candidate error record for the checkpoints 5, 50 and 300.
///
/// Checkpoints that were never reached keep zero errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorStatistics {
    pub train_5: f64,
    pub test_5: f64,
    pub train_50: f64,
    pub test_50: f64,
    pub train_300: f64,
    pub test_300: f64,
}

impl ErrorStatistics {
    /// Store the errors of a checkpoint session. Returns false for unknown checkpoints.
    pub fn record(&mut self, checkpoint: u64, errors: CheckpointErrors) -> bool {
        let (train, test) = match checkpoint {
            5 => (&mut self.train_5, &mut self.test_5),
            50 => (&mut self.train_50, &mut self.test_50),
            300 => (&mut self.train_300, &mut self.test_300),
            _ => return false,
        };
        *train = errors.train;
        *test = errors.test;
        true
    }

    /// Errors recorded for a checkpoint.
    pub fn get(&self, checkpoint: u64) -> Option<CheckpointErrors> {
        match checkpoint {
            5 => Some(CheckpointErrors {
                train: self.train_5,
                test: self.test_5,
            }),
            50 => Some(CheckpointErrors {
                train: self.train_50,
                test: self.test_50,
            }),
            300 => Some(CheckpointErrors {
                train: self.train_300,
                test: self.test_300,
            }),
            _ => None,
        }
    }
}

/// Scalar score of one child, used only for ranking within a generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Index of the child in the generation's children list.
    pub index: usize,
    /// Fitness score.
    pub score: f64,
}

/// Progress report emitted after each generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationProgress {
    /// Generation index (0-based).
    pub generation: usize,
    /// Total generations requested.
    pub total_generations: usize,
    /// Lowest finite score among the children.
    pub lowest_score: f64,
    /// Mean finite score among the children.
    pub mean_score: f64,
    /// Highest finite score among the children.
    pub highest_score: f64,
    /// Children whose evaluation failed this generation.
    pub failures: usize,
    /// Fingerprints of the selected population, in log order.
    pub selected: Vec<u64>,
}

/// Summary of a completed (or stopped) search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSummary {
    /// Generations completed.
    pub generations: usize,
    /// Total candidate evaluations performed.
    pub total_evaluations: u64,
    /// Evaluations that failed and received the sentinel score.
    pub failed_evaluations: u64,
    /// Seed of the run's random stream.
    pub random_seed: u64,
    /// Fingerprint of the seed rule (names the output files).
    pub seed_fingerprint: u64,
    /// Genealogy log path.
    pub genealogy_path: PathBuf,
    /// Results stream path.
    pub results_path: PathBuf,
    /// Time taken (in seconds).
    pub elapsed_seconds: f64,
    /// Evaluations per second.
    pub evaluations_per_second: f64,
    /// Reason for stopping.
    pub stop_reason: StopReason,
}

/// Reason the search stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// Reached the requested number of generations.
    MaxGenerations,
    /// Cancelled through the cancellation handle.
    Cancelled,
}

// ============================================================================
// Validation
// ============================================================================

/// Search configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchConfigError {
    #[error("Population size must be at least 1")]
    PopulationTooSmall,
    #[error("Children per parent must be at least 1")]
    NoChildren,
    #[error("Mutation rate {0} must lie in [0, 1]")]
    InvalidMutationRate(f64),
    #[error("Invalid training parameter: {0}")]
    InvalidTraining(String),
    #[error("Automaton config validation failed: {0}")]
    Automaton(#[from] ConfigError),
}

impl SearchConfig {
    /// Validate search configuration.
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        self.automaton.validate()?;

        if self.population.size == 0 {
            return Err(SearchConfigError::PopulationTooSmall);
        }
        if self.population.children == 0 {
            return Err(SearchConfigError::NoChildren);
        }
        let rate = self.population.mutation_rate;
        if !(0.0..=1.0).contains(&rate) {
            return Err(SearchConfigError::InvalidMutationRate(rate));
        }

        self.training.validate()
    }
}

impl TrainingConfig {
    /// Validate training hyperparameters.
    pub fn validate(&self) -> Result<(), SearchConfigError> {
        let invalid = |msg: String| Err(SearchConfigError::InvalidTraining(msg));

        if self.epochs == 0 {
            return invalid("epochs must be positive".into());
        }
        if self.batch_size == 0 {
            return invalid("batch size must be positive".into());
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid(format!(
                "learning rate {} must be positive",
                self.learning_rate
            ));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return invalid(format!("momentum {} must lie in [0, 1)", self.momentum));
        }
        if !self.l2.is_finite() || self.l2 < 0.0 {
            return invalid(format!("l2 {} must be non-negative", self.l2));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = SearchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.population.total_children(), 25);
    }

    #[test]
    fn test_serialization() {
        let config = SearchConfig {
            random_seed: Some(7),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SearchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.random_seed, Some(7));
        assert_eq!(parsed.population, config.population);
        assert_eq!(parsed.training, config.training);
    }

    #[test]
    fn test_empty_json_is_default() {
        let parsed: SearchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.training.batch_size, 8);
        assert_eq!(parsed.training.learning_rate, 5e-4);
        assert_eq!(parsed.population.mutation_rate, 0.01);
        assert_eq!(parsed.data_root, PathBuf::from("data_2d"));
    }

    #[test]
    fn test_invalid_mutation_rate() {
        let mut config = SearchConfig::default();
        config.population.mutation_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(SearchConfigError::InvalidMutationRate(_))
        ));
    }

    #[test]
    fn test_invalid_momentum() {
        let mut config = SearchConfig::default();
        config.training.momentum = 1.0;
        assert!(matches!(
            config.validate(),
            Err(SearchConfigError::InvalidTraining(_))
        ));
    }

    #[test]
    fn test_error_statistics_record() {
        let mut stats = ErrorStatistics::default();
        let errors = CheckpointErrors {
            train: 0.5,
            test: 0.7,
        };
        assert!(stats.record(50, errors));
        assert!(!stats.record(51, errors));
        assert_eq!(stats.train_50, 0.5);
        assert_eq!(stats.test_50, 0.7);
        assert_eq!(stats.get(50), Some(errors));
        assert_eq!(stats.get(5), Some(CheckpointErrors::default()));
        assert_eq!(stats.get(7), None);
    }
}
