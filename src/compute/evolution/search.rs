//! Generational rule search: mutate, evaluate in parallel, keep survivors, log.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::compute::{
    Automaton, Grid, IndependentRuns, Rule, RuleError, RuleSpace, SimulationError, SnapshotSource,
};
use crate::schema::{
    GenerationProgress, ScoreRecord, SearchConfig, SearchConfigError, SearchSummary, StopReason,
};

use super::fitness::{Evaluation, EvaluationError, FitnessOracle};
use super::population::PopulationManager;
use super::records::{GenealogyLog, ResultsStream, RunPaths, SnapshotWriter};
use super::rng::SearchRng;
use super::selection::{self, FAILED_SCORE};

/// Errors that end a search run.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] SearchConfigError),
    #[error("Invalid rule: {0}")]
    Rule(#[from] RuleError),
    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationError),
    #[error("Evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One evaluated rule.
#[derive(Debug)]
pub struct Candidate {
    /// Position in the evaluated batch.
    pub index: usize,
    /// Fingerprint of the rule.
    pub fingerprint: u64,
    /// Checkpoint errors, or why the evaluation failed.
    pub outcome: Result<Evaluation, EvaluationError>,
    /// Fitness score; [`FAILED_SCORE`] for failed evaluations.
    pub score: f64,
}

impl Candidate {
    pub fn record(&self) -> ScoreRecord {
        ScoreRecord {
            index: self.index,
            score: self.score,
        }
    }

    pub fn failed(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Result of replaying a single rule.
#[derive(Debug)]
pub struct ReplayReport {
    /// The symmetrized rule.
    pub rule: Rule,
    pub fingerprint: u64,
    pub evaluation: Evaluation,
    pub score: f64,
    /// Number of grid snapshots written.
    pub snapshots: usize,
    /// Directory holding the snapshots.
    pub steps_dir: PathBuf,
}

/// Evolutionary search over rule tables.
pub struct SearchEngine<S = IndependentRuns> {
    config: SearchConfig,
    seed: u64,
    rng: SearchRng,
    oracle: FitnessOracle<S>,
    population: PopulationManager,
    paths: RunPaths,
    generation: usize,
    total_evaluations: u64,
    failed_evaluations: u64,
    cancelled: Arc<AtomicBool>,
}

impl SearchEngine {
    /// Create an engine that scores rules on two independent runs per candidate.
    pub fn new(config: SearchConfig) -> Result<Self, SearchError> {
        Self::with_source(config, IndependentRuns)
    }
}

impl<S: SnapshotSource> SearchEngine<S> {
    /// Create an engine with a custom train/test snapshot source.
    pub fn with_source(config: SearchConfig, source: S) -> Result<Self, SearchError> {
        config.validate()?;
        let space = RuleSpace::from_config(&config.automaton).map_err(SearchConfigError::from)?;

        let seed = config.random_seed.unwrap_or_else(rand::random);
        log::info!("Random seed: {}", seed);

        let oracle = FitnessOracle::new(
            space,
            config.automaton.clone(),
            config.training.clone(),
            source,
        );

        Ok(Self {
            rng: SearchRng::new(seed),
            population: PopulationManager::new(config.population.clone()),
            paths: RunPaths::new(&config.data_root, space.states()),
            oracle,
            seed,
            generation: 0,
            total_evaluations: 0,
            failed_evaluations: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Get cancellation handle.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Seed of the master random stream.
    pub fn random_seed(&self) -> u64 {
        self.seed
    }

    pub fn space(&self) -> &RuleSpace {
        self.oracle.space()
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Current population.
    pub fn population(&self) -> &[Rule] {
        self.population.members()
    }

    /// Generations completed.
    pub fn generation(&self) -> usize {
        self.generation
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn check_rule(&self, rule: &Rule) -> Result<(), RuleError> {
        let space = self.space();
        if rule.len() != space.size() {
            return Err(RuleError::InvalidLength {
                expected: space.size(),
                found: rule.len(),
            });
        }
        if rule.states() != space.states() {
            return Err(RuleError::StateOutOfRange {
                position: 0,
                value: rule.states(),
                states: space.states(),
            });
        }
        Ok(())
    }

    /// Initialize the population from a seed rule.
    pub fn initialize(&mut self, seed_rule: &Rule) {
        self.population.initialize(seed_rule, &mut self.rng);
        self.generation = 0;
    }

    /// Evaluate rules in parallel, one independent random stream each.
    ///
    /// Streams are drawn from the master stream before the parallel section,
    /// so results do not depend on scheduling.
    pub fn evaluate_rules(&mut self, rules: &[Rule]) -> Vec<Candidate> {
        let streams: Vec<StdRng> = rules.iter().map(|_| self.rng.stream()).collect();
        let oracle = &self.oracle;
        let cancelled = self.cancelled.as_ref();
        let timeout = self.config.candidate_timeout_secs;

        let candidates: Vec<Candidate> = rules
            .par_iter()
            .zip(streams)
            .enumerate()
            .map(|(index, (rule, mut rng))| {
                evaluate_candidate(oracle, index, rule, &mut rng, cancelled, timeout)
            })
            .collect();

        self.total_evaluations += candidates.len() as u64;
        self.failed_evaluations += candidates.iter().filter(|c| c.failed()).count() as u64;
        candidates
    }

    /// Check if the search should stop.
    fn should_stop(&self) -> Option<StopReason> {
        if self.is_cancelled() {
            return Some(StopReason::Cancelled);
        }
        if self.generation >= self.config.population.generations {
            return Some(StopReason::MaxGenerations);
        }
        None
    }

    /// Run one generation. Returns `None` when cancelled mid-generation;
    /// nothing is selected or logged in that case.
    fn step_generation(
        &mut self,
        genealogy: &mut GenealogyLog,
        results: &mut ResultsStream,
    ) -> Result<Option<GenerationProgress>, SearchError> {
        let (parents, children): (Vec<usize>, Vec<Rule>) = self
            .population
            .spawn_children(&mut self.rng)
            .into_iter()
            .map(|child| (child.parent, child.rule))
            .unzip();

        let candidates = self.evaluate_rules(&children);
        if self.is_cancelled() {
            return Ok(None);
        }

        write_sessions(results, &candidates)?;

        let records: Vec<ScoreRecord> = candidates.iter().map(Candidate::record).collect();
        let selected = selection::select(&records, self.config.population.size);
        let survivors = selected.iter().map(|&i| children[i].clone()).collect();
        if log::log_enabled!(log::Level::Debug) {
            let lineage: Vec<usize> = selected.iter().map(|&i| parents[i]).collect();
            log::debug!("Survivor parents: {:?}", lineage);
        }
        self.population.replace(survivors);

        let fingerprints = self.population.fingerprints();
        genealogy.append_generation(&fingerprints)?;

        let progress = self.progress(&candidates, fingerprints);
        self.generation += 1;
        Ok(Some(progress))
    }

    fn progress(&self, candidates: &[Candidate], selected: Vec<u64>) -> GenerationProgress {
        let scores: Vec<f64> = candidates
            .iter()
            .map(|c| c.score)
            .filter(|s| s.is_finite())
            .collect();

        let (lowest, mean, highest) = if scores.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                scores.iter().copied().fold(f64::INFINITY, f64::min),
                scores.iter().sum::<f64>() / scores.len() as f64,
                scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };

        GenerationProgress {
            generation: self.generation,
            total_generations: self.config.population.generations,
            lowest_score: lowest,
            mean_score: mean,
            highest_score: highest,
            failures: candidates.len() - scores.len(),
            selected,
        }
    }

    /// Run the search with a progress callback.
    ///
    /// Starts from `seed_rule`, or from a uniformly random rule when `None`.
    /// Output files are named after the seed rule's fingerprint.
    pub fn run_with_callback<F>(
        &mut self,
        seed_rule: Option<Rule>,
        callback: F,
    ) -> Result<SearchSummary, SearchError>
    where
        F: Fn(&GenerationProgress),
    {
        let start_time = Instant::now();

        let seed_rule = match seed_rule {
            Some(rule) => {
                self.check_rule(&rule)?;
                rule
            }
            None => {
                let space = *self.space();
                self.rng.random_rule(&space)
            }
        };
        let seed_fingerprint = seed_rule.fingerprint();

        let mut genealogy = GenealogyLog::open(self.paths.genealogy(seed_fingerprint))?;
        let mut results = ResultsStream::open(self.paths.results(seed_fingerprint))?;
        log::info!("Genealogy log: {}", genealogy.path().display());

        self.initialize(&seed_rule);

        let stop_reason = loop {
            if let Some(reason) = self.should_stop() {
                break reason;
            }

            match self.step_generation(&mut genealogy, &mut results)? {
                Some(progress) => {
                    log::info!(
                        "Generation {}/{}: lowest score {:.6}, mean {:.6}, {} failed",
                        progress.generation + 1,
                        progress.total_generations,
                        progress.lowest_score,
                        progress.mean_score,
                        progress.failures
                    );
                    callback(&progress);
                }
                None => break StopReason::Cancelled,
            }
        };

        log::info!("Wrote {} genealogy rows", genealogy.rows());
        let genealogy_path = genealogy.finish()?;
        let results_path = results.finish()?;

        let elapsed = start_time.elapsed().as_secs_f64();
        let evaluations_per_second = if elapsed > 0.0 {
            self.total_evaluations as f64 / elapsed
        } else {
            0.0
        };

        Ok(SearchSummary {
            generations: self.generation,
            total_evaluations: self.total_evaluations,
            failed_evaluations: self.failed_evaluations,
            random_seed: self.seed,
            seed_fingerprint,
            genealogy_path,
            results_path,
            elapsed_seconds: elapsed,
            evaluations_per_second,
            stop_reason,
        })
    }

    /// Run the search (blocking).
    pub fn run(&mut self, seed_rule: Option<Rule>) -> Result<SearchSummary, SearchError> {
        self.run_with_callback(seed_rule, |_| {})
    }

    /// Evaluate `count` uniformly random rules without evolution.
    ///
    /// Session rows go to the shared `random.res` stream.
    pub fn sample_random(&mut self, count: usize) -> Result<Vec<Candidate>, SearchError> {
        let space = *self.space();
        let rules: Vec<Rule> = (0..count).map(|_| self.rng.random_rule(&space)).collect();

        let mut results = ResultsStream::open(self.paths.random_results())?;
        let candidates = self.evaluate_rules(&rules);
        write_sessions(&mut results, &candidates)?;
        results.finish()?;

        Ok(candidates)
    }

    /// Symmetrize a rule, write grid snapshots of one run every `grain` steps,
    /// and evaluate it once.
    pub fn replay(&mut self, rule: Rule) -> Result<ReplayReport, SearchError> {
        self.check_rule(&rule)?;
        let space = *self.space();

        let mut rule = rule;
        rule.symmetrize(&space);
        let fingerprint = rule.fingerprint();
        let mut rng = self.rng.stream();

        let mut writer = SnapshotWriter::new(self.paths.steps_dir(fingerprint))?;
        let automaton = &self.config.automaton;
        let grain = automaton.grain.max(1);
        let initial = Grid::random(automaton.size, space.states(), &mut rng);
        let mut sim = Automaton::new(&rule, &space, initial)?;

        writer.write(0, sim.grid())?;
        while sim.step_count() < automaton.timesteps && !self.is_cancelled() {
            let changed = sim.step();
            let step = sim.step_count();
            let on_grain = step % grain == 0;
            if on_grain {
                writer.write(step, sim.grid())?;
            }
            if !changed && automaton.early_stop {
                if !on_grain {
                    writer.write(step, sim.grid())?;
                }
                log::info!("Fixed point reached at step {}", step);
                break;
            }
        }
        log::info!(
            "Wrote {} snapshots to {}",
            writer.written(),
            writer.dir().display()
        );

        let candidate = evaluate_candidate(
            &self.oracle,
            0,
            &rule,
            &mut rng,
            self.cancelled.as_ref(),
            self.config.candidate_timeout_secs,
        );
        self.total_evaluations += 1;

        let mut results = ResultsStream::open(self.paths.results(fingerprint))?;
        write_sessions(&mut results, std::slice::from_ref(&candidate))?;
        results.finish()?;

        let score = candidate.score;
        let evaluation = candidate.outcome?;

        Ok(ReplayReport {
            rule,
            fingerprint,
            evaluation,
            score,
            snapshots: writer.written(),
            steps_dir: writer.dir().to_path_buf(),
        })
    }
}

/// Append every session of every successful candidate, in candidate order.
fn write_sessions(results: &mut ResultsStream, candidates: &[Candidate]) -> io::Result<()> {
    for candidate in candidates {
        if let Ok(evaluation) = &candidate.outcome {
            for session in &evaluation.sessions {
                results.append(&session.errors)?;
            }
        }
    }
    results.flush()
}

/// Evaluate one rule in isolation.
///
/// Panics, timeouts and errors become a failed candidate with [`FAILED_SCORE`].
fn evaluate_candidate<S: SnapshotSource>(
    oracle: &FitnessOracle<S>,
    index: usize,
    rule: &Rule,
    rng: &mut StdRng,
    cancelled: &AtomicBool,
    timeout_secs: Option<u64>,
) -> Candidate {
    let fingerprint = rule.fingerprint();
    let deadline = timeout_secs.map(|secs| Instant::now() + Duration::from_secs(secs));
    let timed_out = || deadline.is_some_and(|d| Instant::now() >= d);
    let interrupted = || cancelled.load(Ordering::Relaxed) || timed_out();

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
        oracle.evaluate(rule, rng, &interrupted)
    })) {
        Ok(Ok(evaluation)) => Ok(evaluation),
        Ok(Err(err)) => match timeout_secs {
            Some(secs) if timed_out() => Err(EvaluationError::TimedOut(secs)),
            _ => Err(err),
        },
        Err(payload) => Err(EvaluationError::Panicked(panic_message(payload.as_ref()))),
    };

    let score = match &outcome {
        Ok(evaluation) => selection::score(&evaluation.stats),
        Err(err) => {
            if !cancelled.load(Ordering::Relaxed) {
                log::warn!("Candidate {} ({}) failed: {}", index, fingerprint, err);
            }
            FAILED_SCORE
        }
    };

    Candidate {
        index,
        fingerprint,
        outcome,
        score,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
