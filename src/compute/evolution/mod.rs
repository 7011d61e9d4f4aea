//! Evolutionary search for cellular-automaton rules with a delayed loss of predictability.
//!
//! # Overview
//!
//! - **Randomness** (`rng`): master stream and per-candidate streams
//! - **Population** (`population`): seeding the population and spawning mutated children
//! - **Fitness** (`fitness`): checkpoint simulations scored by freshly trained classifiers
//! - **Selection** (`selection`): scalar score and lowest-score survivor selection
//! - **Records** (`records`): genealogy log, results stream and grid snapshots
//! - **Search** (`search`): the generational loop
//!
//! # Example
//!
//! ```rust,no_run
//! use automata_search::schema::SearchConfig;
//! use automata_search::compute::evolution::SearchEngine;
//!
//! let config = SearchConfig {
//!     random_seed: Some(7),
//!     ..Default::default()
//! };
//!
//! let mut engine = SearchEngine::new(config)?;
//! let summary = engine.run_with_callback(None, |progress| {
//!     println!("Generation {}: lowest score = {:.3}",
//!         progress.generation, progress.lowest_score);
//! })?;
//!
//! println!("Genealogy written to {}", summary.genealogy_path.display());
//! # Ok::<(), automata_search::compute::evolution::SearchError>(())
//! ```
//!
//! # Score
//!
//! A child whose training error is zero at any checkpoint scores 0. Otherwise
//!
//! ```text
//! [train_5 > train_300] * (1/3 * test_300/train_300 + 1/8 * test_50/train_50 + 13/24 * test_5/train_5)
//! ```
//!
//! and the children with the lowest scores survive.

mod fitness;
mod population;
mod records;
mod rng;
mod search;
mod selection;

pub use fitness::{Evaluation, EvaluationError, FitnessOracle, Session};
pub use population::{Child, PopulationManager};
pub use records::{GenealogyLog, ResultsStream, RunPaths, SnapshotWriter};
pub use rng::SearchRng;
pub use search::{Candidate, ReplayReport, SearchEngine, SearchError};
pub use selection::{FAILED_SCORE, score, select};
