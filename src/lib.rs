//! Automata Search - Evolutionary discovery of cellular-automaton rules.
//!
//! Rules are scored by how their dynamics resist prediction over time: a small
//! neural classifier is trained from scratch to predict each cell from its
//! neighbors at simulation steps 5, 50 and 300, and the ratios of held-out to
//! training error feed a scalar score that drives selection.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, validation and result types
//! - `compute`: Rule tables, automaton stepping, the classifier and the search
//!
//! # Example
//!
//! ```rust,no_run
//! use automata_search::{
//!     compute::{Classifier, Dataset, Grid, RuleSpace},
//!     schema::{AutomatonConfig, TrainingConfig},
//! };
//! use rand::SeedableRng;
//!
//! let space = RuleSpace::from_config(&AutomatonConfig::default()).unwrap();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//!
//! let grid = Grid::random(64, space.states(), &mut rng);
//! let data = Dataset::from_grid(&grid, &space);
//!
//! let mut classifier = Classifier::for_space(&space, TrainingConfig::default(), &mut rng);
//! let report = classifier.train(&data, &mut rng, &|| false).unwrap();
//! println!("Final training error: {:.4}", report.final_error);
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{SearchEngine, SearchError};
pub use compute::{Classifier, Rule, RuleSpace};
pub use schema::{AutomatonConfig, SearchConfig, TrainingConfig};
