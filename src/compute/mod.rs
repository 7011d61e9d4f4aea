//! Compute module - Simulation, classification and search.

mod automaton;
mod classifier;
mod matrix;
mod rule;

pub mod evolution;

pub use automaton::*;
pub use classifier::*;
pub use matrix::*;
pub use rule::*;
