//! Grid stepping engine for two-dimensional rule tables.
//!
//! Grids are square and toroidal. Each step looks up every cell's encoded
//! neighborhood (see [`RuleSpace`]) in the rule table.

use std::io::{self, Write};

use rand::Rng;
use rand::rngs::StdRng;

use super::rule::{Rule, RuleSpace};
use crate::schema::AutomatonConfig;

/// Square toroidal grid of cell states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    size: usize,
    cells: Vec<u8>,
}

impl Grid {
    /// Grid with every cell set to `state`.
    pub fn filled(size: usize, state: u8) -> Self {
        Self {
            size,
            cells: vec![state; size * size],
        }
    }

    /// Grid with independent uniformly random cells.
    pub fn random<R: Rng + ?Sized>(size: usize, states: u8, rng: &mut R) -> Self {
        let cells = (0..size * size).map(|_| rng.gen_range(0..states)).collect();
        Self { size, cells }
    }

    /// Build from row-major cells.
    ///
    /// Returns `None` if `cells.len()` is not `size * size`.
    pub fn from_cells(size: usize, cells: Vec<u8>) -> Option<Self> {
        (cells.len() == size * size).then_some(Self { size, cells })
    }

    /// Side length.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Row-major cell values.
    #[inline]
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        debug_assert!(row < self.size && col < self.size);
        self.cells[row * self.size + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, state: u8) {
        debug_assert!(row < self.size && col < self.size);
        self.cells[row * self.size + col] = state;
    }

    /// Value at `(row + dr, col + dc)` with toroidal wrapping.
    #[inline]
    pub fn wrapped(&self, row: usize, col: usize, dr: isize, dc: isize) -> u8 {
        let n = self.size as isize;
        let r = (row as isize + dr).rem_euclid(n) as usize;
        let c = (col as isize + dc).rem_euclid(n) as usize;
        self.cells[r * self.size + c]
    }

    /// True when every cell holds the same state.
    #[cfg(test)]
    pub fn is_uniform(&self) -> bool {
        self.cells.windows(2).all(|w| w[0] == w[1])
    }

    /// Write one line of state digits per grid row.
    pub fn write_text<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut line = Vec::with_capacity(self.size + 1);
        for row in self.cells.chunks_exact(self.size.max(1)) {
            line.clear();
            line.extend(row.iter().map(|&v| b'0' + v));
            line.push(b'\n');
            writer.write_all(&line)?;
        }
        Ok(())
    }
}

/// Simulation errors.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Simulation interrupted at step {0}")]
    Interrupted(u64),
    #[error("Rule has {found} entries, the rule space expects {expected}")]
    RuleMismatch { expected: usize, found: usize },
}

/// Steps a grid forward under a rule.
pub struct Automaton<'r> {
    rule: &'r Rule,
    offsets: Vec<(isize, isize)>,
    weights: Vec<usize>,
    grid: Grid,
    next: Grid,
    step: u64,
}

impl<'r> Automaton<'r> {
    /// Create an automaton starting from `initial`.
    pub fn new(rule: &'r Rule, space: &RuleSpace, initial: Grid) -> Result<Self, SimulationError> {
        if rule.len() != space.size() {
            return Err(SimulationError::RuleMismatch {
                expected: space.size(),
                found: rule.len(),
            });
        }
        let next = initial.clone();
        Ok(Self {
            rule,
            offsets: space.neighbor_offsets(),
            weights: space.digit_weights(),
            grid: initial,
            next,
            step: 0,
        })
    }

    /// Current grid.
    #[inline]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Steps performed so far.
    #[inline]
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Encoded neighborhood configuration of a cell.
    #[inline]
    fn configuration(&self, row: usize, col: usize) -> usize {
        let grid = &self.grid;
        self.offsets
            .iter()
            .zip(&self.weights[1..])
            .fold(grid.get(row, col) as usize * self.weights[0], |acc, (&(dr, dc), &w)| {
                acc + grid.wrapped(row, col, dr, dc) as usize * w
            })
    }

    /// Advance one step. Returns whether any cell changed.
    pub fn step(&mut self) -> bool {
        let size = self.grid.size();
        let mut changed = false;
        for row in 0..size {
            for col in 0..size {
                let state = self.rule.get(self.configuration(row, col));
                changed |= state != self.grid.get(row, col);
                self.next.set(row, col, state);
            }
        }
        std::mem::swap(&mut self.grid, &mut self.next);
        self.step += 1;
        changed
    }

    /// Run to each checkpoint (ascending) and snapshot the grid there.
    ///
    /// A checkpoint is not reached (`None`) when it exceeds `limit`, or when
    /// `early_stop` is set and an earlier step left the grid unchanged.
    pub fn run_to_checkpoints(
        &mut self,
        checkpoints: &[u64],
        limit: u64,
        early_stop: bool,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<Vec<Option<Grid>>, SimulationError> {
        let mut snapshots = vec![None; checkpoints.len()];
        let last = checkpoints.iter().copied().max().unwrap_or(0).min(limit);

        while self.step < last {
            if interrupted() {
                return Err(SimulationError::Interrupted(self.step));
            }
            if !self.step() && early_stop {
                log::trace!("Fixed point reached at step {}", self.step);
                break;
            }
            for (slot, &checkpoint) in snapshots.iter_mut().zip(checkpoints) {
                if checkpoint == self.step {
                    *slot = Some(self.grid.clone());
                }
            }
        }

        Ok(snapshots)
    }
}

/// Labeled training grid and held-out grid for one checkpoint.
#[derive(Debug, Clone)]
pub struct SnapshotPair {
    pub train: Grid,
    pub test: Grid,
}

/// Produces the training and test grids a rule is scored on.
pub trait SnapshotSource: Send + Sync {
    /// One entry per checkpoint; `None` where the checkpoint was not reached.
    fn snapshots(
        &self,
        rule: &Rule,
        space: &RuleSpace,
        config: &AutomatonConfig,
        checkpoints: &[u64],
        rng: &mut StdRng,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<Vec<Option<SnapshotPair>>, SimulationError>;
}

/// Two independent runs from uniformly random initial grids under the same rule.
///
/// The first run supplies training grids, the second held-out grids.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndependentRuns;

impl SnapshotSource for IndependentRuns {
    fn snapshots(
        &self,
        rule: &Rule,
        space: &RuleSpace,
        config: &AutomatonConfig,
        checkpoints: &[u64],
        rng: &mut StdRng,
        interrupted: &dyn Fn() -> bool,
    ) -> Result<Vec<Option<SnapshotPair>>, SimulationError> {
        let run = |rng: &mut StdRng| -> Result<Vec<Option<Grid>>, SimulationError> {
            let initial = Grid::random(config.size, space.states(), rng);
            Automaton::new(rule, space, initial)?.run_to_checkpoints(
                checkpoints,
                config.timesteps,
                config.early_stop,
                interrupted,
            )
        };

        let train = run(rng)?;
        let test = run(rng)?;

        Ok(train
            .into_iter()
            .zip(test)
            .map(|pair| match pair {
                (Some(train), Some(test)) => Some(SnapshotPair { train, test }),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn space() -> RuleSpace {
        RuleSpace::from_config(&AutomatonConfig {
            size: 8,
            ..Default::default()
        })
        .unwrap()
    }

    /// Rule whose output is the center cell, i.e. the identity.
    fn identity_rule(space: &RuleSpace) -> Rule {
        let table = (0..space.size()).map(|i| (i % 2) as u8).collect();
        Rule::from_table(space, table).unwrap()
    }

    /// Rule whose output is the left neighbor (offset (0, -1)).
    fn shift_rule(space: &RuleSpace) -> Rule {
        let slot = space
            .neighbor_offsets()
            .iter()
            .position(|&o| o == (0, -1))
            .unwrap();
        let weight = space.digit_weights()[slot + 1];
        let table = (0..space.size()).map(|i| ((i / weight) % 2) as u8).collect();
        Rule::from_table(space, table).unwrap()
    }

    #[test]
    fn test_wrapped_access() {
        let grid = Grid::from_cells(3, vec![0, 1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(grid.wrapped(0, 0, -1, -1), 8);
        assert_eq!(grid.wrapped(2, 2, 1, 1), 0);
        assert_eq!(grid.wrapped(1, 1, 0, 1), 5);
        assert!(Grid::from_cells(3, vec![0; 8]).is_none());
    }

    #[test]
    fn test_shift_rule_moves_cells() {
        let space = space();
        let rule = shift_rule(&space);
        let mut grid = Grid::filled(8, 0);
        grid.set(3, 3, 1);

        let mut automaton = Automaton::new(&rule, &space, grid).unwrap();
        assert!(automaton.step());
        assert_eq!(automaton.grid().get(3, 4), 1);
        assert_eq!(automaton.grid().get(3, 3), 0);
        assert_eq!(automaton.step_count(), 1);
    }

    #[test]
    fn test_constant_rule_reaches_uniform_grid() {
        let space = space();
        let rule = Rule::constant(&space, 1);
        let mut rng = StdRng::seed_from_u64(1);
        let mut automaton =
            Automaton::new(&rule, &space, Grid::random(8, 2, &mut rng)).unwrap();
        automaton.step();
        assert!(automaton.grid().is_uniform());
        assert!(!automaton.step());
    }

    #[test]
    fn test_early_stop_skips_checkpoints() {
        let space = space();
        let rule = identity_rule(&space);
        let mut rng = StdRng::seed_from_u64(2);
        let initial = Grid::random(8, 2, &mut rng);

        let mut automaton = Automaton::new(&rule, &space, initial.clone()).unwrap();
        let snaps = automaton
            .run_to_checkpoints(&[5, 50], 1000, true, &|| false)
            .unwrap();
        assert!(snaps.iter().all(Option::is_none));
        assert_eq!(automaton.step_count(), 1);

        let mut automaton = Automaton::new(&rule, &space, initial.clone()).unwrap();
        let snaps = automaton
            .run_to_checkpoints(&[5, 50], 1000, false, &|| false)
            .unwrap();
        assert_eq!(snaps[0].as_ref(), Some(&initial));
        assert_eq!(snaps[1].as_ref(), Some(&initial));
    }

    #[test]
    fn test_checkpoint_beyond_budget_not_reached() {
        let space = space();
        let rule = shift_rule(&space);
        let mut rng = StdRng::seed_from_u64(4);
        let mut automaton =
            Automaton::new(&rule, &space, Grid::random(8, 2, &mut rng)).unwrap();
        let snaps = automaton
            .run_to_checkpoints(&[5, 50, 300], 60, false, &|| false)
            .unwrap();
        assert!(snaps[0].is_some());
        assert!(snaps[1].is_some());
        assert!(snaps[2].is_none());
        assert_eq!(automaton.step_count(), 60);
    }

    #[test]
    fn test_interrupt() {
        let space = space();
        let rule = shift_rule(&space);
        let mut automaton = Automaton::new(&rule, &space, Grid::filled(8, 0)).unwrap();
        let result = automaton.run_to_checkpoints(&[5], 10, false, &|| true);
        assert!(matches!(result, Err(SimulationError::Interrupted(0))));
    }

    #[test]
    fn test_rule_mismatch() {
        let small = space();
        let large = RuleSpace::from_config(&AutomatonConfig {
            states: 3,
            size: 8,
            ..Default::default()
        })
        .unwrap();
        let rule = Rule::constant(&large, 0);
        assert!(matches!(
            Automaton::new(&rule, &small, Grid::filled(8, 0)),
            Err(SimulationError::RuleMismatch { .. })
        ));
    }

    #[test]
    fn test_independent_runs_shapes() {
        let space = space();
        let config = AutomatonConfig {
            size: 8,
            early_stop: false,
            ..Default::default()
        };
        let rule = shift_rule(&space);
        let mut rng = StdRng::seed_from_u64(6);
        let pairs = IndependentRuns
            .snapshots(&rule, &space, &config, &[5, 50, 300], &mut rng, &|| false)
            .unwrap();
        assert_eq!(pairs.len(), 3);
        for pair in pairs.iter().map(|p| p.as_ref().unwrap()) {
            assert_eq!(pair.train.size(), 8);
            assert_eq!(pair.test.size(), 8);
        }
    }

    #[test]
    fn test_write_text() {
        let grid = Grid::from_cells(2, vec![0, 1, 1, 0]).unwrap();
        let mut out = Vec::new();
        grid.write_text(&mut out).unwrap();
        assert_eq!(out, b"01\n10\n");
    }
}
