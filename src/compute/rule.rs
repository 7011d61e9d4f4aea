//! Rule tables for two-dimensional cellular automata.
//!
//! A rule maps every encoded neighborhood configuration to the next state of
//! the center cell. Configurations are encoded as base-`states` numbers whose
//! least significant digit is the center cell, followed by the neighbors in
//! row-major offset order (the center offset is skipped).
//!
//! The canonical buffer is the rule written as one ASCII digit per entry; the
//! fingerprint is the djb2 hash of that buffer.

use std::fs;
use std::io;
use std::path::Path;

use rand::Rng;
use rayon::prelude::*;

use crate::schema::{AutomatonConfig, ConfigError};

/// Geometry of the rule space: state count and neighborhood radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSpace {
    states: u8,
    horizon: usize,
    size: usize,
}

impl RuleSpace {
    /// Build from a validated automaton configuration.
    pub fn from_config(config: &AutomatonConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let size = config.rule_size().ok_or(ConfigError::RuleTooLarge {
            states: config.states,
            horizon: config.horizon,
        })?;
        Ok(Self {
            states: config.states,
            horizon: config.horizon,
            size,
        })
    }

    #[inline]
    pub fn states(&self) -> u8 {
        self.states
    }

    #[inline]
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Rule table length.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of neighbors (excluding the center cell).
    #[inline]
    pub fn neighborhood_size(&self) -> usize {
        let side = 2 * self.horizon + 1;
        side * side - 1
    }

    /// Neighbor offsets `(row, col)` in encoding order.
    pub fn neighbor_offsets(&self) -> Vec<(isize, isize)> {
        let h = self.horizon as isize;
        let mut offsets = Vec::with_capacity(self.neighborhood_size());
        for a in -h..=h {
            for b in -h..=h {
                if a != 0 || b != 0 {
                    offsets.push((a, b));
                }
            }
        }
        offsets
    }

    /// Positional weight of each encoded digit (center first).
    pub fn digit_weights(&self) -> Vec<usize> {
        let states = self.states as usize;
        let mut weights = Vec::with_capacity(self.neighborhood_size() + 1);
        let mut w = 1usize;
        for _ in 0..=self.neighborhood_size() {
            weights.push(w);
            w = w.saturating_mul(states);
        }
        weights
    }

    /// Neighbor slot permutations for the eight symmetries of the square.
    ///
    /// `perm[k]` is the slot that neighbor `k` lands on under the transform.
    fn symmetry_permutations(&self) -> Vec<Vec<usize>> {
        let offsets = self.neighbor_offsets();
        let transforms: [fn(isize, isize) -> (isize, isize); 8] = [
            |a, b| (a, b),
            |a, b| (b, -a),
            |a, b| (-a, -b),
            |a, b| (-b, a),
            |a, b| (a, -b),
            |a, b| (-a, b),
            |a, b| (b, a),
            |a, b| (-b, -a),
        ];

        transforms
            .iter()
            .map(|t| {
                offsets
                    .iter()
                    .map(|&(a, b)| {
                        let target = t(a, b);
                        offsets
                            .iter()
                            .position(|&o| o == target)
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }
}

/// Errors raised while decoding a rule.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Rule has {found} entries, expected {expected}")]
    InvalidLength { expected: usize, found: usize },
    #[error("Invalid character {found:?} at position {position}")]
    InvalidDigit { position: usize, found: char },
    #[error("State {value} at position {position} is out of range for {states} states")]
    StateOutOfRange { position: usize, value: u8, states: u8 },
    #[error("Failed to read rule file: {0}")]
    Io(#[from] io::Error),
}

/// A rule table: one next-state value per encoded neighborhood configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    states: u8,
    table: Vec<u8>,
}

impl Rule {
    /// Uniformly random rule.
    pub fn random<R: Rng + ?Sized>(space: &RuleSpace, rng: &mut R) -> Self {
        let table = (0..space.size())
            .map(|_| rng.gen_range(0..space.states()))
            .collect();
        Self {
            states: space.states(),
            table,
        }
    }

    /// Rule with every entry set to `state`.
    pub fn constant(space: &RuleSpace, state: u8) -> Self {
        Self {
            states: space.states(),
            table: vec![state.min(space.states() - 1); space.size()],
        }
    }

    /// Build from raw table values.
    pub fn from_table(space: &RuleSpace, table: Vec<u8>) -> Result<Self, RuleError> {
        if table.len() != space.size() {
            return Err(RuleError::InvalidLength {
                expected: space.size(),
                found: table.len(),
            });
        }
        if let Some((position, &value)) = table
            .iter()
            .enumerate()
            .find(|(_, v)| **v >= space.states())
        {
            return Err(RuleError::StateOutOfRange {
                position,
                value,
                states: space.states(),
            });
        }
        Ok(Self {
            states: space.states(),
            table,
        })
    }

    /// Decode a canonical buffer (one ASCII digit per entry).
    pub fn from_buffer(space: &RuleSpace, buffer: &[u8]) -> Result<Self, RuleError> {
        if buffer.len() != space.size() {
            return Err(RuleError::InvalidLength {
                expected: space.size(),
                found: buffer.len(),
            });
        }
        let table = buffer
            .iter()
            .enumerate()
            .map(|(position, &c)| {
                if c.is_ascii_digit() {
                    Ok(c - b'0')
                } else {
                    Err(RuleError::InvalidDigit {
                        position,
                        found: c as char,
                    })
                }
            })
            .collect::<Result<Vec<u8>, _>>()?;
        Self::from_table(space, table)
    }

    /// Parse a rule given as a digit string. Surrounding whitespace is ignored.
    pub fn parse(space: &RuleSpace, input: &str) -> Result<Self, RuleError> {
        Self::from_buffer(space, input.trim().as_bytes())
    }

    /// Read a rule file. Only the first `space.size()` bytes are used.
    pub fn read_file<P: AsRef<Path>>(space: &RuleSpace, path: P) -> Result<Self, RuleError> {
        let contents = fs::read(path)?;
        let end = contents.len().min(space.size());
        Self::from_buffer(space, &contents[..end])
    }

    /// Number of states.
    #[inline]
    pub fn states(&self) -> u8 {
        self.states
    }

    /// Table length.
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Next state for an encoded configuration.
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        self.table[index]
    }

    /// Raw table values.
    #[inline]
    pub fn table(&self) -> &[u8] {
        &self.table
    }

    /// Replace each entry, with probability `rate`, by a uniformly random different state.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rate: f64, rng: &mut R) {
        if rate <= 0.0 {
            return;
        }
        let rate = rate.min(1.0);
        let states = self.states;
        for value in &mut self.table {
            if rng.gen_bool(rate) {
                let shift = rng.gen_range(1..states);
                *value = (*value + shift) % states;
            }
        }
    }

    /// Mutated copy of this rule.
    pub fn mutated<R: Rng + ?Sized>(&self, rate: f64, rng: &mut R) -> Self {
        let mut child = self.clone();
        child.mutate(rate, rng);
        child
    }

    /// Make the rule invariant under rotations and reflections of the neighborhood.
    ///
    /// Every configuration takes the value of the smallest encoded configuration
    /// in its symmetry orbit.
    pub fn symmetrize(&mut self, space: &RuleSpace) {
        let perms = space.symmetry_permutations();
        let weights = space.digit_weights();
        let states = space.states() as usize;
        let digits = space.neighborhood_size() + 1;
        let table = &self.table;

        let symmetric: Vec<u8> = (0..table.len())
            .into_par_iter()
            .map_init(
                || vec![0usize; digits],
                |buf, index| {
                    let mut rest = index;
                    for d in buf.iter_mut() {
                        *d = rest % states;
                        rest /= states;
                    }
                    let representative = perms
                        .iter()
                        .map(|perm| {
                            perm.iter()
                                .enumerate()
                                .fold(buf[0], |acc, (k, &slot)| {
                                    acc + buf[k + 1] * weights[slot + 1]
                                })
                        })
                        .min()
                        .unwrap_or(index);
                    table[representative]
                },
            )
            .collect();

        self.table = symmetric;
    }

    /// Canonical buffer: one ASCII digit per entry.
    pub fn canonical_buffer(&self) -> Vec<u8> {
        self.table.iter().map(|&v| b'0' + v).collect()
    }

    /// Fingerprint of the canonical buffer.
    pub fn fingerprint(&self) -> u64 {
        self.table
            .iter()
            .fold(DJB2_SEED, |hash, &v| djb2_step(hash, b'0' + v))
    }
}

const DJB2_SEED: u64 = 5381;

#[inline]
fn djb2_step(hash: u64, byte: u8) -> u64 {
    hash.wrapping_shl(5)
        .wrapping_add(hash)
        .wrapping_add(byte as u64)
}

/// djb2 hash of a byte buffer.
pub fn fingerprint(buffer: &[u8]) -> u64 {
    buffer.iter().fold(DJB2_SEED, |hash, &b| djb2_step(hash, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn space(states: u8, horizon: usize) -> RuleSpace {
        RuleSpace::from_config(&AutomatonConfig {
            states,
            horizon,
            size: 16,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_space_geometry() {
        let s = space(3, 1);
        assert_eq!(s.size(), 19683);
        assert_eq!(s.neighborhood_size(), 8);
        let offsets = s.neighbor_offsets();
        assert_eq!(offsets.len(), 8);
        assert_eq!(offsets[0], (-1, -1));
        assert!(!offsets.contains(&(0, 0)));
        assert_eq!(s.digit_weights()[..3], [1, 3, 9]);
    }

    #[test]
    fn test_symmetry_permutations_are_bijections() {
        let s = space(2, 2);
        for perm in s.symmetry_permutations() {
            let mut sorted = perm.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..s.neighborhood_size()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        let s = space(2, 1);
        assert!(matches!(
            Rule::parse(&s, "0101"),
            Err(RuleError::InvalidLength { .. })
        ));
        let mut text = "0".repeat(s.size());
        text.replace_range(3..4, "x");
        assert!(matches!(
            Rule::parse(&s, &text),
            Err(RuleError::InvalidDigit { position: 3, .. })
        ));
        text.replace_range(3..4, "2");
        assert!(matches!(
            Rule::parse(&s, &text),
            Err(RuleError::StateOutOfRange { position: 3, .. })
        ));
    }

    #[test]
    fn test_read_file_uses_prefix() {
        let s = space(2, 1);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rule.txt");
        let mut rng = StdRng::seed_from_u64(3);
        let rule = Rule::random(&s, &mut rng);
        let mut contents = rule.canonical_buffer();
        contents.extend_from_slice(b"\ntrailing");
        fs::write(&path, &contents).unwrap();

        assert_eq!(Rule::read_file(&s, &path).unwrap(), rule);

        fs::write(&path, b"0101").unwrap();
        assert!(matches!(
            Rule::read_file(&s, &path),
            Err(RuleError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_fingerprint_matches_buffer_hash() {
        let s = space(2, 1);
        let mut rng = StdRng::seed_from_u64(11);
        let rule = Rule::random(&s, &mut rng);
        assert_eq!(rule.fingerprint(), fingerprint(&rule.canonical_buffer()));
        assert_eq!(fingerprint(b""), 5381);
        assert_eq!(fingerprint(b"0"), 5381 * 33 + 48);
    }

    #[test]
    fn test_symmetrize_is_invariant_and_idempotent() {
        let s = space(2, 1);
        let mut rng = StdRng::seed_from_u64(5);
        let mut rule = Rule::random(&s, &mut rng);
        rule.symmetrize(&s);

        // Rotating the neighborhood by 90 degrees must not change the output.
        let weights = s.digit_weights();
        let perms = s.symmetry_permutations();
        for index in 0..s.size() {
            let digits: Vec<usize> = (0..9).map(|d| (index / weights[d]) % 2).collect();
            let rotated = perms[1]
                .iter()
                .enumerate()
                .fold(digits[0], |acc, (k, &slot)| acc + digits[k + 1] * weights[slot + 1]);
            assert_eq!(rule.get(index), rule.get(rotated));
        }

        let once = rule.clone();
        rule.symmetrize(&s);
        assert_eq!(rule, once);
    }

    #[test]
    fn test_mutation_full_rate_changes_every_entry() {
        let s = space(3, 1);
        let mut rng = StdRng::seed_from_u64(9);
        let rule = Rule::random(&s, &mut rng);
        let child = rule.mutated(1.0, &mut rng);
        assert!(
            rule.table()
                .iter()
                .zip(child.table())
                .all(|(a, b)| a != b)
        );
    }

    proptest! {
        #[test]
        fn prop_buffer_roundtrip(seed in any::<u64>(), states in 2u8..=3) {
            let s = space(states, 1);
            let mut rng = StdRng::seed_from_u64(seed);
            let rule = Rule::random(&s, &mut rng);
            let decoded = Rule::from_buffer(&s, &rule.canonical_buffer()).unwrap();
            prop_assert_eq!(decoded, rule);
        }

        #[test]
        fn prop_zero_rate_mutation_is_identity(seed in any::<u64>()) {
            let s = space(2, 1);
            let mut rng = StdRng::seed_from_u64(seed);
            let rule = Rule::random(&s, &mut rng);
            prop_assert_eq!(rule.mutated(0.0, &mut rng), rule);
        }

        #[test]
        fn prop_mutation_preserves_shape(seed in any::<u64>(), rate in 0.0f64..=1.0, states in 2u8..=3) {
            let s = space(states, 1);
            let mut rng = StdRng::seed_from_u64(seed);
            let rule = Rule::random(&s, &mut rng);
            let child = rule.mutated(rate, &mut rng);
            prop_assert_eq!(child.len(), rule.len());
            prop_assert!(child.table().iter().all(|&v| v < states));
        }
    }
}
