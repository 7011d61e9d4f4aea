//! Configuration types for the two-dimensional automaton.

use serde::{Deserialize, Serialize};

/// Largest rule table accepted, in entries.
pub const MAX_RULE_SIZE: usize = 1 << 28;

/// Largest number of states; the canonical buffer stores one ASCII digit per entry.
pub const MAX_STATES: u8 = 10;

fn default_states() -> u8 {
    2
}
fn default_horizon() -> usize {
    1
}
fn default_size() -> usize {
    256
}
fn default_timesteps() -> u64 {
    1000
}
fn default_early_stop() -> bool {
    true
}
fn default_grain() -> u64 {
    100
}

/// Automaton configuration shared by the search, sampling and replay modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomatonConfig {
    /// Number of cell states.
    #[serde(default = "default_states")]
    pub states: u8,
    /// Neighborhood radius (Moore neighborhood of side `2 * horizon + 1`).
    #[serde(default = "default_horizon")]
    pub horizon: usize,
    /// Grid side length in cells. Grids are square and toroidal.
    #[serde(default = "default_size")]
    pub size: usize,
    /// Simulation timestep budget.
    #[serde(default = "default_timesteps")]
    pub timesteps: u64,
    /// Stop a run once the grid reaches a fixed point.
    #[serde(default = "default_early_stop")]
    pub early_stop: bool,
    /// Snapshot interval (in steps) for replay output.
    #[serde(default = "default_grain")]
    pub grain: u64,
}

impl Default for AutomatonConfig {
    fn default() -> Self {
        Self {
            states: default_states(),
            horizon: default_horizon(),
            size: default_size(),
            timesteps: default_timesteps(),
            early_stop: default_early_stop(),
            grain: default_grain(),
        }
    }
}

impl AutomatonConfig {
    /// Side length of the neighborhood square.
    #[inline]
    pub fn side(&self) -> usize {
        2 * self.horizon + 1
    }

    /// Number of neighbors, excluding the center cell.
    #[inline]
    pub fn neighborhood_size(&self) -> usize {
        self.side() * self.side() - 1
    }

    /// Number of cells in a grid.
    #[inline]
    pub fn grid_size(&self) -> usize {
        self.size * self.size
    }

    /// Rule table length, `states^(neighborhood_size + 1)`, if it fits.
    pub fn rule_size(&self) -> Option<usize> {
        let exponent = u32::try_from(self.neighborhood_size() + 1).ok()?;
        (self.states as usize)
            .checked_pow(exponent)
            .filter(|&size| size <= MAX_RULE_SIZE)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.states < 2 || self.states > MAX_STATES {
            return Err(ConfigError::InvalidStates(self.states));
        }
        if self.horizon == 0 {
            return Err(ConfigError::InvalidHorizon);
        }
        if self.size <= 2 * self.horizon {
            return Err(ConfigError::GridTooSmall {
                size: self.size,
                horizon: self.horizon,
            });
        }
        if self.rule_size().is_none() {
            return Err(ConfigError::RuleTooLarge {
                states: self.states,
                horizon: self.horizon,
            });
        }
        if self.grain == 0 {
            return Err(ConfigError::InvalidGrain);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("State count {0} must be between 2 and {MAX_STATES}")]
    InvalidStates(u8),
    #[error("Horizon must be non-zero")]
    InvalidHorizon,
    #[error("Grid size {size} must exceed the neighborhood width for horizon {horizon}")]
    GridTooSmall { size: usize, horizon: usize },
    #[error("Rule table for {states} states and horizon {horizon} exceeds {MAX_RULE_SIZE} entries")]
    RuleTooLarge { states: u8, horizon: usize },
    #[error("Snapshot grain must be non-zero")]
    InvalidGrain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = AutomatonConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.neighborhood_size(), 8);
        assert_eq!(config.rule_size(), Some(512));
    }

    #[test]
    fn test_rule_size_overflow() {
        let config = AutomatonConfig {
            states: 10,
            horizon: 3,
            ..Default::default()
        };
        assert!(config.rule_size().is_none());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RuleTooLarge { .. })
        ));
    }

    #[test]
    fn test_invalid_states() {
        let config = AutomatonConfig {
            states: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidStates(1))));
    }

    #[test]
    fn test_grid_must_exceed_neighborhood() {
        let config = AutomatonConfig {
            size: 2,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GridTooSmall { .. })
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AutomatonConfig = serde_json::from_str(r#"{"states": 3}"#).unwrap();
        assert_eq!(config.states, 3);
        assert_eq!(config.size, 256);
        assert!(config.early_stop);
    }
}
