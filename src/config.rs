use crate::{SimError, SimResult};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What to do when two vehicles on a lane are found to overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CollisionAction {
    /// Log the collision and carry on.
    #[default]
    Warn,
    /// Remove the colliding (following) vehicle from the network.
    Remove,
    /// Stop the simulation with a [SimError::Collision].
    Abort,
}

/// Global simulation options.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimConfig {
    /// The length of a simulation step in s.
    pub step_length: f64,
    /// The simulation time of the first step in s.
    pub begin: f64,
    /// The seed from which every vehicle's random stream is derived.
    pub seed: u64,
    /// Whether to look for overlapping vehicles after each move.
    pub check_collisions: bool,
    /// How detected collisions are handled.
    pub collision_action: CollisionAction,
    /// Whether vehicles drive over the internal (via) lanes of junctions.
    pub use_internal_lanes: bool,
    /// The slack added on both sides of a link's occupation window, in s.
    pub lookahead_slack: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            step_length: 1.0,
            begin: 0.0,
            seed: 42,
            check_collisions: true,
            collision_action: CollisionAction::Warn,
            use_internal_lanes: true,
            lookahead_slack: 3.0,
        }
    }
}

impl SimConfig {
    /// Checks that the options describe a runnable simulation.
    pub fn validate(&self) -> SimResult<()> {
        if !(self.step_length > 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "step length must be positive, got {}",
                self.step_length
            )));
        }
        if !(self.lookahead_slack >= 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "lookahead slack must not be negative, got {}",
                self.lookahead_slack
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SimConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_step_length() {
        let config = SimConfig {
            step_length: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimError::InvalidParameter(_))));

        let config = SimConfig {
            step_length: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
