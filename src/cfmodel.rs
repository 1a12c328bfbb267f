//! Car-following models.
//!
//! A model is a stateless strategy created once per vehicle type. Every model
//! answers the same questions (how fast may I go behind this leader, how far
//! do I need to stop, ...) through the [CarFollowing] trait; the set of
//! models is closed and selected through [CfKind] when the type is built.

use crate::{SimError, SimResult};
use rand::rngs::SmallRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use idm::Idm;
pub use kerner::Kerner;
pub use krauss::Krauss;
pub use wiedemann::{Regime, Wiedemann};

mod idm;
mod kerner;
mod krauss;
mod wiedemann;

/// Parameters shared by every car-following model.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CfParams {
    /// The maximum acceleration in m/s<sup>2</sup>.
    pub accel: f64,
    /// The maximum deceleration in m/s<sup>2</sup>, a positive number.
    pub decel: f64,
    /// The driver imperfection in [0, 1].
    pub sigma: f64,
    /// The driver's reaction time in s.
    pub tau: f64,
}

impl Default for CfParams {
    fn default() -> Self {
        Self {
            accel: 2.6,
            decel: 4.5,
            sigma: 0.5,
            tau: 1.0,
        }
    }
}

/// Which car-following model to use, with its model-specific parameters.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CfKind {
    /// The Krauss model with dawdling.
    #[default]
    Krauss,
    /// The intelligent driver model.
    Idm {
        /// The desired time gap to the leader in s.
        time_headway: f64,
        /// The gap kept at standstill in m.
        min_gap: f64,
        /// The free-road acceleration exponent.
        delta: f64,
    },
    /// Kerner's three-phase model.
    Kerner {
        /// The synchronisation gap factor.
        k: f64,
        /// The speed adaptation factor.
        phi: f64,
    },
    /// A psycho-physical model in the style of Wiedemann.
    Wiedemann {
        /// The gap kept at standstill in m.
        standstill_gap: f64,
        /// The multiplier of the square root of speed in the desired gap.
        gap_factor: f64,
        /// The perception threshold scale for closing speeds.
        perception: f64,
    },
}

impl CfKind {
    /// The intelligent driver model with its usual parameters.
    pub fn idm() -> Self {
        CfKind::Idm {
            time_headway: 1.5,
            min_gap: 2.5,
            delta: 4.0,
        }
    }

    /// Kerner's model with its usual parameters.
    pub fn kerner() -> Self {
        CfKind::Kerner { k: 0.5, phi: 5.0 }
    }

    /// The Wiedemann-style model with its usual parameters.
    pub fn wiedemann() -> Self {
        CfKind::Wiedemann {
            standstill_gap: 2.0,
            gap_factor: 1.5,
            perception: 40.0,
        }
    }
}

/// The lane-change model's chance to alter a speed chosen by the
/// car-following model.
pub trait SpeedPatch {
    /// Returns the speed to adopt given the bounds `min` and `max`,
    /// the `wanted` speed and the safe speed `vsafe`.
    fn patch_speed(&mut self, min: f64, wanted: f64, max: f64, vsafe: f64) -> f64;
}

/// A [SpeedPatch] which leaves the wanted speed alone.
pub struct KeepSpeed;

impl SpeedPatch for KeepSpeed {
    fn patch_speed(&mut self, _min: f64, wanted: f64, _max: f64, _vsafe: f64) -> f64 {
        wanted
    }
}

/// Kinematic limits and the collision-free speed shared by all models.
#[derive(Clone, Debug)]
pub struct Kinematics {
    accel: f64,
    decel: f64,
    tau: f64,
    max_speed: f64,
    dt: f64,
}

impl Kinematics {
    /// Creates the limits, checking that they are physically meaningful.
    pub fn new(params: &CfParams, max_speed: f64, dt: f64) -> SimResult<Self> {
        let positive = [
            ("accel", params.accel),
            ("decel", params.decel),
            ("max speed", max_speed),
            ("step length", dt),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(SimError::InvalidParameter(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !(params.tau >= 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "tau must not be negative, got {}",
                params.tau
            )));
        }
        if !(0.0..=1.0).contains(&params.sigma) {
            return Err(SimError::InvalidParameter(format!(
                "sigma must be within [0, 1], got {}",
                params.sigma
            )));
        }
        Ok(Self {
            accel: params.accel,
            decel: params.decel,
            tau: params.tau,
            max_speed,
            dt,
        })
    }

    /// The speed reachable within one step from `speed`.
    pub fn max_next_speed(&self, speed: f64) -> f64 {
        f64::min(speed + self.accel * self.dt, self.max_speed)
    }

    /// The speed after braking as hard as possible for one step.
    pub fn speed_after_max_decel(&self, speed: f64) -> f64 {
        f64::max(0.0, speed - self.decel * self.dt)
    }

    /// The distance needed to stop from `speed`, including the reaction time.
    pub fn brake_gap(&self, speed: f64) -> f64 {
        speed * (speed / (2.0 * self.decel) + self.tau)
    }

    /// The gap which keeps the follower safe should the leader brake hard.
    pub fn secure_gap(&self, speed: f64, leader_speed: f64) -> f64 {
        let closing = f64::max(0.0, speed - self.speed_after_max_decel(leader_speed));
        closing * closing / (2.0 * self.decel) + speed * self.tau
    }

    /// The largest speed which still allows stopping behind a leader that is
    /// `gap` ahead and brakes at the same rate from `leader_speed`.
    pub fn vsafe(&self, gap: f64, leader_speed: f64) -> f64 {
        if leader_speed == 0.0 && gap < 0.01 {
            return 0.0;
        }
        let tau_decel = self.tau * self.decel;
        let discr = tau_decel * tau_decel + leader_speed * leader_speed + 2.0 * self.decel * gap;
        f64::max(0.0, -tau_decel + f64::max(0.0, discr).sqrt())
    }

    pub fn accel(&self) -> f64 {
        self.accel
    }

    pub fn decel(&self) -> f64 {
        self.decel
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// The step length in s.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// The last part of every model's move: let the lane-change model patch the
    /// wished speed, then clamp to the safe and kinematic bounds.
    fn finish_move(
        &self,
        speed: f64,
        lane_max_speed: f64,
        v_safe: f64,
        v_wish: f64,
        lane_change: &mut dyn SpeedPatch,
    ) -> f64 {
        let max_next = self.max_next_speed(speed);
        let v_next = lane_change.patch_speed(
            self.speed_after_max_decel(speed),
            v_wish,
            v_safe.min(lane_max_speed).min(max_next),
            v_safe,
        );
        v_next
            .min(v_safe)
            .min(lane_max_speed)
            .min(max_next)
            .max(0.0)
    }
}

/// The questions every car-following model answers.
pub trait CarFollowing {
    /// The kinematic limits of the model.
    fn kinematics(&self) -> &Kinematics;

    /// The highest speed that stays collision free behind a leader `gap` ahead
    /// driving at `leader_speed`, capped by what is reachable this step.
    fn safe_follow_speed(&self, speed: f64, gap: f64, leader_speed: f64) -> f64;

    /// The highest speed which allows stopping within `distance`.
    fn safe_approach_speed(&self, speed: f64, distance: f64) -> f64 {
        self.safe_follow_speed(speed, distance, 0.0)
    }

    fn max_next_speed(&self, speed: f64) -> f64 {
        self.kinematics().max_next_speed(speed)
    }

    fn speed_after_max_decel(&self, speed: f64) -> f64 {
        self.kinematics().speed_after_max_decel(speed)
    }

    fn brake_gap(&self, speed: f64) -> f64 {
        self.kinematics().brake_gap(speed)
    }

    fn secure_gap(&self, speed: f64, leader_speed: f64) -> f64 {
        self.kinematics().secure_gap(speed, leader_speed)
    }

    /// The gap below which a leader driving at `leader_speed` starts to
    /// influence the speed of this vehicle.
    ///
    /// Not used by the lookahead: its horizon of one step plus the brake gap
    /// at the next speed always covers this gap.
    fn interaction_gap(&self, speed: f64, lane_max_speed: f64, leader_speed: f64) -> f64 {
        let k = self.kinematics();
        let v_next = f64::min(k.max_next_speed(speed), lane_max_speed);
        let gap = (v_next - leader_speed) * ((speed + leader_speed) / (2.0 * k.decel()) + k.tau())
            + leader_speed * k.tau();
        f64::max(gap, v_next * k.dt())
    }

    /// Whether following a leader `gap` ahead needs no more than one step
    /// of hard braking.
    fn has_safe_gap(&self, speed: f64, gap: f64, leader_speed: f64, lane_max_speed: f64) -> bool {
        if gap < 0.0 {
            return false;
        }
        let k = self.kinematics();
        let v_safe = self.safe_follow_speed(speed, gap, leader_speed);
        let v_next = v_safe.min(k.max_next_speed(speed)).min(lane_max_speed);
        v_next >= k.speed_after_max_decel(speed) && gap >= speed * k.dt()
    }

    /// Turns the safe speed `v_safe` into the speed actually adopted, applying
    /// driver imperfection and the lane-change model's patch.
    fn move_helper(
        &self,
        speed: f64,
        lane_max_speed: f64,
        v_safe: f64,
        lane_change: &mut dyn SpeedPatch,
        rng: &mut SmallRng,
    ) -> f64 {
        let _ = rng;
        let k = self.kinematics();
        let v_wish = lane_max_speed.min(k.max_next_speed(speed)).min(v_safe);
        k.finish_move(speed, lane_max_speed, v_safe, v_wish, lane_change)
    }

    fn accel(&self) -> f64 {
        self.kinematics().accel()
    }

    fn decel(&self) -> f64 {
        self.kinematics().decel()
    }

    fn tau(&self) -> f64 {
        self.kinematics().tau()
    }
}

/// One of the available car-following models.
#[derive(Clone, Debug)]
pub enum CarFollowModel {
    Krauss(Krauss),
    Idm(Idm),
    Kerner(Kerner),
    Wiedemann(Wiedemann),
}

impl CarFollowModel {
    /// Builds the model of the given kind.
    ///
    /// # Parameters
    /// * `kind` - The model and its specific parameters
    /// * `params` - The parameters shared by all models
    /// * `max_speed` - The vehicle type's maximum speed in m/s
    /// * `dt` - The simulation step length in s
    pub fn new(kind: &CfKind, params: &CfParams, max_speed: f64, dt: f64) -> SimResult<Self> {
        let kin = Kinematics::new(params, max_speed, dt)?;
        Ok(match *kind {
            CfKind::Krauss => CarFollowModel::Krauss(Krauss::new(kin, params.sigma)),
            CfKind::Idm {
                time_headway,
                min_gap,
                delta,
            } => CarFollowModel::Idm(Idm::new(kin, time_headway, min_gap, delta)),
            CfKind::Kerner { k, phi } => CarFollowModel::Kerner(Kerner::new(kin, k, phi)),
            CfKind::Wiedemann {
                standstill_gap,
                gap_factor,
                perception,
            } => CarFollowModel::Wiedemann(Wiedemann::new(
                kin,
                standstill_gap,
                gap_factor,
                perception,
            )),
        })
    }

    fn inner(&self) -> &dyn CarFollowing {
        match self {
            CarFollowModel::Krauss(m) => m,
            CarFollowModel::Idm(m) => m,
            CarFollowModel::Kerner(m) => m,
            CarFollowModel::Wiedemann(m) => m,
        }
    }
}

impl CarFollowing for CarFollowModel {
    fn kinematics(&self) -> &Kinematics {
        self.inner().kinematics()
    }

    fn safe_follow_speed(&self, speed: f64, gap: f64, leader_speed: f64) -> f64 {
        self.inner().safe_follow_speed(speed, gap, leader_speed)
    }

    fn safe_approach_speed(&self, speed: f64, distance: f64) -> f64 {
        self.inner().safe_approach_speed(speed, distance)
    }

    fn interaction_gap(&self, speed: f64, lane_max_speed: f64, leader_speed: f64) -> f64 {
        self.inner().interaction_gap(speed, lane_max_speed, leader_speed)
    }

    fn has_safe_gap(&self, speed: f64, gap: f64, leader_speed: f64, lane_max_speed: f64) -> bool {
        self.inner().has_safe_gap(speed, gap, leader_speed, lane_max_speed)
    }

    fn move_helper(
        &self,
        speed: f64,
        lane_max_speed: f64,
        v_safe: f64,
        lane_change: &mut dyn SpeedPatch,
        rng: &mut SmallRng,
    ) -> f64 {
        self.inner()
            .move_helper(speed, lane_max_speed, v_safe, lane_change, rng)
    }
}
