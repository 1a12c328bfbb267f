use super::{CarFollowing, Kinematics};

/// The fraction of the maximum deceleration a following driver uses.
const COMFORT_DECEL: f64 = 0.5;

/// The driving regimes of the psycho-physical model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Regime {
    /// No leader in sight.
    Free,
    /// Closing in on a slower leader that has been perceived.
    Approaching,
    /// Unconsciously following the leader.
    Following,
    /// Closer than the standstill gap.
    Emergency,
}

/// A psycho-physical car-following model in the style of Wiedemann:
/// the driver reacts only once perception thresholds on gap and closing
/// speed are crossed.
#[derive(Clone, Debug)]
pub struct Wiedemann {
    kin: Kinematics,
    /// The gap kept at standstill in m.
    standstill_gap: f64,
    /// The multiplier of the square root of speed in the desired gap.
    gap_factor: f64,
    /// The perception threshold scale for closing speeds.
    perception: f64,
}

impl Wiedemann {
    pub fn new(kin: Kinematics, standstill_gap: f64, gap_factor: f64, perception: f64) -> Self {
        Self {
            kin,
            standstill_gap,
            gap_factor,
            perception,
        }
    }

    /// The desired following distance at the given speed.
    fn desired_gap(&self, speed: f64) -> f64 {
        self.standstill_gap + self.gap_factor * speed.sqrt()
    }

    /// The closing speed above which an approaching leader is noticed.
    fn perception_threshold(&self, gap: f64) -> f64 {
        let d = (gap - self.standstill_gap) / self.perception;
        d * d
    }

    /// Classifies the situation behind a leader.
    pub fn regime(&self, speed: f64, gap: f64, leader_speed: f64) -> Regime {
        let dv = speed - leader_speed;
        if gap <= self.standstill_gap {
            Regime::Emergency
        } else if gap <= self.desired_gap(speed) {
            Regime::Following
        } else if dv > self.perception_threshold(gap) {
            Regime::Approaching
        } else {
            Regime::Free
        }
    }

    /// The speed the driver would choose while following.
    fn following_speed(&self, speed: f64, dv: f64) -> f64 {
        let dt = self.kin.dt();
        if dv > 0.0 {
            speed - f64::min(dv, COMFORT_DECEL * self.kin.decel() * dt)
        } else {
            speed + f64::min(-dv, self.kin.accel() * dt)
        }
    }
}

impl CarFollowing for Wiedemann {
    fn kinematics(&self) -> &Kinematics {
        &self.kin
    }

    fn safe_follow_speed(&self, speed: f64, gap: f64, leader_speed: f64) -> f64 {
        let dt = self.kin.dt();
        let dv = speed - leader_speed;
        let wished = match self.regime(speed, gap, leader_speed) {
            Regime::Emergency => speed - self.kin.decel() * dt,
            Regime::Following => self.following_speed(speed, dv),
            Regime::Approaching => {
                // Brake so that the speed difference vanishes at the desired gap
                let room = gap - self.desired_gap(speed);
                let decel = f64::min(dv * dv / (2.0 * room), self.kin.decel());
                f64::max(self.following_speed(speed, dv), speed - decel * dt)
            }
            Regime::Free => speed + self.kin.accel() * dt,
        };
        wished
            .min(self.kin.vsafe(gap, leader_speed))
            .min(self.kin.max_next_speed(speed))
            .max(0.0)
    }
}
