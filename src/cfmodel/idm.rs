use super::{CarFollowing, Kinematics};

/// The intelligent driver model.
///
/// The acceleration is `a * (1 - (v / v0)^delta - (s* / s)^2)` with the desired
/// gap `s* = s0 + v * T + v * dv / (2 * sqrt(a * b))`. The resulting speed is
/// additionally bounded by the collision-free speed so that discrete steps
/// stay safe.
#[derive(Clone, Debug)]
pub struct Idm {
    kin: Kinematics,
    /// The desired time gap to the leader in s.
    headway: f64,
    /// The gap kept at standstill in m.
    min_gap: f64,
    /// The free-road exponent.
    delta: f64,
}

impl Idm {
    pub fn new(kin: Kinematics, headway: f64, min_gap: f64, delta: f64) -> Self {
        Self {
            kin,
            headway,
            min_gap,
            delta,
        }
    }

    /// Computes an acceleration using the intelligent driver model.
    ///
    /// # Arguments
    /// * `net_dist` - The gap to the vehicle ahead in m.
    /// * `my_vel` - The velocity of the simulated vehicle (m/s).
    /// * `their_vel` - The vehicle ahead's velocity (m/s).
    fn acceleration(&self, net_dist: f64, my_vel: f64, their_vel: f64) -> f64 {
        let max_acc = self.kin.accel();
        let comf_dec = self.kin.decel();

        let free = 1.0 - (my_vel / self.kin.max_speed()).powf(self.delta);
        if net_dist <= 0.0 {
            return -10.0 * max_acc;
        }
        let appr = my_vel - their_vel;
        let factor = 1.0 / (2.0 * (max_acc * comf_dec).sqrt());
        let ss = self.min_gap + f64::max(0.0, my_vel * self.headway + my_vel * appr * factor);
        let term = ss / net_dist;
        max_acc * (free - term * term)
    }
}

impl CarFollowing for Idm {
    fn kinematics(&self) -> &Kinematics {
        &self.kin
    }

    fn safe_follow_speed(&self, speed: f64, gap: f64, leader_speed: f64) -> f64 {
        let acc = self.acceleration(gap, speed, leader_speed);
        let v = f64::max(0.0, speed + acc * self.kin.dt());
        v.min(self.kin.vsafe(gap, leader_speed))
            .min(self.kin.max_next_speed(speed))
    }
}
