use super::{CarFollowing, Kinematics, SpeedPatch};
use rand::rngs::SmallRng;
use rand::Rng;

/// The Krauss model: drive as fast as the collision-free speed allows,
/// then randomly dawdle a bit.
#[derive(Clone, Debug)]
pub struct Krauss {
    kin: Kinematics,
    /// The driver imperfection.
    sigma: f64,
}

impl Krauss {
    pub fn new(kin: Kinematics, sigma: f64) -> Self {
        Self { kin, sigma }
    }

    /// Randomly reduces the speed, by at most `sigma` times one step of acceleration.
    fn dawdle(&self, speed: f64, rng: &mut SmallRng) -> f64 {
        let r: f64 = rng.gen();
        let dt = self.kin.dt();
        let speed = if speed < self.kin.accel() {
            speed - self.sigma * speed * r * dt
        } else {
            speed - self.sigma * self.kin.accel() * r * dt
        };
        f64::max(0.0, speed)
    }
}

impl CarFollowing for Krauss {
    fn kinematics(&self) -> &Kinematics {
        &self.kin
    }

    fn safe_follow_speed(&self, speed: f64, gap: f64, leader_speed: f64) -> f64 {
        f64::min(self.kin.vsafe(gap, leader_speed), self.kin.max_next_speed(speed))
    }

    fn move_helper(
        &self,
        speed: f64,
        lane_max_speed: f64,
        v_safe: f64,
        lane_change: &mut dyn SpeedPatch,
        rng: &mut SmallRng,
    ) -> f64 {
        let v_wish = lane_max_speed
            .min(self.kin.max_next_speed(speed))
            .min(v_safe);
        let v_wish = self.dawdle(v_wish, rng);
        self.kin
            .finish_move(speed, lane_max_speed, v_safe, v_wish, lane_change)
    }
}
