use super::{CarFollowing, Kinematics};

/// Kerner's three-phase model: within the synchronisation gap the vehicle
/// adapts its speed towards the leader's, outside of it it accelerates freely.
#[derive(Clone, Debug)]
pub struct Kerner {
    kin: Kinematics,
    k: f64,
    phi: f64,
}

impl Kerner {
    pub fn new(kin: Kinematics, k: f64, phi: f64) -> Self {
        Self { kin, k, phi }
    }

    /// The synchronisation gap for the given speeds.
    pub fn synchronisation_gap(&self, speed: f64, leader_speed: f64) -> f64 {
        let g = self.k * speed * self.kin.dt()
            + self.phi / self.kin.accel() * speed * (speed - leader_speed);
        f64::max(0.0, g)
    }
}

impl CarFollowing for Kerner {
    fn kinematics(&self) -> &Kinematics {
        &self.kin
    }

    fn safe_follow_speed(&self, speed: f64, gap: f64, leader_speed: f64) -> f64 {
        let dt = self.kin.dt();
        let v_cond = if gap > self.synchronisation_gap(speed, leader_speed) {
            speed + self.kin.accel() * dt
        } else {
            let adapt = (leader_speed - speed).clamp(-self.kin.decel() * dt, self.kin.accel() * dt);
            speed + adapt
        };
        v_cond
            .min(self.kin.max_speed())
            .min(self.kin.vsafe(gap, leader_speed))
            .min(self.kin.max_next_speed(speed))
            .max(0.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cfmodel::CfParams;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn adapts_to_leader_inside_synchronisation_gap() {
        let model = Kerner::new(Kinematics::new(&CfParams::default(), 50.0, 1.0).unwrap(), 0.5, 5.0);
        let g = model.synchronisation_gap(15.0, 14.0);
        assert!(g > 0.0);
        // One m/s slower leader: adapt by exactly the speed difference
        assert_approx_eq!(model.safe_follow_speed(15.0, g, 14.0), 14.0);
        // Far away: accelerate
        assert_approx_eq!(model.safe_follow_speed(15.0, 500.0, 14.0), 17.6);
    }
}
