use crate::cfmodel::{CarFollowModel, CfKind, CfParams};
use crate::{SimError, SimResult, VehicleTypeId};
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Normal};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The class of a vehicle, used for lane permissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VehicleClass {
    #[default]
    Passenger,
    Taxi,
    Bus,
    Delivery,
    Truck,
    Motorcycle,
    Bicycle,
    Emergency,
    Authority,
}

/// The attributes of a vehicle type.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VehicleTypeParams {
    /// The name of the type.
    pub name: String,
    /// The vehicle length in m.
    pub length: f64,
    /// The maximum speed in m/s.
    pub max_speed: f64,
    /// The vehicle class.
    pub vclass: VehicleClass,
    /// The mean of the individual speed factors.
    pub speed_factor: f64,
    /// The standard deviation of the individual speed factors.
    pub speed_dev: f64,
    /// The car-following model.
    pub cf_kind: CfKind,
    /// The parameters shared by all car-following models.
    pub cf: CfParams,
}

impl Default for VehicleTypeParams {
    fn default() -> Self {
        Self {
            name: "DEFAULT_VEHTYPE".into(),
            length: 5.0,
            max_speed: 70.0,
            vclass: VehicleClass::default(),
            speed_factor: 1.0,
            speed_dev: 0.0,
            cf_kind: CfKind::default(),
            cf: CfParams::default(),
        }
    }
}

/// An immutable vehicle type, shared by all vehicles of the type.
#[derive(Clone, Debug)]
pub struct VehicleType {
    id: VehicleTypeId,
    name: String,
    length: f64,
    max_speed: f64,
    vclass: VehicleClass,
    speed_factor: f64,
    speed_dev: f64,
    model: CarFollowModel,
}

impl VehicleType {
    /// Creates a vehicle type for a simulation running at `dt` seconds per step.
    pub(crate) fn new(id: VehicleTypeId, params: &VehicleTypeParams, dt: f64) -> SimResult<Self> {
        if !(params.length > 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "vehicle type '{}': length must be positive",
                params.name
            )));
        }
        if !(params.speed_factor > 0.0) || !(params.speed_dev >= 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "vehicle type '{}': invalid speed distribution",
                params.name
            )));
        }
        let model = CarFollowModel::new(&params.cf_kind, &params.cf, params.max_speed, dt)
            .map_err(|err| SimError::InvalidParameter(format!("vehicle type '{}': {}", params.name, err)))?;
        Ok(Self {
            id,
            name: params.name.clone(),
            length: params.length,
            max_speed: params.max_speed,
            vclass: params.vclass,
            speed_factor: params.speed_factor,
            speed_dev: params.speed_dev,
            model,
        })
    }

    pub fn id(&self) -> VehicleTypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The vehicle length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The maximum speed in m/s.
    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    pub fn vclass(&self) -> VehicleClass {
        self.vclass
    }

    /// The car-following model of the type.
    pub fn model(&self) -> &CarFollowModel {
        &self.model
    }

    /// Draws an individual speed factor, clamped to (0, 1] so that no vehicle
    /// exceeds the type's maximum speed.
    pub(crate) fn sample_speed_factor(&self, rng: &mut SmallRng) -> f64 {
        let factor = match Normal::new(self.speed_factor, self.speed_dev) {
            Ok(distr) if self.speed_dev > 0.0 => distr.sample(rng),
            _ => self.speed_factor,
        };
        factor.clamp(0.1, 1.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;
    use slotmap::KeyData;

    #[test]
    fn rejects_zero_length() {
        let params = VehicleTypeParams {
            length: 0.0,
            ..Default::default()
        };
        let id = VehicleTypeId::from(KeyData::from_ffi(1));
        assert!(VehicleType::new(id, &params, 1.0).is_err());
    }

    #[test]
    fn speed_factors_stay_bounded() {
        let params = VehicleTypeParams {
            speed_dev: 0.3,
            ..Default::default()
        };
        let id = VehicleTypeId::from(KeyData::from_ffi(1));
        let vtype = VehicleType::new(id, &params, 1.0).unwrap();
        let mut rng = SmallRng::seed_from_u64(9);
        for _ in 0..100 {
            let f = vtype.sample_speed_factor(&mut rng);
            assert!(f > 0.0 && f <= 1.0);
        }
    }
}
