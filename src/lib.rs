//! A discrete-time microscopic road traffic simulator.
//!
//! Vehicles drive along lanes, follow each other using a car-following model,
//! change lanes and cross junctions whose right of way is arbitrated by
//! link states and a request/respond conflict table.

pub use cfmodel::{CarFollowModel, CarFollowing, CfKind, CfParams};
pub use config::{CollisionAction, SimConfig};
pub use edge::{Edge, EdgePurpose};
pub use edge_control::EdgeControl;
pub use error::{SimError, SimResult};
pub use junction::{Junction, JunctionLogic, JunctionLogicBuilder, LinkMask};
pub use lane::{Collision, Lane, LaneAttributes, LeaderInfo, VehiclesGuard};
pub use light::{Phase, TrafficLight};
pub use link::{ApproachingVehicle, Link, LinkAttributes, LinkState};
pub use network::Network;
pub use reminder::{EnterReason, InductionLoop, LeaveReason, MoveReminder, Passage};
pub use route::Route;
pub use simulation::{Simulation, StepReport};
pub use slotmap::{Key, KeyData};
pub use stop::{BusStop, StopParams};
pub use util::Interval;
pub use vehicle::{
    DepartLane, DepartPos, DepartSpeed, Device, DriveItem, LaneQ, MovePhase, TripInfo, Vehicle,
    VehicleParams,
};
pub use vehicle_control::VehicleControl;
pub use vtype::{VehicleClass, VehicleType, VehicleTypeParams};

use slotmap::{new_key_type, SlotMap};

pub mod cfmodel;
mod config;
mod edge;
mod edge_control;
mod error;
mod junction;
mod lane;
mod light;
mod link;
pub mod math;
mod network;
mod reminder;
mod route;
mod simulation;
mod stop;
mod util;
mod vehicle;
mod vehicle_control;
mod vtype;

new_key_type! {
    /// Unique ID of an [Edge].
    pub struct EdgeId;
    /// Unique ID of a [Lane].
    pub struct LaneId;
    /// Unique ID of a [Link].
    pub struct LinkId;
    /// Unique ID of a [Junction].
    pub struct JunctionId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
    /// Unique ID of a [VehicleType].
    pub struct VehicleTypeId;
    /// Unique ID of a [Route].
    pub struct RouteId;
    /// Unique ID of a [TrafficLight].
    pub struct TrafficLightId;
    /// Unique ID of a [BusStop].
    pub struct BusStopId;
}

type EdgeSet = SlotMap<EdgeId, Edge>;
type LaneSet = SlotMap<LaneId, Lane>;
type LinkSet = SlotMap<LinkId, Link>;
type JunctionSet = SlotMap<JunctionId, Junction>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;
