use crate::config::{CollisionAction, SimConfig};
use crate::edge_control::EdgeControl;
use crate::light::TrafficLight;
use crate::link::LinkState;
use crate::network::Network;
use crate::reminder::{LeaveReason, MoveReminder};
use crate::route::Route;
use crate::vehicle::{DepartLane, DepartPos, DepartSpeed, Device, Vehicle, VehicleParams};
use crate::vehicle_control::VehicleControl;
use crate::vtype::{VehicleType, VehicleTypeParams};
use crate::{
    EdgeId, LinkId, RouteId, SimError, SimResult, StopParams, TrafficLightId, VehicleId, VehicleTypeId,
};
use log::{info, warn};
use slotmap::SlotMap;
use std::collections::HashMap;
use std::sync::Arc;

/// What happened during one call of [Simulation::step].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepReport {
    /// The simulation time the step started at, in s.
    pub time: f64,
    /// Vehicles inserted into the network.
    pub emitted: usize,
    /// Vehicles which reached the end of their route.
    pub arrived: usize,
    /// Detected collisions.
    pub collisions: usize,
    /// Vehicles in the network after the step.
    pub running: usize,
}

/// A traffic simulation.
pub struct Simulation {
    config: SimConfig,
    /// The road network.
    net: Network,
    vtypes: SlotMap<VehicleTypeId, Arc<VehicleType>>,
    vtype_names: HashMap<String, VehicleTypeId>,
    routes: SlotMap<RouteId, Arc<Route>>,
    route_names: HashMap<String, RouteId>,
    /// The traffic lights.
    lights: SlotMap<TrafficLightId, TrafficLight>,
    edges: EdgeControl,
    vehicles: VehicleControl,
    /// The vehicles which left the network in the last step.
    arrived: Vec<Vehicle>,
    /// The current simulation time in s.
    time: f64,
}

impl Simulation {
    /// Creates a new simulation of `network`.
    pub fn new(config: SimConfig, mut network: Network) -> SimResult<Self> {
        config.validate()?;
        if !config.use_internal_lanes {
            network.disable_internal_lanes();
        }
        network.set_lookahead_slack(config.lookahead_slack);
        info!(
            "simulation starts at t={}s with step length {}s, {} lanes and {} links",
            config.begin,
            config.step_length,
            network.iter_lanes().count(),
            network.iter_links().count()
        );
        Ok(Self {
            time: config.begin,
            config,
            net: network,
            vtypes: SlotMap::with_key(),
            vtype_names: HashMap::new(),
            routes: SlotMap::with_key(),
            route_names: HashMap::new(),
            lights: SlotMap::with_key(),
            edges: EdgeControl::new(),
            vehicles: VehicleControl::new(),
            arrived: vec![],
        })
    }

    /// Adds a vehicle type.
    pub fn add_vehicle_type(&mut self, params: &VehicleTypeParams) -> SimResult<VehicleTypeId> {
        if self.vtype_names.contains_key(&params.name) {
            return Err(SimError::DuplicateId(params.name.clone()));
        }
        let dt = self.config.step_length;
        let id = self
            .vtypes
            .try_insert_with_key(|id| VehicleType::new(id, params, dt).map(Arc::new))?;
        self.vtype_names.insert(params.name.clone(), id);
        Ok(id)
    }

    pub fn vehicle_type_by_name(&self, name: &str) -> SimResult<VehicleTypeId> {
        self.vtype_names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownVehicleType(name.to_owned()))
    }

    /// Adds a route over the given (non-internal) edges.
    pub fn add_route(&mut self, name: &str, edges: &[EdgeId]) -> SimResult<RouteId> {
        if self.route_names.contains_key(name) {
            return Err(SimError::DuplicateId(name.to_owned()));
        }
        if edges.is_empty() {
            return Err(SimError::InvalidParameter(format!("route '{}' is empty", name)));
        }
        for edge in edges {
            let edge = self
                .net
                .try_edge(*edge)
                .ok_or_else(|| SimError::UnknownEdge(format!("{:?}", edge)))?;
            if edge.is_internal() {
                return Err(SimError::InvalidParameter(format!(
                    "route '{}' contains internal edge '{}'",
                    name,
                    edge.name()
                )));
            }
        }
        let id = self
            .routes
            .insert_with_key(|id| Arc::new(Route::new(id, name, edges.to_vec())));
        self.route_names.insert(name.to_owned(), id);
        Ok(id)
    }

    pub fn route_by_name(&self, name: &str) -> SimResult<RouteId> {
        self.route_names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownRoute(name.to_owned()))
    }

    /// Loads a vehicle, which is inserted once its depart time has come and
    /// its depart lane has room.
    pub fn add_vehicle(&mut self, params: &VehicleParams) -> SimResult<VehicleId> {
        let vtype = self
            .vtypes
            .get(params.vtype)
            .cloned()
            .ok_or_else(|| SimError::UnknownVehicleType(format!("{:?}", params.vtype)))?;
        let route = self
            .routes
            .get(params.route)
            .cloned()
            .ok_or_else(|| SimError::UnknownRoute(format!("{:?}", params.route)))?;
        self.check_vehicle(params, &vtype, &route)?;
        let seed = self.config.seed;
        self.vehicles.add(&self.net, params, vtype, route, seed)
    }

    /// Checks that the vehicle can be inserted and follow its route.
    fn check_vehicle(&self, params: &VehicleParams, vtype: &VehicleType, route: &Route) -> SimResult<()> {
        let vclass = vtype.vclass();
        let invalid_route = |reason: String| SimError::InvalidRoute {
            vehicle: params.name.clone(),
            reason,
        };
        for pair in route.edges().windows(2) {
            if self.net.allowed_lanes(pair[0], pair[1], vclass).is_none() {
                return Err(invalid_route(format!(
                    "no lane of '{}' leads to '{}' for {:?}",
                    self.net.edge(pair[0]).name(),
                    self.net.edge(pair[1]).name(),
                    vclass
                )));
            }
        }
        let first = route.edges()[0];
        let lanes = self.net.lanes(first);
        match params.depart_lane {
            DepartLane::Given(index) => {
                if !lanes
                    .get(index)
                    .map_or(false, |l| self.net.lane(*l).allows(vclass))
                {
                    return Err(SimError::DepartLaneUnavailable {
                        vehicle: params.name.clone(),
                        edge: self.net.edge(first).name().to_owned(),
                        lane: index,
                    });
                }
            }
            DepartLane::Free | DepartLane::Best => {
                if !lanes.iter().any(|l| self.net.lane(*l).allows(vclass)) {
                    return Err(invalid_route(format!(
                        "no lane of '{}' allows {:?}",
                        self.net.edge(first).name(),
                        vclass
                    )));
                }
            }
        }
        let bad_param = |what: &str, value: f64| {
            SimError::InvalidParameter(format!("vehicle '{}': {} {}", params.name, what, value))
        };
        if let DepartPos::Given(pos) = params.depart_pos {
            if !(pos >= 0.0) {
                return Err(bad_param("depart position", pos));
            }
        }
        if let DepartSpeed::Given(speed) = params.depart_speed {
            if !(speed >= 0.0) {
                return Err(bad_param("depart speed", speed));
            }
        }
        if let Some(pos) = params.arrival_pos {
            if !(pos >= 0.0) {
                return Err(bad_param("arrival position", pos));
            }
        }
        Ok(())
    }

    /// Adds a stop to a loaded or running vehicle.
    pub fn add_stop(&mut self, vehicle: VehicleId, params: &StopParams) -> SimResult<()> {
        let veh = self
            .vehicles
            .get_mut(vehicle)
            .ok_or_else(|| SimError::InvalidParameter(format!("unknown vehicle {:?}", vehicle)))?;
        veh.add_stop(&self.net, params)
    }

    /// Equips a vehicle with a device.
    pub fn add_device(&mut self, vehicle: VehicleId, device: Box<dyn Device>) -> SimResult<()> {
        let veh = self
            .vehicles
            .get_mut(vehicle)
            .ok_or_else(|| SimError::InvalidParameter(format!("unknown vehicle {:?}", vehicle)))?;
        veh.add_device(device);
        Ok(())
    }

    /// Adds a traffic light, which sets the states of its links each step.
    pub fn add_traffic_light(&mut self, light: TrafficLight) -> SimResult<TrafficLightId> {
        if let Some(link) = light.links().iter().find(|l| !self.net.has_link(**l)) {
            return Err(SimError::InvalidParameter(format!(
                "traffic light '{}' controls unknown link {:?}",
                light.name(),
                link
            )));
        }
        Ok(self.lights.insert(light))
    }

    /// Sets the state of a link not controlled by a traffic light.
    pub fn set_link_state(&mut self, link: LinkId, state: LinkState) -> SimResult<()> {
        if !self.net.has_link(link) {
            return Err(SimError::InvalidParameter(format!("unknown link {:?}", link)));
        }
        self.net.link_mut(link).set_state(state);
        Ok(())
    }

    /// Attaches a reminder to its lane. Vehicles already on the lane are
    /// not tracked by it.
    pub fn add_reminder(&mut self, reminder: Arc<dyn MoveReminder>) -> SimResult<()> {
        self.net.add_reminder(reminder)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn network(&self) -> &Network {
        &self.net
    }

    /// The current simulation time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Gets a loaded or running vehicle.
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.vehicle(id)
    }

    pub fn vehicle_by_name(&self, name: &str) -> Option<&Vehicle> {
        self.vehicles.vehicle_by_name(name)
    }

    /// Iterates the vehicles in the network.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.iter_running()
    }

    pub fn vehicle_control(&self) -> &VehicleControl {
        &self.vehicles
    }

    pub fn edge_control(&self) -> &EdgeControl {
        &self.edges
    }

    pub fn traffic_light(&self, id: TrafficLightId) -> Option<&TrafficLight> {
        self.lights.get(id)
    }

    /// Returns an iterator over all the traffic lights in the simulation.
    pub fn iter_lights(&self) -> impl Iterator<Item = (TrafficLightId, &TrafficLight)> {
        self.lights.iter()
    }

    /// The vehicles which arrived or were removed in the last step.
    pub fn arrived_vehicles(&self) -> &[Vehicle] {
        &self.arrived
    }

    /// Advances the simulation by one step.
    ///
    /// Fails only when a collision is detected and the configured
    /// [CollisionAction] is `Abort`.
    pub fn step(&mut self) -> SimResult<StepReport> {
        let now = self.time;
        self.arrived.clear();
        self.update_lights(now);

        // Plan against an unchanged state, then register
        let plans = self.edges.plan_moves(&self.net, self.vehicles.vehicles(), now);
        for (id, items) in plans {
            if let Some(veh) = self.vehicles.get_mut(id) {
                veh.set_drive_items(items);
            }
        }
        for veh in self.vehicles.vehicles_mut().values_mut() {
            veh.commit(&mut self.net);
        }
        self.net.update_junctions();

        let arrived = self
            .edges
            .move_vehicles(&self.net, self.vehicles.vehicles_mut(), now);
        let arrived_count = arrived.len();
        for id in arrived {
            if let Some(veh) = self
                .vehicles
                .remove_vehicle(&mut self.net, id, LeaveReason::Arrival, now)
            {
                self.arrived.push(veh);
            }
        }

        let mut collisions = self.handle_collisions(now)?;
        self.edges
            .change_lanes(&self.net, self.vehicles.vehicles_mut(), now);
        collisions += self.handle_collisions(now)?;

        let emitted = self.vehicles.emit_pending(&self.net, &mut self.edges, now);
        self.time += self.config.step_length;

        Ok(StepReport {
            time: now,
            emitted,
            arrived: arrived_count,
            collisions,
            running: self.vehicles.running_count(),
        })
    }

    /// Steps until the simulation time reaches `end`.
    pub fn run_until(&mut self, end: f64) -> SimResult<()> {
        while self.time < end - self.config.step_length / 2.0 {
            self.step()?;
        }
        Ok(())
    }

    /// Sets the link states of all traffic lights.
    fn update_lights(&mut self, now: f64) {
        for light in self.lights.values_mut() {
            light.update(now);
            for (link, state) in light.states() {
                self.net.link_mut(link).set_state(state);
            }
        }
    }

    /// Looks for overlapping vehicles and applies the collision action.
    /// Returns the number of collisions.
    fn handle_collisions(&mut self, now: f64) -> SimResult<usize> {
        if !self.config.check_collisions {
            return Ok(0);
        }
        let collisions = self
            .edges
            .detect_collisions(&self.net, self.vehicles.vehicles());
        for collision in &collisions {
            let name = |id| self.vehicles.vehicle(id).map_or("?", |v| v.name()).to_owned();
            let leader = name(collision.leader);
            let follower = name(collision.follower);
            let lane = self.net.lane(collision.lane).name().to_owned();
            match self.config.collision_action {
                CollisionAction::Abort => {
                    return Err(SimError::Collision {
                        time: now,
                        lane,
                        leader,
                        follower,
                        gap: collision.gap,
                    });
                }
                CollisionAction::Warn => warn!(
                    "vehicle '{}' collided with '{}' on lane '{}' at t={}s, gap {:.2}m",
                    follower, leader, lane, now, collision.gap
                ),
                CollisionAction::Remove => {
                    warn!(
                        "vehicle '{}' collided with '{}' on lane '{}' at t={}s and is removed",
                        follower, leader, lane, now
                    );
                    if let Some(veh) = self.vehicles.remove_vehicle(
                        &mut self.net,
                        collision.follower,
                        LeaveReason::Removal,
                        now,
                    ) {
                        self.arrived.push(veh);
                    }
                }
            }
        }
        if self.config.collision_action == CollisionAction::Remove && !collisions.is_empty() {
            self.edges.patch_active_lanes(&self.net);
        }
        Ok(collisions.len())
    }
}
