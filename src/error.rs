//! Errors raised while building a network or loading vehicles.
//!
//! Per-step computations never fail. The only runtime error is a
//! [SimError::Collision] under [crate::CollisionAction::Abort].

use thiserror::Error;

/// The error type of the simulator.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown edge '{0}'")]
    UnknownEdge(String),

    #[error("unknown lane '{0}'")]
    UnknownLane(String),

    #[error("unknown route '{0}'")]
    UnknownRoute(String),

    #[error("unknown vehicle type '{0}'")]
    UnknownVehicleType(String),

    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    #[error("vehicle '{vehicle}' has an invalid route: {reason}")]
    InvalidRoute { vehicle: String, reason: String },

    #[error("vehicle '{vehicle}': depart lane {lane} is not available on edge '{edge}'")]
    DepartLaneUnavailable {
        vehicle: String,
        edge: String,
        lane: usize,
    },

    #[error("vehicle '{vehicle}': stop on lane '{lane}' at {pos} is not downstream")]
    StopNotDownstream {
        vehicle: String,
        lane: String,
        pos: f64,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("junction '{junction}' logic covers {logic} links but {given} were given")]
    JunctionSize {
        junction: String,
        logic: usize,
        given: usize,
    },

    #[error("collision at t={time}s on lane '{lane}': '{follower}' ran into '{leader}' (gap {gap:.2}m)")]
    Collision {
        time: f64,
        lane: String,
        leader: String,
        follower: String,
        gap: f64,
    },
}

/// Shorthand result type of the simulator.
pub type SimResult<T> = Result<T, SimError>;
