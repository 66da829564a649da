//! Racing simulation for reinforcement learning.
//!
//! A small rigid body integrator drives four-wheeled raycast vehicles over a
//! flat ground plane. The track is a closed chain of quadratic Bezier
//! segments; observations are waypoints along its edges seen from the
//! vehicle's frame.

pub mod config;
pub mod error;
pub mod physics;
pub mod sim;
pub mod track;
pub mod vehicle;

#[cfg(feature = "python")]
mod python;

pub use config::{CrashLimits, SimulationConfig};
pub use error::{SimError, SimResult};
pub use physics::{BodyHandle, RigidBody, Shape, World};
pub use sim::{Simulation, VehicleId};
pub use track::Track;
pub use vehicle::{PacejkaCoefficients, Vehicle, VehicleParams, Wheel};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn racegym_sim(module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<python::SimulationEnvironment>()?;
    Ok(())
}
