use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use tracing::warn;

use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::sim::{Simulation, VehicleId};

impl From<SimError> for PyErr {
    fn from(err: SimError) -> PyErr {
        match err {
            SimError::Io { .. } => PyIOError::new_err(err.to_string()),
            _ => PyValueError::new_err(err.to_string()),
        }
    }
}

/// A racing simulation driven from Python.
#[pyclass]
pub struct SimulationEnvironment {
    sim: Simulation,
}

#[pymethods]
impl SimulationEnvironment {
    /// Creates an environment, reading tunables from `config_path` when given.
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<String>) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => SimulationConfig::load(path)?,
            None => SimulationConfig::default(),
        };
        Ok(SimulationEnvironment {
            sim: Simulation::new(config),
        })
    }

    #[getter]
    fn observation_size(&self) -> usize {
        self.sim.config().observation_len()
    }

    #[getter]
    fn dt(&self) -> f64 {
        self.sim.config().dt * self.sim.config().substeps as f64
    }

    fn load_track(&mut self, points: Vec<(f64, f64)>) -> PyResult<()> {
        let points: Vec<[f64; 2]> = points.into_iter().map(|(x, y)| [x, y]).collect();
        Ok(self.sim.load_track(&points)?)
    }

    fn load_track_file(&mut self, path: String) -> PyResult<()> {
        Ok(self.sim.load_track_file(path)?)
    }

    /// Spawns a vehicle at curve parameter `spawn_t`. Returns `None` when no
    /// track is loaded.
    fn add_vehicle(&mut self, spawn_t: f64) -> Option<u32> {
        match self.sim.add_vehicle(spawn_t) {
            Ok(id) => Some(id.raw()),
            Err(err) => {
                warn!(%err, "add_vehicle failed");
                None
            }
        }
    }

    fn remove_vehicle(&mut self, id: u32) -> bool {
        self.sim.remove_vehicle(VehicleId::from_raw(id))
    }

    fn set_vehicle_control(&mut self, id: u32, steer: f64, throttle: f64, brake: f64) -> PyResult<()> {
        Ok(self
            .sim
            .set_vehicle_control(VehicleId::from_raw(id), steer, throttle, brake)?)
    }

    fn step(&mut self) {
        self.sim.step();
    }

    fn get_vehicle_track_position(&self, id: u32) -> PyResult<f64> {
        Ok(self.sim.vehicle_track_position(VehicleId::from_raw(id))?)
    }

    fn get_track_length(&self) -> usize {
        self.sim.track_length()
    }

    fn is_vehicle_off_track(&self, id: u32) -> PyResult<bool> {
        Ok(self.sim.is_vehicle_off_track(VehicleId::from_raw(id))?)
    }

    fn is_vehicle_crashed(&self, id: u32) -> PyResult<bool> {
        Ok(self.sim.is_vehicle_crashed(VehicleId::from_raw(id))?)
    }

    fn get_vehicle_velocity(&self, id: u32) -> PyResult<(f64, f64, f64)> {
        let v = self.sim.vehicle_velocity(VehicleId::from_raw(id))?;
        Ok((v.x, v.y, v.z))
    }

    fn get_track_normal(&self, t: f64) -> (f64, f64) {
        let n = self.sim.track_normal(t);
        (n.x, n.y)
    }

    fn get_observation(&self, id: u32) -> PyResult<Vec<f32>> {
        Ok(self.sim.observation(VehicleId::from_raw(id))?)
    }
}
