//! Simulation tunables, loadable from JSON.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! {
//!   "dt": 0.01,
//!   "substeps": 10,
//!   "track_width": 12.0,
//!   "vehicle": { "max_power": 120000.0 },
//!   "crash": { "max_track_distance": 50.0 }
//! }
//! ```

use std::fs;
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};
use crate::physics::GRAVITY;
use crate::track::DEFAULT_TRACK_WIDTH;
use crate::vehicle::VehicleParams;

/// Thresholds past which a vehicle counts as crashed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashLimits {
    /// Smallest allowed world-Y of the chassis up vector; below it the
    /// vehicle is on its roof.
    pub min_up_y: f64,
    /// Chassis height above which the vehicle is airborne.
    pub max_height: f64,
    /// Chassis height below which the vehicle fell through the ground.
    pub min_height: f64,
    /// Largest allowed distance from the centerline.
    pub max_track_distance: f64,
}

impl Default for CrashLimits {
    fn default() -> Self {
        CrashLimits {
            min_up_y: -0.1,
            max_height: 20.0,
            min_height: -2.0,
            max_track_distance: 100.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Physics timestep in seconds.
    pub dt: f64,
    /// Physics steps per [`Simulation::step`](crate::Simulation::step).
    pub substeps: usize,
    pub gravity: [f64; 3],
    pub track_width: f64,
    /// Waypoint pairs in an observation.
    pub waypoint_count: usize,
    /// Curve parameter distance between waypoint pairs.
    pub waypoint_spacing: f64,
    pub vehicle: VehicleParams,
    pub crash: CrashLimits,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            dt: 0.01,
            substeps: 10,
            gravity: [GRAVITY.x, GRAVITY.y, GRAVITY.z],
            track_width: DEFAULT_TRACK_WIDTH,
            waypoint_count: 20,
            waypoint_spacing: 0.1,
            vehicle: VehicleParams::default(),
            crash: CrashLimits::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        SimulationConfig::from_json_str(&json)
    }

    pub fn gravity(&self) -> Vector3<f64> {
        Vector3::from(self.gravity)
    }

    /// Floats in one observation: two per waypoint, two waypoints per pair,
    /// plus three velocity terms.
    pub fn observation_len(&self) -> usize {
        self.waypoint_count * 4 + 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.dt, 0.01);
        assert_eq!(config.substeps, 10);
        assert_eq!(config.observation_len(), 83);
        assert_eq!(config.gravity(), Vector3::new(0.0, -9.81, 0.0));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SimulationConfig::from_json_str(
            r#"{ "track_width": 8.0, "vehicle": { "mass": 900.0 }, "crash": { "max_height": 5.0 } }"#,
        )
        .unwrap();

        assert_eq!(config.track_width, 8.0);
        assert_eq!(config.vehicle.mass, 900.0);
        assert_eq!(config.vehicle.wheel_radius, 0.35);
        assert_eq!(config.crash.max_height, 5.0);
        assert_eq!(config.crash.min_height, -2.0);
        assert_eq!(config.waypoint_count, 20);
    }

    #[test]
    fn test_bad_config() {
        assert!(matches!(
            SimulationConfig::from_json_str(r#"{ "dt": "fast" }"#),
            Err(SimError::Json(_))
        ));
        assert!(matches!(
            SimulationConfig::load("/no/such/config.json"),
            Err(SimError::Io { .. })
        ));
    }
}
