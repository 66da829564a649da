//! The simulation context a host drives.
//!
//! A [`Simulation`] owns one world, at most one track and any number of
//! vehicles. Nothing is shared between contexts, so a training process can
//! run as many side by side as it likes.

use std::path::Path;

use libm::atan2;
use nalgebra::{UnitQuaternion, Vector2, Vector3};
use tracing::{debug, info, warn};

use crate::config::SimulationConfig;
use crate::error::{SimError, SimResult};
use crate::physics::{RigidBody, World};
use crate::track::Track;
use crate::vehicle::{Vehicle, LOCAL_FORWARD, LOCAL_UP};

/// Chassis axis the lateral observation terms are measured along.
const OBSERVATION_LATERAL: Vector3<f64> = Vector3::new(1.0, 0.0, 0.0);

/// Identifies a vehicle inside one [`Simulation`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VehicleId(u32);

impl VehicleId {
    pub fn from_raw(raw: u32) -> Self {
        VehicleId(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

pub struct Simulation {
    config: SimulationConfig,
    world: World,
    track: Option<Track>,
    vehicles: Vec<(VehicleId, Vehicle)>,
    next_vehicle: u32,
}

impl Default for Simulation {
    fn default() -> Self {
        Simulation::new(SimulationConfig::default())
    }
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let world = World::new(config.gravity());
        Simulation {
            config,
            world,
            track: None,
            vehicles: Vec::new(),
            next_vehicle: 0,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    /// Replaces the track.
    ///
    /// Vehicles belong to the track they were spawned on, so all of them are
    /// removed first. A track without segments leaves the simulation with no
    /// track at all.
    pub fn set_track(&mut self, track: Track) -> SimResult<()> {
        self.clear_vehicles();

        if track.is_empty() {
            let points = track.points().len();
            warn!(points, "refusing track without segments");
            self.track = None;
            return Err(SimError::EmptyTrack { points });
        }

        info!(
            segments = track.num_segments(),
            width = track.width(),
            "loaded track"
        );
        self.track = Some(track);
        Ok(())
    }

    /// Replaces the track with the Bezier chain through `points`.
    pub fn load_track(&mut self, points: &[[f64; 2]]) -> SimResult<()> {
        self.set_track(Track::from_pairs(points, self.config.track_width))
    }

    /// Replaces the track with one read from a JSON track file.
    pub fn load_track_file(&mut self, path: impl AsRef<Path>) -> SimResult<()> {
        let track = Track::load(path, self.config.track_width)?;
        self.set_track(track)
    }

    /// Segment count of the loaded track, 0 without one.
    pub fn track_length(&self) -> usize {
        self.track.as_ref().map_or(0, Track::num_segments)
    }

    /// Spawns a vehicle resting on the centerline at `spawn_t`, facing along
    /// the track.
    pub fn add_vehicle(&mut self, spawn_t: f64) -> SimResult<VehicleId> {
        let Some(track) = self.track.as_ref() else {
            warn!("cannot add vehicle: no track loaded");
            return Err(SimError::NoTrack);
        };

        let t = track.wrap(spawn_t);
        let start = track.position(t);
        let tangent = track.tangent(t);
        let yaw = atan2(tangent.x, tangent.y);

        let params = self.config.vehicle.clone();
        let height = params.rest_height(self.world.gravity.norm());
        let vehicle = Vehicle::new(
            &mut self.world,
            params,
            Vector3::new(start.x, height, start.y),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw),
        );

        let id = VehicleId(self.next_vehicle);
        self.next_vehicle = self.next_vehicle.wrapping_add(1);
        self.vehicles.push((id, vehicle));
        debug!(vehicle = id.raw(), t, yaw, "added vehicle");
        Ok(id)
    }

    /// Removes a vehicle and its chassis. Unknown ids are ignored.
    pub fn remove_vehicle(&mut self, id: VehicleId) -> bool {
        match self.vehicles.iter().position(|(v, _)| *v == id) {
            Some(index) => {
                let (_, vehicle) = self.vehicles.remove(index);
                vehicle.release(&mut self.world);
                debug!(vehicle = id.raw(), "removed vehicle");
                true
            }
            None => false,
        }
    }

    fn clear_vehicles(&mut self) {
        for (_, vehicle) in self.vehicles.drain(..) {
            vehicle.release(&mut self.world);
        }
    }

    pub fn vehicle_ids(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.iter().map(|(id, _)| *id)
    }

    pub fn vehicle(&self, id: VehicleId) -> SimResult<&Vehicle> {
        self.vehicles
            .iter()
            .find(|(v, _)| *v == id)
            .map(|(_, vehicle)| vehicle)
            .ok_or(SimError::UnknownVehicle(id.raw()))
    }

    fn vehicle_mut(&mut self, id: VehicleId) -> SimResult<&mut Vehicle> {
        self.vehicles
            .iter_mut()
            .find(|(v, _)| *v == id)
            .map(|(_, vehicle)| vehicle)
            .ok_or(SimError::UnknownVehicle(id.raw()))
    }

    /// The vehicle's chassis body.
    pub fn chassis(&self, id: VehicleId) -> SimResult<&RigidBody> {
        let handle = self.vehicle(id)?.chassis();
        self.world
            .body(handle)
            .ok_or(SimError::UnknownVehicle(id.raw()))
    }

    pub fn set_vehicle_control(
        &mut self,
        id: VehicleId,
        steer: f64,
        throttle: f64,
        brake: f64,
    ) -> SimResult<()> {
        self.vehicle_mut(id)?.set_controls(steer, throttle, brake);
        Ok(())
    }

    /// Advances `substeps` fixed physics steps.
    pub fn step(&mut self) {
        let dt = self.config.dt;
        for _ in 0..self.config.substeps {
            self.world.step_simulation(dt);
            for (_, vehicle) in self.vehicles.iter_mut() {
                vehicle.step(&mut self.world, dt);
            }
        }
    }

    /// Curve parameter nearest to the chassis, 0 without a track.
    pub fn vehicle_track_position(&self, id: VehicleId) -> SimResult<f64> {
        let body = self.chassis(id)?;
        Ok(self
            .track
            .as_ref()
            .map_or(0.0, |track| track.closest_t(&ground_point(body))))
    }

    pub fn is_vehicle_off_track(&self, id: VehicleId) -> SimResult<bool> {
        let vehicle = self.vehicle(id)?;
        Ok(self
            .track
            .as_ref()
            .is_some_and(|track| vehicle.is_off_track(track)))
    }

    /// Whether the chassis flipped, left the ground band or strayed too far
    /// from the track.
    pub fn is_vehicle_crashed(&self, id: VehicleId) -> SimResult<bool> {
        let body = self.chassis(id)?;
        let limits = &self.config.crash;

        let height = body.position.y;
        if height < limits.min_height || height > limits.max_height {
            return Ok(true);
        }

        let up = body.local_to_world_vector(&LOCAL_UP);
        if up.y < limits.min_up_y {
            return Ok(true);
        }

        if let Some(track) = &self.track {
            if track.distance_to_centerline(&ground_point(body)) > limits.max_track_distance {
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub fn vehicle_velocity(&self, id: VehicleId) -> SimResult<Vector3<f64>> {
        Ok(self.chassis(id)?.velocity)
    }

    /// Track normal at `t`, zero without a track.
    pub fn track_normal(&self, t: f64) -> Vector2<f64> {
        self.track
            .as_ref()
            .map_or_else(Vector2::zeros, |track| track.normal(t))
    }

    /// Observation vector for `id`.
    ///
    /// Each waypoint ahead of the vehicle contributes its offset along the
    /// chassis `+X` and forward axes, followed by the longitudinal and
    /// lateral (`+X`) velocity and the yaw rate, all in the chassis frame.
    pub fn observation(&self, id: VehicleId) -> SimResult<Vec<f32>> {
        let body = self.chassis(id)?;
        let track = self.track.as_ref().ok_or(SimError::NoTrack)?;

        let current_t = track.closest_t(&ground_point(body));
        let waypoints = track.waypoints(
            current_t,
            self.config.waypoint_count,
            self.config.waypoint_spacing,
        );

        let forward = body.local_to_world_vector(&LOCAL_FORWARD).normalize();
        let lateral = body.local_to_world_vector(&OBSERVATION_LATERAL).normalize();
        let up = body.local_to_world_vector(&LOCAL_UP).normalize();

        let mut out = Vec::with_capacity(self.config.observation_len());
        for waypoint in &waypoints {
            let rel = waypoint.coords - body.position;
            out.push(rel.dot(&lateral) as f32);
            out.push(rel.dot(&forward) as f32);
        }
        out.push(body.velocity.dot(&forward) as f32);
        out.push(body.velocity.dot(&lateral) as f32);
        out.push(body.angular_velocity.dot(&up) as f32);
        Ok(out)
    }
}

/// Projection of the body position onto the track plane.
fn ground_point(body: &RigidBody) -> Vector2<f64> {
    Vector2::new(body.position.x, body.position.z)
}
