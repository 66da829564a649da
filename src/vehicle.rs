//! Four-wheeled vehicle on a ray-cast suspension.
//!
//! The chassis is a single [`RigidBody`] owned by the [`World`]; the vehicle
//! only keeps its handle. Every step each wheel casts a ray along the chassis
//! down axis against the ground plane, and the spring, damper and tire forces
//! of the wheels that touch the ground are applied to the chassis at the
//! contact points. Wheels themselves are not bodies: their spin is a scalar
//! integrated from drive, brake and tire reaction torques.
//!
//! Chassis frame: forward is `+Z`, up is `+Y`, right is `-X`.

use std::f64::consts::TAU;

use nalgebra::{Point3, UnitQuaternion, Vector2, Vector3};
use rapier3d_f64::parry::query::{Ray, RayCast};
use rapier3d_f64::parry::shape::HalfSpace;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::physics::{BodyHandle, RigidBody, Shape, World};
use crate::track::Track;

pub const LOCAL_FORWARD: Vector3<f64> = Vector3::new(0.0, 0.0, 1.0);
pub const LOCAL_UP: Vector3<f64> = Vector3::new(0.0, 1.0, 0.0);
pub const LOCAL_RIGHT: Vector3<f64> = Vector3::new(-1.0, 0.0, 0.0);

pub const FRONT_LEFT: usize = 0;
pub const FRONT_RIGHT: usize = 1;
pub const REAR_LEFT: usize = 2;
pub const REAR_RIGHT: usize = 3;

const AXLES: [(usize, usize); 2] = [(FRONT_LEFT, FRONT_RIGHT), (REAR_LEFT, REAR_RIGHT)];

/// Lower bound on the forward speed used to normalize slip.
const MIN_SLIP_SPEED: f64 = 0.1;

/// Coefficients of the Pacejka magic formula.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PacejkaCoefficients {
    /// Stiffness factor.
    pub b: f64,
    /// Shape factor.
    pub c: f64,
    /// Peak factor, as a multiple of the normal load.
    pub d: f64,
    /// Curvature factor.
    pub e: f64,
}

impl PacejkaCoefficients {
    pub const LONGITUDINAL: Self = PacejkaCoefficients {
        b: 10.0,
        c: 1.9,
        d: 1.0,
        e: 0.97,
    };

    pub const LATERAL: Self = PacejkaCoefficients {
        b: 8.0,
        c: 1.3,
        d: 1.0,
        e: -1.6,
    };

    /// Tire force for `slip` under a normal load of `load` newtons.
    pub fn force(&self, slip: f64, load: f64) -> f64 {
        let bx = self.b * slip;
        let shaped = self.c * (bx - self.e * (bx - bx.atan())).atan();
        load * self.d * shaped.sin()
    }
}

/// Tunables of a vehicle. All units SI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    /// Chassis box half size (width, height, length).
    pub half_extents: [f64; 3],
    pub mass: f64,
    pub wheel_radius: f64,
    /// Suspension travel on top of the wheel radius.
    pub suspension_travel: f64,
    /// Spring rate, N/m.
    pub suspension_stiffness: f64,
    /// Damper rate, N·s/m.
    pub suspension_damping: f64,
    /// Left/right compression coupling per axle, N/m.
    pub anti_roll_stiffness: f64,
    /// Wheel spin inertia, kg·m².
    pub wheel_inertia: f64,
    /// Front wheel angle at full steer, radians.
    pub max_steer_angle: f64,
    /// Engine power at full throttle, W.
    pub max_power: f64,
    /// Engine torque cap, N·m, split over the rear wheels.
    pub max_engine_torque: f64,
    /// Brake torque per wheel at full brake, N·m.
    pub max_brake_torque: f64,
    /// Quadratic drag factor, N/(m/s)².
    pub drag_coefficient: f64,
    pub pacejka_longitudinal: PacejkaCoefficients,
    pub pacejka_lateral: PacejkaCoefficients,
}

impl Default for VehicleParams {
    fn default() -> Self {
        VehicleParams {
            half_extents: [1.0, 0.5, 2.0],
            mass: 1200.0,
            wheel_radius: 0.35,
            suspension_travel: 0.5,
            suspension_stiffness: 70_000.0,
            suspension_damping: 4_500.0,
            anti_roll_stiffness: 20_000.0,
            wheel_inertia: 1.5,
            max_steer_angle: 30f64.to_radians(),
            max_power: 150_000.0,
            max_engine_torque: 1_600.0,
            max_brake_torque: 1_500.0,
            drag_coefficient: 0.43,
            pacejka_longitudinal: PacejkaCoefficients::LONGITUDINAL,
            pacejka_lateral: PacejkaCoefficients::LATERAL,
        }
    }
}

impl VehicleParams {
    pub fn shape(&self) -> Shape {
        let [hx, hy, hz] = self.half_extents;
        Shape::cuboid(hx, hy, hz)
    }

    /// Suspension ray length from the mount point.
    pub fn rest_length(&self) -> f64 {
        self.suspension_travel + self.wheel_radius
    }

    /// Mount points in chassis space, in wheel order.
    pub fn wheel_offsets(&self) -> [Vector3<f64>; 4] {
        let [hx, hy, hz] = self.half_extents;
        let y = self.wheel_radius - hy;
        [
            Vector3::new(hx, y, hz),
            Vector3::new(-hx, y, hz),
            Vector3::new(hx, y, -hz),
            Vector3::new(-hx, y, -hz),
        ]
    }

    /// Compression at which four springs carry the chassis weight.
    pub fn static_compression(&self, gravity: f64) -> f64 {
        if self.suspension_stiffness <= 0.0 {
            return 0.0;
        }
        (self.mass * gravity / (4.0 * self.suspension_stiffness)).clamp(0.0, self.rest_length())
    }

    /// Chassis height above flat ground when resting on its springs.
    pub fn rest_height(&self, gravity: f64) -> f64 {
        self.rest_length() - self.static_compression(gravity) - (self.wheel_radius - self.half_extents[1])
    }
}

/// Per-wheel suspension and spin state.
#[derive(Clone, Debug)]
pub struct Wheel {
    /// Mount point in chassis space.
    pub local_position: Vector3<f64>,
    pub rest_length: f64,
    pub stiffness: f64,
    pub damping: f64,
    pub radius: f64,
    pub inertia: f64,
    /// In `[0, rest_length]`.
    pub compression: f64,
    /// Spin, rad/s.
    pub angular_velocity: f64,
    pub steer_angle: f64,
    pub drive_torque: f64,
    pub brake_torque: f64,
    pub anti_roll_force: f64,
    /// Spring and damper force of the last step, N.
    pub suspension_force: f64,
    pub longitudinal_force: f64,
    pub lateral_force: f64,
    /// Cosmetic, for renderers.
    pub roll_angle: f64,
    /// `None` until the wheel first touches the ground.
    pub last_contact_point: Option<Point3<f64>>,
    pub has_contact: bool,
}

impl Wheel {
    fn new(params: &VehicleParams, local_position: Vector3<f64>, compression: f64) -> Self {
        Wheel {
            local_position,
            rest_length: params.rest_length(),
            stiffness: params.suspension_stiffness,
            damping: params.suspension_damping,
            radius: params.wheel_radius,
            inertia: params.wheel_inertia,
            compression,
            angular_velocity: 0.0,
            steer_angle: 0.0,
            drive_torque: 0.0,
            brake_torque: 0.0,
            anti_roll_force: 0.0,
            suspension_force: 0.0,
            longitudinal_force: 0.0,
            lateral_force: 0.0,
            roll_angle: 0.0,
            last_contact_point: None,
            has_contact: false,
        }
    }

    fn lose_contact(&mut self) {
        self.has_contact = false;
        self.compression = 0.0;
        self.suspension_force = 0.0;
        self.longitudinal_force = 0.0;
        self.lateral_force = 0.0;
    }

    /// Integrates spin from drive and tire torques, then lets the brake bleed
    /// spin off without reversing it.
    fn update_spin(&mut self, dt: f64) {
        if self.inertia > 0.0 {
            let net = self.drive_torque - self.longitudinal_force * self.radius;
            self.angular_velocity += net / self.inertia * dt;

            let brake = self.brake_torque / self.inertia * dt;
            if self.angular_velocity.abs() <= brake {
                self.angular_velocity = 0.0;
            } else {
                self.angular_velocity -= brake * self.angular_velocity.signum();
            }
        }
        self.roll_angle = (self.roll_angle + self.angular_velocity * dt) % TAU;
    }
}

struct Contact {
    point: Point3<f64>,
    load: f64,
}

/// A car: one chassis body plus four wheels.
#[derive(Clone, Debug)]
pub struct Vehicle {
    chassis: BodyHandle,
    params: VehicleParams,
    wheels: [Wheel; 4],
    steer: f64,
    throttle: f64,
    brake: f64,
}

impl Vehicle {
    /// Adds the chassis to `world` and builds the wheels.
    ///
    /// Wheels start at the static compression so a vehicle placed at
    /// [`VehicleParams::rest_height`] starts at rest.
    pub fn new(
        world: &mut World,
        params: VehicleParams,
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
    ) -> Self {
        let chassis = world.add_body(params.shape(), params.mass, position, orientation);
        let compression = params.static_compression(world.gravity.norm());
        let wheels = params
            .wheel_offsets()
            .map(|offset| Wheel::new(&params, offset, compression));
        debug!(chassis = chassis.index(), "spawned vehicle");

        Vehicle {
            chassis,
            params,
            wheels,
            steer: 0.0,
            throttle: 0.0,
            brake: 0.0,
        }
    }

    /// Removes the chassis from `world`.
    pub fn release(self, world: &mut World) {
        world.remove_body(self.chassis);
        debug!(chassis = self.chassis.index(), "released vehicle");
    }

    pub fn chassis(&self) -> BodyHandle {
        self.chassis
    }

    pub fn params(&self) -> &VehicleParams {
        &self.params
    }

    pub fn wheels(&self) -> &[Wheel; 4] {
        &self.wheels
    }

    pub fn wheels_mut(&mut self) -> &mut [Wheel; 4] {
        &mut self.wheels
    }

    pub fn steer(&self) -> f64 {
        self.steer
    }

    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    pub fn brake(&self) -> f64 {
        self.brake
    }

    /// -1 (full right) to 1 (full left).
    pub fn set_steer_amount(&mut self, steer: f64) {
        self.steer = steer.clamp(-1.0, 1.0);
    }

    /// 0 to 1.
    pub fn set_throttle(&mut self, throttle: f64) {
        self.throttle = throttle.clamp(0.0, 1.0);
    }

    /// 0 to 1.
    pub fn set_brake(&mut self, brake: f64) {
        self.brake = brake.clamp(0.0, 1.0);
    }

    pub fn set_controls(&mut self, steer: f64, throttle: f64, brake: f64) {
        self.set_steer_amount(steer);
        self.set_throttle(throttle);
        self.set_brake(brake);
    }

    /// Advances the vehicle by `dt`, accumulating suspension, tire and drag
    /// forces on the chassis. The world integrates them on its next step.
    ///
    /// Does nothing if the chassis is no longer in `world`.
    pub fn step(&mut self, world: &mut World, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let Some(body) = world.body_mut(self.chassis) else {
            return;
        };
        let params = &self.params;

        // Steering and drivetrain.
        let front_steer = self.steer * params.max_steer_angle;
        let engine_speed =
            (self.wheels[REAR_LEFT].angular_velocity + self.wheels[REAR_RIGHT].angular_velocity) / 2.0;
        let engine_torque =
            (params.max_power * self.throttle / engine_speed.max(1.0)).min(params.max_engine_torque);
        let brake_torque = self.brake * params.max_brake_torque;

        for (index, wheel) in self.wheels.iter_mut().enumerate() {
            let front = index == FRONT_LEFT || index == FRONT_RIGHT;
            wheel.steer_angle = if front { front_steer } else { 0.0 };
            wheel.drive_torque = if front { 0.0 } else { engine_torque / 2.0 };
            wheel.brake_torque = brake_torque;
        }

        for (left, right) in AXLES {
            let bias = (self.wheels[left].compression - self.wheels[right].compression)
                * params.anti_roll_stiffness;
            self.wheels[left].anti_roll_force = bias;
            self.wheels[right].anti_roll_force = -bias;
        }

        let chassis: &RigidBody = body;
        let contacts = self
            .wheels
            .each_mut()
            .map(|wheel| suspension(chassis, wheel, dt));
        let in_contact = contacts.iter().flatten().count();

        for (wheel, contact) in self.wheels.iter_mut().zip(contacts) {
            if let Some(contact) = contact {
                apply_tire_force(body, params, wheel, &contact, in_contact, dt);
            }
            wheel.update_spin(dt);
        }

        let speed = body.velocity.norm();
        let drag = -body.velocity * (speed * params.drag_coefficient);
        body.apply_force(drag);
    }

    /// Whether the vehicle has left the track.
    ///
    /// Only wheels that have touched the ground at least once are considered,
    /// at their last contact point. The vehicle is on track while any of them
    /// is within half the track width of the centerline. A vehicle none of
    /// whose wheels has touched down yet counts as on track.
    pub fn is_off_track(&self, track: &Track) -> bool {
        let half_width = track.half_width();
        let mut any_contact = false;
        for point in self.wheels.iter().filter_map(|w| w.last_contact_point) {
            any_contact = true;
            if track.distance_to_centerline(&Vector2::new(point.x, point.z)) <= half_width {
                return false;
            }
        }
        any_contact
    }
}

/// Casts the wheel's suspension ray against the ground and updates its
/// compression. Returns the contact if the ray hits within rest length.
fn suspension(body: &RigidBody, wheel: &mut Wheel, dt: f64) -> Option<Contact> {
    let mount = body.local_to_world_point(&wheel.local_position);
    let axis = body.local_to_world_vector(&-LOCAL_UP);
    let ground = HalfSpace::new(Vector3::y_axis());

    let Some(distance) = ground.cast_local_ray(&Ray::new(mount, axis), wheel.rest_length, true) else {
        wheel.lose_contact();
        return None;
    };

    let compression = (wheel.rest_length - distance).clamp(0.0, wheel.rest_length);
    let compression_velocity = (compression - wheel.compression) / dt;
    let load = (wheel.stiffness * compression
        + wheel.damping * compression_velocity
        + wheel.anti_roll_force)
        .max(0.0);
    let point = mount + axis * distance;

    wheel.compression = compression;
    wheel.suspension_force = load;
    wheel.last_contact_point = Some(point);
    wheel.has_contact = true;

    Some(Contact { point, load })
}

/// Largest force that does not reverse `slip_speed` within one step, for an
/// inverse effective mass of `inv_mass`.
fn slip_limit(slip_speed: f64, inv_mass: f64, dt: f64) -> f64 {
    if inv_mass <= 0.0 {
        return f64::INFINITY;
    }
    slip_speed.abs() / (inv_mass * dt)
}

fn apply_tire_force(
    body: &mut RigidBody,
    params: &VehicleParams,
    wheel: &mut Wheel,
    contact: &Contact,
    in_contact: usize,
    dt: f64,
) {
    let steer = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), wheel.steer_angle);
    let rotation = body.orientation * steer;
    let forward = rotation * LOCAL_FORWARD;
    let side = rotation * LOCAL_RIGHT;

    let velocity = body.point_velocity(&contact.point);
    let forward_speed = velocity.dot(&forward);
    let side_speed = velocity.dot(&side);
    let reference_speed = forward_speed.abs().max(MIN_SLIP_SPEED);

    let rim_speed = wheel.angular_velocity * wheel.radius;
    let slip_ratio = (rim_speed - forward_speed) / reference_speed;
    let slip_angle = (-side_speed / reference_speed).atan();

    let mut longitudinal = params.pacejka_longitudinal.force(slip_ratio, contact.load);
    let mut lateral = params.pacejka_lateral.force(slip_angle, contact.load);

    // Below MIN_SLIP_SPEED the slip denominator is pinned and the forces
    // overshoot the slip they act on, so a braked car never comes to rest.
    // There, cap each component at what would zero its slip velocity, with
    // the chassis mass shared between the wheels on the ground.
    if forward_speed.abs() < MIN_SLIP_SPEED {
        let share = in_contact.max(1) as f64;
        let wheel_inv_mass = if wheel.inertia > 0.0 {
            wheel.radius * wheel.radius / wheel.inertia
        } else {
            0.0
        };
        let long_inv_mass =
            share * body.impulse_denominator(&contact.point, &forward) + wheel_inv_mass;
        let long_limit = slip_limit(rim_speed - forward_speed, long_inv_mass, dt);
        longitudinal = longitudinal.max(-long_limit).min(long_limit);

        let lat_inv_mass = share * body.impulse_denominator(&contact.point, &side);
        let lat_limit = slip_limit(side_speed, lat_inv_mass, dt);
        lateral = lateral.max(-lat_limit).min(lat_limit);
    }

    wheel.longitudinal_force = longitudinal;
    wheel.lateral_force = lateral;

    let force = Vector3::y() * contact.load + forward * longitudinal + side * lateral;
    body.apply_force_at_point(force, contact.point);
}
