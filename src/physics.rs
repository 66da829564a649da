//! Rigid bodies and the world that owns them.
//!
//! Bodies only interact with the outside through the forces applied to them;
//! there is no body/body collision. Ground contact is the job of the
//! vehicle suspension model.

use nalgebra::{Isometry3, Matrix4, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};
use tracing::debug;

/// Default gravity, Y up.
pub const GRAVITY: Vector3<f64> = Vector3::new(0.0, -9.81, 0.0);

/// Collision shape of a body. Only used to derive inertia.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Shape {
    /// Axis-aligned box in body space.
    Cuboid {
        /// Half the box size along each local axis.
        half_extents: Vector3<f64>,
    },
}

impl Shape {
    /// Box shape from half extents.
    pub fn cuboid(hx: f64, hy: f64, hz: f64) -> Self {
        Shape::Cuboid {
            half_extents: Vector3::new(hx, hy, hz),
        }
    }

    /// Principal moments of inertia for a body of this shape and `mass`.
    pub fn inertia(&self, mass: f64) -> Vector3<f64> {
        match self {
            Shape::Cuboid { half_extents } => {
                let size = half_extents * 2.0;
                let (x2, y2, z2) = (size.x * size.x, size.y * size.y, size.z * size.z);
                Vector3::new(y2 + z2, x2 + z2, x2 + y2) * (mass / 12.0)
            }
        }
    }
}

/// Stable identifier of a body inside a [`World`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BodyHandle(u32);

impl BodyHandle {
    /// Raw index, mostly for logging.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A single mass with orientation.
#[derive(Clone, Debug)]
pub struct RigidBody {
    shape: Shape,
    mass: f64,
    inertia: Vector3<f64>,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
    pub angular_velocity: Vector3<f64>,
    force: Vector3<f64>,
    torque: Vector3<f64>,
}

impl RigidBody {
    fn new(shape: Shape, mass: f64, position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        let inertia = if mass > 0.0 {
            shape.inertia(mass)
        } else {
            Vector3::zeros()
        };

        RigidBody {
            shape,
            mass,
            inertia,
            position,
            velocity: Vector3::zeros(),
            orientation,
            angular_velocity: Vector3::zeros(),
            force: Vector3::zeros(),
            torque: Vector3::zeros(),
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn inertia(&self) -> Vector3<f64> {
        self.inertia
    }

    /// Whether the body takes part in the dynamics at all.
    pub fn is_dynamic(&self) -> bool {
        self.mass > 0.0
    }

    /// Force accumulated since the last step.
    pub fn accumulated_force(&self) -> Vector3<f64> {
        self.force
    }

    /// Torque accumulated since the last step.
    pub fn accumulated_torque(&self) -> Vector3<f64> {
        self.torque
    }

    pub fn apply_force(&mut self, force: Vector3<f64>) {
        self.force += force;
    }

    /// Applies `force` at the world-space `point`, which also produces a torque
    /// about the body's position.
    pub fn apply_force_at_point(&mut self, force: Vector3<f64>, point: Point3<f64>) {
        self.force += force;
        let r = point.coords - self.position;
        self.torque += r.cross(&force);
    }

    /// Semi-implicit Euler step.
    ///
    /// Torque is divided component-wise by the body-space principal inertia
    /// without rotating it into the body frame first. That is exact only while
    /// the principal axes stay aligned with the world axes, which is close
    /// enough for a chassis that mostly yaws.
    pub fn step(&mut self, dt: f64) {
        if self.is_dynamic() {
            let acceleration = self.force / self.mass;
            self.velocity += acceleration * dt;
            self.position += self.velocity * dt;

            let angular_acceleration = self.torque.component_div(&self.inertia);
            self.angular_velocity += angular_acceleration * dt;

            let w = self.angular_velocity;
            let q = self.orientation.into_inner();
            let spin = Quaternion::new(0.0, w.x, w.y, w.z) * q * (0.5 * dt);
            self.orientation = UnitQuaternion::new_normalize(q + spin);
        }

        self.force = Vector3::zeros();
        self.torque = Vector3::zeros();
    }

    /// Translation followed by rotation, for renderers.
    pub fn model_matrix(&self) -> Matrix4<f64> {
        Isometry3::from_parts(Translation3::from(self.position), self.orientation).to_homogeneous()
    }

    pub fn local_to_world_vector(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.orientation * v
    }

    pub fn local_to_world_point(&self, p: &Vector3<f64>) -> Point3<f64> {
        Point3::from(self.position + self.orientation * p)
    }

    /// World velocity of a point rigidly attached to the body.
    pub fn point_velocity(&self, point: &Point3<f64>) -> Vector3<f64> {
        self.velocity + self.angular_velocity.cross(&(point.coords - self.position))
    }

    /// Inverse effective mass seen by a force along `dir` applied at `point`.
    ///
    /// Uses the same world-frame inertia approximation as [`RigidBody::step`].
    /// Zero for non-dynamic bodies.
    pub fn impulse_denominator(&self, point: &Point3<f64>, dir: &Vector3<f64>) -> f64 {
        if !self.is_dynamic() {
            return 0.0;
        }
        let r = point.coords - self.position;
        let rxn = r.cross(dir);
        1.0 / self.mass + rxn.component_div(&self.inertia).dot(&rxn)
    }
}

/// Owner of every rigid body in a simulation.
#[derive(Clone, Debug)]
pub struct World {
    pub gravity: Vector3<f64>,
    bodies: Vec<(BodyHandle, RigidBody)>,
    next_handle: u32,
}

impl Default for World {
    fn default() -> Self {
        World::new(GRAVITY)
    }
}

impl World {
    pub fn new(gravity: Vector3<f64>) -> Self {
        World {
            gravity,
            bodies: Vec::new(),
            next_handle: 0,
        }
    }

    /// Creates and registers a body. Inertia is derived from `shape` when
    /// `mass` is positive.
    pub fn add_body(
        &mut self,
        shape: Shape,
        mass: f64,
        position: Vector3<f64>,
        orientation: UnitQuaternion<f64>,
    ) -> BodyHandle {
        let handle = BodyHandle(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        self.bodies
            .push((handle, RigidBody::new(shape, mass, position, orientation)));
        debug!(body = handle.index(), mass, "added body");
        handle
    }

    /// Removes and drops a body. Unknown handles are ignored.
    pub fn remove_body(&mut self, handle: BodyHandle) -> bool {
        match self.bodies.iter().position(|(h, _)| *h == handle) {
            Some(index) => {
                self.bodies.remove(index);
                debug!(body = handle.index(), "removed body");
                true
            }
            None => false,
        }
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.iter().find(|(h, _)| *h == handle).map(|(_, b)| b)
    }

    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.bodies
            .iter_mut()
            .find(|(h, _)| *h == handle)
            .map(|(_, b)| b)
    }

    pub fn contains(&self, handle: BodyHandle) -> bool {
        self.body(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Bodies in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> {
        self.bodies.iter().map(|(h, b)| (*h, b))
    }

    /// Applies gravity to every body and integrates it by `dt`.
    pub fn step_simulation(&mut self, dt: f64) {
        let gravity = self.gravity;
        for (_, body) in self.bodies.iter_mut() {
            let weight = gravity * body.mass;
            body.apply_force(weight);
            body.step(dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_box() -> Shape {
        Shape::cuboid(0.5, 0.5, 0.5)
    }

    #[test]
    fn test_box_inertia() {
        let inertia = Shape::cuboid(1.0, 0.5, 2.0).inertia(1200.0);
        // Full extents 2 x 1 x 4.
        assert_relative_eq!(inertia.x, 100.0 * (1.0 + 16.0), epsilon = 1e-9);
        assert_relative_eq!(inertia.y, 100.0 * (4.0 + 16.0), epsilon = 1e-9);
        assert_relative_eq!(inertia.z, 100.0 * (4.0 + 1.0), epsilon = 1e-9);
    }

    #[test]
    fn test_zero_mass_body_is_static() {
        let mut world = World::default();
        let h = world.add_body(unit_box(), 0.0, Vector3::new(0.0, 1.0, 0.0), UnitQuaternion::identity());

        world.body_mut(h).unwrap().apply_force(Vector3::new(5.0, 0.0, 0.0));
        world.step_simulation(0.1);

        let body = world.body(h).unwrap();
        assert_eq!(body.inertia(), Vector3::zeros());
        assert_eq!(body.position, Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(body.accumulated_force(), Vector3::zeros());
        assert_eq!(body.accumulated_torque(), Vector3::zeros());
    }

    #[test]
    fn test_semi_implicit_free_fall() {
        let mut world = World::default();
        let h = world.add_body(unit_box(), 2.0, Vector3::new(0.0, 10.0, 0.0), UnitQuaternion::identity());

        world.step_simulation(0.1);

        let body = world.body(h).unwrap();
        // Velocity is updated before position.
        assert_relative_eq!(body.velocity.y, -0.981, epsilon = 1e-12);
        assert_relative_eq!(body.position.y, 10.0 - 0.0981, epsilon = 1e-12);
        assert_eq!(body.accumulated_force(), Vector3::zeros());
    }

    #[test]
    fn test_force_at_point_produces_torque() {
        let mut world = World::default();
        let h = world.add_body(unit_box(), 1.0, Vector3::zeros(), UnitQuaternion::identity());
        let body = world.body_mut(h).unwrap();

        body.apply_force_at_point(Vector3::new(0.0, 1.0, 0.0), Point3::new(1.0, 0.0, 0.0));

        assert_eq!(body.accumulated_force(), Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(body.accumulated_torque(), Vector3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_orientation_stays_normalized() {
        let mut world = World::new(Vector3::zeros());
        let h = world.add_body(unit_box(), 3.0, Vector3::zeros(), UnitQuaternion::identity());

        for i in 0..2000 {
            let body = world.body_mut(h).unwrap();
            let t = i as f64 * 0.01;
            body.apply_force_at_point(
                Vector3::new(t.sin(), 2.0 * t.cos(), 0.5),
                Point3::new(0.3, -0.2, 0.4),
            );
            world.step_simulation(0.01);

            let q = world.body(h).unwrap().orientation;
            assert_relative_eq!(q.quaternion().norm(), 1.0, epsilon = 1e-9);
        }
        assert!(world.body(h).unwrap().angular_velocity.norm() > 0.0);
    }

    #[test]
    fn test_constant_spin_rotates_about_axis() {
        let mut world = World::new(Vector3::zeros());
        let h = world.add_body(unit_box(), 1.0, Vector3::zeros(), UnitQuaternion::identity());
        world.body_mut(h).unwrap().angular_velocity = Vector3::new(0.0, 1.0, 0.0);

        for _ in 0..100 {
            world.step_simulation(0.001);
        }

        let (axis, angle) = world
            .body(h)
            .unwrap()
            .orientation
            .axis_angle()
            .unwrap();
        assert_relative_eq!(axis.y, 1.0, epsilon = 1e-9);
        assert_relative_eq!(angle, 0.1, epsilon = 1e-4);
    }

    #[test]
    fn test_remove_body_is_idempotent() {
        let mut world = World::default();
        let a = world.add_body(unit_box(), 1.0, Vector3::zeros(), UnitQuaternion::identity());
        let b = world.add_body(unit_box(), 1.0, Vector3::zeros(), UnitQuaternion::identity());

        assert!(world.remove_body(a));
        assert!(!world.remove_body(a));
        assert_eq!(world.len(), 1);
        assert!(world.contains(b));
        assert!(world.body(a).is_none());

        // Handles are not recycled.
        let c = world.add_body(unit_box(), 1.0, Vector3::zeros(), UnitQuaternion::identity());
        assert_ne!(c, a);
    }

    #[test]
    fn test_iter_in_insertion_order() {
        let mut world = World::default();
        let a = world.add_body(unit_box(), 1.0, Vector3::zeros(), UnitQuaternion::identity());
        let b = world.add_body(Shape::cuboid(1.0, 0.5, 2.0), 1200.0, Vector3::zeros(), UnitQuaternion::identity());
        let c = world.add_body(unit_box(), 0.0, Vector3::zeros(), UnitQuaternion::identity());
        world.remove_body(b);

        let order: Vec<_> = world.iter().map(|(h, _)| h).collect();
        assert_eq!(order, vec![a, c]);
        let (_, first) = world.iter().next().unwrap();
        assert_eq!(first.shape(), &unit_box());
    }

    #[test]
    fn test_handle_counter_wraps() {
        let mut world = World::default();
        world.next_handle = u32::MAX;
        let last = world.add_body(unit_box(), 1.0, Vector3::zeros(), UnitQuaternion::identity());
        let first = world.add_body(unit_box(), 1.0, Vector3::zeros(), UnitQuaternion::identity());

        assert_eq!(last.index(), u32::MAX);
        assert_eq!(first.index(), 0);
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn test_model_matrix() {
        let mut world = World::default();
        let rotation = UnitQuaternion::from_euler_angles(0.0, std::f64::consts::FRAC_PI_2, 0.0);
        let h = world.add_body(unit_box(), 1.0, Vector3::new(1.0, 2.0, 3.0), rotation);

        let m = world.body(h).unwrap().model_matrix();
        assert_relative_eq!(m[(0, 3)], 1.0);
        assert_relative_eq!(m[(1, 3)], 2.0);
        assert_relative_eq!(m[(2, 3)], 3.0);
        // +Z rotated a quarter turn about +Y lands on +X.
        let z = m * nalgebra::Vector4::new(0.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(z.x, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_impulse_denominator() {
        let mut world = World::default();
        let h = world.add_body(unit_box(), 2.0, Vector3::zeros(), UnitQuaternion::identity());
        let body = world.body(h).unwrap();

        // Through the center only the linear term remains.
        let center = body.impulse_denominator(&Point3::origin(), &Vector3::x());
        assert_relative_eq!(center, 0.5);

        let offset = body.impulse_denominator(&Point3::new(0.0, 1.0, 0.0), &Vector3::x());
        assert!(offset > center);
    }
}
