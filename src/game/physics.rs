//! Plane flight model and kinematic integration

use tracing::warn;

use crate::math::{Matrix3, Vector3D};
use crate::ws::protocol::{ControlInput, PlaneSnapshot};

use super::combat::Gun;
use super::terrain::Terrain;

/// Gravitational acceleration (m/s^2)
pub const GRAVITY: f64 = 9.81;

/// Static flight parameters shared by every plane of a model
#[derive(Debug, Clone, Copy)]
pub struct PlaneModel {
    /// Mass in kg
    pub mass: f64,
    /// Thrust at full throttle (N)
    pub max_thrust: f64,
    /// Quadratic drag per body axis (right, up, forward)
    pub drag: Vector3D,
    /// Lift per squared forward speed, along the body up axis
    pub lift_coefficient: f64,
    /// Angular rate at full deflection (rad/s) for (pitch, yaw, roll)
    pub control_rates: Vector3D,
    /// How fast the angular velocity follows the controls (1/s)
    pub control_response: f64,
    /// Hard speed cap (m/s)
    pub max_speed: f64,
    /// Spawn height above the local ground (m)
    pub spawn_altitude: f64,
    /// Forward speed at spawn (m/s)
    pub spawn_speed: f64,
}

impl Default for PlaneModel {
    fn default() -> Self {
        Self {
            mass: 1200.0,
            max_thrust: 30_000.0,
            drag: Vector3D::new(3.0, 3.0, 0.3),
            lift_coefficient: 0.52,
            control_rates: Vector3D::new(1.5, 0.6, 2.5),
            control_response: 4.0,
            max_speed: 350.0,
            spawn_altitude: 300.0,
            spawn_speed: 120.0,
        }
    }
}

/// Simulated aircraft (authoritative)
#[derive(Debug, Clone)]
pub struct Plane {
    pub uid: u32,
    pub model: PlaneModel,
    pub gun: Gun,

    // Kinematics
    pub location: Vector3D,
    pub orientation: Matrix3,
    /// Euler angles (pitch, yaw, roll) derived from `orientation`
    pub abs_rot: Vector3D,
    pub velocity: Vector3D,
    /// Body-frame angular velocity (pitch, yaw, roll)
    pub angular_velocity: Vector3D,

    // Controls
    pub controls: ControlInput,
    pub gun_cooldown: f64,
}

impl Plane {
    pub fn new(uid: u32, model: PlaneModel, gun: Gun, location: Vector3D, heading: f64) -> Self {
        let orientation = Matrix3::rotation_y(heading);

        let mut plane = Self {
            uid,
            model,
            gun,
            location,
            orientation,
            abs_rot: orientation.to_euler(),
            velocity: Vector3D::ZERO,
            angular_velocity: Vector3D::ZERO,
            controls: ControlInput::default(),
            gun_cooldown: 0.0,
        };
        plane.velocity = plane.forward() * model.spawn_speed;
        plane
    }

    /// Unit vector the nose points at, in world space
    pub fn forward(&self) -> Vector3D {
        self.orientation.column(2)
    }

    pub fn is_firing(&self) -> bool {
        self.controls.firing
    }

    /// Store new controls. Pulling the trigger resets the gun cooldown so the
    /// next update fires immediately.
    pub fn apply_controls(&mut self, controls: ControlInput) {
        if controls.firing && !self.controls.firing {
            self.gun_cooldown = 0.0;
        }
        self.controls = controls;
    }

    /// Advance the plane by `dt` seconds. Non-positive steps are ignored and a
    /// step that would produce non-finite state is rolled back.
    pub fn update(&mut self, dt: f64, terrain: &Terrain) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }

        let before = self.clone();
        self.integrate(dt, terrain);

        if !self.is_finite() {
            warn!(uid = self.uid, "Plane state diverged, rolling back step");
            *self = before;
        }
    }

    fn integrate(&mut self, dt: f64, terrain: &Terrain) {
        let model = self.model;

        // Orientation
        let target = Vector3D::new(
            self.controls.pitch * model.control_rates.x,
            self.controls.yaw * model.control_rates.y,
            self.controls.roll * model.control_rates.z,
        );
        let blend = (model.control_response * dt).min(1.0);
        self.angular_velocity += (target - self.angular_velocity) * blend;

        let step = Matrix3::from_euler(self.angular_velocity * dt);
        self.orientation = self
            .orientation
            .multiply(&step)
            .orthonormalized()
            .unwrap_or_else(Matrix3::identity);

        // Forces are computed in the body frame
        let to_body = match self.orientation.inverse() {
            Ok(inv) => inv,
            Err(e) => {
                warn!(uid = self.uid, error = %e, "Orientation not invertible, resetting");
                self.orientation = Matrix3::identity();
                Matrix3::identity()
            }
        };
        let local = to_body.mul_vec(self.velocity);

        let drag = Vector3D::new(
            -model.drag.x * local.x * local.x.abs(),
            -model.drag.y * local.y * local.y.abs(),
            -model.drag.z * local.z * local.z.abs(),
        );
        let forward_speed = local.z.max(0.0);
        let lift = Vector3D::new(0.0, model.lift_coefficient * forward_speed * forward_speed, 0.0);
        let thrust = Vector3D::new(0.0, 0.0, self.controls.throttle * model.max_thrust);

        let force = self.orientation.mul_vec(drag + lift + thrust)
            + Vector3D::new(0.0, -GRAVITY * model.mass, 0.0);

        self.velocity += force * (dt / model.mass);
        let speed = self.velocity.length();
        if speed > model.max_speed {
            self.velocity = self.velocity * (model.max_speed / speed);
        }

        self.location += self.velocity * dt;

        // Ground contact
        if let Some(ground) = terrain.height_at(self.location.x, self.location.z) {
            if self.location.y < ground {
                self.location.y = ground;
                if self.velocity.y < 0.0 {
                    self.velocity.y = 0.0;
                }
            }
        }

        self.abs_rot = self.orientation.to_euler();
    }

    pub fn is_finite(&self) -> bool {
        self.location.is_finite()
            && self.velocity.is_finite()
            && self.angular_velocity.is_finite()
            && self.abs_rot.is_finite()
            && self.orientation.is_finite()
    }

    pub fn snapshot(&self) -> PlaneSnapshot {
        PlaneSnapshot {
            uid: self.uid,
            location: [
                self.location.x as f32,
                self.location.y as f32,
                self.location.z as f32,
            ],
            rotation: [
                self.abs_rot.x as f32,
                self.abs_rot.y as f32,
                self.abs_rot.z as f32,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(height: u16) -> Terrain {
        Terrain::from_samples(11, 11, 100.0, vec![height; 121]).unwrap()
    }

    fn plane_at(y: f64) -> Plane {
        Plane::new(
            1,
            PlaneModel::default(),
            Gun::default(),
            Vector3D::new(500.0, y, 500.0),
            0.0,
        )
    }

    #[test]
    fn zero_and_negative_steps_change_nothing() {
        let terrain = flat(0);
        let mut plane = plane_at(400.0);
        plane.apply_controls(ControlInput {
            pitch: 1.0,
            throttle: 1.0,
            ..Default::default()
        });
        let before = plane.clone();

        plane.update(0.0, &terrain);
        plane.update(-0.5, &terrain);
        plane.update(f64::NAN, &terrain);

        assert_eq!(plane.location, before.location);
        assert_eq!(plane.velocity, before.velocity);
        assert_eq!(plane.orientation, before.orientation);
    }

    #[test]
    fn plane_moves_along_its_heading() {
        let terrain = flat(0);
        let mut plane = plane_at(400.0);
        plane.apply_controls(ControlInput {
            throttle: 1.0,
            ..Default::default()
        });

        plane.update(0.1, &terrain);

        assert!(plane.location.z > 500.0);
        assert!((plane.location.x - 500.0).abs() < 1e-6);
    }

    #[test]
    fn pitch_input_raises_the_nose() {
        let terrain = flat(0);
        let mut plane = plane_at(400.0);
        plane.apply_controls(ControlInput {
            pitch: -1.0,
            throttle: 0.5,
            ..Default::default()
        });

        for _ in 0..30 {
            plane.update(1.0 / 60.0, &terrain);
        }

        // Rx with a negative angle tilts +Z toward +Y
        assert!(plane.forward().y > 0.0);
        assert!(plane.abs_rot.x < 0.0);
        assert!((plane.orientation.determinant() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn plane_cannot_sink_below_ground() {
        let terrain = flat(50);
        let mut plane = plane_at(51.0);
        plane.velocity = Vector3D::new(0.0, -200.0, 10.0);

        plane.update(0.25, &terrain);

        assert!(plane.location.y >= 50.0);
        assert!(plane.velocity.y >= 0.0);
    }

    #[test]
    fn trigger_pull_resets_cooldown() {
        let mut plane = plane_at(400.0);
        plane.gun_cooldown = 0.5;

        plane.apply_controls(ControlInput {
            firing: true,
            ..Default::default()
        });
        assert!(plane.is_firing());
        assert_eq!(plane.gun_cooldown, 0.0);

        plane.gun_cooldown = 0.5;
        plane.apply_controls(ControlInput {
            firing: true,
            ..Default::default()
        });
        assert_eq!(plane.gun_cooldown, 0.5);
    }

    #[test]
    fn diverging_step_is_rolled_back() {
        let terrain = flat(0);
        let mut plane = Plane::new(
            1,
            PlaneModel {
                mass: 0.0,
                ..PlaneModel::default()
            },
            Gun::default(),
            Vector3D::new(500.0, 400.0, 500.0),
            0.0,
        );
        plane.apply_controls(ControlInput {
            pitch: 1.0,
            throttle: 1.0,
            ..Default::default()
        });
        let before = plane.clone();

        plane.update(0.1, &terrain);

        assert!(plane.is_finite());
        assert_eq!(plane.location, before.location);
        assert_eq!(plane.velocity, before.velocity);
        assert_eq!(plane.orientation, before.orientation);
        assert_eq!(plane.abs_rot, before.abs_rot);
        assert_eq!(plane.angular_velocity, before.angular_velocity);
    }

    #[test]
    fn speed_is_capped() {
        let terrain = flat(0);
        let mut plane = plane_at(1000.0);
        plane.velocity = Vector3D::new(0.0, 0.0, 5000.0);

        plane.update(0.01, &terrain);

        assert!(plane.velocity.length() <= plane.model.max_speed + 1e-9);
    }
}
