//! Guns and bullet ballistics

use crate::math::{Matrix3, Vector3D};

use super::physics::GRAVITY;
use super::terrain::Terrain;

/// Gun parameters mounted on a plane
#[derive(Debug, Clone, Copy)]
pub struct Gun {
    /// Muzzle velocity (m/s)
    pub bullet_speed: f64,
    /// Bullet lifetime (seconds)
    pub bullet_lifetime: f64,
    /// Maximum distance a bullet travels (m)
    pub bullet_range: f64,
    /// Cooldown between shots (seconds)
    pub cooldown: f64,
    /// Distance ahead of the plane's center where bullets spawn
    pub muzzle_offset: f64,
}

impl Default for Gun {
    fn default() -> Self {
        Self {
            bullet_speed: 600.0,
            bullet_lifetime: 5.0,
            bullet_range: 2500.0,
            cooldown: 0.1,
            muzzle_offset: 6.0,
        }
    }
}

impl Gun {
    /// Check if the gun can fire (cooldown check)
    pub fn can_fire(cooldown: f64) -> bool {
        cooldown <= 0.0
    }

    /// Update gun cooldown
    pub fn update_cooldown(cooldown: f64, dt: f64) -> f64 {
        (cooldown - dt).max(0.0)
    }

    /// Spawn a bullet from a muzzle at `location` pointing along `orientation`
    pub fn fire(&self, owner: u32, location: Vector3D, orientation: &Matrix3) -> Bullet {
        let muzzle = location + orientation.column(2) * self.muzzle_offset;
        Bullet::new(
            owner,
            muzzle,
            orientation,
            self.bullet_speed,
            self.bullet_lifetime,
            self.bullet_range,
        )
    }
}

/// Live projectile
#[derive(Debug, Clone)]
pub struct Bullet {
    pub owner: u32,
    pub location: Vector3D,
    pub velocity: Vector3D,
    pub lifetime_remaining: f64,
    pub range_remaining: f64,
}

impl Bullet {
    /// Bullet leaving `location` at `speed` along the orientation's forward
    /// axis
    pub fn new(
        owner: u32,
        location: Vector3D,
        orientation: &Matrix3,
        speed: f64,
        lifetime: f64,
        range: f64,
    ) -> Self {
        Self {
            owner,
            location,
            velocity: orientation.column(2) * speed,
            lifetime_remaining: lifetime,
            range_remaining: range,
        }
    }

    /// Update bullet position, returns false once expired
    pub fn update(&mut self, dt: f64) -> bool {
        self.velocity.y -= GRAVITY * dt;
        let step = self.velocity * dt;
        self.location += step;
        self.lifetime_remaining -= dt;
        self.range_remaining -= step.length();
        self.lifetime_remaining > 0.0 && self.range_remaining > 0.0
    }

    /// Bullet is at or below the ground under it
    pub fn hits_terrain(&self, terrain: &Terrain) -> bool {
        terrain
            .height_at(self.location.x, self.location.z)
            .is_some_and(|ground| self.location.y <= ground)
    }

    /// Bullet is still above the terrain grid
    pub fn in_bounds(&self, terrain: &Terrain) -> bool {
        let (max_x, max_z) = terrain.extent();
        self.location.is_finite()
            && (0.0..=max_x).contains(&self.location.x)
            && (0.0..=max_z).contains(&self.location.z)
            && self.location.y >= 0.0
    }
}
