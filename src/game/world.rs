//! Authoritative world state: planes, bullets and the terrain they fly over

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::math::Vector3D;
use crate::ws::protocol::{ControlInput, ProtocolError};

use super::combat::{Bullet, Gun};
use super::physics::{Plane, PlaneModel};
use super::snapshot::{SnapshotBuilder, SnapshotStats};
use super::terrain::Terrain;
use super::PlayerInput;

/// Steps longer than this are clamped (seconds)
pub const MAX_DELTA: f64 = 0.25;

pub struct World {
    terrain: Arc<Terrain>,
    planes: HashMap<u32, Plane>,
    bullets: Vec<Bullet>,
    rng: ChaCha8Rng,
    snapshot_builder: SnapshotBuilder,
}

impl World {
    pub fn new(terrain: Arc<Terrain>, seed: u64, snapshot_interval: u32) -> Self {
        Self {
            terrain,
            planes: HashMap::new(),
            bullets: Vec::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            snapshot_builder: SnapshotBuilder::new(snapshot_interval),
        }
    }

    pub fn bullets(&self) -> &[Bullet] {
        &self.bullets
    }

    /// Generate a spawn point above the middle half of the map
    fn spawn_position(&mut self, model: &PlaneModel) -> (Vector3D, f64) {
        let (max_x, max_z) = self.terrain.extent();
        let x = self.rng.gen_range(0.25..0.75) * max_x;
        let z = self.rng.gen_range(0.25..0.75) * max_z;
        let ground = self.terrain.height_at(x, z).unwrap_or(0.0);
        let heading = self.rng.gen_range(0.0..std::f64::consts::TAU);
        (Vector3D::new(x, ground + model.spawn_altitude, z), heading)
    }

    /// Insert a fresh plane for `uid`. An existing plane with the same uid is
    /// replaced (reconnect).
    pub fn add_plane(&mut self, uid: u32, model: PlaneModel, gun: Gun) -> &Plane {
        let (location, heading) = self.spawn_position(&model);
        let plane = Plane::new(uid, model, gun, location, heading);

        if self.planes.insert(uid, plane).is_some() {
            debug!(uid, "Replaced existing plane");
        }
        &self.planes[&uid]
    }

    /// Remove a plane and every bullet it still has in flight
    pub fn remove_plane(&mut self, uid: u32) -> Option<Plane> {
        self.bullets.retain(|b| b.owner != uid);
        self.planes.remove(&uid)
    }

    pub fn add_bullet(&mut self, bullet: Bullet) {
        self.bullets.push(bullet);
    }

    /// Decode a control payload and store it on the addressed plane
    pub fn apply_input(&mut self, input: &PlayerInput) -> Result<(), ProtocolError> {
        let controls = ControlInput::decode(&input.data)?;

        match self.planes.get_mut(&input.uid) {
            Some(plane) => plane.apply_controls(controls),
            None => debug!(uid = input.uid, "Input for unknown plane"),
        }
        Ok(())
    }

    /// Advance every plane and bullet by `delta_t` seconds
    pub fn update_world(&mut self, delta_t: f64) {
        if !(delta_t.is_finite() && delta_t > 0.0) {
            return;
        }
        let dt = if delta_t > MAX_DELTA {
            debug!(delta_t, "Clamping long world step");
            MAX_DELTA
        } else {
            delta_t
        };

        let terrain = &self.terrain;

        for plane in self.planes.values_mut() {
            plane.update(dt, terrain);
        }

        self.bullets
            .retain_mut(|b| b.update(dt) && b.in_bounds(terrain) && !b.hits_terrain(terrain));

        // Fire after moving existing bullets so new ones start at the muzzle
        let mut fired = Vec::new();
        for plane in self.planes.values_mut() {
            plane.gun_cooldown = Gun::update_cooldown(plane.gun_cooldown, dt);
            if plane.is_firing() && Gun::can_fire(plane.gun_cooldown) {
                fired.push(plane.gun.fire(plane.uid, plane.location, &plane.orientation));
                plane.gun_cooldown = plane.gun.cooldown;
            }
        }
        for bullet in fired {
            self.add_bullet(bullet);
        }
    }

    /// Whether the snapshot cadence calls for a snapshot after this step
    pub fn snapshot_due(&mut self) -> bool {
        self.snapshot_builder.should_send()
    }

    /// Encode every plane's state for `tick`
    pub fn generate_snapshots(&mut self, tick: u32) -> Bytes {
        self.snapshot_builder.build(tick, self.planes.values())
    }

    pub fn snapshot_stats(&self) -> SnapshotStats {
        self.snapshot_builder.stats()
    }
}

#[cfg(test)]
impl World {
    pub(crate) fn plane(&self, uid: u32) -> Option<&Plane> {
        self.planes.get(&uid)
    }

    pub(crate) fn plane_count(&self) -> usize {
        self.planes.len()
    }
}
