//! Snapshot building and encoding

use bytes::Bytes;

use crate::ws::protocol::{PlaneSnapshot, ServerMsg};

use super::physics::Plane;

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    /// Physics steps since last snapshot
    ticks_since_snapshot: u32,
    /// Snapshot interval in physics steps
    snapshot_interval: u32,
    stats: SnapshotStats,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            ticks_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
            stats: SnapshotStats::default(),
        }
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.ticks_since_snapshot += 1;
        if self.ticks_since_snapshot >= self.snapshot_interval {
            self.ticks_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Encode a snapshot of `planes` (ordered by uid) for `tick`
    pub fn build<'a>(&mut self, tick: u32, planes: impl IntoIterator<Item = &'a Plane>) -> Bytes {
        let mut records: Vec<PlaneSnapshot> = planes.into_iter().map(Plane::snapshot).collect();
        records.sort_unstable_by_key(|p| p.uid);

        let player_count = records.len();
        let bytes = ServerMsg::Snapshot {
            tick,
            planes: records,
        }
        .encode();

        self.stats.record(player_count, bytes.len());
        bytes
    }

    pub fn stats(&self) -> SnapshotStats {
        self.stats
    }
}

/// Snapshot size stats, reported through `/health`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SnapshotStats {
    pub total_snapshots: u64,
    pub total_bytes: u64,
    pub avg_players_per_snapshot: f32,
}

impl SnapshotStats {
    pub fn record(&mut self, player_count: usize, bytes: usize) {
        self.total_snapshots += 1;
        self.total_bytes += bytes as u64;

        // Running average
        let n = self.total_snapshots as f32;
        self.avg_players_per_snapshot =
            self.avg_players_per_snapshot * ((n - 1.0) / n) + (player_count as f32 / n);
    }
}
