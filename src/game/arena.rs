//! Arena session and authoritative tick loop
//!
//! The arena task is the only writer of world state. Transport tasks talk to
//! it through an [`ArenaHandle`]; the only state they share with it is the
//! pending-input table and tick counter behind one mutex.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{oneshot, Notify};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::util::time::{tick_interval, Timer, DEFAULT_TICK_RATE};
use crate::ws::protocol::ServerMsg;

use super::combat::Gun;
use super::physics::PlaneModel;
use super::snapshot::SnapshotStats;
use super::terrain::Terrain;
use super::world::World;
use super::PlayerInput;

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("Arena task is not running")]
    Closed,

    #[error("Player {0} was not admitted")]
    Rejected(u32),
}

/// Most players a roster or snapshot can list (`u16` count on the wire)
pub const MAX_PLAYERS: usize = u16::MAX as usize;

/// Connect request paired with the admission result
type ConnectRequest = (Player, oneshot::Sender<bool>);

/// A connected player as seen by the arena
#[derive(Debug)]
pub struct Player {
    pub uid: u32,
    outbound: mpsc::Sender<Bytes>,
}

impl Player {
    /// Create a player and the receiving end of its bounded outbound queue
    pub fn new(uid: u32, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (Self { uid, outbound }, rx)
    }

    fn send(&self, payload: Bytes) -> Result<(), TrySendError<Bytes>> {
        self.outbound.try_send(payload)
    }
}

#[derive(Debug, Default)]
struct InputTable {
    /// Snapshots produced so far
    tick: u32,
    /// Latest unapplied payload per connected uid, `None` if nothing new arrived
    pending: HashMap<u32, Option<Bytes>>,
    /// Bullets in flight after the last step
    bullets: usize,
    snapshots: SnapshotStats,
}

/// Arena tuning
#[derive(Debug, Clone)]
pub struct ArenaSettings {
    pub tick_interval: Duration,
    /// Physics steps per snapshot
    pub snapshot_every: u32,
    pub input_queue_capacity: usize,
    pub world_seed: u64,
    pub plane_model: PlaneModel,
    pub gun: Gun,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            tick_interval: tick_interval(DEFAULT_TICK_RATE),
            snapshot_every: 1,
            input_queue_capacity: 1024,
            world_seed: 0,
            plane_model: PlaneModel::default(),
            gun: Gun::default(),
        }
    }
}

impl ArenaSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: tick_interval(config.tick_rate),
            snapshot_every: config.snapshot_every,
            input_queue_capacity: config.input_queue_capacity,
            world_seed: config.world_seed,
            ..Self::default()
        }
    }
}

/// Point-in-time view of the arena for `/health`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaStats {
    pub players: usize,
    pub tick: u32,
    pub bullets: usize,
    pub snapshots_sent: u64,
    pub snapshot_bytes: u64,
    pub avg_players_per_snapshot: f32,
}

struct ArenaInbox {
    connect_rx: mpsc::Receiver<ConnectRequest>,
    disconnect_rx: mpsc::Receiver<u32>,
    input_rx: mpsc::Receiver<PlayerInput>,
}

/// Cloneable handle used by transport tasks
#[derive(Clone)]
pub struct ArenaHandle {
    connect_tx: mpsc::Sender<ConnectRequest>,
    disconnect_tx: mpsc::Sender<u32>,
    input_tx: mpsc::Sender<PlayerInput>,
    table: Arc<Mutex<InputTable>>,
    shutdown: Arc<Notify>,
}

impl ArenaHandle {
    /// Join the arena. Resolves once the arena has admitted or rejected the
    /// player, so any later disconnect or input is handled after admission.
    pub async fn connect(&self, player: Player) -> Result<(), ArenaError> {
        let uid = player.uid;
        let (ack_tx, ack_rx) = oneshot::channel();

        self.connect_tx
            .send((player, ack_tx))
            .await
            .map_err(|_| ArenaError::Closed)?;

        match ack_rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ArenaError::Rejected(uid)),
            Err(_) => Err(ArenaError::Closed),
        }
    }

    pub async fn disconnect(&self, uid: u32) -> Result<(), ArenaError> {
        self.disconnect_tx
            .send(uid)
            .await
            .map_err(|_| ArenaError::Closed)
    }

    pub async fn send_input(&self, input: PlayerInput) -> Result<(), ArenaError> {
        self.input_tx
            .send(input)
            .await
            .map_err(|_| ArenaError::Closed)
    }

    pub fn stats(&self) -> ArenaStats {
        let table = self.table.lock();
        ArenaStats {
            players: table.pending.len(),
            tick: table.tick,
            bullets: table.bullets,
            snapshots_sent: table.snapshots.total_snapshots,
            snapshot_bytes: table.snapshots.total_bytes,
            avg_players_per_snapshot: table.snapshots.avg_players_per_snapshot,
        }
    }

    /// Ask the arena task to stop after its current event
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// The authoritative arena (owned by the arena task)
pub struct Arena {
    world: World,
    players: HashMap<u32, Player>,
    table: Arc<Mutex<InputTable>>,
    inbox: Option<ArenaInbox>,
    shutdown: Arc<Notify>,
    tick_interval: Duration,
    plane_model: PlaneModel,
    gun: Gun,
}

impl Arena {
    pub fn new(terrain: Arc<Terrain>, settings: ArenaSettings) -> (Self, ArenaHandle) {
        let capacity = settings.input_queue_capacity.max(1);
        let (connect_tx, connect_rx) = mpsc::channel(capacity);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(capacity);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let table = Arc::new(Mutex::new(InputTable::default()));
        let shutdown = Arc::new(Notify::new());

        let handle = ArenaHandle {
            connect_tx,
            disconnect_tx,
            input_tx,
            table: table.clone(),
            shutdown: shutdown.clone(),
        };

        let arena = Self {
            world: World::new(terrain, settings.world_seed, settings.snapshot_every),
            players: HashMap::new(),
            table,
            inbox: Some(ArenaInbox {
                connect_rx,
                disconnect_rx,
                input_rx,
            }),
            shutdown,
            tick_interval: settings.tick_interval,
            plane_model: settings.plane_model,
            gun: settings.gun,
        };

        (arena, handle)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Run the tick loop until shutdown is requested
    pub async fn run(mut self) {
        let Some(mut inbox) = self.inbox.take() else {
            warn!("Arena inbox already taken, not starting");
            return;
        };
        let shutdown = self.shutdown.clone();

        info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Arena started"
        );

        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    info!(players = self.player_count(), "Arena shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    let delta_t = now.duration_since(last_tick).as_secs_f64();
                    last_tick = now;

                    let timer = Timer::new();
                    self.tick(delta_t);
                    if timer.elapsed() > self.tick_interval {
                        warn!(elapsed_us = timer.elapsed_micros(), "Tick overran its interval");
                    }
                }
                Some((player, ack)) = inbox.connect_rx.recv() => {
                    let admitted = self.connect_player(player);
                    let _ = ack.send(admitted);
                }
                Some(uid) = inbox.disconnect_rx.recv() => {
                    self.disconnect_player(uid);
                }
                Some(input) = inbox.input_rx.recv() => {
                    self.record_input(input);
                }
            }
        }
    }

    /// Admit a player: roster catch-up, plane spawn, table entry, then notify
    /// everyone else. Returns false if the player was rejected.
    pub fn connect_player(&mut self, player: Player) -> bool {
        let uid = player.uid;

        if self.player_count() >= MAX_PLAYERS && !self.players.contains_key(&uid) {
            warn!(uid, "Arena full, rejecting player");
            return false;
        }

        let mut others: Vec<u32> = self.players.keys().copied().filter(|&p| p != uid).collect();
        others.sort_unstable();
        let roster = ServerMsg::Roster {
            uid,
            players: others,
        }
        .encode();

        if let Err(e) = player.send(roster) {
            warn!(uid, error = %e, "Roster delivery failed, rejecting player");
            return false;
        }

        self.world.add_plane(uid, self.plane_model, self.gun);
        self.table.lock().pending.insert(uid, None);
        if self.players.insert(uid, player).is_some() {
            debug!(uid, "Replaced existing connection");
        }

        info!(uid, players = self.player_count(), "Player connected");

        let failed = self.broadcast(&ServerMsg::Connect { uid }.encode(), Some(uid));
        self.evict(failed);
        true
    }

    /// Remove a player and tell the rest. Returns false if `uid` was not
    /// connected.
    pub fn disconnect_player(&mut self, uid: u32) -> bool {
        let Some(player) = self.players.remove(&uid) else {
            debug!(uid, "Disconnect for unknown player");
            return false;
        };

        self.table.lock().pending.remove(&uid);
        self.world.remove_plane(uid);
        // Closes the outbound queue so the player's send task ends
        drop(player);

        info!(uid, players = self.player_count(), "Player disconnected");

        let failed = self.broadcast(&ServerMsg::Disconnect { uid }.encode(), None);
        self.evict(failed);
        true
    }

    /// Store a raw control payload, replacing any not yet applied
    pub fn record_input(&self, input: PlayerInput) {
        let mut table = self.table.lock();
        match table.pending.get_mut(&input.uid) {
            Some(slot) => *slot = Some(input.data),
            None => debug!(uid = input.uid, "Input from unknown player dropped"),
        }
    }

    /// One scheduler firing: apply pending inputs, step the world and
    /// broadcast a snapshot if one is due
    pub fn tick(&mut self, delta_t: f64) {
        let snapshot = {
            let mut table = self.table.lock();

            for (&uid, slot) in table.pending.iter_mut() {
                let Some(data) = slot.take() else { continue };
                if let Err(e) = self.world.apply_input(&PlayerInput { uid, data }) {
                    warn!(uid, error = %e, "Malformed input dropped");
                }
            }

            self.world.update_world(delta_t);
            table.bullets = self.world.bullets().len();

            if self.world.snapshot_due() {
                table.tick = table.tick.wrapping_add(1);
                let snapshot = self.world.generate_snapshots(table.tick);
                table.snapshots = self.world.snapshot_stats();
                Some(snapshot)
            } else {
                None
            }
        };

        if let Some(snapshot) = snapshot {
            let failed = self.broadcast(&snapshot, None);
            self.evict(failed);
        }
    }

    /// Queue `payload` for every player except `except`. Returns the uids
    /// whose queue was full or closed.
    fn broadcast(&self, payload: &Bytes, except: Option<u32>) -> Vec<u32> {
        let mut failed = Vec::new();

        for player in self.players.values() {
            if Some(player.uid) == except {
                continue;
            }
            if let Err(e) = player.send(payload.clone()) {
                warn!(uid = player.uid, error = %e, "Outbound queue unavailable, evicting player");
                failed.push(player.uid);
            }
        }

        failed
    }

    fn evict(&mut self, uids: Vec<u32>) {
        for uid in uids {
            self.disconnect_player(uid);
        }
    }
}

#[cfg(test)]
impl Arena {
    pub(crate) fn world(&self) -> &World {
        &self.world
    }

    pub(crate) fn pending_input_count(&self) -> usize {
        self.table.lock().pending.len()
    }

    pub(crate) fn current_tick(&self) -> u32 {
        self.table.lock().tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{MSG_CONNECT, MSG_DISCONNECT, MSG_ROSTER, MSG_SNAPSHOT};
    use tokio_test::{assert_err, assert_ok};

    fn arena() -> Arena {
        arena_with(ArenaSettings::default()).0
    }

    fn arena_with(settings: ArenaSettings) -> (Arena, ArenaHandle) {
        let terrain = Terrain::from_samples(21, 21, 100.0, vec![0; 441]).unwrap();
        Arena::new(Arc::new(terrain), settings)
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn connect_then_disconnect_tracks_counts() {
        let mut arena = arena();
        let (player, mut rx) = Player::new(7, 8);

        arena.connect_player(player);
        assert_eq!(arena.player_count(), 1);
        assert_eq!(arena.pending_input_count(), 1);
        assert_eq!(arena.world().plane_count(), 1);
        assert_eq!(&drain(&mut rx)[0][..], &[0x04, 0, 0, 0, 7, 0, 0]);

        assert!(arena.disconnect_player(7));
        assert_eq!(arena.player_count(), 0);
        assert_eq!(arena.pending_input_count(), 0);
        assert_eq!(arena.world().plane_count(), 0);
        assert!(!arena.disconnect_player(7));
    }

    #[test]
    fn joining_player_gets_roster_and_others_get_connect() {
        let mut arena = arena();
        let (a, mut a_rx) = Player::new(1, 8);
        let (b, mut b_rx) = Player::new(2, 8);

        arena.connect_player(a);
        drain(&mut a_rx);
        arena.connect_player(b);

        let a_msgs = drain(&mut a_rx);
        assert_eq!(a_msgs.len(), 1);
        assert_eq!(&a_msgs[0][..], &[0x01, 0, 0, 0, 2]);

        let b_msgs = drain(&mut b_rx);
        assert_eq!(b_msgs.len(), 1);
        assert_eq!(&b_msgs[0][..], &[0x04, 0, 0, 0, 2, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn disconnect_is_the_only_message_broadcast() {
        let mut arena = arena();
        let (a, _a_rx) = Player::new(1, 8);
        let (b, mut b_rx) = Player::new(2, 8);
        arena.connect_player(a);
        arena.connect_player(b);
        drain(&mut b_rx);

        arena.disconnect_player(1);

        let msgs = drain(&mut b_rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(&msgs[0][..], &[0x02, 0, 0, 0, 1]);
    }

    #[test]
    fn tick_broadcasts_snapshot_to_everyone() {
        let mut arena = arena();
        let mut receivers = Vec::new();
        for uid in [3, 1, 2] {
            let (player, rx) = Player::new(uid, 8);
            arena.connect_player(player);
            receivers.push(rx);
        }
        for rx in &mut receivers {
            drain(rx);
        }

        arena.tick(1.0 / 60.0);
        assert_eq!(arena.current_tick(), 1);

        for rx in &mut receivers {
            let msgs = drain(rx);
            assert_eq!(msgs.len(), 1);
            let snapshot = &msgs[0];
            assert_eq!(snapshot.len(), 7 + 28 * 3);
            assert_eq!(snapshot[0], 0x03);
            assert_eq!(&snapshot[1..5], &[0, 0, 0, 1]);
            assert_eq!(&snapshot[5..7], &[0, 3]);
        }
    }

    #[test]
    fn snapshot_every_spaces_out_snapshots() {
        let (mut arena, handle) = arena_with(ArenaSettings {
            snapshot_every: 2,
            ..ArenaSettings::default()
        });
        let (player, mut rx) = Player::new(1, 8);
        arena.connect_player(player);
        drain(&mut rx);

        arena.tick(1.0 / 60.0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(handle.stats().tick, 0);

        arena.tick(1.0 / 60.0);
        let msgs = drain(&mut rx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(&msgs[0][1..5], &[0, 0, 0, 1]);

        let stats = handle.stats();
        assert_eq!(stats.players, 1);
        assert_eq!(stats.tick, 1);
        assert_eq!(stats.snapshots_sent, 1);
        assert_eq!(stats.snapshot_bytes, (7 + 28) as u64);
        assert_eq!(stats.avg_players_per_snapshot, 1.0);
    }

    #[test]
    fn stats_count_bullets_in_flight() {
        let (mut arena, handle) = arena_with(ArenaSettings::default());
        let (player, _rx) = Player::new(1, 64);
        arena.connect_player(player);

        arena.record_input(PlayerInput {
            uid: 1,
            data: Bytes::from_static(&[0x01, 0, 0, 0, 255]),
        });
        arena.tick(1.0 / 60.0);

        assert_eq!(handle.stats().bullets, 1);
        assert_eq!(arena.world().bullets().len(), 1);
    }

    #[test]
    fn full_outbound_queue_evicts_player() {
        let mut arena = arena();
        // The roster alone fills a one slot queue
        let (slow, _slow_rx) = Player::new(1, 1);
        let (b, mut b_rx) = Player::new(2, 8);

        arena.connect_player(slow);
        arena.connect_player(b);

        assert_eq!(arena.player_count(), 1);
        assert_eq!(arena.pending_input_count(), 1);

        let msgs = drain(&mut b_rx);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0][0], 0x04);
        assert_eq!(&msgs[1][..], &[0x02, 0, 0, 0, 1]);
    }

    #[test]
    fn closed_outbound_queue_evicts_on_tick() {
        let mut arena = arena();
        let (gone, gone_rx) = Player::new(1, 8);
        arena.connect_player(gone);
        drop(gone_rx);

        arena.tick(1.0 / 60.0);
        assert_eq!(arena.player_count(), 0);
        assert_eq!(arena.pending_input_count(), 0);
    }

    #[test]
    fn latest_input_wins() {
        let mut arena = arena();
        let (player, _rx) = Player::new(1, 64);
        arena.connect_player(player);

        arena.record_input(PlayerInput {
            uid: 1,
            data: Bytes::from_static(&[0x01, 0, 0, 0, 255]),
        });
        arena.record_input(PlayerInput {
            uid: 1,
            data: Bytes::from_static(&[0x00, 0, 0, 0, 128]),
        });
        assert_eq!(arena.pending_input_count(), 1);

        arena.tick(1.0 / 60.0);

        let plane = arena.world().plane(1).unwrap();
        assert!(!plane.is_firing());
        assert!(arena.world().bullets().is_empty());
    }

    #[test]
    fn unknown_and_malformed_input_do_not_disturb_tick() {
        let mut arena = arena();
        let (player, mut rx) = Player::new(1, 8);
        arena.connect_player(player);
        drain(&mut rx);

        arena.record_input(PlayerInput {
            uid: 99,
            data: Bytes::from_static(&[0x01, 0, 0, 0, 0]),
        });
        assert_eq!(arena.pending_input_count(), 1);

        arena.record_input(PlayerInput {
            uid: 1,
            data: Bytes::from_static(&[0x01]),
        });
        arena.tick(1.0 / 60.0);

        assert!(!arena.world().plane(1).unwrap().is_firing());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn handle_drives_running_arena() {
        let (arena, handle) = arena_with(ArenaSettings {
            tick_interval: Duration::from_millis(5),
            ..ArenaSettings::default()
        });
        let task = tokio::spawn(arena.run());

        let (player, mut rx) = Player::new(1, 64);
        assert_ok!(handle.connect(player).await);

        let roster = rx.recv().await.unwrap();
        assert_eq!(roster[0], 0x04);

        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot[0], 0x03);
        assert_eq!(snapshot.len(), 7 + 28);
        assert_eq!(handle.stats().players, 1);

        assert_ok!(
            handle
                .send_input(PlayerInput {
                    uid: 1,
                    data: Bytes::from_static(&[0x00, 0, 0, 0, 200]),
                })
                .await
        );
        assert_ok!(handle.disconnect(1).await);

        handle.shutdown();
        assert_ok!(tokio::time::timeout(Duration::from_secs(2), task).await);
    }

    #[tokio::test]
    async fn disconnect_is_never_handled_before_its_connect() {
        let (arena, handle) = arena_with(ArenaSettings {
            tick_interval: Duration::from_millis(5),
            ..ArenaSettings::default()
        });
        let task = tokio::spawn(arena.run());

        let (watcher, mut watcher_rx) = Player::new(1, 4096);
        assert_ok!(handle.connect(watcher).await);

        let mut receivers = Vec::new();
        for uid in 2..22 {
            let (player, rx) = Player::new(uid, 4096);
            assert_ok!(handle.connect(player).await);
            // Input right after admission must land on a known uid
            assert_ok!(
                handle
                    .send_input(PlayerInput {
                        uid,
                        data: Bytes::from_static(&[0x00, 0, 0, 0, 10]),
                    })
                    .await
            );
            assert_ok!(handle.disconnect(uid).await);
            receivers.push(rx);
        }

        // Disconnect for 21 is queued; wait until the arena has drained it
        tokio::time::timeout(Duration::from_secs(2), async {
            while handle.stats().players != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown();
        assert_ok!(tokio::time::timeout(Duration::from_secs(2), task).await);

        let mut events = Vec::new();
        while let Ok(msg) = watcher_rx.try_recv() {
            match msg[0] {
                MSG_SNAPSHOT => {}
                kind => events.push((kind, u32::from_be_bytes([msg[1], msg[2], msg[3], msg[4]]))),
            }
        }
        assert_eq!(events.remove(0).0, MSG_ROSTER);
        assert_eq!(events.len(), 2 * 20);
        for uid in 2..22 {
            let position = |kind| events.iter().position(|&e| e == (kind, uid));
            let connected = position(MSG_CONNECT).unwrap();
            let disconnected = position(MSG_DISCONNECT).unwrap();
            assert!(connected < disconnected, "uid {uid} left before it joined");
        }
    }

    #[tokio::test]
    async fn connect_fails_once_arena_is_gone() {
        let (arena, handle) = arena_with(ArenaSettings::default());
        drop(arena);

        let (player, _rx) = Player::new(1, 8);
        assert_err!(handle.connect(player).await);
    }
}
