//! Binary wire protocol
//!
//! Every server message starts with a one byte message type; all multi-byte
//! fields are big-endian.
//!
//! | type | message    | body                                                  |
//! |------|------------|-------------------------------------------------------|
//! | 1    | Connect    | `u32 uid`                                             |
//! | 2    | Disconnect | `u32 uid`                                             |
//! | 3    | Snapshot   | `u32 tick, u16 count, count x 28 byte plane record`   |
//! | 4    | Roster     | `u32 own uid, u16 count, count x u32 uid`             |
//!
//! Counts saturate at `u16::MAX`; entries past that are not written.
//!
//! Clients only ever send raw control payloads, see [`ControlInput`].

use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const MSG_CONNECT: u8 = 1;
pub const MSG_DISCONNECT: u8 = 2;
pub const MSG_SNAPSHOT: u8 = 3;
pub const MSG_ROSTER: u8 = 4;

/// `u8 type | u32 tick | u16 count`
pub const SNAPSHOT_HEADER_LEN: usize = 1 + 4 + 2;
/// `u32 uid | 3 x f32 location | 3 x f32 rotation`
pub const PLANE_RECORD_LEN: usize = 7 * 4;
/// `u8 flags | i8 pitch | i8 roll | i8 yaw | u8 throttle`
pub const CONTROL_PAYLOAD_LEN: usize = 5;

const FLAG_FIRING: u8 = 0x01;

/// Protocol decode errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message truncated: needed {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },
}

/// One plane's state inside a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneSnapshot {
    pub uid: u32,
    pub location: [f32; 3],
    pub rotation: [f32; 3],
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    /// Another player joined the arena
    Connect { uid: u32 },

    /// A player left the arena
    Disconnect { uid: u32 },

    /// World state at a tick
    Snapshot { tick: u32, planes: Vec<PlaneSnapshot> },

    /// One-time catch-up sent to a joining player
    Roster { uid: u32, players: Vec<u32> },
}

impl ServerMsg {
    pub fn message_type(&self) -> u8 {
        match self {
            ServerMsg::Connect { .. } => MSG_CONNECT,
            ServerMsg::Disconnect { .. } => MSG_DISCONNECT,
            ServerMsg::Snapshot { .. } => MSG_SNAPSHOT,
            ServerMsg::Roster { .. } => MSG_ROSTER,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            ServerMsg::Connect { .. } | ServerMsg::Disconnect { .. } => 5,
            ServerMsg::Snapshot { planes, .. } => {
                SNAPSHOT_HEADER_LEN + wire_count(planes.len()) as usize * PLANE_RECORD_LEN
            }
            ServerMsg::Roster { players, .. } => 1 + 4 + 2 + wire_count(players.len()) as usize * 4,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.message_type());

        match self {
            ServerMsg::Connect { uid } | ServerMsg::Disconnect { uid } => {
                buf.put_u32(*uid);
            }
            ServerMsg::Snapshot { tick, planes } => {
                let count = wire_count(planes.len());
                buf.put_u32(*tick);
                buf.put_u16(count);
                for plane in planes.iter().take(count as usize) {
                    buf.put_u32(plane.uid);
                    for v in plane.location.iter().chain(plane.rotation.iter()) {
                        buf.put_f32(*v);
                    }
                }
            }
            ServerMsg::Roster { uid, players } => {
                let count = wire_count(players.len());
                buf.put_u32(*uid);
                buf.put_u16(count);
                for p in players.iter().take(count as usize) {
                    buf.put_u32(*p);
                }
            }
        }

        buf.freeze()
    }
}

/// Entry count as sent on the wire
fn wire_count(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

fn ensure(data: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if data.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            got: data.len(),
        });
    }
    Ok(())
}

/// Control command decoded from a client's raw payload
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlInput {
    pub firing: bool,
    /// -1.0 (pull up) ..= 1.0 (push down)
    pub pitch: f64,
    /// -1.0 (left) ..= 1.0 (right)
    pub roll: f64,
    /// -1.0 (left) ..= 1.0 (right)
    pub yaw: f64,
    /// 0.0 ..= 1.0
    pub throttle: f64,
}

impl ControlInput {
    /// Decode `u8 flags | i8 pitch | i8 roll | i8 yaw | u8 throttle`.
    /// Trailing bytes are ignored.
    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        ensure(data, CONTROL_PAYLOAD_LEN)?;

        let flags = data.get_u8();
        let axis = |v: i8| (v as f64 / 127.0).clamp(-1.0, 1.0);

        Ok(Self {
            firing: flags & FLAG_FIRING != 0,
            pitch: axis(data.get_i8()),
            roll: axis(data.get_i8()),
            yaw: axis(data.get_i8()),
            throttle: data.get_u8() as f64 / 255.0,
        })
    }
}
