//! Immutable heightmap terrain and ground triangle lookup
//!
//! The grid is loaded once at startup and shared read-only (`Arc<Terrain>`)
//! by every reader, so queries never take a lock.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use bytes::Buf;

use crate::math::Vector3D;

/// `u16 width | u16 depth | 2 reserved bytes | f32 cell distance`
pub const HEADER_LEN: usize = 10;

/// Terrain loading errors
#[derive(Debug, thiserror::Error)]
pub enum TerrainError {
    #[error("Failed to read terrain: {0}")]
    Io(#[from] io::Error),

    #[error("Terrain data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Invalid terrain header: {0}")]
    InvalidHeader(String),
}

#[derive(Debug, Clone)]
pub struct Terrain {
    width: usize,
    depth: usize,
    distance: f64,
    points: Vec<u16>,
}

impl Terrain {
    /// Build a terrain from already decoded samples (row-major, `width * depth`)
    pub fn from_samples(
        width: usize,
        depth: usize,
        distance: f64,
        points: Vec<u16>,
    ) -> Result<Self, TerrainError> {
        check_header(width, depth, distance)?;
        if points.len() != width * depth {
            return Err(TerrainError::InvalidHeader(format!(
                "expected {} samples, got {}",
                width * depth,
                points.len()
            )));
        }

        Ok(Self {
            width,
            depth,
            distance,
            points,
        })
    }

    /// Decode a terrain from its binary form (little-endian header and samples)
    pub fn load<R: Read>(mut src: R) -> Result<Self, TerrainError> {
        let mut header = [0u8; HEADER_LEN];
        read_full(&mut src, &mut header)?;

        let mut buf = &header[..];
        let width = buf.get_u16_le() as usize;
        let depth = buf.get_u16_le() as usize;
        buf.advance(2);
        let distance = buf.get_f32_le() as f64;

        check_header(width, depth, distance)?;

        // The header is untrusted, so grow with the data actually read
        let expected = width * depth * 2;
        let mut raw = Vec::new();
        src.take(expected as u64).read_to_end(&mut raw)?;
        if raw.len() < expected {
            return Err(TerrainError::Truncated {
                expected,
                actual: raw.len(),
            });
        }

        let mut buf = &raw[..];
        let mut points = Vec::with_capacity(width * depth);
        while buf.has_remaining() {
            points.push(buf.get_u16_le());
        }

        Self::from_samples(width, depth, distance, points)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, TerrainError> {
        let file = File::open(path)?;
        Self::load(BufReader::new(file))
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    /// Largest X and Z covered by the grid
    pub fn extent(&self) -> (f64, f64) {
        (
            (self.width - 1) as f64 * self.distance,
            (self.depth - 1) as f64 * self.distance,
        )
    }

    pub fn sample(&self, col: usize, row: usize) -> Option<u16> {
        if col >= self.width || row >= self.depth {
            return None;
        }
        self.points.get(row * self.width + col).copied()
    }

    /// Grid cell `(col, row)` containing the horizontal position, if any
    fn cell(&self, x: f64, z: f64) -> Option<(usize, usize)> {
        let fx = x / self.distance;
        let fz = z / self.distance;
        if !(fx >= 0.0 && fz >= 0.0) {
            return None;
        }

        let col = fx.floor() as usize;
        let row = fz.floor() as usize;
        if col >= self.width - 1 || row >= self.depth - 1 {
            return None;
        }
        Some((col, row))
    }

    /// The ground triangle under `pos` (only X and Z are used).
    ///
    /// The cell is split along its (col, row) -> (col+1, row+1) diagonal;
    /// `None` when the position is outside the grid.
    pub fn overred_triangle(&self, pos: Vector3D) -> Option<[Vector3D; 3]> {
        let (col, row) = self.cell(pos.x, pos.z)?;
        let d = self.distance;
        let vertex = |c: usize, r: usize| {
            self.sample(c, r)
                .map(|h| Vector3D::new(c as f64 * d, h as f64, r as f64 * d))
        };

        let up_left = vertex(col, row)?;
        let down_right = vertex(col + 1, row + 1)?;

        if pos.x.rem_euclid(d) > pos.z.rem_euclid(d) {
            Some([up_left, down_right, vertex(col + 1, row)?])
        } else {
            Some([up_left, vertex(col, row + 1)?, down_right])
        }
    }

    /// Ground height under `(x, z)` interpolated across the overred triangle
    pub fn height_at(&self, x: f64, z: f64) -> Option<f64> {
        let [a, b, c] = self.overred_triangle(Vector3D::new(x, 0.0, z))?;

        let denom = (b.z - c.z) * (a.x - c.x) + (c.x - b.x) * (a.z - c.z);
        if denom.abs() < f64::EPSILON {
            return Some(a.y);
        }
        let wa = ((b.z - c.z) * (x - c.x) + (c.x - b.x) * (z - c.z)) / denom;
        let wb = ((c.z - a.z) * (x - c.x) + (a.x - c.x) * (z - c.z)) / denom;
        let wc = 1.0 - wa - wb;

        Some(wa * a.y + wb * b.y + wc * c.y)
    }
}

fn check_header(width: usize, depth: usize, distance: f64) -> Result<(), TerrainError> {
    if width < 2 || depth < 2 {
        return Err(TerrainError::InvalidHeader(format!(
            "grid must be at least 2x2, got {width}x{depth}"
        )));
    }
    if !distance.is_finite() || distance <= 0.0 {
        return Err(TerrainError::InvalidHeader(format!(
            "cell distance must be positive, got {distance}"
        )));
    }
    Ok(())
}

/// Fill `buf` completely, reporting how far a short source got
fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<(), TerrainError> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(TerrainError::Truncated {
                    expected: buf.len(),
                    actual: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TerrainError::Io(e)),
        }
    }
    Ok(())
}
