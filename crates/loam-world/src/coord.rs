use serde::{Deserialize, Serialize};

/// Offsets of the six face-adjacent chunks, paired with `face_neighbors`.
pub const FACE_OFFSETS: [(i32, i32, i32); 6] = [
    (1, 0, 0),
    (-1, 0, 0),
    (0, 1, 0),
    (0, -1, 0),
    (0, 0, 1),
    (0, 0, -1),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkCoord {
    #[inline]
    pub const fn new(cx: i32, cy: i32, cz: i32) -> Self {
        Self { cx, cy, cz }
    }

    #[inline]
    pub fn with_y(self, cy: i32) -> Self {
        Self { cy, ..self }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            cx: self.cx + dx,
            cy: self.cy + dy,
            cz: self.cz + dz,
        }
    }

    #[inline]
    pub fn distance_sq(self, other: ChunkCoord) -> i64 {
        let dx = i64::from(self.cx - other.cx);
        let dy = i64::from(self.cy - other.cy);
        let dz = i64::from(self.cz - other.cz);
        dx * dx + dy * dy + dz * dz
    }

    /// Interleaved z-order key over the low 21 bits of each axis.
    /// Injective for coords within +/- 2^20 chunks of the origin, which is
    /// the only range the scheduler's tie-break ever sees in practice.
    pub fn morton_key(self) -> u64 {
        let bias = 1i64 << 20;
        let x = ((i64::from(self.cx) + bias) as u64) & 0x1f_ffff;
        let y = ((i64::from(self.cy) + bias) as u64) & 0x1f_ffff;
        let z = ((i64::from(self.cz) + bias) as u64) & 0x1f_ffff;
        spread3(x) | (spread3(y) << 1) | (spread3(z) << 2)
    }

    /// The six face-adjacent chunk positions, in `FACE_OFFSETS` order.
    pub fn face_neighbors(self) -> [ChunkCoord; 6] {
        let mut out = [self; 6];
        for (i, (dx, dy, dz)) in FACE_OFFSETS.iter().enumerate() {
            out[i] = self.offset(*dx, *dy, *dz);
        }
        out
    }

    /// All 26 surrounding chunk positions (faces, edges, and corners).
    pub fn moore_neighbors(self) -> [ChunkCoord; 26] {
        let mut out = [self; 26];
        let mut i = 0;
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    out[i] = self.offset(dx, dy, dz);
                    i += 1;
                }
            }
        }
        out
    }
}

impl From<(i32, i32, i32)> for ChunkCoord {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

impl From<ChunkCoord> for (i32, i32, i32) {
    fn from(value: ChunkCoord) -> Self {
        (value.cx, value.cy, value.cz)
    }
}

#[inline]
const fn spread3(v: u64) -> u64 {
    let mut x = v & 0x1f_ffff;
    x = (x | (x << 32)) & 0x001f_0000_0000_ffff;
    x = (x | (x << 16)) & 0x001f_0000_ff00_00ff;
    x = (x | (x << 8)) & 0x100f_00f0_0f00_f00f;
    x = (x | (x << 4)) & 0x10c3_0c30_c30c_30c3;
    x = (x | (x << 2)) & 0x1249_2492_4924_9249;
    x
}
