//! In-chunk light propagation and neighbor border planes.
//!
//! Sunlight and point light live in separate channels on the same 0..=15
//! scale. A chunk is first lit purely from its own cells (`light_internal`),
//! then widened once with the frozen border planes of its neighbors
//! (`merge_boundary_light`). Border planes always hold the internal-light
//! epoch, so the two sides of any seam observe each other symmetrically no
//! matter which chunk merges first.
#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use loam_blocks::BlockRegistry;
use loam_chunk::{BlockStore, Chunk};
use loam_world::{ChunkCoord, FACE_OFFSETS};
use thiserror::Error;

/// Highest level either light channel can carry.
pub const MAX_LIGHT: u8 = 15;

/// How many BFS pops go between cancellation checks.
const CANCEL_STRIDE: usize = 4096;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LightingError {
    #[error("light propagation cancelled")]
    Cancelled,
    #[error("border planes missing for neighbor {0:?}")]
    MissingNeighbor(ChunkCoord),
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LightStats {
    pub sun_seeds: usize,
    pub emitter_seeds: usize,
    pub steps: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MergeStats {
    pub seeds: usize,
    pub steps: usize,
}

/// Flood-fill light from the chunk's own sky columns and emitters. Reads
/// blocks, writes the chunk's two light fields, touches nothing outside the
/// chunk. Deterministic for a given block volume.
pub fn light_internal(
    chunk: &mut Chunk,
    reg: &BlockRegistry,
    max_light: u8,
    cancel: &AtomicBool,
) -> Result<LightStats, LightingError> {
    if cancel.load(Ordering::Relaxed) {
        return Err(LightingError::Cancelled);
    }
    let (sx, sy, sz) = (chunk.sx, chunk.sy, chunk.sz);
    let mut stats = LightStats::default();

    // First sky-stopping cell per column, scanning down from the top face.
    // -1 when the whole column is open within this chunk.
    let mut tops = vec![-1i32; sx * sz];
    for z in 0..sz {
        for x in 0..sx {
            for y in (0..sy).rev() {
                if reg.stops_sky_column(chunk.get_local(x, y, z)) {
                    tops[z * sx + x] = y as i32;
                    break;
                }
            }
        }
    }

    // Columns open to the sky carry full light down to their first stopper.
    let mut q_sun: VecDeque<(usize, usize, usize, u8)> = VecDeque::new();
    for z in 0..sz {
        for x in 0..sx {
            let col = z * sx + x;
            if !chunk.sky_open[col] {
                continue;
            }
            for y in (tops[col] + 1).max(0) as usize..sy {
                let idx = chunk.idx(x, y, z);
                chunk.sunlight[idx] = max_light;
                q_sun.push_back((x, y, z, max_light));
                stats.sun_seeds += 1;
            }
        }
    }

    // Sideways spill at terrain steps: where a sky-lit neighbor column stays
    // open deeper than this one, the exposed band picks up one-step light.
    if max_light > 1 {
        for z in 0..sz {
            for x in 0..sx {
                let col = z * sx + x;
                for (dx, dz) in [(1i32, 0i32), (-1, 0), (0, 1), (0, -1)] {
                    let nx = x as i32 + dx;
                    let nz = z as i32 + dz;
                    if nx < 0 || nz < 0 || nx >= sx as i32 || nz >= sz as i32 {
                        continue;
                    }
                    let ncol = nz as usize * sx + nx as usize;
                    if !chunk.sky_open[ncol] || tops[ncol] >= tops[col] {
                        continue;
                    }
                    for y in (tops[ncol] + 1).max(0)..=tops[col] {
                        let y = y as usize;
                        if !reg.passes_light(chunk.get_local(x, y, z)) {
                            continue;
                        }
                        let idx = chunk.idx(x, y, z);
                        let v = max_light - 1;
                        if chunk.sunlight[idx] < v {
                            chunk.sunlight[idx] = v;
                            q_sun.push_back((x, y, z, v));
                        }
                    }
                }
            }
        }
    }

    // Emitters seed the point channel in place; spread is gated by the
    // neighbor cell's passability, so opaque emitters still glow.
    let mut q_pt: VecDeque<(usize, usize, usize, u8)> = VecDeque::new();
    for z in 0..sz {
        for y in 0..sy {
            for x in 0..sx {
                let em = reg.emission(chunk.get_local(x, y, z));
                if em > 0 {
                    let em = em.min(max_light);
                    let idx = chunk.idx(x, y, z);
                    chunk.point_light[idx] = em;
                    q_pt.push_back((x, y, z, em));
                    stats.emitter_seeds += 1;
                }
            }
        }
    }

    let dims = (sx, sy, sz);
    stats.steps += flood_channel(
        &chunk.blocks,
        &mut chunk.sunlight,
        reg,
        dims,
        &mut q_sun,
        cancel,
    )?;
    stats.steps += flood_channel(
        &chunk.blocks,
        &mut chunk.point_light,
        reg,
        dims,
        &mut q_pt,
        cancel,
    )?;
    Ok(stats)
}

/// Widen a lit chunk once with its neighbors' frozen border planes. Faces
/// flagged in `required` must have planes available; other absent faces are
/// world edges and seed nothing. Never writes back to any store.
pub fn merge_boundary_light(
    chunk: &mut Chunk,
    reg: &BlockRegistry,
    nb: &NeighborBorders,
    required: [bool; 6],
    cancel: &AtomicBool,
) -> Result<MergeStats, LightingError> {
    if cancel.load(Ordering::Relaxed) {
        return Err(LightingError::Cancelled);
    }
    for (face, need) in required.iter().enumerate() {
        if *need && !nb.face_present(face) {
            let (dx, dy, dz) = FACE_OFFSETS[face];
            return Err(LightingError::MissingNeighbor(chunk.coord.offset(dx, dy, dz)));
        }
    }

    let (sx, sy, sz) = (chunk.sx, chunk.sy, chunk.sz);
    let dims = (sx, sy, sz);
    let mut stats = MergeStats::default();
    let mut q_sun: VecDeque<(usize, usize, usize, u8)> = VecDeque::new();
    let mut q_pt: VecDeque<(usize, usize, usize, u8)> = VecDeque::new();

    {
        let mut seed_face = |plane: &Option<Vec<u8>>,
                             light: &mut Vec<u8>,
                             q: &mut VecDeque<(usize, usize, usize, u8)>,
                             face: usize| {
            let Some(plane) = plane else { return };
            let mut seed = |x: usize, y: usize, z: usize, level: u8| {
                if level <= 1 {
                    return;
                }
                let v = level - 1;
                let i = (y * sz + z) * sx + x;
                if !reg.passes_light(chunk.blocks.get(i)) {
                    return;
                }
                if light[i] < v {
                    light[i] = v;
                    q.push_back((x, y, z, v));
                    stats.seeds += 1;
                }
            };
            match face {
                0 => {
                    for y in 0..sy {
                        for z in 0..sz {
                            seed(sx - 1, y, z, plane[y * sz + z]);
                        }
                    }
                }
                1 => {
                    for y in 0..sy {
                        for z in 0..sz {
                            seed(0, y, z, plane[y * sz + z]);
                        }
                    }
                }
                2 => {
                    for z in 0..sz {
                        for x in 0..sx {
                            seed(x, sy - 1, z, plane[z * sx + x]);
                        }
                    }
                }
                3 => {
                    for z in 0..sz {
                        for x in 0..sx {
                            seed(x, 0, z, plane[z * sx + x]);
                        }
                    }
                }
                4 => {
                    for y in 0..sy {
                        for x in 0..sx {
                            seed(x, y, sz - 1, plane[y * sx + x]);
                        }
                    }
                }
                _ => {
                    for y in 0..sy {
                        for x in 0..sx {
                            seed(x, y, 0, plane[y * sx + x]);
                        }
                    }
                }
            }
        };

        seed_face(&nb.sun_xp, &mut chunk.sunlight, &mut q_sun, 0);
        seed_face(&nb.sun_xn, &mut chunk.sunlight, &mut q_sun, 1);
        seed_face(&nb.sun_yp, &mut chunk.sunlight, &mut q_sun, 2);
        seed_face(&nb.sun_yn, &mut chunk.sunlight, &mut q_sun, 3);
        seed_face(&nb.sun_zp, &mut chunk.sunlight, &mut q_sun, 4);
        seed_face(&nb.sun_zn, &mut chunk.sunlight, &mut q_sun, 5);
        seed_face(&nb.pt_xp, &mut chunk.point_light, &mut q_pt, 0);
        seed_face(&nb.pt_xn, &mut chunk.point_light, &mut q_pt, 1);
        seed_face(&nb.pt_yp, &mut chunk.point_light, &mut q_pt, 2);
        seed_face(&nb.pt_yn, &mut chunk.point_light, &mut q_pt, 3);
        seed_face(&nb.pt_zp, &mut chunk.point_light, &mut q_pt, 4);
        seed_face(&nb.pt_zn, &mut chunk.point_light, &mut q_pt, 5);
    }

    stats.steps += flood_channel(
        &chunk.blocks,
        &mut chunk.sunlight,
        reg,
        dims,
        &mut q_sun,
        cancel,
    )?;
    stats.steps += flood_channel(
        &chunk.blocks,
        &mut chunk.point_light,
        reg,
        dims,
        &mut q_pt,
        cancel,
    )?;
    Ok(stats)
}

fn flood_channel(
    blocks: &BlockStore,
    light: &mut [u8],
    reg: &BlockRegistry,
    dims: (usize, usize, usize),
    queue: &mut VecDeque<(usize, usize, usize, u8)>,
    cancel: &AtomicBool,
) -> Result<usize, LightingError> {
    let (sx, sy, sz) = dims;
    let mut steps = 0usize;
    while let Some((x, y, z, level)) = queue.pop_front() {
        if level <= 1 {
            continue;
        }
        steps += 1;
        if steps % CANCEL_STRIDE == 0 && cancel.load(Ordering::Relaxed) {
            return Err(LightingError::Cancelled);
        }
        let mut try_push = |nx: i32, ny: i32, nz: i32| {
            if nx < 0 || ny < 0 || nz < 0 || nx >= sx as i32 || ny >= sy as i32 || nz >= sz as i32
            {
                return;
            }
            let (nx, ny, nz) = (nx as usize, ny as usize, nz as usize);
            let i = (ny * sz + nz) * sx + nx;
            if !reg.passes_light(blocks.get(i)) {
                return;
            }
            let v = level - 1;
            if light[i] < v {
                light[i] = v;
                queue.push_back((nx, ny, nz, v));
            }
        };
        try_push(x as i32 + 1, y as i32, z as i32);
        try_push(x as i32 - 1, y as i32, z as i32);
        try_push(x as i32, y as i32 + 1, z as i32);
        try_push(x as i32, y as i32 - 1, z as i32);
        try_push(x as i32, y as i32, z as i32 + 1);
        try_push(x as i32, y as i32, z as i32 - 1);
    }
    Ok(steps)
}

/// Boundary light planes captured from a chunk after internal lighting.
/// X faces are sized sy*sz (index y*sz+z), Y faces sx*sz (index z*sx+x),
/// Z faces sy*sx (index y*sx+x).
#[derive(Clone, PartialEq)]
pub struct LightBorders {
    pub sun_xn: Vec<u8>,
    pub sun_xp: Vec<u8>,
    pub sun_yn: Vec<u8>,
    pub sun_yp: Vec<u8>,
    pub sun_zn: Vec<u8>,
    pub sun_zp: Vec<u8>,
    pub pt_xn: Vec<u8>,
    pub pt_xp: Vec<u8>,
    pub pt_yn: Vec<u8>,
    pub pt_yp: Vec<u8>,
    pub pt_zn: Vec<u8>,
    pub pt_zp: Vec<u8>,
}

impl LightBorders {
    pub fn new(sx: usize, sy: usize, sz: usize) -> Self {
        Self {
            sun_xn: vec![0; sy * sz],
            sun_xp: vec![0; sy * sz],
            sun_yn: vec![0; sx * sz],
            sun_yp: vec![0; sx * sz],
            sun_zn: vec![0; sy * sx],
            sun_zp: vec![0; sy * sx],
            pt_xn: vec![0; sy * sz],
            pt_xp: vec![0; sy * sz],
            pt_yn: vec![0; sx * sz],
            pt_yp: vec![0; sx * sz],
            pt_zn: vec![0; sy * sx],
            pt_zp: vec![0; sy * sx],
        }
    }

    pub fn from_chunk(chunk: &Chunk) -> Self {
        let (sx, sy, sz) = (chunk.sx, chunk.sy, chunk.sz);
        let mut b = Self::new(sx, sy, sz);
        let idx3 = |x: usize, y: usize, z: usize| (y * sz + z) * sx + x;
        for z in 0..sz {
            for y in 0..sy {
                b.sun_xn[y * sz + z] = chunk.sunlight[idx3(0, y, z)];
                b.sun_xp[y * sz + z] = chunk.sunlight[idx3(sx - 1, y, z)];
                b.pt_xn[y * sz + z] = chunk.point_light[idx3(0, y, z)];
                b.pt_xp[y * sz + z] = chunk.point_light[idx3(sx - 1, y, z)];
            }
        }
        for z in 0..sz {
            for x in 0..sx {
                b.sun_yn[z * sx + x] = chunk.sunlight[idx3(x, 0, z)];
                b.sun_yp[z * sx + x] = chunk.sunlight[idx3(x, sy - 1, z)];
                b.pt_yn[z * sx + x] = chunk.point_light[idx3(x, 0, z)];
                b.pt_yp[z * sx + x] = chunk.point_light[idx3(x, sy - 1, z)];
            }
        }
        for x in 0..sx {
            for y in 0..sy {
                b.sun_zn[y * sx + x] = chunk.sunlight[idx3(x, y, 0)];
                b.sun_zp[y * sx + x] = chunk.sunlight[idx3(x, y, sz - 1)];
                b.pt_zn[y * sx + x] = chunk.point_light[idx3(x, y, 0)];
                b.pt_zp[y * sx + x] = chunk.point_light[idx3(x, y, sz - 1)];
            }
        }
        b
    }
}

/// Planes adjacent to one chunk, named for the face of that chunk they
/// touch. A `None` plane means the neighbor has not published yet (or does
/// not exist). Field order matches `FACE_OFFSETS`: +X, -X, +Y, -Y, +Z, -Z.
#[derive(Clone, Default)]
pub struct NeighborBorders {
    pub sun_xp: Option<Vec<u8>>,
    pub sun_xn: Option<Vec<u8>>,
    pub sun_yp: Option<Vec<u8>>,
    pub sun_yn: Option<Vec<u8>>,
    pub sun_zp: Option<Vec<u8>>,
    pub sun_zn: Option<Vec<u8>>,
    pub pt_xp: Option<Vec<u8>>,
    pub pt_xn: Option<Vec<u8>>,
    pub pt_yp: Option<Vec<u8>>,
    pub pt_yn: Option<Vec<u8>>,
    pub pt_zp: Option<Vec<u8>>,
    pub pt_zn: Option<Vec<u8>>,
}

impl NeighborBorders {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn face_present(&self, face: usize) -> bool {
        match face {
            0 => self.sun_xp.is_some(),
            1 => self.sun_xn.is_some(),
            2 => self.sun_yp.is_some(),
            3 => self.sun_yn.is_some(),
            4 => self.sun_zp.is_some(),
            _ => self.sun_zn.is_some(),
        }
    }
}

/// Shared map of published border planes, keyed by chunk position. Planes
/// are written once per chunk, when internal lighting commits; merges only
/// ever read.
#[derive(Default)]
pub struct LightingStore {
    borders: Mutex<HashMap<ChunkCoord, LightBorders>>,
}

impl LightingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a chunk's planes. Returns whether anything changed.
    pub fn update_borders(&self, coord: ChunkCoord, lb: LightBorders) -> bool {
        let mut map = self.borders.lock().unwrap();
        match map.get_mut(&coord) {
            Some(existing) => {
                let changed = *existing != lb;
                if changed {
                    *existing = lb;
                }
                changed
            }
            None => {
                map.insert(coord, lb);
                true
            }
        }
    }

    /// Snapshot the planes facing `coord` from all six neighbors.
    pub fn get_neighbor_borders(&self, coord: ChunkCoord) -> NeighborBorders {
        let map = self.borders.lock().unwrap();
        let mut nb = NeighborBorders::empty();
        if let Some(b) = map.get(&coord.offset(1, 0, 0)) {
            nb.sun_xp = Some(b.sun_xn.clone());
            nb.pt_xp = Some(b.pt_xn.clone());
        }
        if let Some(b) = map.get(&coord.offset(-1, 0, 0)) {
            nb.sun_xn = Some(b.sun_xp.clone());
            nb.pt_xn = Some(b.pt_xp.clone());
        }
        if let Some(b) = map.get(&coord.offset(0, 1, 0)) {
            nb.sun_yp = Some(b.sun_yn.clone());
            nb.pt_yp = Some(b.pt_yn.clone());
        }
        if let Some(b) = map.get(&coord.offset(0, -1, 0)) {
            nb.sun_yn = Some(b.sun_yp.clone());
            nb.pt_yn = Some(b.pt_yp.clone());
        }
        if let Some(b) = map.get(&coord.offset(0, 0, 1)) {
            nb.sun_zp = Some(b.sun_zn.clone());
            nb.pt_zp = Some(b.pt_zn.clone());
        }
        if let Some(b) = map.get(&coord.offset(0, 0, -1)) {
            nb.sun_zn = Some(b.sun_zp.clone());
            nb.pt_zn = Some(b.pt_zp.clone());
        }
        nb
    }

    /// Drop the planes published for `coord`, for callers that unload
    /// chunks. Returns whether any were held.
    pub fn clear_chunk(&self, coord: ChunkCoord) -> bool {
        self.borders.lock().unwrap().remove(&coord).is_some()
    }

    pub fn clear_all_borders(&self) {
        self.borders.lock().unwrap().clear();
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.borders.lock().unwrap().contains_key(&coord)
    }

    pub fn len(&self) -> usize {
        self.borders.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_blocks::{AIR, BlockId};
    use loam_chunk::{ChunkOccupancy, ChunkState};

    fn make_chunk(coord: ChunkCoord, dims: (usize, usize, usize), sky: bool) -> Chunk {
        let (sx, sy, sz) = dims;
        let cells = sx * sy * sz;
        Chunk {
            coord,
            sx,
            sy,
            sz,
            blocks: BlockStore::Dense(vec![AIR; cells]),
            sunlight: vec![0; cells],
            point_light: vec![0; cells],
            sky_open: vec![sky; sx * sz],
            occupancy: ChunkOccupancy::Empty,
            state: ChunkState::Generated,
        }
    }

    fn set_block(chunk: &mut Chunk, x: usize, y: usize, z: usize, id: BlockId) {
        let i = chunk.idx(x, y, z);
        match &mut chunk.blocks {
            BlockStore::Dense(v) => v[i] = id,
            BlockStore::Packed { .. } => unreachable!("tests build dense chunks"),
        }
    }

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    #[test]
    fn open_chunk_is_fully_sunlit() {
        let reg = BlockRegistry::with_defaults();
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        let stats = light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        assert!(c.sunlight.iter().all(|v| *v == MAX_LIGHT));
        assert_eq!(stats.sun_seeds, 512);
        assert_eq!(stats.emitter_seeds, 0);
    }

    #[test]
    fn full_floor_shadows_cells_beneath() {
        let reg = BlockRegistry::with_defaults();
        let stone = reg.id_by_name("stone").expect("stone");
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        for z in 0..8 {
            for x in 0..8 {
                set_block(&mut c, x, 4, z, stone);
            }
        }
        light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        let s = |x, y, z| c.sunlight[c.idx(x, y, z)];
        assert_eq!(s(3, 5, 3), MAX_LIGHT);
        assert_eq!(s(3, 4, 3), 0);
        assert_eq!(s(3, 0, 3), 0);
    }

    #[test]
    fn terrace_step_leaks_sideways_with_one_step_loss() {
        let reg = BlockRegistry::with_defaults();
        let stone = reg.id_by_name("stone").expect("stone");
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (16, 16, 4), true);
        for z in 0..4 {
            for x in 8..16 {
                set_block(&mut c, x, 8, z, stone);
            }
        }
        light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        let s = |x, y, z| c.sunlight[c.idx(x, y, z)];
        assert_eq!(s(7, 3, 1), 15);
        assert_eq!(s(8, 3, 1), 14);
        assert_eq!(s(9, 3, 1), 13);
        assert_eq!(s(12, 3, 1), 10);
        assert_eq!(s(15, 3, 1), 7);
        assert_eq!(s(10, 9, 1), 15);
        assert_eq!(s(10, 8, 1), 0);
    }

    #[test]
    fn glass_roof_keeps_the_sun_column() {
        let reg = BlockRegistry::with_defaults();
        let glass = reg.id_by_name("glass").expect("glass");
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        for z in 0..8 {
            for x in 0..8 {
                set_block(&mut c, x, 6, z, glass);
            }
        }
        light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        assert!(c.sunlight.iter().all(|v| *v == MAX_LIGHT));
    }

    #[test]
    fn water_stops_the_column_and_attenuates_below() {
        let reg = BlockRegistry::with_defaults();
        let water = reg.id_by_name("water").expect("water");
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 16, 8), true);
        for z in 0..8 {
            for x in 0..8 {
                for y in 8..=11 {
                    set_block(&mut c, x, y, z, water);
                }
            }
        }
        let stats = light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        assert_eq!(stats.sun_seeds, 8 * 8 * 4);
        let s = |x, y, z| c.sunlight[c.idx(x, y, z)];
        assert_eq!(s(3, 12, 3), 15);
        assert_eq!(s(3, 11, 3), 14);
        assert_eq!(s(3, 8, 3), 11);
        assert_eq!(s(3, 7, 3), 10);
        assert_eq!(s(3, 0, 3), 3);
    }

    #[test]
    fn emitter_glows_in_a_dark_chunk() {
        let reg = BlockRegistry::with_defaults();
        let glowstone = reg.id_by_name("glowstone").expect("glowstone");
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), false);
        set_block(&mut c, 4, 4, 4, glowstone);
        let stats = light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        assert_eq!(stats.emitter_seeds, 1);
        assert_eq!(stats.sun_seeds, 0);
        let p = |x, y, z| c.point_light[c.idx(x, y, z)];
        assert_eq!(p(4, 4, 4), 15);
        assert_eq!(p(5, 4, 4), 14);
        assert_eq!(p(7, 7, 7), 6);
        assert!(c.sunlight.iter().all(|v| *v == 0));
    }

    #[test]
    fn sealed_pocket_stays_dark() {
        let reg = BlockRegistry::with_defaults();
        let stone = reg.id_by_name("stone").expect("stone");
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        for x in 2..=5 {
            for y in 2..=5 {
                for z in 2..=5 {
                    set_block(&mut c, x, y, z, stone);
                }
            }
        }
        for x in 3..=4 {
            for y in 3..=4 {
                for z in 3..=4 {
                    set_block(&mut c, x, y, z, AIR);
                }
            }
        }
        light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        let s = |x, y, z| c.sunlight[c.idx(x, y, z)];
        assert_eq!(s(3, 3, 3), 0);
        assert_eq!(s(4, 4, 4), 0);
        assert_eq!(s(3, 6, 3), MAX_LIGHT);
        assert_eq!(s(0, 0, 0), MAX_LIGHT);
    }

    #[test]
    fn cancelled_flag_aborts_lighting() {
        let reg = BlockRegistry::with_defaults();
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        let cancel = AtomicBool::new(true);
        let err = light_internal(&mut c, &reg, MAX_LIGHT, &cancel).unwrap_err();
        assert_eq!(err, LightingError::Cancelled);
    }

    #[test]
    fn borders_capture_face_planes_and_map_to_neighbors() {
        let reg = BlockRegistry::with_defaults();
        let stone = reg.id_by_name("stone").expect("stone");
        let mut c = make_chunk(ChunkCoord::new(2, 0, -1), (16, 16, 4), true);
        for z in 0..4 {
            for x in 8..16 {
                set_block(&mut c, x, 8, z, stone);
            }
        }
        light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        let b = LightBorders::from_chunk(&c);
        assert_eq!(b.sun_xp[3 * 4 + 1], 7);
        assert!(b.sun_yp.iter().all(|v| *v == MAX_LIGHT));

        let store = LightingStore::new();
        assert!(store.update_borders(c.coord, b.clone()));
        assert!(!store.update_borders(c.coord, b.clone()));
        let east = store.get_neighbor_borders(c.coord.offset(1, 0, 0));
        assert_eq!(east.sun_xn.as_deref(), Some(b.sun_xp.as_slice()));
        let above = store.get_neighbor_borders(c.coord.offset(0, 1, 0));
        assert_eq!(above.sun_yn.as_deref(), Some(b.sun_yp.as_slice()));
        assert!(store.contains(c.coord));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn cleared_chunks_stop_serving_planes() {
        let reg = BlockRegistry::with_defaults();
        let store = LightingStore::new();
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        let b = LightBorders::from_chunk(&c);
        store.update_borders(c.coord, b.clone());

        assert!(store.clear_chunk(c.coord));
        assert!(!store.clear_chunk(c.coord));
        assert!(!store.contains(c.coord));
        let east = store.get_neighbor_borders(c.coord.offset(1, 0, 0));
        assert!(east.sun_xn.is_none());

        store.update_borders(c.coord, b);
        assert_eq!(store.len(), 1);
        store.clear_all_borders();
        assert!(store.is_empty());
    }

    #[test]
    fn seam_merge_is_order_independent() {
        let reg = BlockRegistry::with_defaults();
        let store = LightingStore::new();
        let mut a = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        let mut b = make_chunk(ChunkCoord::new(1, 0, 0), (8, 8, 8), false);
        light_internal(&mut a, &reg, MAX_LIGHT, &no_cancel()).expect("light a");
        light_internal(&mut b, &reg, MAX_LIGHT, &no_cancel()).expect("light b");
        store.update_borders(a.coord, LightBorders::from_chunk(&a));
        store.update_borders(b.coord, LightBorders::from_chunk(&b));

        let mut req_a = [false; 6];
        req_a[0] = true;
        let mut req_b = [false; 6];
        req_b[1] = true;

        let mut a1 = a.clone();
        let mut b1 = b.clone();
        let nb = store.get_neighbor_borders(b1.coord);
        merge_boundary_light(&mut b1, &reg, &nb, req_b, &no_cancel()).expect("merge b first");
        let na = store.get_neighbor_borders(a1.coord);
        merge_boundary_light(&mut a1, &reg, &na, req_a, &no_cancel()).expect("merge a second");

        let mut a2 = a.clone();
        let mut b2 = b.clone();
        let na = store.get_neighbor_borders(a2.coord);
        merge_boundary_light(&mut a2, &reg, &na, req_a, &no_cancel()).expect("merge a first");
        let nb = store.get_neighbor_borders(b2.coord);
        merge_boundary_light(&mut b2, &reg, &nb, req_b, &no_cancel()).expect("merge b second");

        assert_eq!(a1.sunlight, a2.sunlight);
        assert_eq!(b1.sunlight, b2.sunlight);
        assert!(a1.sunlight.iter().all(|v| *v == MAX_LIGHT));
        let sb = |x, y, z| b1.sunlight[b1.idx(x, y, z)];
        assert_eq!(sb(0, 3, 3), 14);
        assert_eq!(sb(7, 3, 3), 7);
        // The store still holds the internal epoch for both chunks.
        let facing_a = store.get_neighbor_borders(a.coord);
        assert_eq!(facing_a.sun_xp.as_deref(), Some(vec![0u8; 64].as_slice()));
    }

    #[test]
    fn merge_demands_planes_for_required_faces() {
        let reg = BlockRegistry::with_defaults();
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        let mut required = [false; 6];
        required[0] = true;
        let err = merge_boundary_light(&mut c, &reg, &NeighborBorders::empty(), required, &no_cancel())
            .unwrap_err();
        assert_eq!(err, LightingError::MissingNeighbor(ChunkCoord::new(1, 0, 0)));
    }

    #[test]
    fn merge_ignores_absent_world_edge_faces() {
        let reg = BlockRegistry::with_defaults();
        let mut c = make_chunk(ChunkCoord::new(0, 0, 0), (8, 8, 8), true);
        light_internal(&mut c, &reg, MAX_LIGHT, &no_cancel()).expect("light");
        let before = c.sunlight.clone();
        let stats =
            merge_boundary_light(&mut c, &reg, &NeighborBorders::empty(), [false; 6], &no_cancel())
                .expect("merge");
        assert_eq!(stats.seeds, 0);
        assert_eq!(c.sunlight, before);
    }
}
