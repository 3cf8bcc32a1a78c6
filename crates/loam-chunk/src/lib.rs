//! Chunk buffers, staged lifecycle, and generation from world noise.
#![forbid(unsafe_code)]

pub mod state;
pub mod store;

use loam_blocks::{AIR, BlockId, BlockRegistry};
use loam_world::{ChunkCoord, World};

pub use state::ChunkState;
pub use store::{BlockStore, DeflateStats, Run};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChunkOccupancy {
    Empty,
    Populated,
}

impl ChunkOccupancy {
    #[inline]
    pub fn is_empty(self) -> bool {
        matches!(self, ChunkOccupancy::Empty)
    }

    #[inline]
    pub fn has_blocks(self) -> bool {
        matches!(self, ChunkOccupancy::Populated)
    }
}

/// One chunk's voxel payload plus the light fields the pipeline fills in.
/// `sky_open` marks columns with an unobstructed view of the sky above this
/// chunk's top face, sampled from the world's column model at generation
/// time so lighting never has to consult vertically adjacent chunks.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub coord: ChunkCoord,
    pub sx: usize,
    pub sy: usize,
    pub sz: usize,
    pub blocks: BlockStore,
    pub sunlight: Vec<u8>,
    pub point_light: Vec<u8>,
    pub sky_open: Vec<bool>,
    pub occupancy: ChunkOccupancy,
    pub state: ChunkState,
}

impl Chunk {
    #[inline]
    pub fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        (y * self.sz + z) * self.sx + x
    }

    #[inline]
    pub fn col_idx(&self, x: usize, z: usize) -> usize {
        z * self.sx + x
    }

    #[inline]
    pub fn cells(&self) -> usize {
        self.sx * self.sy * self.sz
    }

    #[inline]
    pub fn get_local(&self, x: usize, y: usize, z: usize) -> BlockId {
        self.blocks.get(self.idx(x, y, z))
    }

    #[inline]
    pub fn base(&self) -> (i32, i32, i32) {
        (
            self.coord.cx * self.sx as i32,
            self.coord.cy * self.sy as i32,
            self.coord.cz * self.sz as i32,
        )
    }

    pub fn deflate(&mut self) -> DeflateStats {
        self.blocks.deflate()
    }
}

/// Fill a chunk from the world sampler. Deterministic for a given world
/// seed and coordinate.
pub fn generate_chunk(world: &World, reg: &BlockRegistry, coord: ChunkCoord) -> Chunk {
    let sx = world.chunk_size_x;
    let sy = world.chunk_size_y;
    let sz = world.chunk_size_z;
    let cells = sx * sy * sz;
    let base_x = coord.cx * sx as i32;
    let base_y = coord.cy * sy as i32;
    let base_z = coord.cz * sz as i32;
    let mut ctx = world.make_gen_ctx();
    let mut blocks = vec![AIR; cells];
    let mut has_blocks = false;
    for z in 0..sz {
        for y in 0..sy {
            for x in 0..sx {
                let wx = base_x + x as i32;
                let wy = base_y + y as i32;
                let wz = base_z + z as i32;
                let b = world.block_at_with(reg, &mut ctx, wx, wy, wz);
                if b != AIR {
                    has_blocks = true;
                }
                blocks[(y * sz + z) * sx + x] = b;
            }
        }
    }
    let mut sky_open = vec![false; sx * sz];
    let sky_from = base_y + sy as i32;
    for z in 0..sz {
        for x in 0..sx {
            sky_open[z * sx + x] =
                world.column_sky_open(&mut ctx, base_x + x as i32, base_z + z as i32, sky_from);
        }
    }
    Chunk {
        coord,
        sx,
        sy,
        sz,
        blocks: BlockStore::Dense(blocks),
        sunlight: vec![0; cells],
        point_light: vec![0; cells],
        sky_open,
        occupancy: if has_blocks {
            ChunkOccupancy::Populated
        } else {
            ChunkOccupancy::Empty
        },
        state: ChunkState::Generated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loam_world::{WorldGenMode, WorldGenParams};

    fn flat_world(thickness: i32) -> World {
        World::new(
            (16, 16, 16),
            4,
            42,
            WorldGenMode::Flat { thickness },
            WorldGenParams::default(),
        )
    }

    #[test]
    fn generation_is_bit_identical() {
        let reg = BlockRegistry::with_defaults();
        let world = World::new(
            (16, 16, 16),
            4,
            905,
            WorldGenMode::Normal,
            WorldGenParams::default(),
        );
        let coord = ChunkCoord::new(-2, 1, 5);
        let a = generate_chunk(&world, &reg, coord);
        let b = generate_chunk(&world, &reg, coord);
        assert_eq!(a, b);
    }

    #[test]
    fn flat_chunk_above_ground_is_empty_and_sky_open() {
        let reg = BlockRegistry::with_defaults();
        let world = flat_world(8);
        let above = generate_chunk(&world, &reg, ChunkCoord::new(0, 1, 0));
        assert!(above.occupancy.is_empty());
        assert!(above.sky_open.iter().all(|open| *open));
        let ground = generate_chunk(&world, &reg, ChunkCoord::new(0, 0, 0));
        assert!(ground.occupancy.has_blocks());
        assert!(ground.sky_open.iter().all(|open| *open));
    }

    #[test]
    fn buried_chunk_is_not_sky_open() {
        let reg = BlockRegistry::with_defaults();
        let world = flat_world(40);
        let buried = generate_chunk(&world, &reg, ChunkCoord::new(3, 0, -1));
        assert!(buried.sky_open.iter().all(|open| !*open));
    }

    #[test]
    fn local_reads_match_linear_layout() {
        let reg = BlockRegistry::with_defaults();
        let world = flat_world(8);
        let chunk = generate_chunk(&world, &reg, ChunkCoord::new(0, 0, 0));
        let stone = reg.id_by_name("stone").expect("stone");
        assert_eq!(chunk.get_local(0, 0, 0), stone);
        assert_eq!(chunk.get_local(15, 7, 15), stone);
        assert_eq!(chunk.get_local(0, 8, 0), AIR);
        assert_eq!(chunk.idx(1, 2, 3), (2 * 16 + 3) * 16 + 1);
    }
}
