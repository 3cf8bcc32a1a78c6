use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use fastnoise_lite::{FastNoiseLite, NoiseType};
use loam_blocks::{AIR, BlockId, BlockRegistry};
use serde::Deserialize;

/// Tunables for the terrain sampler. All fields have defaults so a config
/// file may override any subset.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct WorldGenParams {
    pub base_height: i32,
    pub height_amplitude: f32,
    pub height_frequency: f32,
    pub dirt_depth: i32,
    pub water_level: i32,
}

impl Default for WorldGenParams {
    fn default() -> Self {
        Self {
            base_height: 24,
            height_amplitude: 18.0,
            height_frequency: 0.012,
            dirt_depth: 3,
            water_level: 20,
        }
    }
}

pub fn params_from_toml_str(text: &str) -> Result<WorldGenParams, Box<dyn Error>> {
    Ok(toml::from_str(text)?)
}

pub fn load_params_from_path(path: impl AsRef<Path>) -> Result<WorldGenParams, Box<dyn Error>> {
    params_from_toml_str(&fs::read_to_string(path)?)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WorldGenMode {
    Normal,
    Flat { thickness: i32 },
}

pub struct World {
    pub chunk_size_x: usize,
    pub chunk_size_y: usize,
    pub chunk_size_z: usize,
    pub chunks_y: usize,
    pub seed: i32,
    pub mode: WorldGenMode,
    pub params: WorldGenParams,
    block_id_cache: RwLock<HashMap<String, BlockId>>,
}

/// Per-job sampling context. Noise generators are deterministic for a given
/// world seed; the height memo only short-cuts repeated column lookups.
pub struct GenCtx {
    pub terrain: FastNoiseLite,
    pub detail: FastNoiseLite,
    height_cache: HashMap<(i32, i32), i32>,
}

impl World {
    pub fn new(
        chunk_size: (usize, usize, usize),
        chunks_y: usize,
        seed: i32,
        mode: WorldGenMode,
        params: WorldGenParams,
    ) -> Self {
        Self {
            chunk_size_x: chunk_size.0,
            chunk_size_y: chunk_size.1,
            chunk_size_z: chunk_size.2,
            chunks_y,
            seed,
            mode,
            params,
            block_id_cache: RwLock::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn world_height(&self) -> usize {
        self.chunk_size_y * self.chunks_y
    }

    #[inline]
    pub fn in_vertical_bounds(&self, cy: i32) -> bool {
        cy >= 0 && (cy as usize) < self.chunks_y
    }

    #[inline]
    pub fn is_flat(&self) -> bool {
        matches!(self.mode, WorldGenMode::Flat { .. })
    }

    pub fn make_gen_ctx(&self) -> GenCtx {
        let mut terrain = FastNoiseLite::with_seed(self.seed);
        terrain.set_noise_type(Some(NoiseType::OpenSimplex2));
        terrain.set_frequency(Some(self.params.height_frequency));
        let mut detail = FastNoiseLite::with_seed(self.seed ^ 59_393);
        detail.set_noise_type(Some(NoiseType::OpenSimplex2));
        detail.set_frequency(Some(0.041));
        GenCtx {
            terrain,
            detail,
            height_cache: HashMap::new(),
        }
    }

    fn resolve_block_id(&self, reg: &BlockRegistry, name: &str) -> BlockId {
        if let Ok(cache) = self.block_id_cache.read() {
            if let Some(id) = cache.get(name) {
                return *id;
            }
        }

        let id = match reg.id_by_name(name) {
            Some(id) => id,
            None if name == "air" => AIR,
            None => self.resolve_block_id(reg, "air"),
        };

        if let Ok(mut cache) = self.block_id_cache.write() {
            cache.entry(name.to_string()).or_insert(id);
        }
        id
    }

    /// Y of the highest terrain cell in a column. Columns outside the
    /// amplitude range clamp to the world height.
    pub fn surface_height_with(&self, ctx: &mut GenCtx, wx: i32, wz: i32) -> i32 {
        if let WorldGenMode::Flat { thickness } = self.mode {
            return thickness - 1;
        }
        if let Some(h) = ctx.height_cache.get(&(wx, wz)) {
            return *h;
        }
        let noise = ctx.terrain.get_noise_2d(wx as f32, wz as f32);
        let raw = self.params.base_height as f32 + noise * self.params.height_amplitude;
        let max = self.world_height() as i32 - 1;
        let h = (raw.round() as i32).clamp(0, max);
        ctx.height_cache.insert((wx, wz), h);
        h
    }

    pub fn block_at_with(
        &self,
        reg: &BlockRegistry,
        ctx: &mut GenCtx,
        wx: i32,
        wy: i32,
        wz: i32,
    ) -> BlockId {
        if wy < 0 || wy >= self.world_height() as i32 {
            return self.resolve_block_id(reg, "air");
        }

        if let WorldGenMode::Flat { thickness } = self.mode {
            let name = if wy < thickness { "stone" } else { "air" };
            return self.resolve_block_id(reg, name);
        }

        let h = self.surface_height_with(ctx, wx, wz);
        let water = self.params.water_level;
        let name = if wy > h {
            if wy <= water { "water" } else { "air" }
        } else if wy == h {
            if h <= water + 1 { "sand" } else { "grass" }
        } else {
            let jitter = if ctx.detail.get_noise_2d(wx as f32, wz as f32) > 0.4 {
                1
            } else {
                0
            };
            if wy > h - (self.params.dirt_depth + jitter) {
                "dirt"
            } else {
                "stone"
            }
        };
        self.resolve_block_id(reg, name)
    }

    /// True when nothing in this column occludes the sky at or above
    /// `wy_from`. Water counts as occluding even though light passes it,
    /// since a flooded column never receives full-strength skylight.
    pub fn column_sky_open(&self, ctx: &mut GenCtx, wx: i32, wz: i32, wy_from: i32) -> bool {
        if wy_from >= self.world_height() as i32 {
            return true;
        }
        match self.mode {
            WorldGenMode::Flat { thickness } => thickness <= wy_from,
            WorldGenMode::Normal => {
                let h = self.surface_height_with(ctx, wx, wz);
                let col_top = if h < self.params.water_level {
                    self.params.water_level
                } else {
                    h
                };
                col_top < wy_from
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_world(mode: WorldGenMode) -> World {
        World::new((16, 16, 16), 4, 1337, mode, WorldGenParams::default())
    }

    #[test]
    fn flat_mode_is_stone_below_thickness() {
        let reg = BlockRegistry::with_defaults();
        let world = test_world(WorldGenMode::Flat { thickness: 8 });
        let mut ctx = world.make_gen_ctx();
        let stone = reg.id_by_name("stone").expect("stone");
        assert_eq!(world.block_at_with(&reg, &mut ctx, 5, 7, -3), stone);
        assert_eq!(world.block_at_with(&reg, &mut ctx, 5, 8, -3), AIR);
        assert!(world.column_sky_open(&mut ctx, 5, -3, 8));
        assert!(!world.column_sky_open(&mut ctx, 5, -3, 7));
    }

    #[test]
    fn sampling_is_deterministic_across_contexts() {
        let reg = BlockRegistry::with_defaults();
        let world = test_world(WorldGenMode::Normal);
        let mut a = world.make_gen_ctx();
        let mut b = world.make_gen_ctx();
        for wx in -8..8 {
            for wz in -8..8 {
                assert_eq!(
                    world.surface_height_with(&mut a, wx, wz),
                    world.surface_height_with(&mut b, wx, wz)
                );
                for wy in 0..64 {
                    assert_eq!(
                        world.block_at_with(&reg, &mut a, wx, wy, wz),
                        world.block_at_with(&reg, &mut b, wx, wy, wz)
                    );
                }
            }
        }
    }

    #[test]
    fn column_is_air_above_surface_and_solid_below() {
        let reg = BlockRegistry::with_defaults();
        let world = test_world(WorldGenMode::Normal);
        let mut ctx = world.make_gen_ctx();
        let h = world.surface_height_with(&mut ctx, 3, 3);
        let above = world.block_at_with(&reg, &mut ctx, 3, h + 30, 3);
        assert_eq!(above, AIR);
        let below = world.block_at_with(&reg, &mut ctx, 3, (h - 8).max(0), 3);
        assert!(reg.is_solid(below));
    }

    #[test]
    fn flooded_columns_are_not_sky_open() {
        let reg = BlockRegistry::with_defaults();
        let params = WorldGenParams {
            base_height: 6,
            height_amplitude: 0.0,
            water_level: 20,
            ..WorldGenParams::default()
        };
        let world = World::new((16, 16, 16), 4, 7, WorldGenMode::Normal, params);
        let mut ctx = world.make_gen_ctx();
        let water = reg.id_by_name("water").expect("water");
        assert_eq!(world.block_at_with(&reg, &mut ctx, 0, 12, 0), water);
        assert!(!world.column_sky_open(&mut ctx, 0, 0, 16));
        assert!(world.column_sky_open(&mut ctx, 0, 0, 21));
    }

    #[test]
    fn out_of_range_y_is_air() {
        let reg = BlockRegistry::with_defaults();
        let world = test_world(WorldGenMode::Normal);
        let mut ctx = world.make_gen_ctx();
        assert_eq!(world.block_at_with(&reg, &mut ctx, 0, -1, 0), AIR);
        assert_eq!(world.block_at_with(&reg, &mut ctx, 0, 64, 0), AIR);
    }

    #[test]
    fn params_file_overrides_a_subset() {
        let params = params_from_toml_str(
            r#"
            base_height = 40
            water_level = 12
        "#,
        )
        .expect("params");
        assert_eq!(params.base_height, 40);
        assert_eq!(params.water_level, 12);
        assert_eq!(params.dirt_depth, WorldGenParams::default().dirt_depth);

        assert!(params_from_toml_str("water_level = \"deep\"").is_err());
    }
}
