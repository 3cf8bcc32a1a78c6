use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use crate::config::{BlockDef, BlocksConfig};

pub type BlockId = u16;

/// Id 0 is always air; the registry rejects configs that say otherwise.
pub const AIR: BlockId = 0;

#[derive(Debug, Clone)]
pub struct BlockType {
    pub id: BlockId,
    pub name: String,
    pub solid: bool,
    pub liquid: bool,
    pub blocks_skylight: bool,
    pub propagates_light: bool,
    pub emission: u8,
}

#[derive(Default, Clone, Debug)]
pub struct BlockRegistry {
    pub blocks: Vec<BlockType>,
    pub by_name: HashMap<String, BlockId>,
    pub unknown_block_id: Option<BlockId>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            by_name: HashMap::new(),
            unknown_block_id: None,
        }
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&BlockType> {
        self.blocks.get(id as usize)
    }

    pub fn id_by_name(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: BlocksConfig = toml::from_str(text)?;
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: BlocksConfig) -> Result<Self, Box<dyn Error>> {
        let mut reg = BlockRegistry::new();
        let unknown_name = cfg.unknown_block.clone();
        for def in cfg.blocks.into_iter() {
            let id = def.id.unwrap_or(reg.blocks.len() as u16);
            if id as usize != reg.blocks.len() {
                return Err(format!(
                    "block '{}' declares id {} but registry slot is {}",
                    def.name,
                    id,
                    reg.blocks.len()
                )
                .into());
            }
            if reg.by_name.contains_key(&def.name) {
                return Err(format!("duplicate block name '{}'", def.name).into());
            }
            let solid = def.solid.unwrap_or(true);
            let liquid = def.liquid.unwrap_or(false);
            let blocks_skylight = def.blocks_skylight.unwrap_or(solid);
            let propagates_light = def.propagates_light.unwrap_or(!solid);
            let emission = def.emission.unwrap_or(0);
            reg.by_name.insert(def.name.clone(), id);
            reg.blocks.push(BlockType {
                id,
                name: def.name,
                solid,
                liquid,
                blocks_skylight,
                propagates_light,
                emission,
            });
        }
        if reg.blocks.is_empty() || reg.blocks[0].name != "air" {
            return Err("block set must start with 'air' at id 0".into());
        }
        reg.unknown_block_id = unknown_name.and_then(|n| reg.id_by_name(&n));
        Ok(reg)
    }

    /// Built-in palette for the driver and for tests that do not load a
    /// blocks file.
    pub fn with_defaults() -> Self {
        let mk = |name: &str,
                  solid: bool,
                  liquid: bool,
                  blocks_skylight: bool,
                  propagates_light: bool,
                  emission: u8| BlockDef {
            name: name.to_string(),
            id: None,
            solid: Some(solid),
            liquid: Some(liquid),
            blocks_skylight: Some(blocks_skylight),
            propagates_light: Some(propagates_light),
            emission: Some(emission),
        };
        let cfg = BlocksConfig {
            blocks: vec![
                mk("air", false, false, false, true, 0),
                mk("stone", true, false, true, false, 0),
                mk("dirt", true, false, true, false, 0),
                mk("grass", true, false, true, false, 0),
                mk("sand", true, false, true, false, 0),
                mk("water", false, true, false, true, 0),
                mk("glass", true, false, false, true, 0),
                mk("glowstone", true, false, true, false, 15),
                mk("torch", false, false, false, true, 14),
            ],
            unknown_block: Some("stone".to_string()),
        };
        Self::from_config(cfg).expect("built-in block set")
    }

    /// Whether light may enter or cross a cell holding this block.
    #[inline]
    pub fn passes_light(&self, id: BlockId) -> bool {
        if id == AIR {
            return true;
        }
        self.get(id).map(|ty| ty.propagates_light).unwrap_or(false)
    }

    /// Whether this block terminates a downward sky column.
    #[inline]
    pub fn stops_sky_column(&self, id: BlockId) -> bool {
        if id == AIR {
            return false;
        }
        self.get(id)
            .map(|ty| ty.blocks_skylight || ty.liquid)
            .unwrap_or(true)
    }

    #[inline]
    pub fn emission(&self, id: BlockId) -> u8 {
        self.get(id).map(|ty| ty.emission).unwrap_or(0)
    }

    #[inline]
    pub fn is_solid(&self, id: BlockId) -> bool {
        self.get(id).map(|ty| ty.solid).unwrap_or(true)
    }
}
