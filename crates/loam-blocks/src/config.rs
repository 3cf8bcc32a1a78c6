use serde::Deserialize;

/// Top-level `blocks.toml` layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlocksConfig {
    pub blocks: Vec<BlockDef>,
    pub unknown_block: Option<String>,
}

/// One `[[blocks]]` entry. Omitted fields fall back to the defaults the
/// registry applies (solid true, opacity follows solidity, no emission).
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDef {
    pub name: String,
    pub id: Option<u16>,
    pub solid: Option<bool>,
    pub liquid: Option<bool>,
    pub blocks_skylight: Option<bool>,
    pub propagates_light: Option<bool>,
    pub emission: Option<u8>,
}
