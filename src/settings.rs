use crate::codec::PackingLayout;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Options shared by decoding, conversion and aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Palette name used for blocks synthesized under orphan tile entities.
    #[serde(default = "default_placeholder_block")]
    pub placeholder_block: String,
    #[serde(default = "default_region_name")]
    pub litematic_region_name: String,
    #[serde(default)]
    pub litematic_packing: PackingLayout,
    /// gzip level (0-9) for native output.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    /// Count an item stack by its size instead of once.
    #[serde(default)]
    pub count_item_stack_size: bool,
    #[serde(default)]
    pub world_bounds: Option<WorldBounds>,
    /// Decode world-save region files on the rayon pool.
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_placeholder_block() -> String {
    "minecraft:stone".to_string()
}
fn default_region_name() -> String {
    "main".to_string()
}
fn default_compression_level() -> u32 {
    6
}
fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            placeholder_block: default_placeholder_block(),
            litematic_region_name: default_region_name(),
            litematic_packing: PackingLayout::default(),
            compression_level: default_compression_level(),
            count_item_stack_size: false,
            world_bounds: None,
            parallel: true,
        }
    }
}

impl Settings {
    /// Parse settings JSON; `None` or blank input yields the defaults.
    pub fn from_json(json: Option<&str>) -> Result<Self> {
        match json.map(str::trim) {
            None | Some("") => Ok(Settings::default()),
            Some(json) => serde_json::from_str(json).map_err(Error::Settings),
        }
    }
}

/// Inclusive world-space box used to crop world saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub min: [i32; 3],
    pub max: [i32; 3],
}

impl WorldBounds {
    pub fn contains(&self, pos: [i32; 3]) -> bool {
        (0..3).all(|axis| pos[axis] >= self.min[axis] && pos[axis] <= self.max[axis])
    }

    pub fn contains_point(&self, pos: [f64; 3]) -> bool {
        self.contains(pos.map(|v| v.floor() as i32))
    }
}
