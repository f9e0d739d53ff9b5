use crate::block_state::BlockState;
use crate::codec::Extent;
use crate::entity::{EntityRecord, TileEntityRecord};
use crate::error::{Error, Result};
use crate::formats::FormatTag;
use crate::payload::Payload;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ─── Model ──────────────────────────────────────────────────────────────────

/// Informational fields. Never checked against the actual content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub author: String,
    pub description: String,
    pub time_created: i64,
    pub time_modified: i64,
    pub total_blocks: i64,
    pub total_volume: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<Vec<i32>>,
}

/// What `position` means for the format a structure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionKind {
    /// Litematica region position inside the schematic.
    #[default]
    RegionOrigin,
    /// WorldEdit paste offset.
    PasteOffset,
    /// Minimum block position inside a Create template.
    TemplateMinimum,
    /// Minimum occupied coordinate of a world save.
    WorldMinimum,
}

/// One member of the ordered body of a structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StandardUnit {
    Block {
        position: [i32; 3],
        palette_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Payload>,
    },
    BlockWithTileEntity {
        position: [i32; 3],
        palette_index: u32,
        id: String,
        #[serde(default)]
        payload: Payload,
    },
    Entity(EntityRecord),
    TileEntity(TileEntityRecord),
}

impl StandardUnit {
    /// Grid position of block-bearing units.
    pub fn block_position(&self) -> Option<[i32; 3]> {
        match self {
            StandardUnit::Block { position, .. }
            | StandardUnit::BlockWithTileEntity { position, .. } => Some(*position),
            _ => None,
        }
    }

    pub fn palette_index(&self) -> Option<u32> {
        match self {
            StandardUnit::Block { palette_index, .. }
            | StandardUnit::BlockWithTileEntity { palette_index, .. } => Some(*palette_index),
            _ => None,
        }
    }

    /// Block-local data, if any.
    pub fn block_payload(&self) -> Option<&Payload> {
        match self {
            StandardUnit::Block { payload, .. } => payload.as_ref(),
            StandardUnit::BlockWithTileEntity { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// The tile entity carried by this unit, standalone or merged.
    pub fn tile_entity(&self) -> Option<TileEntityRecord> {
        match self {
            StandardUnit::BlockWithTileEntity {
                position,
                id,
                payload,
                ..
            } => Some(TileEntityRecord {
                id: id.clone(),
                position: *position,
                payload: payload.clone(),
            }),
            StandardUnit::TileEntity(tile) => Some(tile.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStructure {
    pub metadata: Metadata,
    pub data_version: i32,
    pub format_version: i32,
    /// Absolute extents.
    pub size: [i32; 3],
    /// Axes whose native size was negative.
    #[serde(default, skip_serializing_if = "no_negative_axes")]
    pub negative_axes: [bool; 3],
    pub position: [i32; 3],
    pub position_kind: PositionKind,
    pub palette: BTreeMap<u32, BlockState>,
    pub blocks: Vec<StandardUnit>,
    pub original_format: FormatTag,
}

fn no_negative_axes(axes: &[bool; 3]) -> bool {
    !axes.iter().any(|a| *a)
}

impl CanonicalStructure {
    pub fn extent(&self) -> Extent {
        let [x, y, z] = self.size.map(|v| v.max(0) as usize);
        Extent::new(x, y, z)
    }

    /// Number of block-bearing units.
    pub fn block_count(&self) -> usize {
        self.blocks
            .iter()
            .filter(|unit| unit.palette_index().is_some())
            .count()
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> {
        self.blocks.iter().filter_map(|unit| match unit {
            StandardUnit::Entity(entity) => Some(entity),
            _ => None,
        })
    }

    pub fn tile_entities(&self) -> impl Iterator<Item = TileEntityRecord> + '_ {
        self.blocks.iter().filter_map(StandardUnit::tile_entity)
    }

    pub fn palette_name(&self, index: u32) -> Option<&str> {
        self.palette.get(&index).map(|state| state.name.as_str())
    }

    /// Dense grid of palette indices after `map`. Blocks outside `size` are dropped.
    ///
    /// Fails with `Malformed` for `format` when the grid cannot be allocated.
    pub fn dense_grid(&self, format: FormatTag, map: impl Fn(u32) -> u32) -> Result<Vec<u32>> {
        let extent = self.extent();
        let volume = extent.checked_volume().ok_or_else(|| {
            Error::malformed(format, format!("size {:?} overflows the cell count", self.size))
        })?;
        let mut grid = Vec::new();
        grid.try_reserve_exact(volume).map_err(|e| {
            Error::malformed(format, format!("size {:?} is too large: {}", self.size, e))
        })?;
        grid.resize(volume, 0u32);
        let mut dropped = 0usize;
        for unit in &self.blocks {
            let (Some(position), Some(index)) = (unit.block_position(), unit.palette_index())
            else {
                continue;
            };
            match extent.index_of(position) {
                Some(i) => grid[i] = map(index),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            log::warn!("Dropped {} blocks outside the {:?} bounds", dropped, self.size);
        }
        Ok(grid)
    }

    /// Contiguous native palette with air at 0, and the canonical → native index map.
    /// Identical states share one native entry.
    pub fn compact_palette(&self) -> (Vec<BlockState>, FxHashMap<u32, u32>) {
        let mut states = vec![BlockState::air()];
        let mut seen: FxHashMap<&BlockState, u32> = FxHashMap::default();
        let mut remap = FxHashMap::default();
        remap.insert(0, 0);
        for (&index, state) in &self.palette {
            if index == 0 || state.is_air() {
                remap.insert(index, 0);
                continue;
            }
            let native = *seen.entry(state).or_insert_with(|| {
                states.push(state.clone());
                states.len() as u32 - 1
            });
            remap.insert(index, native);
        }
        (states, remap)
    }
}

// ─── Decode Helpers ─────────────────────────────────────────────────────────

/// Native palette re-keyed so that index 0 is air.
#[derive(Debug, Default)]
pub(crate) struct PaletteMap {
    pub palette: BTreeMap<u32, BlockState>,
    remap: FxHashMap<u32, u32>,
}

impl PaletteMap {
    /// Air variants collapse to 0. A non-air entry at native index 0 moves to
    /// the next free index; every other entry keeps its native index.
    pub fn reserve_air(entries: impl IntoIterator<Item = (u32, BlockState)>) -> Self {
        let mut map = PaletteMap::default();
        map.palette.insert(0, BlockState::air());
        let mut displaced = None;

        for (native, state) in entries {
            if state.is_air() {
                map.remap.insert(native, 0);
            } else if native == 0 {
                displaced = Some(state);
            } else {
                map.remap.insert(native, native);
                map.palette.insert(native, state);
            }
        }
        if let Some(state) = displaced {
            let index = map.next_free();
            map.remap.insert(0, index);
            map.palette.insert(index, state);
        }
        map
    }

    /// Canonical index for a native one. `None` for indices not in the palette.
    pub fn resolve(&self, native: u32) -> Option<u32> {
        self.remap.get(&native).copied()
    }

    fn next_free(&self) -> u32 {
        self.palette
            .keys()
            .next_back()
            .map_or(1, |last| last + 1)
            .max(1)
    }

    /// First non-air index, inserting `placeholder` when there is none.
    pub fn sentinel(&mut self, placeholder: &str) -> u32 {
        if let Some((&index, _)) = self
            .palette
            .iter()
            .find(|(&index, state)| index != 0 && !state.is_air())
        {
            return index;
        }
        let index = self.next_free();
        self.palette.insert(index, BlockState::new(placeholder));
        index
    }
}

/// Collects units in a stable order and merges co-located tile entities.
pub(crate) struct UnitBuilder {
    extent: Extent,
    units: Vec<StandardUnit>,
    blocks_at: FxHashMap<[i32; 3], usize>,
    dropped: usize,
    unknown: usize,
}

impl UnitBuilder {
    pub fn new(extent: Extent) -> Self {
        UnitBuilder {
            extent,
            units: Vec::new(),
            blocks_at: FxHashMap::default(),
            dropped: 0,
            unknown: 0,
        }
    }

    pub fn has_blocks(&self) -> bool {
        !self.blocks_at.is_empty()
    }

    /// Adds a block for a native index. Air, unknown indices and positions
    /// outside the extent are skipped.
    pub fn push_native(
        &mut self,
        palette: &PaletteMap,
        position: [i32; 3],
        native: u32,
        payload: Option<Payload>,
    ) {
        match palette.resolve(native) {
            Some(0) => {}
            Some(index) => self.push_block(position, index, payload),
            None => self.unknown += 1,
        }
    }

    pub fn push_block(&mut self, position: [i32; 3], palette_index: u32, payload: Option<Payload>) {
        if palette_index == 0 {
            return;
        }
        if !self.extent.contains(position) {
            self.dropped += 1;
            return;
        }
        let unit = match payload {
            Some(payload) if has_tile_id(&payload) => {
                let mut payload = payload;
                let id = take_tile_id(&mut payload);
                StandardUnit::BlockWithTileEntity {
                    position,
                    palette_index,
                    id,
                    payload,
                }
            }
            payload => StandardUnit::Block {
                position,
                palette_index,
                payload,
            },
        };
        self.blocks_at.insert(position, self.units.len());
        self.units.push(unit);
    }

    /// Merges into the block at the same position, if there is one.
    pub fn push_tile_entity(&mut self, tile: TileEntityRecord) {
        let Some(&slot) = self.blocks_at.get(&tile.position) else {
            self.units.push(StandardUnit::TileEntity(tile));
            return;
        };
        let unit = &mut self.units[slot];
        let merged = match unit {
            StandardUnit::Block {
                position,
                palette_index,
                payload,
            } => {
                let mut combined = payload.take().unwrap_or_default();
                combined.extend(tile.payload);
                StandardUnit::BlockWithTileEntity {
                    position: *position,
                    palette_index: *palette_index,
                    id: tile.id,
                    payload: combined,
                }
            }
            StandardUnit::BlockWithTileEntity { id, payload, .. } => {
                if id.is_empty() {
                    *id = tile.id;
                }
                payload.extend(tile.payload);
                return;
            }
            _ => return,
        };
        *unit = merged;
    }

    pub fn push_entity(&mut self, entity: EntityRecord) {
        self.units.push(StandardUnit::Entity(entity));
    }

    /// With no grid blocks at all, place one sentinel block under each tile
    /// entity so the tile data keeps a block to live on.
    pub fn materialize_tile_positions(
        &mut self,
        palette: &mut PaletteMap,
        tiles: &[TileEntityRecord],
        placeholder: &str,
    ) {
        if self.has_blocks() || tiles.is_empty() {
            return;
        }
        let sentinel = palette.sentinel(placeholder);
        log::debug!(
            "No block grid; materializing {} tile entity positions as {}",
            tiles.len(),
            palette.palette[&sentinel]
        );
        for tile in tiles {
            if !self.blocks_at.contains_key(&tile.position) {
                self.push_block(tile.position, sentinel, None);
            }
        }
    }

    pub fn finish(self) -> Vec<StandardUnit> {
        if self.dropped > 0 {
            log::warn!("Dropped {} blocks outside the declared size", self.dropped);
        }
        if self.unknown > 0 {
            log::warn!("Dropped {} cells with palette indices not in the palette", self.unknown);
        }
        self.units
    }
}

fn has_tile_id(payload: &Payload) -> bool {
    payload.get("id").and_then(|v| v.as_str()).is_some()
}

fn take_tile_id(payload: &mut Payload) -> String {
    payload
        .remove("id")
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}
