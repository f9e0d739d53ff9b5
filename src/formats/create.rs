use crate::block_state::BlockState;
use crate::canonical::{
    CanonicalStructure, Metadata, PaletteMap, PositionKind, StandardUnit, UnitBuilder,
};
use crate::codec::Extent;
use crate::compression::decode_tree;
use crate::entity::{EntityRecord, IdKey, TileEntityRecord};
use crate::error::{Error, Result};
use crate::formats::manager::NativeFormat;
use crate::formats::{
    compound_list, compounds, has_keys, int, int_or, int_triple, FormatTag, NativeSchema,
};
use crate::payload::{doubles, payload_from_compound, payload_to_compound, NbtValue, Payload};
use crate::settings::Settings;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use serde::Serialize;

pub const CREATE_VERSION: i32 = 0;

// ─── Schema ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateBlock {
    pub pos: [i32; 3],
    pub state: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbt: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateEntity {
    pub pos: [f64; 3],
    pub block_pos: [i32; 3],
    pub nbt: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTileEntity {
    pub pos: [i32; 3],
    pub nbt: Payload,
}

/// Structure-template layout used by Create and vanilla structure blocks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateSchematic {
    pub size: [i32; 3],
    pub data_version: i32,
    pub palette: Vec<BlockState>,
    pub blocks: Vec<CreateBlock>,
    pub entities: Vec<CreateEntity>,
    pub tile_entities: Vec<CreateTileEntity>,
}

// ─── Read Path ──────────────────────────────────────────────────────────────

/// Block `nbt` is either a compound or a byte array holding a compressed tree.
fn block_nbt(block: &NbtCompound) -> Option<Payload> {
    match block.inner().get("nbt")? {
        NbtTag::Compound(nbt) => Some(payload_from_compound(nbt)),
        NbtTag::ByteArray(bytes) => {
            let bytes: Vec<u8> = bytes.iter().map(|b| *b as u8).collect();
            match decode_tree(&bytes) {
                Ok(tree) => Some(payload_from_compound(&tree)),
                Err(e) => {
                    log::warn!("Ignoring undecodable block nbt: {}", e);
                    None
                }
            }
        }
        _ => None,
    }
}

fn f64_triple(compound: &NbtCompound, key: &str) -> Option<[f64; 3]> {
    let list = compound.get::<_, &NbtList>(key).ok()?;
    let values: Vec<f64> = list
        .iter()
        .filter_map(|tag| NbtValue::from(tag).as_f64())
        .collect();
    (values.len() >= 3).then(|| [values[0], values[1], values[2]])
}

impl CreateSchematic {
    pub fn from_nbt(root: &NbtCompound) -> Result<Self> {
        let palette = compounds(root, "palette")
            .into_iter()
            .map(|entry| BlockState::from_nbt(entry).unwrap_or_else(|| BlockState::new("")))
            .collect();

        let mut blocks = Vec::new();
        for block in compounds(root, "blocks") {
            let (Some(pos), Some(state)) = (int_triple(block, "pos"), int(block, "state")) else {
                log::warn!("Skipping template block without pos or state");
                continue;
            };
            blocks.push(CreateBlock {
                pos,
                state: state.max(0) as u32,
                nbt: block_nbt(block),
            });
        }

        let entities = compounds(root, "entities")
            .into_iter()
            .filter_map(|entity| {
                let pos = f64_triple(entity, "pos")?;
                Some(CreateEntity {
                    pos,
                    block_pos: int_triple(entity, "blockPos")
                        .unwrap_or_else(|| pos.map(|v| v.floor() as i32)),
                    nbt: entity
                        .get::<_, &NbtCompound>("nbt")
                        .map(payload_from_compound)
                        .unwrap_or_default(),
                })
            })
            .collect();

        let tile_entities = compounds(root, "tileEntities")
            .into_iter()
            .filter_map(|tile| {
                Some(CreateTileEntity {
                    pos: int_triple(tile, "pos")?,
                    nbt: tile
                        .get::<_, &NbtCompound>("nbt")
                        .map(payload_from_compound)
                        .unwrap_or_default(),
                })
            })
            .collect();

        Ok(CreateSchematic {
            size: int_triple(root, "size").unwrap_or([1, 1, 1]),
            data_version: int_or(root, "DataVersion", 0),
            palette,
            blocks,
            entities,
            tile_entities,
        })
    }

    /// Minimum block corner; `[0, 0, 0]` without blocks.
    pub fn min_position(&self) -> [i32; 3] {
        let mut blocks = self.blocks.iter();
        let Some(first) = blocks.next() else {
            return [0; 3];
        };
        blocks.fold(first.pos, |min, block| {
            [0, 1, 2].map(|axis| min[axis].min(block.pos[axis]))
        })
    }

    pub fn to_canonical(&self, settings: &Settings) -> Result<CanonicalStructure> {
        let origin = self.min_position();
        let relative = |pos: [i32; 3]| offset(pos, origin, i32::checked_sub);
        let [x, y, z] = self.size.map(|v| v.max(0) as usize);
        let mut palette = PaletteMap::reserve_air(
            self.palette
                .iter()
                .enumerate()
                .map(|(i, state)| (i as u32, state.clone())),
        );
        let mut units = UnitBuilder::new(Extent::new(x, y, z));

        for block in &self.blocks {
            units.push_native(&palette, relative(block.pos)?, block.state, block.nbt.clone());
        }

        let mut tiles = Vec::new();
        for tile in &self.tile_entities {
            let mut nbt = tile.nbt.clone();
            nbt.insert("Pos".to_string(), NbtValue::IntArray(tile.pos.to_vec()));
            let Some(mut record) = TileEntityRecord::from_payload(&nbt) else {
                continue;
            };
            if record.id.is_empty() {
                record.id = "unknown".to_string();
            }
            record.position = relative(tile.pos)?;
            tiles.push(record);
        }
        units.materialize_tile_positions(&mut palette, &tiles, &settings.placeholder_block);
        for tile in tiles {
            units.push_tile_entity(tile);
        }

        for entity in &self.entities {
            let mut nbt = entity.nbt.clone();
            nbt.entry("Pos".to_string())
                .or_insert_with(|| doubles(&entity.pos));
            let Some(mut record) = EntityRecord::from_payload(&nbt) else {
                log::debug!("Skipping incomplete template entity at {:?}", entity.pos);
                continue;
            };
            record.position = [0, 1, 2].map(|axis| entity.pos[axis] - origin[axis] as f64);
            units.push_entity(record);
        }

        Ok(CanonicalStructure {
            metadata: Metadata::default(),
            data_version: self.data_version,
            format_version: CREATE_VERSION,
            size: self.size,
            negative_axes: [false; 3],
            position: origin,
            position_kind: PositionKind::TemplateMinimum,
            palette: palette.palette,
            blocks: units.finish(),
            original_format: FormatTag::Create,
        })
    }
}

// ─── Write Path ─────────────────────────────────────────────────────────────

impl CreateSchematic {
    pub fn from_canonical(structure: &CanonicalStructure) -> Result<Self> {
        // Only a template origin is added back.
        let shift = if structure.original_format == FormatTag::Create
            && structure.position_kind == PositionKind::TemplateMinimum
        {
            structure.position
        } else {
            [0; 3]
        };
        let absolute = |pos: [i32; 3]| offset(pos, shift, i32::checked_add);
        let (states, remap) = structure.compact_palette();

        let mut blocks = Vec::new();
        let mut tile_entities = Vec::new();
        for unit in &structure.blocks {
            match unit {
                StandardUnit::Block {
                    position,
                    palette_index,
                    payload,
                } => {
                    let state = remap.get(palette_index).copied().unwrap_or(0);
                    if state != 0 {
                        blocks.push(CreateBlock {
                            pos: absolute(*position)?,
                            state,
                            nbt: payload.clone(),
                        });
                    }
                }
                StandardUnit::BlockWithTileEntity {
                    position,
                    palette_index,
                    id,
                    payload,
                } => {
                    let state = remap.get(palette_index).copied().unwrap_or(0);
                    if state != 0 {
                        let mut nbt = payload.clone();
                        nbt.insert("id".to_string(), NbtValue::String(id.clone()));
                        blocks.push(CreateBlock {
                            pos: absolute(*position)?,
                            state,
                            nbt: Some(nbt),
                        });
                    }
                }
                StandardUnit::TileEntity(tile) => {
                    let mut nbt = tile.payload.clone();
                    nbt.insert("id".to_string(), NbtValue::String(tile.id.clone()));
                    tile_entities.push(CreateTileEntity {
                        pos: absolute(tile.position)?,
                        nbt,
                    });
                }
                StandardUnit::Entity(_) => {}
            }
        }

        let entities = structure
            .entities()
            .map(|entity| {
                let pos = [0, 1, 2].map(|axis| entity.position[axis] + shift[axis] as f64);
                CreateEntity {
                    pos,
                    block_pos: pos.map(|v| v.floor() as i32),
                    nbt: entity.to_payload(IdKey::Lower),
                }
            })
            .collect();

        Ok(CreateSchematic {
            size: structure.size.map(i32::saturating_abs),
            data_version: structure.data_version,
            palette: states,
            blocks,
            entities,
            tile_entities,
        })
    }

    pub fn to_nbt(&self) -> NbtCompound {
        let mut root = NbtCompound::new();
        root.insert("size", int_list(self.size));
        root.insert(
            "palette",
            compound_list(self.palette.iter().map(BlockState::to_nbt)),
        );

        let blocks = self.blocks.iter().map(|block| {
            let mut nbt = NbtCompound::new();
            nbt.insert("pos", int_list(block.pos));
            nbt.insert("state", NbtTag::Int(block.state as i32));
            if let Some(payload) = &block.nbt {
                nbt.insert("nbt", payload_to_compound(payload));
            }
            nbt
        });
        root.insert("blocks", compound_list(blocks));

        let entities = self.entities.iter().map(|entity| {
            let mut nbt = NbtCompound::new();
            nbt.insert("pos", doubles(&entity.pos).to_tag());
            nbt.insert("blockPos", int_list(entity.block_pos));
            nbt.insert("nbt", payload_to_compound(&entity.nbt));
            nbt
        });
        root.insert("entities", compound_list(entities));

        if !self.tile_entities.is_empty() {
            let tiles = self.tile_entities.iter().map(|tile| {
                let mut nbt = NbtCompound::new();
                nbt.insert("pos", int_list(tile.pos));
                nbt.insert("nbt", payload_to_compound(&tile.nbt));
                nbt
            });
            root.insert("tileEntities", compound_list(tiles));
        }
        root.insert("DataVersion", NbtTag::Int(self.data_version));
        root
    }
}

/// Applies `op` per axis; overflow means the coordinates cannot be expressed.
fn offset(
    pos: [i32; 3],
    by: [i32; 3],
    op: fn(i32, i32) -> Option<i32>,
) -> Result<[i32; 3]> {
    let mut out = [0; 3];
    for axis in 0..3 {
        out[axis] = op(pos[axis], by[axis]).ok_or_else(|| {
            Error::malformed(
                FormatTag::Create,
                format!("position {:?} offset by {:?} is out of range", pos, by),
            )
        })?;
    }
    Ok(out)
}

fn int_list(values: [i32; 3]) -> NbtList {
    compound_list(values.map(NbtTag::Int))
}

pub struct CreateFormat;

impl NativeFormat for CreateFormat {
    fn tag(&self) -> FormatTag {
        FormatTag::Create
    }

    fn detect(&self, root: &NbtCompound) -> bool {
        has_keys(root, &["blocks", "palette"])
    }

    fn bind(&self, root: &NbtCompound) -> Result<NativeSchema> {
        CreateSchematic::from_nbt(root).map(NativeSchema::Create)
    }

    fn from_canonical(
        &self,
        structure: &CanonicalStructure,
        _settings: &Settings,
    ) -> Result<NativeSchema> {
        CreateSchematic::from_canonical(structure).map(NativeSchema::Create)
    }
}
