use crate::block_state::BlockState;
use crate::canonical::{CanonicalStructure, Metadata, PaletteMap, PositionKind, UnitBuilder};
use crate::codec::{decode_bytes, encode_bytes, Extent};
use crate::entity::{EntityRecord, IdKey, TileEntityRecord, TilePosition};
use crate::error::{Error, Result};
use crate::formats::manager::NativeFormat;
use crate::formats::{
    compound_list, dimension, has_keys, int_or, int_triple, payloads, version_for, FormatTag,
    NativeSchema,
};
use crate::payload::{payload_from_compound, payload_to_compound, NbtValue, Payload};
use crate::settings::Settings;
use quartz_nbt::{NbtCompound, NbtTag};
use serde::Serialize;
use std::collections::BTreeMap;

pub const WORLDEDIT_VERSION: i32 = 2;

/// A Sponge (v1/v2) schematic as written by WorldEdit, with one byte per cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldEditSchematic {
    pub version: i32,
    pub data_version: i32,
    pub width: i32,
    pub height: i32,
    pub length: i32,
    pub offset: [i32; 3],
    pub metadata: Payload,
    /// Block-state key → palette index.
    pub palette: BTreeMap<String, i32>,
    pub palette_max: i32,
    pub block_data: Vec<i8>,
    pub block_entities: Vec<Payload>,
    pub entities: Vec<Payload>,
}

impl WorldEditSchematic {
    pub fn extent(&self) -> Extent {
        Extent::new(
            self.width.max(0) as usize,
            self.height.max(0) as usize,
            self.length.max(0) as usize,
        )
    }

    pub fn from_nbt(root: &NbtCompound) -> Result<Self> {
        let malformed = |reason: &str| Error::malformed(FormatTag::WorldEdit, reason);

        let palette_tag = root
            .get::<_, &NbtCompound>("Palette")
            .map_err(|_| malformed("Palette is not a compound"))?;
        let mut palette = BTreeMap::new();
        for (key, tag) in palette_tag.inner() {
            match tag {
                NbtTag::Int(index) => {
                    palette.insert(key.clone(), *index);
                }
                _ => log::warn!("Ignoring non-integer palette entry {:?}", key),
            }
        }

        let block_data = match root.inner().get("BlockData") {
            Some(NbtTag::ByteArray(data)) => data.clone(),
            _ => return Err(malformed("BlockData is not a byte array")),
        };

        let width = dimension(root, "Width").ok_or_else(|| malformed("missing Width"))?;
        let height = dimension(root, "Height").ok_or_else(|| malformed("missing Height"))?;
        let length = dimension(root, "Length").ok_or_else(|| malformed("missing Length"))?;

        // Sponge v1 called them TileEntities.
        let block_entities = if root.inner().contains_key("BlockEntities") {
            payloads(root, "BlockEntities")
        } else {
            payloads(root, "TileEntities")
        };

        Ok(WorldEditSchematic {
            version: int_or(root, "Version", 1),
            data_version: int_or(root, "DataVersion", 0),
            width,
            height,
            length,
            offset: int_triple(root, "Offset").unwrap_or_default(),
            metadata: root
                .get::<_, &NbtCompound>("Metadata")
                .map(payload_from_compound)
                .unwrap_or_default(),
            palette_max: int_or(root, "PaletteMax", palette.len() as i32),
            palette,
            block_data,
            block_entities,
            entities: payloads(root, "Entities"),
        })
    }

    pub fn to_canonical(&self, settings: &Settings) -> Result<CanonicalStructure> {
        let extent = self.extent();
        let mut palette = PaletteMap::reserve_air(
            self.palette
                .iter()
                .filter(|&(_, &index)| index >= 0)
                .map(|(key, &index)| (index as u32, BlockState::from_key(key))),
        );
        let mut units = UnitBuilder::new(extent);

        let volume = extent.checked_volume().ok_or_else(|| {
            Error::malformed(
                FormatTag::WorldEdit,
                format!(
                    "size {}x{}x{} overflows the cell count",
                    self.width, self.height, self.length
                ),
            )
        })?;
        let cells = decode_bytes(&self.block_data);
        if cells.len() != volume {
            log::debug!(
                "BlockData holds {} cells for a volume of {}",
                cells.len(),
                volume
            );
        }
        for (i, native) in cells.into_iter().take(volume).enumerate() {
            units.push_native(&palette, extent.position_of(i), native, None);
        }

        let tiles: Vec<TileEntityRecord> = self
            .block_entities
            .iter()
            .filter_map(TileEntityRecord::from_payload)
            .collect();
        units.materialize_tile_positions(&mut palette, &tiles, &settings.placeholder_block);
        for tile in tiles {
            units.push_tile_entity(tile);
        }
        for entity in self.entities.iter().filter_map(EntityRecord::from_payload) {
            units.push_entity(entity);
        }

        let text = |key: &str| {
            self.metadata
                .get(key)
                .and_then(NbtValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let metadata = Metadata {
            name: text("Name"),
            author: text("Author"),
            time_created: self
                .metadata
                .get("Date")
                .and_then(NbtValue::as_i64)
                .unwrap_or(0),
            ..Metadata::default()
        };

        Ok(CanonicalStructure {
            metadata,
            data_version: self.data_version,
            format_version: self.version,
            size: [self.width, self.height, self.length],
            negative_axes: [false; 3],
            position: self.offset,
            position_kind: PositionKind::PasteOffset,
            palette: palette.palette,
            blocks: units.finish(),
            original_format: FormatTag::WorldEdit,
        })
    }

    /// Fails with `PaletteOverflow` when more than 256 distinct states are in use.
    /// Fails with `Malformed` when a side does not fit an unsigned short.
    pub fn from_canonical(structure: &CanonicalStructure) -> Result<Self> {
        let [width, height, length] = structure.size.map(i32::saturating_abs);
        if [width, height, length].iter().any(|&side| side > u16::MAX as i32) {
            return Err(Error::malformed(
                FormatTag::WorldEdit,
                format!("size {:?} exceeds {} per side", structure.size, u16::MAX),
            ));
        }
        let (states, remap) = structure.compact_palette();
        let grid = structure.dense_grid(FormatTag::WorldEdit, |index| {
            remap.get(&index).copied().unwrap_or(0)
        })?;
        let block_data = encode_bytes(&grid)?;

        let palette: BTreeMap<String, i32> = states
            .iter()
            .enumerate()
            .map(|(i, state)| (state.to_string(), i as i32))
            .collect();

        let mut metadata = Payload::new();
        let meta = &structure.metadata;
        if !meta.name.is_empty() {
            metadata.insert("Name".into(), NbtValue::String(meta.name.clone()));
        }
        if !meta.author.is_empty() {
            metadata.insert("Author".into(), NbtValue::String(meta.author.clone()));
        }
        if meta.time_created != 0 {
            metadata.insert("Date".into(), NbtValue::Long(meta.time_created));
        }
        let [x, y, z] = structure.position;
        metadata.insert("WEOffsetX".into(), NbtValue::Int(x));
        metadata.insert("WEOffsetY".into(), NbtValue::Int(y));
        metadata.insert("WEOffsetZ".into(), NbtValue::Int(z));

        Ok(WorldEditSchematic {
            version: version_for(structure, FormatTag::WorldEdit, WORLDEDIT_VERSION),
            data_version: structure.data_version,
            width,
            height,
            length,
            offset: structure.position,
            metadata,
            palette_max: states.len() as i32,
            palette,
            block_data,
            block_entities: structure
                .tile_entities()
                .map(|tile| tile.to_payload(IdKey::Upper, TilePosition::PosArray))
                .collect(),
            entities: structure
                .entities()
                .map(|entity| entity.to_payload(IdKey::Upper))
                .collect(),
        })
    }

    pub fn to_nbt(&self) -> NbtCompound {
        let mut root = NbtCompound::new();
        root.insert("Version", NbtTag::Int(self.version));
        root.insert("DataVersion", NbtTag::Int(self.data_version));
        // Unsigned on disk.
        root.insert("Width", NbtTag::Short(self.width as u16 as i16));
        root.insert("Height", NbtTag::Short(self.height as u16 as i16));
        root.insert("Length", NbtTag::Short(self.length as u16 as i16));
        root.insert("Offset", NbtTag::IntArray(self.offset.to_vec()));
        root.insert("Metadata", payload_to_compound(&self.metadata));

        let mut palette = NbtCompound::new();
        for (key, index) in &self.palette {
            palette.insert(key.clone(), NbtTag::Int(*index));
        }
        root.insert("Palette", palette);
        root.insert("PaletteMax", NbtTag::Int(self.palette_max));
        root.insert("BlockData", NbtTag::ByteArray(self.block_data.clone()));
        root.insert(
            "BlockEntities",
            compound_list(self.block_entities.iter().map(payload_to_compound)),
        );
        root.insert(
            "Entities",
            compound_list(self.entities.iter().map(payload_to_compound)),
        );
        root
    }
}

pub struct WorldEditFormat;

impl NativeFormat for WorldEditFormat {
    fn tag(&self) -> FormatTag {
        FormatTag::WorldEdit
    }

    fn detect(&self, root: &NbtCompound) -> bool {
        has_keys(root, &["BlockData", "Palette"])
    }

    fn bind(&self, root: &NbtCompound) -> Result<NativeSchema> {
        WorldEditSchematic::from_nbt(root).map(NativeSchema::WorldEdit)
    }

    fn from_canonical(
        &self,
        structure: &CanonicalStructure,
        _settings: &Settings,
    ) -> Result<NativeSchema> {
        WorldEditSchematic::from_canonical(structure).map(NativeSchema::WorldEdit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::StandardUnit;
    use crate::payload::doubles;

    fn schematic(palette: &[(&str, i32)], size: [i16; 3], data: Vec<i8>) -> NbtCompound {
        let mut root = NbtCompound::new();
        let mut pal = NbtCompound::new();
        for (key, index) in palette {
            pal.insert(*key, NbtTag::Int(*index));
        }
        root.insert("Version", NbtTag::Int(2));
        root.insert("DataVersion", NbtTag::Int(2975));
        root.insert("Width", NbtTag::Short(size[0]));
        root.insert("Height", NbtTag::Short(size[1]));
        root.insert("Length", NbtTag::Short(size[2]));
        root.insert("Offset", NbtTag::IntArray(vec![-3, 0, 7]));
        root.insert("Palette", pal);
        root.insert("PaletteMax", NbtTag::Int(palette.len() as i32));
        root.insert("BlockData", NbtTag::ByteArray(data));
        root
    }

    #[test]
    fn test_yzx_order_and_properties() {
        let root = schematic(
            &[
                ("minecraft:air", 0),
                ("minecraft:oak_log[axis=y]", 1),
                ("minecraft:stone", 2),
            ],
            [2, 2, 1],
            vec![1, 0, 0, 2],
        );
        assert!(WorldEditFormat.detect(&root));
        let structure = WorldEditSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();

        assert_eq!(structure.position, [-3, 0, 7]);
        assert_eq!(structure.position_kind, PositionKind::PasteOffset);
        let blocks: Vec<_> = structure
            .blocks
            .iter()
            .map(|unit| (unit.block_position().unwrap(), unit.palette_index().unwrap()))
            .collect();
        assert_eq!(blocks, vec![([0, 0, 0], 1), ([1, 1, 0], 2)]);
        assert_eq!(
            structure.palette[&1].get_property("axis").map(|v| v.as_str()),
            Some("y")
        );
    }

    #[test]
    fn test_indices_above_127_read_as_unsigned() {
        let mut palette = vec![("minecraft:air".to_string(), 0)];
        for i in 1..=200 {
            palette.push((format!("test:block_{}", i), i));
        }
        let refs: Vec<(&str, i32)> = palette.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let root = schematic(&refs, [1, 1, 1], vec![200u8 as i8]);
        let structure = WorldEditSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(structure.blocks[0].palette_index(), Some(200));
        assert_eq!(structure.palette_name(200), Some("test:block_200"));
    }

    #[test]
    fn test_block_entities_merge_with_pos_array() {
        let mut root = schematic(
            &[("minecraft:air", 0), ("minecraft:chest[facing=north]", 1)],
            [1, 1, 2],
            vec![0, 1],
        );
        let mut chest = NbtCompound::new();
        chest.insert("Id", "minecraft:chest".to_string());
        chest.insert("Pos", NbtTag::IntArray(vec![0, 0, 1]));
        chest.insert("CustomName", "loot".to_string());
        root.insert("BlockEntities", compound_list([chest]));

        let structure = WorldEditSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(structure.blocks.len(), 1);
        match &structure.blocks[0] {
            StandardUnit::BlockWithTileEntity {
                position,
                id,
                payload,
                ..
            } => {
                assert_eq!(*position, [0, 0, 1]);
                assert_eq!(id, "minecraft:chest");
                assert!(payload.contains_key("CustomName"));
            }
            other => panic!("expected a merged block, got {:?}", other),
        }

        let back = WorldEditSchematic::from_canonical(&structure).unwrap();
        assert_eq!(back.block_entities.len(), 1);
        assert_eq!(
            back.block_entities[0].get("Pos"),
            Some(&NbtValue::IntArray(vec![0, 0, 1]))
        );
    }

    #[test]
    fn test_encode_roundtrip_keeps_offset_and_version() {
        let root = schematic(
            &[("minecraft:air", 0), ("minecraft:stone", 1), ("minecraft:dirt", 2)],
            [2, 1, 2],
            vec![1, 2, 0, 1],
        );
        let structure = WorldEditSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        let native = WorldEditSchematic::from_canonical(&structure).unwrap();
        assert_eq!(native.offset, [-3, 0, 7]);
        assert_eq!(native.metadata.get("WEOffsetZ"), Some(&NbtValue::Int(7)));

        let reparsed = WorldEditSchematic::from_nbt(&native.to_nbt()).unwrap();
        assert_eq!(reparsed, native);
        let again = reparsed.to_canonical(&Settings::default()).unwrap();
        assert_eq!(again.blocks, structure.blocks);
        assert_eq!(again.format_version, 2);
    }

    #[test]
    fn test_palette_overflow_is_an_error() {
        let mut structure = WorldEditSchematic::from_nbt(&schematic(
            &[("minecraft:air", 0)],
            [300, 1, 1],
            vec![0; 300],
        ))
        .unwrap()
        .to_canonical(&Settings::default())
        .unwrap();
        for i in 0..300u32 {
            structure
                .palette
                .insert(i + 1, BlockState::new(format!("test:block_{}", i)));
            structure.blocks.push(StandardUnit::Block {
                position: [i as i32, 0, 0],
                palette_index: i + 1,
                payload: None,
            });
        }
        assert!(matches!(
            WorldEditSchematic::from_canonical(&structure),
            Err(Error::PaletteOverflow {
                format: FormatTag::WorldEdit,
                ..
            })
        ));
    }

    #[test]
    fn test_entities_use_upper_id() {
        let mut entity = Payload::new();
        entity.insert("Id".into(), NbtValue::String("minecraft:pig".into()));
        entity.insert("Pos".into(), doubles(&[0.5, 0.0, 0.5]));
        entity.insert("Rotation".into(), crate::payload::floats(&[0.0, 0.0]));
        entity.insert("Motion".into(), doubles(&[0.0, 0.0, 0.0]));
        let mut root = schematic(&[("minecraft:air", 0)], [1, 1, 1], vec![0]);
        root.insert("Entities", compound_list([payload_to_compound(&entity)]));

        let structure = WorldEditSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(structure.entities().count(), 1);
        let native = WorldEditSchematic::from_canonical(&structure).unwrap();
        assert_eq!(
            native.entities[0].get("Id"),
            Some(&NbtValue::String("minecraft:pig".into()))
        );
    }

    #[test]
    fn test_block_data_length_need_not_match_size() {
        let palette = [("minecraft:air", 0), ("minecraft:stone", 1)];
        let short = WorldEditSchematic::from_nbt(&schematic(&palette, [4, 4, 4], vec![1; 10]))
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(short.block_count(), 10);

        let long = WorldEditSchematic::from_nbt(&schematic(&palette, [2, 1, 1], vec![1; 50]))
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(long.block_count(), 2);
    }

    #[test]
    fn test_unrepresentable_sizes_are_malformed() {
        let mut root = schematic(&[("minecraft:air", 0)], [1, 1, 1], vec![0]);
        for key in ["Width", "Height", "Length"] {
            root.insert(key, NbtTag::Int(i32::MAX));
        }
        let err = WorldEditSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap_err();
        assert!(matches!(err, Error::Malformed { format: FormatTag::WorldEdit, .. }));

        let mut structure = WorldEditSchematic::from_nbt(&schematic(
            &[("minecraft:air", 0)],
            [1, 1, 1],
            vec![0],
        ))
        .unwrap()
        .to_canonical(&Settings::default())
        .unwrap();
        structure.size = [70_000, 1, 1];
        assert!(matches!(
            WorldEditSchematic::from_canonical(&structure),
            Err(Error::Malformed { format: FormatTag::WorldEdit, .. })
        ));
    }
}
