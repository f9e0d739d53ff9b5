use crate::block_state::BlockState;
use crate::canonical::{CanonicalStructure, Metadata, PaletteMap, PositionKind, UnitBuilder};
use crate::codec::{bits_for_palette, pack_aligned, unpack, Extent};
use crate::entity::{EntityRecord, IdKey, TileEntityRecord, TilePosition};
use crate::error::{Error, Result};
use crate::formats::manager::NativeFormat;
use crate::formats::{
    compound_list, has_keys, int, int_or, payloads, string, version_for, xyz, xyz_tag,
    FormatTag, NativeSchema,
};
use crate::payload::{payload_to_compound, Payload};
use crate::settings::Settings;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use serde::Serialize;
use std::collections::BTreeMap;

pub const LITEMATIC_VERSION: i32 = 6;
const LITEMATIC_SUB_VERSION: i32 = 1;

// ─── Schema ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LitematicMetadata {
    pub name: String,
    pub author: String,
    pub description: String,
    pub time_created: i64,
    pub time_modified: i64,
    pub total_blocks: i64,
    pub total_volume: i64,
    pub region_count: i32,
    pub enclosing_size: [i32; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_image: Option<Vec<i32>>,
}

/// One region. `size` components may be negative.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LitematicRegion {
    pub position: [i32; 3],
    pub size: [i32; 3],
    pub palette: Vec<BlockState>,
    pub block_states: Vec<i64>,
    pub entities: Vec<Payload>,
    pub tile_entities: Vec<Payload>,
}

impl LitematicRegion {
    pub fn extent(&self) -> Extent {
        let [x, y, z] = self.size.map(|v| v.unsigned_abs() as usize);
        Extent::new(x, y, z)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LitematicSchematic {
    pub version: i32,
    pub sub_version: Option<i32>,
    pub data_version: i32,
    pub metadata: LitematicMetadata,
    pub regions: BTreeMap<String, LitematicRegion>,
}

// ─── Read Path ──────────────────────────────────────────────────────────────

impl LitematicSchematic {
    pub fn from_nbt(root: &NbtCompound) -> Result<Self> {
        let metadata = root
            .get::<_, &NbtCompound>("Metadata")
            .map_err(|_| Error::malformed(FormatTag::Litematica, "Metadata is not a compound"))?;
        let regions = root
            .get::<_, &NbtCompound>("Regions")
            .map_err(|_| Error::malformed(FormatTag::Litematica, "Regions is not a compound"))?;

        let mut parsed = BTreeMap::new();
        for (name, tag) in regions.inner() {
            let NbtTag::Compound(region) = tag else {
                log::warn!("Skipping litematic region {:?}: not a compound", name);
                continue;
            };
            parsed.insert(name.clone(), parse_region(name, region)?);
        }

        Ok(LitematicSchematic {
            version: int_or(root, "Version", 0),
            sub_version: int(root, "SubVersion").map(|v| v as i32),
            data_version: int_or(root, "MinecraftDataVersion", 0),
            metadata: parse_metadata(metadata),
            regions: parsed,
        })
    }

    /// Converts the first region by name; other regions are ignored.
    pub fn to_canonical(&self, settings: &Settings) -> Result<CanonicalStructure> {
        let metadata = Metadata {
            name: self.metadata.name.clone(),
            author: self.metadata.author.clone(),
            description: self.metadata.description.clone(),
            time_created: self.metadata.time_created,
            time_modified: self.metadata.time_modified,
            total_blocks: self.metadata.total_blocks,
            total_volume: self.metadata.total_volume,
            preview_image: self.metadata.preview_image.clone(),
        };
        let mut structure = CanonicalStructure {
            metadata,
            data_version: self.data_version,
            format_version: self.version,
            size: [0; 3],
            negative_axes: [false; 3],
            position: [0; 3],
            position_kind: PositionKind::RegionOrigin,
            palette: PaletteMap::reserve_air([]).palette,
            blocks: Vec::new(),
            original_format: FormatTag::Litematica,
        };

        let Some((name, region)) = self.regions.iter().next() else {
            log::warn!("Litematic schematic has no regions");
            return Ok(structure);
        };
        if self.regions.len() > 1 {
            log::debug!(
                "Converting region {:?}, ignoring {} others",
                name,
                self.regions.len() - 1
            );
        }

        let extent = region.extent();
        let volume = extent.checked_volume().ok_or_else(|| {
            Error::malformed(
                FormatTag::Litematica,
                format!("region {:?} size {:?} overflows the cell count", name, region.size),
            )
        })?;
        let mut palette = PaletteMap::reserve_air(
            region
                .palette
                .iter()
                .enumerate()
                .map(|(i, state)| (i as u32, state.clone())),
        );
        let mut units = UnitBuilder::new(extent);

        if !region.block_states.is_empty() && volume > 0 {
            let bits = bits_for_palette(region.palette.len());
            let cells = unpack(&region.block_states, bits, volume, settings.litematic_packing);
            for (i, native) in cells.into_iter().enumerate() {
                units.push_native(&palette, extent.position_of(i), native, None);
            }
        }

        let tiles: Vec<TileEntityRecord> = region
            .tile_entities
            .iter()
            .filter_map(|payload| {
                let tile = TileEntityRecord::from_payload(payload);
                if tile.is_none() {
                    log::warn!("Skipping litematic tile entity without a position");
                }
                tile
            })
            .collect();
        units.materialize_tile_positions(&mut palette, &tiles, &settings.placeholder_block);
        for tile in tiles {
            units.push_tile_entity(tile);
        }

        let mut skipped = 0;
        for payload in &region.entities {
            match EntityRecord::from_payload(payload) {
                Some(entity) => units.push_entity(entity),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            log::debug!("Skipped {} incomplete litematic entities", skipped);
        }

        structure.size = region.size.map(i32::saturating_abs);
        structure.negative_axes = region.size.map(|v| v < 0);
        structure.position = region.position;
        structure.palette = palette.palette;
        structure.blocks = units.finish();
        Ok(structure)
    }
}

fn parse_metadata(metadata: &NbtCompound) -> LitematicMetadata {
    LitematicMetadata {
        name: string(metadata, "Name"),
        author: string(metadata, "Author"),
        description: string(metadata, "Description"),
        time_created: int(metadata, "TimeCreated").unwrap_or(0),
        time_modified: int(metadata, "TimeModified").unwrap_or(0),
        total_blocks: int(metadata, "TotalBlocks").unwrap_or(0),
        total_volume: int(metadata, "TotalVolume").unwrap_or(0),
        region_count: int_or(metadata, "RegionCount", 0),
        enclosing_size: xyz(metadata, "EnclosingSize").unwrap_or_default(),
        preview_image: metadata
            .get::<_, &[i32]>("PreviewImageData")
            .ok()
            .map(<[i32]>::to_vec),
    }
}

fn parse_region(name: &str, region: &NbtCompound) -> Result<LitematicRegion> {
    let size = xyz(region, "Size").ok_or_else(|| {
        Error::malformed(FormatTag::Litematica, format!("region {:?} has no Size", name))
    })?;
    // A negated i32::MIN has no i32 magnitude.
    if size.contains(&i32::MIN) {
        return Err(Error::malformed(
            FormatTag::Litematica,
            format!("region {:?} has an out-of-range Size {:?}", name, size),
        ));
    }
    let palette = match region.get::<_, &NbtList>("BlockStatePalette") {
        Ok(list) => list
            .iter()
            .map(|tag| match tag {
                NbtTag::Compound(compound) => BlockState::from_nbt(compound),
                _ => None,
            })
            .map(|state| state.unwrap_or_else(|| BlockState::new("")))
            .collect(),
        Err(_) => Vec::new(),
    };

    Ok(LitematicRegion {
        position: xyz(region, "Position").unwrap_or_default(),
        size,
        palette,
        block_states: region
            .get::<_, &[i64]>("BlockStates")
            .map(<[i64]>::to_vec)
            .unwrap_or_default(),
        entities: payloads(region, "Entities"),
        tile_entities: payloads(region, "TileEntities"),
    })
}

// ─── Write Path ─────────────────────────────────────────────────────────────

impl LitematicSchematic {
    pub fn from_canonical(structure: &CanonicalStructure, settings: &Settings) -> Result<Self> {
        let (states, remap) = structure.compact_palette();
        let grid = structure.dense_grid(FormatTag::Litematica, |index| {
            remap.get(&index).copied().unwrap_or(0)
        })?;
        let block_states = pack_aligned(&grid, bits_for_palette(states.len()));

        let size = [0, 1, 2].map(|axis| {
            let extent = structure.size[axis].saturating_abs();
            if structure.negative_axes[axis] {
                -extent
            } else {
                extent
            }
        });

        let region = LitematicRegion {
            position: structure.position,
            size,
            palette: states,
            block_states,
            entities: structure
                .entities()
                .map(|entity| entity.to_payload(IdKey::Lower))
                .collect(),
            tile_entities: structure
                .tile_entities()
                .map(|tile| tile.to_payload(IdKey::Lower, TilePosition::Xyz))
                .collect(),
        };

        let block_count = grid.iter().filter(|&&index| index != 0).count() as i64;
        let meta = &structure.metadata;
        let metadata = LitematicMetadata {
            name: meta.name.clone(),
            author: meta.author.clone(),
            description: meta.description.clone(),
            time_created: meta.time_created,
            time_modified: meta.time_modified,
            total_blocks: if meta.total_blocks > 0 {
                meta.total_blocks
            } else {
                block_count
            },
            total_volume: if meta.total_volume > 0 {
                meta.total_volume
            } else {
                grid.len() as i64
            },
            region_count: 1,
            enclosing_size: structure.size.map(i32::saturating_abs),
            preview_image: meta.preview_image.clone(),
        };

        let mut regions = BTreeMap::new();
        regions.insert(settings.litematic_region_name.clone(), region);

        Ok(LitematicSchematic {
            version: version_for(structure, FormatTag::Litematica, LITEMATIC_VERSION),
            sub_version: Some(LITEMATIC_SUB_VERSION),
            data_version: structure.data_version,
            metadata,
            regions,
        })
    }

    pub fn to_nbt(&self) -> NbtCompound {
        let mut root = NbtCompound::new();
        root.insert("Version", NbtTag::Int(self.version));
        if let Some(sub_version) = self.sub_version {
            root.insert("SubVersion", NbtTag::Int(sub_version));
        }
        root.insert("MinecraftDataVersion", NbtTag::Int(self.data_version));
        root.insert("Metadata", self.metadata_nbt());

        let mut regions = NbtCompound::new();
        for (name, region) in &self.regions {
            regions.insert(name.clone(), region_nbt(region));
        }
        root.insert("Regions", regions);
        root
    }

    fn metadata_nbt(&self) -> NbtCompound {
        let meta = &self.metadata;
        let mut metadata = NbtCompound::new();
        metadata.insert("Name", meta.name.clone());
        metadata.insert("Author", meta.author.clone());
        metadata.insert("Description", meta.description.clone());
        metadata.insert("TimeCreated", NbtTag::Long(meta.time_created));
        metadata.insert("TimeModified", NbtTag::Long(meta.time_modified));
        metadata.insert("TotalBlocks", NbtTag::Int(clamp_i32(meta.total_blocks)));
        metadata.insert("TotalVolume", NbtTag::Int(clamp_i32(meta.total_volume)));
        metadata.insert("RegionCount", NbtTag::Int(meta.region_count));
        metadata.insert("EnclosingSize", xyz_tag(meta.enclosing_size));
        if let Some(preview) = &meta.preview_image {
            metadata.insert("PreviewImageData", NbtTag::IntArray(preview.clone()));
        }
        metadata
    }
}

/// Litematica stores block and volume totals as ints.
fn clamp_i32(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

fn region_nbt(region: &LitematicRegion) -> NbtCompound {
    let mut nbt = NbtCompound::new();
    nbt.insert("Position", xyz_tag(region.position));
    nbt.insert("Size", xyz_tag(region.size));
    nbt.insert(
        "BlockStatePalette",
        compound_list(region.palette.iter().map(BlockState::to_nbt)),
    );
    nbt.insert("BlockStates", NbtTag::LongArray(region.block_states.clone()));
    nbt.insert(
        "Entities",
        compound_list(region.entities.iter().map(payload_to_compound)),
    );
    nbt.insert(
        "TileEntities",
        compound_list(region.tile_entities.iter().map(payload_to_compound)),
    );
    nbt.insert("PendingBlockTicks", NbtList::new());
    nbt.insert("PendingFluidTicks", NbtList::new());
    nbt
}

// ─── Format Registration ────────────────────────────────────────────────────

pub struct LitematicFormat;

impl NativeFormat for LitematicFormat {
    fn tag(&self) -> FormatTag {
        FormatTag::Litematica
    }

    fn detect(&self, root: &NbtCompound) -> bool {
        has_keys(root, &["Metadata", "Regions"])
    }

    fn bind(&self, root: &NbtCompound) -> Result<NativeSchema> {
        LitematicSchematic::from_nbt(root).map(NativeSchema::Litematica)
    }

    fn from_canonical(
        &self,
        structure: &CanonicalStructure,
        settings: &Settings,
    ) -> Result<NativeSchema> {
        LitematicSchematic::from_canonical(structure, settings).map(NativeSchema::Litematica)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::StandardUnit;
    use crate::codec::PackingLayout;
    use crate::payload::{doubles, floats, NbtValue};

    fn region_with(size: [i32; 3], palette: &[&str], cells: &[u32]) -> NbtCompound {
        let states: Vec<BlockState> = palette.iter().map(|n| BlockState::new(*n)).collect();
        let region = LitematicRegion {
            position: [10, 64, -5],
            size,
            block_states: pack_aligned(cells, bits_for_palette(states.len())),
            palette: states,
            entities: Vec::new(),
            tile_entities: Vec::new(),
        };
        region_nbt(&region)
    }

    fn schematic_root(region: NbtCompound) -> NbtCompound {
        let mut metadata = NbtCompound::new();
        metadata.insert("Name", "Test".to_string());
        metadata.insert("TotalBlocks", NbtTag::Int(1));
        let mut regions = NbtCompound::new();
        regions.insert("main", region);
        let mut root = NbtCompound::new();
        root.insert("Version", NbtTag::Int(6));
        root.insert("MinecraftDataVersion", NbtTag::Int(3700));
        root.insert("Metadata", metadata);
        root.insert("Regions", regions);
        root
    }

    #[test]
    fn test_single_stone_block() {
        let root = schematic_root(region_with(
            [1, 1, 1],
            &["minecraft:air", "minecraft:stone"],
            &[1],
        ));
        assert!(LitematicFormat.detect(&root));
        let structure = LitematicSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();

        assert_eq!(structure.blocks.len(), 1);
        assert_eq!(
            structure.blocks[0],
            StandardUnit::Block {
                position: [0, 0, 0],
                palette_index: 1,
                payload: None
            }
        );
        assert_eq!(structure.palette_name(1), Some("minecraft:stone"));
        assert_eq!(structure.position, [10, 64, -5]);
        assert_eq!(structure.metadata.name, "Test");
        assert_eq!(structure.data_version, 3700);
    }

    #[test]
    fn test_negative_size_is_normalized() {
        let cells = [1, 0, 0, 2, 0, 0];
        let root = schematic_root(region_with(
            [1, -3, 2],
            &["minecraft:air", "minecraft:stone", "minecraft:dirt"],
            &cells,
        ));
        let structure = LitematicSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(structure.size, [1, 3, 2]);
        assert_eq!(structure.negative_axes, [false, true, false]);
        let positions: Vec<_> = structure
            .blocks
            .iter()
            .filter_map(StandardUnit::block_position)
            .collect();
        // index 3 with size x=1, z=2 -> y=1, z=1
        assert_eq!(positions, vec![[0, 0, 0], [0, 1, 1]]);

        let back = LitematicSchematic::from_canonical(&structure, &Settings::default()).unwrap();
        assert_eq!(back.regions["main"].size, [1, -3, 2]);
    }

    #[test]
    fn test_reads_spanning_block_states() {
        // 64 cells at 3 bits: 3 words spanning, 4 aligned.
        let palette = ["minecraft:air", "a:1", "a:2", "a:3", "a:4"];
        let cells: Vec<u32> = (0..64).map(|i| (i % 5) as u32).collect();
        let mut words = vec![0u64; 3];
        for (i, &v) in cells.iter().enumerate() {
            let bit = i * 3;
            words[bit / 64] |= (v as u64) << (bit % 64);
            if bit % 64 + 3 > 64 {
                words[bit / 64 + 1] |= (v as u64) >> (64 - bit % 64);
            }
        }
        let mut region = region_with([4, 4, 4], &palette, &[]);
        region.insert(
            "BlockStates",
            NbtTag::LongArray(words.into_iter().map(|w| w as i64).collect()),
        );
        let schematic = LitematicSchematic::from_nbt(&schematic_root(region)).unwrap();

        let auto = schematic.to_canonical(&Settings::default()).unwrap();
        assert_eq!(auto.block_count(), cells.iter().filter(|&&c| c != 0).count());
        let expected: Vec<u32> = cells.iter().copied().filter(|&c| c != 0).collect();
        let decoded: Vec<u32> = auto.blocks.iter().filter_map(|u| u.palette_index()).collect();
        assert_eq!(decoded, expected);

        let settings = Settings {
            litematic_packing: PackingLayout::Aligned,
            ..Settings::default()
        };
        let aligned = schematic.to_canonical(&settings).unwrap();
        assert_ne!(
            aligned
                .blocks
                .iter()
                .filter_map(|u| u.palette_index())
                .collect::<Vec<_>>(),
            expected
        );
    }

    #[test]
    fn test_tile_entities_merge_and_fallback() {
        let mut chest = NbtCompound::new();
        chest.insert("id", "minecraft:chest".to_string());
        chest.insert("x", 0i32);
        chest.insert("y", 0i32);
        chest.insert("z", 0i32);

        // Grid present: the chest merges onto the block.
        let mut region = region_with([2, 1, 1], &["minecraft:air", "minecraft:chest"], &[1, 0]);
        region.insert("TileEntities", compound_list([chest.clone()]));
        let structure = LitematicSchematic::from_nbt(&schematic_root(region))
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(structure.blocks.len(), 1);
        assert!(matches!(
            &structure.blocks[0],
            StandardUnit::BlockWithTileEntity { id, .. } if id == "minecraft:chest"
        ));

        // No grid: a placeholder block is materialized under the chest.
        let mut region = region_with([2, 1, 1], &["minecraft:air"], &[]);
        region.insert("BlockStates", NbtTag::LongArray(Vec::new()));
        region.insert("TileEntities", compound_list([chest]));
        let structure = LitematicSchematic::from_nbt(&schematic_root(region))
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(structure.blocks.len(), 1);
        assert_eq!(structure.palette_name(1), Some("minecraft:stone"));
        assert_eq!(structure.blocks[0].palette_index(), Some(1));
    }

    #[test]
    fn test_entities_keep_payload_and_skip_incomplete() {
        let mut bat = Payload::new();
        bat.insert("id".into(), NbtValue::String("minecraft:bat".into()));
        bat.insert("Pos".into(), doubles(&[0.5, 1.0, 0.5]));
        bat.insert("Rotation".into(), floats(&[0.0, 0.0]));
        bat.insert("Motion".into(), doubles(&[0.0, 0.0, 0.0]));
        bat.insert("BatFlags".into(), NbtValue::Byte(1));
        let mut broken = bat.clone();
        broken.insert("Pos".into(), doubles(&[0.5]));

        let mut region = region_with([1, 1, 1], &["minecraft:air"], &[0]);
        region.insert(
            "Entities",
            compound_list([payload_to_compound(&bat), payload_to_compound(&broken)]),
        );
        let structure = LitematicSchematic::from_nbt(&schematic_root(region))
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        let entities: Vec<_> = structure.entities().collect();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "minecraft:bat");
        assert!(entities[0].payload.contains_key("BatFlags"));
    }

    #[test]
    fn test_roundtrip_through_nbt() {
        let cells = [0, 1, 2, 1, 0, 2, 2, 1];
        let root = schematic_root(region_with(
            [2, 2, 2],
            &["minecraft:air", "minecraft:stone", "minecraft:glass"],
            &cells,
        ));
        let first = LitematicSchematic::from_nbt(&root)
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        let native = LitematicSchematic::from_canonical(&first, &Settings::default()).unwrap();
        let second = LitematicSchematic::from_nbt(&native.to_nbt())
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(second.blocks, first.blocks);
        assert_eq!(second.palette, first.palette);
        assert_eq!(second.format_version, 6);
    }

    #[test]
    fn test_missing_size_is_malformed() {
        let mut region = region_with([1, 1, 1], &["minecraft:air"], &[0]);
        region.insert("Size", NbtTag::Int(3));
        assert!(matches!(
            LitematicSchematic::from_nbt(&schematic_root(region)),
            Err(Error::Malformed {
                format: FormatTag::Litematica,
                ..
            })
        ));
    }

    #[test]
    fn test_declared_size_is_bounded_by_block_states() {
        let mut region = region_with([1, 1, 1], &["minecraft:air", "minecraft:stone"], &[1]);
        region.insert("Size", xyz_tag([1 << 20, 1 << 20, 1 << 20]));
        let structure = LitematicSchematic::from_nbt(&schematic_root(region))
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(structure.block_count(), 1);
        assert_eq!(structure.blocks[0].block_position(), Some([0, 0, 0]));
    }

    #[test]
    fn test_unrepresentable_sizes_are_malformed() {
        let mut region = region_with([1, 1, 1], &["minecraft:air", "minecraft:stone"], &[1]);
        region.insert("Size", xyz_tag([i32::MIN, 1, 1]));
        let err = LitematicSchematic::from_nbt(&schematic_root(region)).unwrap_err();
        assert!(matches!(err, Error::Malformed { format: FormatTag::Litematica, .. }));

        let mut region = region_with([1, 1, 1], &["minecraft:air", "minecraft:stone"], &[1]);
        region.insert("Size", xyz_tag([i32::MAX, i32::MAX, -i32::MAX]));
        let err = LitematicSchematic::from_nbt(&schematic_root(region))
            .unwrap()
            .to_canonical(&Settings::default())
            .unwrap_err();
        assert!(matches!(err, Error::Malformed { format: FormatTag::Litematica, .. }));
    }

    #[test]
    fn test_metadata_totals_saturate() {
        let mut schematic = LitematicSchematic::from_nbt(&schematic_root(region_with(
            [1, 1, 1],
            &["minecraft:air"],
            &[0],
        )))
        .unwrap();
        schematic.metadata.total_volume = 1 << 40;
        let metadata = schematic.metadata_nbt();
        assert_eq!(metadata.get::<_, i32>("TotalVolume").unwrap(), i32::MAX);
        assert_eq!(metadata.get::<_, i32>("TotalBlocks").unwrap(), 1);
    }
}
