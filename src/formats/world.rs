use crate::block_state::BlockState;
use crate::canonical::{CanonicalStructure, Metadata, PositionKind, UnitBuilder};
use crate::codec::{unpack_section, Extent};
use crate::compression::decode_tree;
use crate::entity::{EntityRecord, TileEntityRecord};
use crate::error::{Error, Result};
use crate::formats::manager::NativeFormat;
use crate::formats::region::{decode_container, parse_region_filename, Chunk, ContainerChunks};
use crate::formats::{compounds, has_keys, int, int_or, payloads, string, FormatTag, NativeSchema};
use crate::payload::{serialize_compound, Payload};
use crate::settings::{Settings, WorldBounds};
use quartz_nbt::{NbtCompound, NbtTag};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ─── Types ──────────────────────────────────────────────────────────────────

/// A world save directory decoded into trees: `level.dat` plus every region
/// and entity container, keyed by file name.
#[derive(Debug, Clone, Serialize)]
pub struct WorldSave {
    #[serde(rename = "level.dat", serialize_with = "serialize_compound")]
    pub level_dat: NbtCompound,
    pub regions: BTreeMap<String, ContainerChunks>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub entities: BTreeMap<String, ContainerChunks>,
}

// ─── Directory Decoding ─────────────────────────────────────────────────────

fn mca_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|source| Error::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "mca") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Decode each container; one that cannot be opened is logged and left out.
fn decode_containers(files: &[PathBuf], parallel: bool) -> BTreeMap<String, ContainerChunks> {
    let decode = |path: &PathBuf| match decode_container(path) {
        Ok(chunks) => Some((file_name(path), chunks)),
        Err(e) => {
            log::warn!("Skipping container: {}", e);
            None
        }
    };
    if parallel {
        files.par_iter().filter_map(decode).collect()
    } else {
        files.iter().filter_map(decode).collect()
    }
}

/// Decode `level.dat`, `region/*.mca` and, when present, `entities/*.mca`.
pub fn decode_world_save(dir: impl AsRef<Path>, settings: &Settings) -> Result<WorldSave> {
    let dir = dir.as_ref();
    let span = tracing::info_span!("world_save", path = %dir.display());
    let _enter = span.enter();

    let level_path = dir.join("level.dat");
    let level_bytes = std::fs::read(&level_path).map_err(|source| Error::Unreadable {
        path: level_path.clone(),
        source,
    })?;
    let level_dat = decode_tree(&level_bytes).map_err(|e| Error::in_file(&level_path, e))?;

    let region_files = mca_files(&dir.join("region"))?;
    let regions = decode_containers(&region_files, settings.parallel);

    let entities_dir = dir.join("entities");
    let entities = if entities_dir.is_dir() {
        decode_containers(&mca_files(&entities_dir)?, settings.parallel)
    } else {
        BTreeMap::new()
    };

    log::debug!(
        "Decoded {} region and {} entity containers",
        regions.len(),
        entities.len()
    );
    Ok(WorldSave {
        level_dat,
        regions,
        entities,
    })
}

/// Block coordinate of `local` within the 16-wide span `chunk`.
fn block_coord(chunk: i32, local: usize) -> Option<i32> {
    chunk.checked_mul(16)?.checked_add(local as i32)
}

/// Chunk slot `(i, j)` back from a `chunk_{i}_{j}` key.
fn parse_chunk_key(key: &str) -> Option<(i32, i32)> {
    let (i, j) = key.strip_prefix("chunk_")?.split_once('_')?;
    Some((i.parse().ok()?, j.parse().ok()?))
}

// ─── Envelope Tree ──────────────────────────────────────────────────────────

fn containers_to_nbt(containers: &BTreeMap<String, ContainerChunks>) -> NbtCompound {
    let mut files = NbtCompound::new();
    for (name, chunks) in containers {
        let mut file = NbtCompound::new();
        for (key, chunk) in chunks {
            if let Chunk::Decoded(tree) = chunk {
                file.insert(key.clone(), tree.clone());
            }
        }
        files.insert(name.clone(), file);
    }
    files
}

fn containers_from_nbt(files: &NbtCompound) -> BTreeMap<String, ContainerChunks> {
    files
        .inner()
        .iter()
        .filter_map(|(name, tag)| match tag {
            NbtTag::Compound(file) => {
                let chunks = file
                    .inner()
                    .iter()
                    .filter_map(|(key, tag)| match tag {
                        NbtTag::Compound(tree) => Some((key.clone(), Chunk::Decoded(tree.clone()))),
                        _ => None,
                    })
                    .collect();
                Some((name.clone(), chunks))
            }
            _ => None,
        })
        .collect()
}

impl WorldSave {
    pub fn from_nbt(root: &NbtCompound) -> Result<Self> {
        let level_dat = root
            .get::<_, &NbtCompound>("level.dat")
            .map_err(|_| Error::malformed(FormatTag::WorldSave, "level.dat is not a compound"))?;
        let regions = root
            .get::<_, &NbtCompound>("regions")
            .map_err(|_| Error::malformed(FormatTag::WorldSave, "regions is not a compound"))?;
        Ok(WorldSave {
            level_dat: level_dat.clone(),
            regions: containers_from_nbt(regions),
            entities: root
                .get::<_, &NbtCompound>("entities")
                .map(containers_from_nbt)
                .unwrap_or_default(),
        })
    }

    /// The envelope as one tree. Failed chunks are left out.
    pub fn to_nbt(&self) -> NbtCompound {
        let mut root = NbtCompound::new();
        root.insert("level.dat", self.level_dat.clone());
        root.insert("regions", containers_to_nbt(&self.regions));
        if !self.entities.is_empty() {
            root.insert("entities", containers_to_nbt(&self.entities));
        }
        root
    }

    /// `Data` from level.dat, or the root for bare files.
    fn level_data(&self) -> &NbtCompound {
        self.level_dat
            .get::<_, &NbtCompound>("Data")
            .unwrap_or(&self.level_dat)
    }

    pub fn to_canonical(&self, settings: &Settings) -> Result<CanonicalStructure> {
        let mut collector = WorldCollector::new(settings.world_bounds);

        for (file, chunks) in &self.regions {
            let region = parse_region_filename(file).unwrap_or_else(|| {
                log::debug!("{} is not named r.<x>.<z>.mca; assuming region 0, 0", file);
                (0, 0)
            });
            for (key, chunk) in chunks {
                if let Some(tree) = chunk.tree() {
                    collector.add_chunk(region, key, tree);
                }
            }
        }
        for chunks in self.entities.values() {
            for tree in chunks.values().filter_map(Chunk::tree) {
                collector.add_entities(payloads(tree, "Entities"));
            }
        }

        let data = self.level_data();
        let metadata = Metadata {
            name: string(data, "LevelName"),
            time_modified: int(data, "LastPlayed").unwrap_or(0),
            ..Metadata::default()
        };
        let mut structure = collector.finish();
        structure.metadata = metadata;
        structure.data_version = int_or(data, "DataVersion", 0);
        structure.format_version = int_or(data, "version", 0);
        Ok(structure)
    }
}

// ─── Chunk Walking ──────────────────────────────────────────────────────────

/// One chunk section: palette, cell indices and section Y.
struct Section {
    y: i32,
    palette: Vec<BlockState>,
    cells: Vec<u32>,
}

fn section_palette(tags: Vec<&NbtCompound>) -> Vec<BlockState> {
    tags.into_iter()
        .map(|tag| BlockState::from_nbt(tag).unwrap_or_else(BlockState::air))
        .collect()
}

fn section_cells(palette_len: usize, words: Option<&[i64]>) -> Vec<u32> {
    unpack_section(words.unwrap_or_default(), palette_len)
}

/// 1.18+: `sections[].block_states{palette, data}`.
fn modern_sections(chunk: &NbtCompound) -> Vec<Section> {
    compounds(chunk, "sections")
        .into_iter()
        .filter_map(|section| {
            let states = section.get::<_, &NbtCompound>("block_states").ok()?;
            let palette = section_palette(compounds(states, "palette"));
            if palette.is_empty() {
                return None;
            }
            let cells = section_cells(palette.len(), states.get::<_, &[i64]>("data").ok());
            Some(Section {
                y: int(section, "Y")? as i32,
                palette,
                cells,
            })
        })
        .collect()
}

/// 1.16–1.17: `Level.Sections[].Palette/BlockStates`.
fn legacy_sections(level: &NbtCompound) -> Vec<Section> {
    compounds(level, "Sections")
        .into_iter()
        .filter_map(|section| {
            let palette = section_palette(compounds(section, "Palette"));
            if palette.is_empty() {
                return None;
            }
            let cells = section_cells(palette.len(), section.get::<_, &[i64]>("BlockStates").ok());
            Some(Section {
                y: int(section, "Y")? as i32,
                palette,
                cells,
            })
        })
        .collect()
}

struct WorldCollector {
    bounds: Option<WorldBounds>,
    palette: FxHashMap<BlockState, u32>,
    blocks: Vec<([i32; 3], u32)>,
    tiles: Vec<TileEntityRecord>,
    entities: Vec<EntityRecord>,
}

impl WorldCollector {
    fn new(bounds: Option<WorldBounds>) -> Self {
        let mut palette = FxHashMap::default();
        palette.insert(BlockState::air(), 0);
        WorldCollector {
            bounds,
            palette,
            blocks: Vec::new(),
            tiles: Vec::new(),
            entities: Vec::new(),
        }
    }

    fn in_bounds(&self, pos: [i32; 3]) -> bool {
        self.bounds.map_or(true, |bounds| bounds.contains(pos))
    }

    fn intern(&mut self, state: &BlockState) -> u32 {
        if state.is_air() {
            return 0;
        }
        if let Some(&index) = self.palette.get(state) {
            return index;
        }
        let index = self.palette.len() as u32;
        self.palette.insert(state.clone(), index);
        index
    }

    fn add_chunk(&mut self, region: (i32, i32), key: &str, tree: &NbtCompound) {
        let level = tree.get::<_, &NbtCompound>("Level").ok();
        let root = level.unwrap_or(tree);
        let slot = parse_chunk_key(key).unwrap_or((0, 0));
        let chunk_x = int(root, "xPos")
            .map_or(region.0.saturating_mul(32).saturating_add(slot.0), |v| v as i32);
        let chunk_z = int(root, "zPos")
            .map_or(region.1.saturating_mul(32).saturating_add(slot.1), |v| v as i32);

        let sections = match level {
            Some(level) => legacy_sections(level),
            None => modern_sections(tree),
        };
        for section in &sections {
            // Translate the section palette once.
            let indices: Vec<u32> = section.palette.iter().map(|s| self.intern(s)).collect();
            for (i, &native) in section.cells.iter().enumerate() {
                let Some(&index) = indices.get(native as usize) else {
                    continue;
                };
                if index == 0 {
                    continue;
                }
                let (Some(x), Some(y), Some(z)) = (
                    block_coord(chunk_x, i & 15),
                    block_coord(section.y, i >> 8),
                    block_coord(chunk_z, (i >> 4) & 15),
                ) else {
                    log::warn!(
                        "Skipping section {} of {}: coordinates out of range",
                        section.y,
                        key
                    );
                    break;
                };
                let pos = [x, y, z];
                if self.in_bounds(pos) {
                    self.blocks.push((pos, index));
                }
            }
        }

        let tile_key = if level.is_some() {
            "TileEntities"
        } else {
            "block_entities"
        };
        for payload in payloads(root, tile_key) {
            match TileEntityRecord::from_payload(&payload) {
                Some(tile) if self.in_bounds(tile.position) => self.tiles.push(tile),
                Some(_) => {}
                None => log::warn!("Skipping block entity without a position in {}", key),
            }
        }
        if level.is_some() {
            self.add_entities(payloads(root, "Entities"));
        }
    }

    fn add_entities(&mut self, payloads: Vec<Payload>) {
        for payload in payloads {
            let Some(entity) = EntityRecord::from_payload(&payload) else {
                continue;
            };
            if self
                .bounds
                .map_or(true, |bounds| bounds.contains_point(entity.position))
            {
                self.entities.push(entity);
            }
        }
    }

    fn finish(self) -> CanonicalStructure {
        let occupied = self
            .blocks
            .iter()
            .map(|(pos, _)| *pos)
            .chain(self.tiles.iter().map(|tile| tile.position));
        let (min, max) = occupied.fold(None, |acc: Option<([i32; 3], [i32; 3])>, pos| {
            Some(match acc {
                None => (pos, pos),
                Some((min, max)) => (
                    [0, 1, 2].map(|a| min[a].min(pos[a])),
                    [0, 1, 2].map(|a| max[a].max(pos[a])),
                ),
            })
        })
        .unwrap_or(([0; 3], [-1; 3]));
        // Spans wider than i32 saturate; blocks past the saturated size are dropped.
        let distance = |from: i32, to: i32| (to as i64 - from as i64).min(i32::MAX as i64) as i32;
        let size = [0, 1, 2].map(|a| distance(min[a], max[a]).saturating_add(1));
        let relative = |pos: [i32; 3]| [0, 1, 2].map(|a| distance(min[a], pos[a]));

        let [x, y, z] = size.map(|v| v as usize);
        let mut units = UnitBuilder::new(Extent::new(x, y, z));
        for (pos, index) in &self.blocks {
            units.push_block(relative(*pos), *index, None);
        }
        for mut tile in self.tiles {
            tile.position = relative(tile.position);
            units.push_tile_entity(tile);
        }
        for mut entity in self.entities {
            entity.position = [0, 1, 2].map(|a| entity.position[a] - min[a] as f64);
            units.push_entity(entity);
        }

        let palette: BTreeMap<u32, BlockState> = self
            .palette
            .into_iter()
            .map(|(state, index)| (index, state))
            .collect();
        log::debug!(
            "Collected {} blocks with {} palette entries",
            self.blocks.len(),
            palette.len()
        );

        CanonicalStructure {
            metadata: Metadata::default(),
            data_version: 0,
            format_version: 0,
            size,
            negative_axes: [false; 3],
            position: min,
            position_kind: PositionKind::WorldMinimum,
            palette,
            blocks: units.finish(),
            original_format: FormatTag::WorldSave,
        }
    }
}

// ─── Format Registration ────────────────────────────────────────────────────

pub struct WorldSaveFormat;

impl NativeFormat for WorldSaveFormat {
    fn tag(&self) -> FormatTag {
        FormatTag::WorldSave
    }

    fn detect(&self, root: &NbtCompound) -> bool {
        has_keys(root, &["level.dat", "regions"])
    }

    fn bind(&self, root: &NbtCompound) -> Result<NativeSchema> {
        WorldSave::from_nbt(root).map(NativeSchema::WorldSave)
    }

    fn from_canonical(
        &self,
        _structure: &CanonicalStructure,
        _settings: &Settings,
    ) -> Result<NativeSchema> {
        Err(Error::UnsupportedTarget(FormatTag::WorldSave.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{pack_section, SECTION_VOLUME};
    use crate::formats::compound_list;
    use crate::payload::{doubles, floats, payload_to_compound, NbtValue};

    fn level_dat() -> NbtCompound {
        let mut data = NbtCompound::new();
        data.insert("LevelName", "Test World".to_string());
        data.insert("DataVersion", NbtTag::Int(3700));
        data.insert("version", NbtTag::Int(19133));
        data.insert("LastPlayed", NbtTag::Long(1_700_000_000_000));
        let mut root = NbtCompound::new();
        root.insert("Data", data);
        root
    }

    /// Section cells with `stone` at the given local indices.
    fn section(y: i8, stone_at: &[usize], modern: bool) -> NbtCompound {
        let mut cells = vec![0u32; SECTION_VOLUME];
        for &i in stone_at {
            cells[i] = 1;
        }
        let palette = compound_list([
            BlockState::air().to_nbt(),
            BlockState::new("minecraft:stone").to_nbt(),
        ]);
        let data = NbtTag::LongArray(pack_section(&cells, 2));
        let mut section = NbtCompound::new();
        section.insert("Y", NbtTag::Byte(y));
        if modern {
            let mut states = NbtCompound::new();
            states.insert("palette", palette);
            states.insert("data", data);
            section.insert("block_states", states);
        } else {
            section.insert("Palette", palette);
            section.insert("BlockStates", data);
        }
        section
    }

    fn modern_chunk(x: i32, z: i32, stone_at: &[usize]) -> NbtCompound {
        let mut chunk = NbtCompound::new();
        chunk.insert("DataVersion", NbtTag::Int(3700));
        chunk.insert("xPos", NbtTag::Int(x));
        chunk.insert("zPos", NbtTag::Int(z));
        chunk.insert("sections", compound_list([section(0, stone_at, true)]));
        chunk
    }

    fn world(chunks: Vec<(&str, NbtCompound)>) -> WorldSave {
        let file: ContainerChunks = chunks
            .into_iter()
            .map(|(key, tree)| (key.to_string(), Chunk::Decoded(tree)))
            .collect();
        let mut regions = BTreeMap::new();
        regions.insert("r.0.0.mca".to_string(), file);
        WorldSave {
            level_dat: level_dat(),
            regions,
            entities: BTreeMap::new(),
        }
    }

    #[test]
    fn test_modern_chunk_to_canonical() {
        // Local index: x + z*16 + y*256.
        let save = world(vec![("chunk_1_0", modern_chunk(1, 0, &[0, 1 + 2 * 16 + 3 * 256]))]);
        let structure = save.to_canonical(&Settings::default()).unwrap();

        assert_eq!(structure.metadata.name, "Test World");
        assert_eq!(structure.data_version, 3700);
        assert_eq!(structure.format_version, 19133);
        assert_eq!(structure.position, [16, 0, 0]);
        assert_eq!(structure.size, [2, 4, 3]);
        assert_eq!(structure.palette.len(), 2);
        let positions: Vec<_> = structure
            .blocks
            .iter()
            .filter_map(|u| u.block_position())
            .collect();
        assert_eq!(positions, vec![[0, 0, 0], [1, 3, 2]]);
    }

    #[test]
    fn test_legacy_chunk_layout() {
        let mut level = NbtCompound::new();
        level.insert("xPos", NbtTag::Int(0));
        level.insert("zPos", NbtTag::Int(0));
        level.insert("Sections", compound_list([section(1, &[5], false)]));
        let mut chest = NbtCompound::new();
        chest.insert("id", "minecraft:chest".to_string());
        chest.insert("x", NbtTag::Int(5));
        chest.insert("y", NbtTag::Int(16));
        chest.insert("z", NbtTag::Int(0));
        level.insert("TileEntities", compound_list([chest]));
        let mut chunk = NbtCompound::new();
        chunk.insert("DataVersion", NbtTag::Int(2730));
        chunk.insert("Level", level);

        let structure = world(vec![("chunk_0_0", chunk)])
            .to_canonical(&Settings::default())
            .unwrap();
        assert_eq!(structure.position, [5, 16, 0]);
        assert_eq!(structure.block_count(), 1);
        assert_eq!(
            structure.blocks[0].tile_entity().map(|t| t.id),
            Some("minecraft:chest".to_string())
        );
    }

    #[test]
    fn test_bounds_filter_blocks_and_entities() {
        let mut save = world(vec![("chunk_0_0", modern_chunk(0, 0, &[0, 8]))]);
        let mut pig = Payload::new();
        pig.insert("id".into(), NbtValue::String("minecraft:pig".into()));
        pig.insert("Pos".into(), doubles(&[100.5, 0.0, 0.5]));
        pig.insert("Rotation".into(), floats(&[0.0, 0.0]));
        pig.insert("Motion".into(), doubles(&[0.0, 0.0, 0.0]));
        let mut entity_chunk = NbtCompound::new();
        entity_chunk.insert("Entities", compound_list([payload_to_compound(&pig)]));
        let mut file = ContainerChunks::new();
        file.insert("chunk_0_0".to_string(), Chunk::Decoded(entity_chunk));
        save.entities.insert("r.0.0.mca".to_string(), file);

        let all = save.to_canonical(&Settings::default()).unwrap();
        assert_eq!(all.block_count(), 2);
        assert_eq!(all.entities().count(), 1);

        let settings = Settings {
            world_bounds: Some(WorldBounds {
                min: [0, 0, 0],
                max: [3, 15, 15],
            }),
            ..Settings::default()
        };
        let cropped = save.to_canonical(&settings).unwrap();
        assert_eq!(cropped.block_count(), 1);
        assert_eq!(cropped.entities().count(), 0);
    }

    #[test]
    fn test_envelope_roundtrip_and_detection() {
        let mut save = world(vec![("chunk_0_0", modern_chunk(0, 0, &[0]))]);
        save.regions
            .get_mut("r.0.0.mca")
            .unwrap()
            .insert(
                "chunk_1_0".to_string(),
                Chunk::Failed {
                    error: "bad".to_string(),
                },
            );
        let tree = save.to_nbt();
        assert!(WorldSaveFormat.detect(&tree));
        let back = WorldSave::from_nbt(&tree).unwrap();
        assert_eq!(back.regions["r.0.0.mca"].len(), 1);
        assert!(back.entities.is_empty());
        assert!(matches!(
            WorldSaveFormat.from_canonical(
                &back.to_canonical(&Settings::default()).unwrap(),
                &Settings::default()
            ),
            Err(Error::UnsupportedTarget(_))
        ));
    }

    #[test]
    fn test_empty_world() {
        let mut save = world(vec![]);
        save.level_dat = NbtCompound::new();
        save.regions
            .get_mut("r.0.0.mca")
            .unwrap()
            .insert("chunk_0_0".to_string(), Chunk::Decoded(NbtCompound::new()));
        let structure = save.to_canonical(&Settings::default()).unwrap();
        assert_eq!(structure.size, [0, 0, 0]);
        assert!(structure.blocks.is_empty());
    }
}
