pub mod create;
pub mod litematic;
pub mod manager;
pub mod region;
pub mod world;
pub mod worldedit;

use crate::canonical::CanonicalStructure;
use crate::compression::{encode_tree, Compression};
use crate::error::{Error, Result};
use crate::payload::{payload_from_compound, serialize_compound, Payload};
use crate::settings::Settings;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use create::CreateSchematic;
use litematic::LitematicSchematic;
use region::ContainerChunks;
use world::WorldSave;
use worldedit::WorldEditSchematic;

// ─── Format Tags ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Litematica,
    WorldEdit,
    Create,
    WorldSave,
    Canonical,
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormatTag::Litematica => "litematica",
            FormatTag::WorldEdit => "worldedit",
            FormatTag::Create => "create",
            FormatTag::WorldSave => "worldsave",
            FormatTag::Canonical => "canonical",
        };
        f.write_str(name)
    }
}

/// Parses a conversion target name. World saves are not a target.
impl FromStr for FormatTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "litematica" | "litematic" => Ok(FormatTag::Litematica),
            "worldedit" | "schem" | "sponge" => Ok(FormatTag::WorldEdit),
            "create" | "structure" => Ok(FormatTag::Create),
            "canonical" | "standard" | "json" => Ok(FormatTag::Canonical),
            _ => Err(Error::UnsupportedTarget(s.to_string())),
        }
    }
}

// ─── Decoded Input ──────────────────────────────────────────────────────────

/// Whatever `parse_file` produced before any schema was chosen.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Decoded {
    Tree(#[serde(serialize_with = "serialize_compound")] NbtCompound),
    Container(ContainerChunks),
    World(WorldSave),
}

// ─── Native Schemas ─────────────────────────────────────────────────────────

/// A structure bound to one concrete native layout.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NativeSchema {
    Litematica(LitematicSchematic),
    WorldEdit(WorldEditSchematic),
    Create(CreateSchematic),
    WorldSave(WorldSave),
    Canonical(CanonicalStructure),
}

impl NativeSchema {
    pub fn tag(&self) -> FormatTag {
        match self {
            NativeSchema::Litematica(_) => FormatTag::Litematica,
            NativeSchema::WorldEdit(_) => FormatTag::WorldEdit,
            NativeSchema::Create(_) => FormatTag::Create,
            NativeSchema::WorldSave(_) => FormatTag::WorldSave,
            NativeSchema::Canonical(_) => FormatTag::Canonical,
        }
    }

    pub fn to_canonical(&self) -> Result<CanonicalStructure> {
        self.to_canonical_with(&Settings::default())
    }

    pub fn to_canonical_with(&self, settings: &Settings) -> Result<CanonicalStructure> {
        match self {
            NativeSchema::Litematica(schematic) => schematic.to_canonical(settings),
            NativeSchema::WorldEdit(schematic) => schematic.to_canonical(settings),
            NativeSchema::Create(schematic) => schematic.to_canonical(settings),
            NativeSchema::WorldSave(world) => world.to_canonical(settings),
            NativeSchema::Canonical(structure) => Ok(structure.clone()),
        }
    }

    /// The native tree. The canonical form has none.
    pub fn to_nbt(&self) -> Result<NbtCompound> {
        match self {
            NativeSchema::Litematica(schematic) => Ok(schematic.to_nbt()),
            NativeSchema::WorldEdit(schematic) => Ok(schematic.to_nbt()),
            NativeSchema::Create(schematic) => Ok(schematic.to_nbt()),
            NativeSchema::WorldSave(world) => Ok(world.to_nbt()),
            NativeSchema::Canonical(_) => Err(Error::UnsupportedTarget(
                "canonical structures have no NBT form".to_string(),
            )),
        }
    }

    /// File bytes: a gzip-compressed tree, or pretty JSON for the canonical form.
    pub fn to_bytes(&self, settings: &Settings) -> Result<Vec<u8>> {
        match self {
            NativeSchema::Canonical(structure) => {
                serde_json::to_vec_pretty(structure).map_err(Error::from)
            }
            native => encode_tree(&native.to_nbt()?, Compression::Gzip, settings.compression_level),
        }
    }
}

// ─── Tree Reading Helpers ───────────────────────────────────────────────────

fn tag_i64(tag: &NbtTag) -> Option<i64> {
    match tag {
        NbtTag::Byte(v) => Some(*v as i64),
        NbtTag::Short(v) => Some(*v as i64),
        NbtTag::Int(v) => Some(*v as i64),
        NbtTag::Long(v) => Some(*v),
        _ => None,
    }
}

/// Integer field of any width.
pub(crate) fn int(compound: &NbtCompound, key: &str) -> Option<i64> {
    compound.inner().get(key).and_then(tag_i64)
}

pub(crate) fn int_or(compound: &NbtCompound, key: &str, default: i32) -> i32 {
    int(compound, key).map_or(default, |v| v as i32)
}

/// Unsigned short dimensions are stored in signed NBT shorts.
pub(crate) fn dimension(compound: &NbtCompound, key: &str) -> Option<i32> {
    match compound.inner().get(key)? {
        NbtTag::Short(v) => Some(*v as u16 as i32),
        tag => tag_i64(tag).map(|v| v as i32),
    }
}

pub(crate) fn string(compound: &NbtCompound, key: &str) -> String {
    compound
        .get::<_, &str>(key)
        .map(str::to_string)
        .unwrap_or_default()
}

/// `{x, y, z}` compound.
pub(crate) fn xyz(compound: &NbtCompound, key: &str) -> Option<[i32; 3]> {
    let vec = compound.get::<_, &NbtCompound>(key).ok()?;
    Some([
        int(vec, "x")? as i32,
        int(vec, "y")? as i32,
        int(vec, "z")? as i32,
    ])
}

pub(crate) fn xyz_tag(value: [i32; 3]) -> NbtCompound {
    let mut vec = NbtCompound::new();
    vec.insert("x", value[0]);
    vec.insert("y", value[1]);
    vec.insert("z", value[2]);
    vec
}

/// Integer triple from a list or int array.
pub(crate) fn int_triple(compound: &NbtCompound, key: &str) -> Option<[i32; 3]> {
    let values: Vec<i64> = match compound.inner().get(key)? {
        NbtTag::IntArray(arr) => arr.iter().map(|v| *v as i64).collect(),
        NbtTag::List(list) => list.iter().map(tag_i64).collect::<Option<_>>()?,
        _ => return None,
    };
    (values.len() >= 3).then(|| [values[0] as i32, values[1] as i32, values[2] as i32])
}

pub(crate) fn compounds<'a>(compound: &'a NbtCompound, key: &str) -> Vec<&'a NbtCompound> {
    match compound.get::<_, &NbtList>(key) {
        Ok(list) => list
            .iter()
            .filter_map(|tag| match tag {
                NbtTag::Compound(c) => Some(c),
                _ => None,
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

pub(crate) fn payloads(compound: &NbtCompound, key: &str) -> Vec<Payload> {
    compounds(compound, key)
        .into_iter()
        .map(payload_from_compound)
        .collect()
}

pub(crate) fn compound_list<I>(items: I) -> NbtList
where
    I: IntoIterator,
    I::Item: Into<NbtTag>,
{
    NbtList::from(items.into_iter().map(Into::into).collect::<Vec<NbtTag>>())
}

pub(crate) fn has_keys(root: &NbtCompound, keys: &[&str]) -> bool {
    keys.iter().all(|key| root.inner().contains_key(*key))
}

/// Native version written for a target: kept when converting back into the
/// source format, otherwise the target's default.
pub(crate) fn version_for(structure: &CanonicalStructure, target: FormatTag, default: i32) -> i32 {
    if structure.original_format == target {
        structure.format_version
    } else {
        default
    }
}
