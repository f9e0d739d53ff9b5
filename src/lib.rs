//! Decode Minecraft schematics (Litematica, WorldEdit, Create) and world saves,
//! and convert between them through one canonical structure.

pub mod aggregate;
pub mod block_state;
pub mod canonical;
pub mod codec;
pub mod compression;
pub mod entity;
pub mod error;
pub mod formats;
pub mod payload;
pub mod settings;

pub use aggregate::{aggregate, aggregate_file, BlockCount};
pub use block_state::BlockState;
pub use canonical::{CanonicalStructure, Metadata, PositionKind, StandardUnit};
pub use error::{Error, Result};
pub use formats::{Decoded, FormatTag, NativeSchema};
pub use payload::{NbtValue, Payload};
pub use settings::{Settings, WorldBounds};

use formats::manager::registry;
use formats::region::decode_container;
use formats::world::decode_world_save;
use std::path::Path;

/// Decode a file or world save directory with default settings.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Decoded> {
    parse_file_with(path, &Settings::default())
}

/// A directory is a world save, `.mca` is a region container and anything
/// else is a single, possibly compressed, tree.
pub fn parse_file_with(path: impl AsRef<Path>, settings: &Settings) -> Result<Decoded> {
    let path = path.as_ref();
    if path.is_dir() {
        return decode_world_save(path, settings).map(Decoded::World);
    }
    if path.extension().is_some_and(|ext| ext == "mca") {
        return decode_container(path).map(Decoded::Container);
    }
    let data = std::fs::read(path).map_err(|source| Error::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("Read {} bytes from {}", data.len(), path.display());
    decode_bytes(&data).map_err(|e| Error::in_file(path, e))
}

pub fn decode_bytes(data: &[u8]) -> Result<Decoded> {
    compression::decode_tree(data).map(Decoded::Tree)
}

/// Pick the native schema for a decoded input.
pub fn bind(decoded: &Decoded) -> Result<NativeSchema> {
    match decoded {
        Decoded::Tree(root) => registry().bind(root),
        Decoded::World(world) => Ok(NativeSchema::WorldSave(world.clone())),
        Decoded::Container(_) => Err(Error::UnknownFormat),
    }
}

pub fn convert_to_canonical(decoded: &Decoded) -> Result<CanonicalStructure> {
    convert_to_canonical_with(decoded, &Settings::default())
}

pub fn convert_to_canonical_with(
    decoded: &Decoded,
    settings: &Settings,
) -> Result<CanonicalStructure> {
    bind(decoded)?.to_canonical_with(settings)
}

/// Convert into a named target: `litematica`, `worldedit`, `create` or `canonical`.
pub fn convert_from_canonical(structure: &CanonicalStructure, target: &str) -> Result<NativeSchema> {
    convert_from_canonical_with(structure, target, &Settings::default())
}

pub fn convert_from_canonical_with(
    structure: &CanonicalStructure,
    target: &str,
    settings: &Settings,
) -> Result<NativeSchema> {
    let target: FormatTag = target.parse()?;
    registry().encode(structure, target, settings)
}
