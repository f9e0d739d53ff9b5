use crate::compression::{decode_tree, encode_tree, read_raw_tree, Compression, ZLIB_MARKER};
use crate::error::{Error, Result};
use crate::payload::serialize_compound;
use quartz_nbt::NbtCompound;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const SECTOR_SIZE: usize = 4096;
/// Location table plus timestamp table.
pub const HEADER_SIZE: usize = 2 * SECTOR_SIZE;
/// Sectors per side of a region.
pub const REGION_WIDTH: usize = 32;

const RAW_MARKER: u8 = 3;
const LZ4_MARKER: u8 = 4;

// ─── Read Path ──────────────────────────────────────────────────────────────

/// A region container held in memory: 8 KiB of tables followed by 4 KiB sectors.
#[derive(Debug, Clone)]
pub struct RegionFile {
    data: Vec<u8>,
}

impl RegionFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| Error::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(data).map_err(|e| Error::in_file(path, e))
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::EmptyData);
        }
        if data.len() < HEADER_SIZE {
            return Err(Error::Region(format!(
                "header needs {} bytes, file has {}",
                HEADER_SIZE,
                data.len()
            )));
        }
        Ok(RegionFile { data })
    }

    /// (first sector, sector count) from the location table.
    fn location(&self, i: usize, j: usize) -> Option<(usize, usize)> {
        if i >= REGION_WIDTH || j >= REGION_WIDTH {
            return None;
        }
        let entry = (i + j * REGION_WIDTH) * 4;
        let offset = ((self.data[entry] as usize) << 16)
            | ((self.data[entry + 1] as usize) << 8)
            | (self.data[entry + 2] as usize);
        let count = self.data[entry + 3] as usize;
        // Sectors 0 and 1 are the tables.
        (offset >= 2 && count > 0).then_some((offset, count))
    }

    pub fn exists_sector(&self, i: usize, j: usize) -> bool {
        self.location(i, j).is_some()
    }

    /// Last-modified time from the timestamp table.
    pub fn timestamp(&self, i: usize, j: usize) -> u32 {
        if i >= REGION_WIDTH || j >= REGION_WIDTH {
            return 0;
        }
        let entry = SECTOR_SIZE + (i + j * REGION_WIDTH) * 4;
        u32::from_be_bytes([
            self.data[entry],
            self.data[entry + 1],
            self.data[entry + 2],
            self.data[entry + 3],
        ])
    }

    /// Occupied slots in location-table order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..REGION_WIDTH * REGION_WIDTH)
            .map(|index| (index % REGION_WIDTH, index / REGION_WIDTH))
            .filter(|&(i, j)| self.exists_sector(i, j))
    }

    /// The sector body starting at its compression-type byte. Empty for an
    /// absent slot or a zero-length record.
    pub fn read_sector(&self, i: usize, j: usize) -> Result<&[u8]> {
        let Some((offset, _)) = self.location(i, j) else {
            return Ok(&[]);
        };
        let start = offset * SECTOR_SIZE;
        let header = self.data.get(start..start + 4).ok_or_else(|| {
            Error::Region(format!("sector ({}, {}) starts past the end of the file", i, j))
        })?;
        let length = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        self.data
            .get(start + 4..start + 4 + length)
            .ok_or_else(|| {
                Error::Region(format!(
                    "sector ({}, {}) declares {} bytes past the end of the file",
                    i, j, length
                ))
            })
    }
}

/// Decode one sector body. Markers 1 and 2 go through the sniffer.
pub fn decode_sector(bytes: &[u8]) -> Result<NbtCompound> {
    match bytes.first() {
        None => Err(Error::EmptyData),
        Some(&RAW_MARKER) => read_raw_tree(&bytes[1..]),
        Some(&marker) if marker >= LZ4_MARKER => Err(Error::UnsupportedCompression(marker)),
        Some(_) => decode_tree(bytes),
    }
}

/// Visit every occupied, non-empty sector. Sectors that cannot be read are
/// logged and skipped; only opening the container can fail.
pub fn for_each_sector<F>(path: impl AsRef<Path>, mut visit: F) -> Result<()>
where
    F: FnMut(usize, usize, &[u8]),
{
    let path = path.as_ref();
    let region = RegionFile::open(path)?;
    for (i, j) in region.occupied() {
        match region.read_sector(i, j) {
            Ok([]) => continue,
            Ok(bytes) => visit(i, j, bytes),
            Err(e) => log::warn!("{}: skipping sector ({}, {}): {}", path.display(), i, j, e),
        }
    }
    Ok(())
}

/// One decoded sector.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Chunk {
    Decoded(#[serde(serialize_with = "serialize_compound")] NbtCompound),
    Failed { error: String },
}

impl Chunk {
    pub fn tree(&self) -> Option<&NbtCompound> {
        match self {
            Chunk::Decoded(tree) => Some(tree),
            Chunk::Failed { .. } => None,
        }
    }
}

/// Sectors keyed `chunk_{i}_{j}`.
pub type ContainerChunks = BTreeMap<String, Chunk>;

pub fn chunk_key(i: usize, j: usize) -> String {
    format!("chunk_{}_{}", i, j)
}

/// Decode every occupied sector. A sector that fails is recorded as
/// `Chunk::Failed` and logged.
pub fn decode_region(region: &RegionFile) -> ContainerChunks {
    let mut chunks = ContainerChunks::new();
    for (i, j) in region.occupied() {
        let decoded = region.read_sector(i, j).and_then(|bytes| {
            if bytes.is_empty() {
                Ok(None)
            } else {
                decode_sector(bytes).map(Some)
            }
        });
        let chunk = match decoded {
            Ok(Some(tree)) => Chunk::Decoded(tree),
            Ok(None) => continue,
            Err(e) => {
                let e = Error::Sector {
                    x: i,
                    z: j,
                    source: Box::new(e),
                };
                log::warn!("Failed to decode {}", e);
                Chunk::Failed {
                    error: e.to_string(),
                }
            }
        };
        chunks.insert(chunk_key(i, j), chunk);
    }
    chunks
}

pub fn decode_container(path: impl AsRef<Path>) -> Result<ContainerChunks> {
    let path = path.as_ref();
    let region = RegionFile::open(path)?;
    let chunks = decode_region(&region);
    log::debug!("{}: {} chunks", path.display(), chunks.len());
    Ok(chunks)
}

/// Region coordinates from an `r.<x>.<z>.mca` file name.
pub fn parse_region_filename(name: &str) -> Option<(i32, i32)> {
    let mut parts = name.strip_prefix("r.")?.strip_suffix(".mca")?.split('.');
    let x = parts.next()?.parse().ok()?;
    let z = parts.next()?.parse().ok()?;
    parts.next().is_none().then_some((x, z))
}

// ─── Write Path ─────────────────────────────────────────────────────────────

/// Builds a region container from per-slot trees.
#[derive(Debug, Clone)]
pub struct RegionWriter {
    /// Slot index → marker byte followed by the body.
    sectors: BTreeMap<usize, Vec<u8>>,
    level: u32,
}

impl RegionWriter {
    pub fn new() -> Self {
        RegionWriter {
            sectors: BTreeMap::new(),
            level: 6,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Stores `tree` zlib-compressed under marker 2.
    pub fn insert_tree(&mut self, i: usize, j: usize, tree: &NbtCompound) -> Result<()> {
        let mut body = vec![ZLIB_MARKER];
        body.extend(encode_tree(tree, Compression::Zlib, self.level)?);
        self.insert_raw(i, j, body)
    }

    /// Stores an already-marked body verbatim.
    pub fn insert_raw(&mut self, i: usize, j: usize, body: Vec<u8>) -> Result<()> {
        if i >= REGION_WIDTH || j >= REGION_WIDTH {
            return Err(Error::Region(format!("slot ({}, {}) is outside the region", i, j)));
        }
        self.sectors.insert(i + j * REGION_WIDTH, body);
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header = vec![0u8; HEADER_SIZE];
        let mut data = Vec::new();
        let mut next_sector = 2usize;

        for (&index, body) in &self.sectors {
            let length = body.len() as u32;
            let count = (body.len() + 4).div_ceil(SECTOR_SIZE);
            if count > u8::MAX as usize {
                return Err(Error::Region(format!(
                    "slot {} needs {} sectors, at most 255 fit",
                    index, count
                )));
            }

            let entry = index * 4;
            header[entry] = (next_sector >> 16) as u8;
            header[entry + 1] = (next_sector >> 8) as u8;
            header[entry + 2] = next_sector as u8;
            header[entry + 3] = count as u8;

            let start = data.len();
            data.extend_from_slice(&length.to_be_bytes());
            data.extend_from_slice(body);
            data.resize(start + count * SECTOR_SIZE, 0);
            next_sector += count;
        }

        header.extend(data);
        Ok(header)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

impl Default for RegionWriter {
    fn default() -> Self {
        Self::new()
    }
}
