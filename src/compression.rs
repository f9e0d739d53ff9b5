use crate::error::{Error, Result};
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use quartz_nbt::io::Flavor;
use quartz_nbt::NbtCompound;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::io::{Cursor, Read, Write};

// ─── Codec Detection ────────────────────────────────────────────────────────

/// Leading byte that marks a gzip body (region sector convention).
pub const GZIP_MARKER: u8 = 1;
/// Leading byte that marks a zlib body (region sector convention).
pub const ZLIB_MARKER: u8 = 2;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
const ZLIB_MAGIC_LEAD: u8 = 0x78;
const ZLIB_MAGIC_LEVELS: [u8; 3] = [0x01, 0x9C, 0xDA];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Zlib,
    Raw,
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zlib => write!(f, "zlib"),
            Compression::Raw => write!(f, "raw"),
        }
    }
}

/// Classify a blob and return the codec together with the body it applies to.
/// A one-byte marker is stripped from the body, a magic number is not.
pub fn sniff(data: &[u8]) -> Result<(Compression, &[u8])> {
    let first = *data.first().ok_or(Error::EmptyData)?;
    if first == GZIP_MARKER {
        return Ok((Compression::Gzip, &data[1..]));
    }
    if first == ZLIB_MARKER {
        return Ok((Compression::Zlib, &data[1..]));
    }
    if data.len() >= 2 {
        if data[..2] == GZIP_MAGIC {
            return Ok((Compression::Gzip, data));
        }
        if first == ZLIB_MAGIC_LEAD && ZLIB_MAGIC_LEVELS.contains(&data[1]) {
            return Ok((Compression::Zlib, data));
        }
    }
    Ok((Compression::Raw, data))
}

// ─── Read Path ──────────────────────────────────────────────────────────────

/// Sniff and decompress. Raw input is borrowed rather than copied.
pub fn decompress(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    let (codec, body) = sniff(data)?;
    inflate(codec, body)
}

pub(crate) fn inflate(codec: Compression, body: &[u8]) -> Result<Cow<'_, [u8]>> {
    let mut out = Vec::new();
    let read = match codec {
        Compression::Raw => return Ok(Cow::Borrowed(body)),
        Compression::Gzip => GzDecoder::new(body).read_to_end(&mut out),
        Compression::Zlib => ZlibDecoder::new(body).read_to_end(&mut out),
    };
    read.map_err(|source| Error::Decompress { codec, source })?;
    Ok(Cow::Owned(out))
}

/// Sniff, decompress and parse a tagged tree.
pub fn decode_tree(data: &[u8]) -> Result<NbtCompound> {
    let bytes = decompress(data)?;
    read_raw_tree(&bytes)
}

pub(crate) fn read_raw_tree(bytes: &[u8]) -> Result<NbtCompound> {
    if bytes.is_empty() {
        return Err(Error::EmptyData);
    }
    let (root, _) = quartz_nbt::io::read_nbt(&mut Cursor::new(bytes), Flavor::Uncompressed)?;
    Ok(root)
}

// ─── Write Path ─────────────────────────────────────────────────────────────

pub fn compress(data: &[u8], codec: Compression, level: u32) -> Result<Vec<u8>> {
    let level = flate2::Compression::new(level.min(9));
    match codec {
        Compression::Raw => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
    }
}

/// Serialize a tree and compress it with the given codec (no marker byte).
pub fn encode_tree(root: &NbtCompound, codec: Compression, level: u32) -> Result<Vec<u8>> {
    let mut raw = Vec::new();
    quartz_nbt::io::write_nbt(&mut raw, None, root, Flavor::Uncompressed)?;
    compress(&raw, codec, level)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> NbtCompound {
        let mut root = NbtCompound::new();
        root.insert("DataVersion", 3700i32);
        root.insert("Name", "sample".to_string());
        root
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(matches!(sniff(&[]), Err(Error::EmptyData)));
        assert!(matches!(decode_tree(&[]), Err(Error::EmptyData)));
    }

    #[test]
    fn test_single_byte_is_raw() {
        let (codec, body) = sniff(&[0x0A]).unwrap();
        assert_eq!(codec, Compression::Raw);
        assert_eq!(body, &[0x0A]);
        // Raw but not a tree: decode error, not a panic.
        assert!(matches!(decode_tree(&[0x0A]), Err(Error::Nbt(_))));
    }

    #[test]
    fn test_marker_and_magic_agree() {
        let payload = b"some structure bytes, repeated repeated repeated".to_vec();
        for codec in [Compression::Gzip, Compression::Zlib] {
            let compressed = compress(&payload, codec, 6).unwrap();
            let marker = if codec == Compression::Gzip {
                GZIP_MARKER
            } else {
                ZLIB_MARKER
            };
            let mut marked = vec![marker];
            marked.extend_from_slice(&compressed);

            assert_eq!(sniff(&compressed).unwrap().0, codec);
            assert_eq!(sniff(&marked).unwrap().0, codec);
            assert_eq!(decompress(&compressed).unwrap(), decompress(&marked).unwrap());
            assert_eq!(decompress(&marked).unwrap().as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn test_zlib_magic_variants() {
        for level in [0x01u8, 0x9C, 0xDA] {
            assert_eq!(sniff(&[0x78, level, 0]).unwrap().0, Compression::Zlib);
        }
        assert_eq!(sniff(&[0x78, 0x00]).unwrap().0, Compression::Raw);
    }

    #[test]
    fn test_corrupt_stream_is_not_demoted_to_raw() {
        let garbage = [0x1F, 0x8B, 0xFF, 0xFF, 0xFF];
        assert!(matches!(
            decompress(&garbage),
            Err(Error::Decompress {
                codec: Compression::Gzip,
                ..
            })
        ));
    }

    #[test]
    fn test_tree_roundtrip_through_every_codec() {
        let root = sample_tree();
        for codec in [Compression::Gzip, Compression::Zlib, Compression::Raw] {
            let bytes = encode_tree(&root, codec, 6).unwrap();
            let decoded = decode_tree(&bytes).unwrap();
            assert_eq!(decoded.get::<_, i32>("DataVersion").unwrap(), 3700);
        }
    }
}
