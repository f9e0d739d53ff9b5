use crate::compression::Compression;
use crate::formats::FormatTag;
use std::path::PathBuf;

/// Error type for decoding and conversion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("empty data")]
    EmptyData,
    #[error("{codec} stream could not be decompressed: {source}")]
    Decompress {
        codec: Compression,
        #[source]
        source: std::io::Error,
    },
    #[error("NBT decode error: {0}")]
    Nbt(#[from] quartz_nbt::io::NbtIoError),
    #[error("unsupported format or unable to identify format")]
    UnknownFormat,
    #[error("unsupported output format: {0}")]
    UnsupportedTarget(String),
    #[error("malformed {format} schematic: {reason}")]
    Malformed { format: FormatTag, reason: String },
    #[error("palette index {index} does not fit in a {format} cell")]
    PaletteOverflow { index: u32, format: FormatTag },
    #[error("invalid region file: {0}")]
    Region(String),
    #[error("unsupported sector compression type {0}")]
    UnsupportedCompression(u8),
    #[error("{}: {source}", .path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },
    #[error("sector ({x}, {z}): {source}")]
    Sector {
        x: usize,
        z: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("invalid settings: {0}")]
    Settings(#[source] serde_json::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(format: FormatTag, reason: impl Into<String>) -> Self {
        Error::Malformed {
            format,
            reason: reason.into(),
        }
    }

    pub(crate) fn in_file(path: impl Into<PathBuf>, source: Error) -> Self {
        Error::InFile {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// The error underneath any file or sector context.
    pub fn root(&self) -> &Error {
        match self {
            Error::InFile { source, .. } | Error::Sector { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the input was readable but matched no known schema.
    pub fn is_unknown_format(&self) -> bool {
        matches!(self.root(), Error::UnknownFormat)
    }
}
