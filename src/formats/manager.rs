use crate::canonical::CanonicalStructure;
use crate::error::{Error, Result};
use crate::formats::{FormatTag, NativeSchema};
use crate::settings::Settings;
use quartz_nbt::NbtCompound;
use std::sync::OnceLock;

/// One native layout: how to recognise it, bind it and produce it.
pub trait NativeFormat: Send + Sync {
    fn tag(&self) -> FormatTag;
    /// Cheap key-signature check on a decoded root.
    fn detect(&self, root: &NbtCompound) -> bool;
    fn bind(&self, root: &NbtCompound) -> Result<NativeSchema>;
    fn from_canonical(
        &self,
        structure: &CanonicalStructure,
        settings: &Settings,
    ) -> Result<NativeSchema>;
}

/// Native formats in detection priority order.
pub struct FormatRegistry {
    formats: Vec<Box<dyn NativeFormat>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            formats: Vec::new(),
        }
    }

    pub fn register<F: NativeFormat + 'static>(&mut self, format: F) {
        self.formats.push(Box::new(format));
    }

    pub fn detect_format(&self, root: &NbtCompound) -> Option<FormatTag> {
        self.formats
            .iter()
            .find(|format| format.detect(root))
            .map(|format| format.tag())
    }

    /// Bind with the first format whose signature matches.
    pub fn bind(&self, root: &NbtCompound) -> Result<NativeSchema> {
        match self.formats.iter().find(|format| format.detect(root)) {
            Some(format) => {
                log::debug!("Detected {} schematic", format.tag());
                format.bind(root)
            }
            None => Err(Error::UnknownFormat),
        }
    }

    pub fn encode(
        &self,
        structure: &CanonicalStructure,
        target: FormatTag,
        settings: &Settings,
    ) -> Result<NativeSchema> {
        if target == FormatTag::Canonical {
            return Ok(NativeSchema::Canonical(structure.clone()));
        }
        match self.formats.iter().find(|format| format.tag() == target) {
            Some(format) => format.from_canonical(structure, settings),
            None => Err(Error::UnsupportedTarget(target.to_string())),
        }
    }

    pub fn list_formats(&self) -> Vec<FormatTag> {
        self.formats.iter().map(|format| format.tag()).collect()
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: OnceLock<FormatRegistry> = OnceLock::new();

pub fn registry() -> &'static FormatRegistry {
    REGISTRY.get_or_init(|| {
        let mut registry = FormatRegistry::new();
        registry.register(crate::formats::litematic::LitematicFormat);
        registry.register(crate::formats::worldedit::WorldEditFormat);
        registry.register(crate::formats::create::CreateFormat);
        registry.register(crate::formats::world::WorldSaveFormat);
        registry
    })
}
