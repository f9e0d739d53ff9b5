use quartz_nbt::{NbtCompound, NbtTag};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const AIR: &str = "minecraft:air";

/// A palette entry: block name plus unordered properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockState {
    pub name: SmolStr,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<SmolStr, SmolStr>,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.properties.is_empty() {
            write!(f, "[")?;
            for (i, (key, value)) in self.properties.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}={}", key, value)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// Parses the `name[k=v,...]` key form used by WorldEdit palettes.
/// Property pairs without `=` are ignored.
impl FromStr for BlockState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(BlockState::from_key(s))
    }
}

impl BlockState {
    /// `name[k=v,...]` palette key.
    pub fn from_key(s: &str) -> Self {
        let s = s.trim();
        let (name, props) = match s.find('[') {
            Some(open) => (&s[..open], s[open + 1..].trim_end_matches(']')),
            None => (s, ""),
        };
        let mut state = BlockState::new(name);
        for pair in props.split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                state.set_property(key.trim(), value.trim());
            }
        }
        state
    }

    pub fn new(name: impl Into<SmolStr>) -> Self {
        BlockState {
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn air() -> Self {
        BlockState::new(AIR)
    }

    pub fn with_property(mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) -> Self {
        self.set_property(key, value);
        self
    }

    pub fn set_property(&mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn get_property(&self, key: &str) -> Option<&SmolStr> {
        self.properties.get(key)
    }

    pub fn is_air(&self) -> bool {
        is_air(&self.name)
    }

    pub fn to_nbt(&self) -> NbtTag {
        let mut compound = NbtCompound::new();
        compound.insert("Name", self.name.to_string());

        if !self.properties.is_empty() {
            let mut properties = NbtCompound::new();
            for (key, value) in &self.properties {
                properties.insert(key.to_string(), value.to_string());
            }
            compound.insert("Properties", properties);
        }

        NbtTag::Compound(compound)
    }

    /// Reads a `{Name, Properties}` palette compound. Returns `None` without a name.
    pub fn from_nbt(compound: &NbtCompound) -> Option<Self> {
        let name = compound.get::<_, &str>("Name").ok()?;
        let mut state = BlockState::new(name);
        if let Ok(props) = compound.get::<_, &NbtCompound>("Properties") {
            for (key, value) in props.inner() {
                if let NbtTag::String(value) = value {
                    state.set_property(key.as_str(), value.as_str());
                }
            }
        }
        Some(state)
    }
}

pub fn is_air(name: &str) -> bool {
    matches!(
        name,
        "minecraft:air" | "minecraft:cave_air" | "minecraft:void_air" | "air"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_state_creation() {
        let block = BlockState::new("minecraft:stone").with_property("variant", "granite");

        assert_eq!(block.name, "minecraft:stone");
        assert_eq!(
            block.get_property("variant").map(|s| s.as_str()),
            Some("granite")
        );
    }

    #[test]
    fn test_property_order_is_irrelevant() {
        let a = BlockState::new("minecraft:oak_stairs")
            .with_property("facing", "north")
            .with_property("half", "top");
        let b = BlockState::new("minecraft:oak_stairs")
            .with_property("half", "top")
            .with_property("facing", "north");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "minecraft:oak_stairs[facing=north,half=top]");
    }

    #[test]
    fn test_parse_palette_key() {
        let state: BlockState = "minecraft:oak_log[axis=y]".parse().unwrap();
        assert_eq!(state.name, "minecraft:oak_log");
        assert_eq!(state.get_property("axis").map(|s| s.as_str()), Some("y"));

        let plain: BlockState = "minecraft:stone".parse().unwrap();
        assert!(plain.properties.is_empty());
        assert_eq!(plain.to_string().parse::<BlockState>().unwrap(), plain);
    }

    #[test]
    fn test_nbt_roundtrip() {
        let state = BlockState::new("minecraft:chest").with_property("facing", "east");
        let NbtTag::Compound(compound) = state.to_nbt() else {
            panic!("palette entry should be a compound");
        };
        assert_eq!(BlockState::from_nbt(&compound), Some(state));
        assert_eq!(BlockState::from_nbt(&NbtCompound::new()), None);
    }

    #[test]
    fn test_air_variants() {
        assert!(BlockState::air().is_air());
        assert!(is_air("minecraft:cave_air"));
        assert!(!is_air("minecraft:glass"));
    }
}
