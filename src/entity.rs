use crate::payload::{doubles, floats, NbtValue, Payload};
use serde::{Deserialize, Serialize};

const ENTITY_KEYS: [&str; 5] = ["id", "Id", "Pos", "Rotation", "Motion"];
const TILE_KEYS: [&str; 6] = ["id", "Id", "Pos", "x", "y", "z"];

/// Which spelling a native format uses for the identifier key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKey {
    Lower,
    Upper,
}

impl IdKey {
    fn as_str(self) -> &'static str {
        match self {
            IdKey::Lower => "id",
            IdKey::Upper => "Id",
        }
    }
}

/// How a tile entity stores its block position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TilePosition {
    /// Separate `x`, `y`, `z` int fields.
    Xyz,
    /// A `Pos` int array.
    PosArray,
}

fn read_id(payload: &Payload) -> Option<String> {
    payload
        .get("id")
        .or_else(|| payload.get("Id"))
        .and_then(NbtValue::as_str)
        .map(str::to_string)
}

fn remainder(payload: &Payload, known: &[&str]) -> Payload {
    payload
        .iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn fixed<const N: usize>(value: Option<&NbtValue>) -> Option<[f64; N]> {
    let values = value?.as_f64_vec()?;
    if values.len() < N {
        return None;
    }
    let mut out = [0.0; N];
    out.copy_from_slice(&values[..N]);
    Some(out)
}

// ─── Entities ───────────────────────────────────────────────────────────────

/// A free-floating entity shared by every native format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub position: [f64; 3],
    pub rotation: [f64; 2],
    pub motion: [f64; 3],
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
}

impl EntityRecord {
    pub fn new(id: impl Into<String>, position: [f64; 3]) -> Self {
        EntityRecord {
            id: id.into(),
            position,
            rotation: [0.0; 2],
            motion: [0.0; 3],
            payload: Payload::new(),
        }
    }

    /// Reads an entity compound. `None` when `Pos`, `Rotation` or `Motion`
    /// is missing or has too few components.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        Some(EntityRecord {
            id: read_id(payload).unwrap_or_default(),
            position: fixed::<3>(payload.get("Pos"))?,
            rotation: fixed::<2>(payload.get("Rotation"))?,
            motion: fixed::<3>(payload.get("Motion"))?,
            payload: remainder(payload, &ENTITY_KEYS),
        })
    }

    pub fn to_payload(&self, id_key: IdKey) -> Payload {
        let mut payload = self.payload.clone();
        payload.insert(id_key.as_str().to_string(), NbtValue::String(self.id.clone()));
        payload.insert("Pos".to_string(), doubles(&self.position));
        payload.insert("Rotation".to_string(), floats(&self.rotation));
        payload.insert("Motion".to_string(), doubles(&self.motion));
        payload
    }
}

// ─── Tile Entities ──────────────────────────────────────────────────────────

/// Per-block data keyed by integer position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileEntityRecord {
    pub id: String,
    pub position: [i32; 3],
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub payload: Payload,
}

impl TileEntityRecord {
    pub fn new(id: impl Into<String>, position: [i32; 3]) -> Self {
        TileEntityRecord {
            id: id.into(),
            position,
            payload: Payload::new(),
        }
    }

    /// Reads either position style. `None` when no position is present.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        let position = match payload.get("Pos").and_then(NbtValue::as_i32_vec) {
            Some(pos) if pos.len() >= 3 => [pos[0], pos[1], pos[2]],
            _ => {
                let axis = |key: &str| payload.get(key).and_then(NbtValue::as_i64);
                [axis("x")? as i32, axis("y")? as i32, axis("z")? as i32]
            }
        };
        Some(TileEntityRecord {
            id: read_id(payload).unwrap_or_default(),
            position,
            payload: remainder(payload, &TILE_KEYS),
        })
    }

    pub fn to_payload(&self, id_key: IdKey, style: TilePosition) -> Payload {
        let mut payload = self.payload.clone();
        if !self.id.is_empty() {
            payload.insert(id_key.as_str().to_string(), NbtValue::String(self.id.clone()));
        }
        let [x, y, z] = self.position;
        match style {
            TilePosition::Xyz => {
                payload.insert("x".to_string(), NbtValue::Int(x));
                payload.insert("y".to_string(), NbtValue::Int(y));
                payload.insert("z".to_string(), NbtValue::Int(z));
            }
            TilePosition::PosArray => {
                payload.insert("Pos".to_string(), NbtValue::IntArray(vec![x, y, z]));
            }
        }
        payload
    }
}
