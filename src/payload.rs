use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form block/entity data carried through conversions untouched.
pub type Payload = BTreeMap<String, NbtValue>;

/// Owned mirror of an NBT tag with deterministic key order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NbtValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<NbtValue>),
    Compound(Payload),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl From<&NbtTag> for NbtValue {
    fn from(tag: &NbtTag) -> Self {
        match tag {
            NbtTag::Byte(b) => NbtValue::Byte(*b),
            NbtTag::Short(s) => NbtValue::Short(*s),
            NbtTag::Int(i) => NbtValue::Int(*i),
            NbtTag::Long(l) => NbtValue::Long(*l),
            NbtTag::Float(f) => NbtValue::Float(*f),
            NbtTag::Double(d) => NbtValue::Double(*d),
            NbtTag::ByteArray(arr) => NbtValue::ByteArray(arr.clone()),
            NbtTag::String(s) => NbtValue::String(s.clone()),
            NbtTag::List(list) => NbtValue::List(list.iter().map(NbtValue::from).collect()),
            NbtTag::Compound(compound) => NbtValue::Compound(payload_from_compound(compound)),
            NbtTag::IntArray(arr) => NbtValue::IntArray(arr.clone()),
            NbtTag::LongArray(arr) => NbtValue::LongArray(arr.clone()),
        }
    }
}

impl NbtValue {
    pub fn to_tag(&self) -> NbtTag {
        match self {
            NbtValue::Byte(b) => NbtTag::Byte(*b),
            NbtValue::Short(s) => NbtTag::Short(*s),
            NbtValue::Int(i) => NbtTag::Int(*i),
            NbtValue::Long(l) => NbtTag::Long(*l),
            NbtValue::Float(f) => NbtTag::Float(*f),
            NbtValue::Double(d) => NbtTag::Double(*d),
            NbtValue::ByteArray(arr) => NbtTag::ByteArray(arr.clone()),
            NbtValue::String(s) => NbtTag::String(s.clone()),
            NbtValue::List(list) => {
                let tags: Vec<NbtTag> = list.iter().map(NbtValue::to_tag).collect();
                NbtTag::List(NbtList::from(tags))
            }
            NbtValue::Compound(map) => NbtTag::Compound(payload_to_compound(map)),
            NbtValue::IntArray(arr) => NbtTag::IntArray(arr.clone()),
            NbtValue::LongArray(arr) => NbtTag::LongArray(arr.clone()),
        }
    }

    /// Any integer width, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NbtValue::Byte(v) => Some(*v as i64),
            NbtValue::Short(v) => Some(*v as i64),
            NbtValue::Int(v) => Some(*v as i64),
            NbtValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Any numeric tag, widened to f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NbtValue::Float(v) => Some(*v as f64),
            NbtValue::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NbtValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Payload> {
        match self {
            NbtValue::Compound(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[NbtValue]> {
        match self {
            NbtValue::List(list) => Some(list),
            _ => None,
        }
    }

    /// Numeric components of a list or any array tag.
    pub fn as_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            NbtValue::List(list) => list.iter().map(NbtValue::as_f64).collect(),
            NbtValue::IntArray(arr) => Some(arr.iter().map(|v| *v as f64).collect()),
            NbtValue::LongArray(arr) => Some(arr.iter().map(|v| *v as f64).collect()),
            NbtValue::ByteArray(arr) => Some(arr.iter().map(|v| *v as f64).collect()),
            _ => None,
        }
    }

    /// Integer components of a list or any array tag.
    pub fn as_i32_vec(&self) -> Option<Vec<i32>> {
        match self {
            NbtValue::IntArray(arr) => Some(arr.clone()),
            NbtValue::List(list) => list
                .iter()
                .map(|v| v.as_i64().map(|n| n as i32))
                .collect(),
            NbtValue::ByteArray(arr) => Some(arr.iter().map(|v| *v as i32).collect()),
            NbtValue::LongArray(arr) => Some(arr.iter().map(|v| *v as i32).collect()),
            _ => None,
        }
    }
}

pub fn payload_from_compound(compound: &NbtCompound) -> Payload {
    compound
        .inner()
        .iter()
        .map(|(key, tag)| (key.clone(), NbtValue::from(tag)))
        .collect()
}

pub fn payload_to_compound(payload: &Payload) -> NbtCompound {
    let mut compound = NbtCompound::new();
    for (key, value) in payload {
        compound.insert(key.clone(), value.to_tag());
    }
    compound
}

/// Serde adapter for fields that hold a raw tree.
pub(crate) fn serialize_compound<S>(compound: &NbtCompound, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serde::Serialize::serialize(&payload_from_compound(compound), serializer)
}

pub(crate) fn doubles(values: &[f64]) -> NbtValue {
    NbtValue::List(values.iter().map(|v| NbtValue::Double(*v)).collect())
}

pub(crate) fn floats(values: &[f64]) -> NbtValue {
    NbtValue::List(values.iter().map(|v| NbtValue::Float(*v as f32)).collect())
}

pub(crate) fn ints(values: &[i32]) -> NbtValue {
    NbtValue::List(values.iter().map(|v| NbtValue::Int(*v)).collect())
}
