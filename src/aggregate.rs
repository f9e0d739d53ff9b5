use crate::canonical::CanonicalStructure;
use crate::compression::{decode_tree, sniff, Compression};
use crate::error::Result;
use crate::payload::{payload_from_compound, NbtValue, Payload};
use crate::settings::Settings;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::path::Path;

/// One line of a bill of materials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockCount {
    pub name: String,
    pub count: u64,
}

/// Why a payload could not be read as an item stack.
#[derive(Debug, thiserror::Error)]
pub enum ShapeMismatch {
    #[error("`{0}` is not a compound")]
    NotCompound(&'static str),
    #[error("`{0}` is not a list")]
    NotList(&'static str),
    #[error("item stack has no string `id`")]
    MissingId,
    #[error("item `{id}` has an invalid count")]
    BadCount { id: String },
    #[error("embedded tree could not be decoded: {0}")]
    Embedded(#[source] crate::error::Error),
}

/// Counts in first-occurrence order, merged by exact name.
#[derive(Default)]
struct Tally {
    counts: Vec<BlockCount>,
    slots: FxHashMap<String, usize>,
}

impl Tally {
    fn add(&mut self, name: &str, count: u64) {
        if name.is_empty() {
            return;
        }
        match self.slots.get(name) {
            Some(&slot) => self.counts[slot].count += count,
            None => {
                self.slots.insert(name.to_string(), self.counts.len());
                self.counts.push(BlockCount {
                    name: name.to_string(),
                    count,
                });
            }
        }
    }
}

/// Grid occurrences of each palette name, followed by item stacks found in
/// block payloads.
pub fn aggregate(structure: &CanonicalStructure, settings: &Settings) -> Vec<BlockCount> {
    let mut tally = Tally::default();
    for index in structure.blocks.iter().filter_map(|unit| unit.palette_index()) {
        if let Some(name) = structure.palette_name(index) {
            tally.add(name, 1);
        }
    }

    let mut stacks = Vec::new();
    for payload in structure.blocks.iter().filter_map(|unit| unit.block_payload()) {
        collect_stacks(payload, settings.count_item_stack_size, &mut stacks);
    }
    for (id, count) in stacks {
        tally.add(&id, count);
    }
    tally.counts
}

/// Parse, convert and aggregate a file or world save in one call.
pub fn aggregate_file(path: impl AsRef<Path>, settings: &Settings) -> Result<Vec<BlockCount>> {
    let decoded = crate::parse_file_with(path, settings)?;
    let structure = crate::convert_to_canonical_with(&decoded, settings)?;
    Ok(aggregate(&structure, settings))
}

// ─── Payload Walk ───────────────────────────────────────────────────────────

fn collect_stacks(payload: &Payload, stack_size: bool, out: &mut Vec<(String, u64)>) {
    if let Some(item) = payload.get("Item") {
        match item.as_compound().ok_or(ShapeMismatch::NotCompound("Item")) {
            Ok(item) => push_stack(item, stack_size, out),
            Err(e) => log::warn!("Skipping item payload: {}", e),
        }
    }
    if let Some(items) = payload.get("Items") {
        match items.as_list().ok_or(ShapeMismatch::NotList("Items")) {
            Ok(items) => {
                for item in items {
                    match item.as_compound().ok_or(ShapeMismatch::NotCompound("Items[]")) {
                        Ok(item) => push_stack(item, stack_size, out),
                        Err(e) => log::warn!("Skipping item payload: {}", e),
                    }
                }
            }
            Err(e) => log::warn!("Skipping item payload: {}", e),
        }
    }
    for value in payload.values() {
        let NbtValue::ByteArray(bytes) = value else {
            continue;
        };
        let bytes: Vec<u8> = bytes.iter().map(|b| *b as u8).collect();
        if !matches!(sniff(&bytes), Ok((codec, _)) if codec != Compression::Raw) {
            continue;
        }
        match decode_tree(&bytes).map_err(ShapeMismatch::Embedded) {
            Ok(tree) => collect_stacks(&payload_from_compound(&tree), stack_size, out),
            Err(e) => log::warn!("Skipping embedded payload: {}", e),
        }
    }
}

fn push_stack(item: &Payload, stack_size: bool, out: &mut Vec<(String, u64)>) {
    match read_stack(item, stack_size) {
        Ok(stack) => out.push(stack),
        Err(e) => log::warn!("Skipping item stack: {}", e),
    }
}

fn read_stack(item: &Payload, stack_size: bool) -> std::result::Result<(String, u64), ShapeMismatch> {
    let id = item
        .get("id")
        .and_then(NbtValue::as_str)
        .ok_or(ShapeMismatch::MissingId)?
        .to_string();
    if !stack_size {
        return Ok((id, 1));
    }
    let count = item
        .get("Count")
        .or_else(|| item.get("count"))
        .map_or(Some(1), NbtValue::as_i64);
    match count.and_then(|c| u64::try_from(c).ok()) {
        Some(count) => Ok((id, count)),
        None => Err(ShapeMismatch::BadCount { id }),
    }
}
