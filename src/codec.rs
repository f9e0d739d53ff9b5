//! Block-state grid codecs.
//!
//! Every dense grid in this crate is linearized the same way: X varies
//! fastest, then Z, then Y (`i = (y * size_z + z) * size_x + x`). Litematica
//! regions, WorldEdit block data and chunk sections all share it.

use crate::error::{Error, Result};
use crate::formats::FormatTag;
use serde::{Deserialize, Serialize};

// ─── Linearization ──────────────────────────────────────────────────────────

/// Non-negative grid extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Extent {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Extent { x, y, z }
    }

    /// Cell count. Callers holding untrusted sizes check `checked_volume` first.
    pub fn volume(&self) -> usize {
        self.x * self.y * self.z
    }

    /// `None` when the cell count does not fit in a `usize`.
    pub fn checked_volume(&self) -> Option<usize> {
        self.x.checked_mul(self.y)?.checked_mul(self.z)
    }

    pub fn position_of(&self, index: usize) -> [i32; 3] {
        let x = index % self.x;
        let z = (index / self.x) % self.z;
        let y = index / (self.x * self.z);
        [x as i32, y as i32, z as i32]
    }

    /// `None` for positions outside the grid.
    pub fn index_of(&self, [x, y, z]: [i32; 3]) -> Option<usize> {
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= self.x || y >= self.y || z >= self.z {
            return None;
        }
        Some((y * self.z + z) * self.x + x)
    }

    pub fn contains(&self, pos: [i32; 3]) -> bool {
        self.index_of(pos).is_some()
    }
}

// ─── Bit-Packed Words ───────────────────────────────────────────────────────

/// How entries are laid out across 64-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackingLayout {
    /// Aligned unless the word count only fits the spanning layout.
    #[default]
    Auto,
    /// `64 / bits` entries per word; leftover high bits are unused.
    Aligned,
    /// Entries are contiguous and may cross word boundaries.
    Spanning,
}

fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        0
    } else {
        usize::BITS - (n - 1).leading_zeros()
    }
}

/// Width of one entry for a palette of `len` entries, never below 2 bits.
pub fn bits_for_palette(len: usize) -> u32 {
    ceil_log2(len).max(2)
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

pub fn aligned_word_count(count: usize, bits: u32) -> usize {
    let per_word = (64 / bits) as usize;
    count.div_ceil(per_word)
}

pub fn spanning_word_count(count: usize, bits: u32) -> usize {
    count.saturating_mul(bits as usize).div_ceil(64)
}

/// Most entries `words` can hold in either layout.
pub fn word_capacity(word_count: usize, bits: u32) -> usize {
    word_count.saturating_mul(64) / bits as usize
}

/// Pack indices without letting any entry cross a word boundary.
pub fn pack_aligned(indices: &[u32], bits: u32) -> Vec<i64> {
    let per_word = (64 / bits) as usize;
    let mask = mask(bits);
    let mut packed = vec![0i64; aligned_word_count(indices.len(), bits)];

    for (i, &index) in indices.iter().enumerate() {
        let word = i / per_word;
        let offset = (i % per_word) as u32 * bits;
        packed[word] |= (((index as u64) & mask) << offset) as i64;
    }
    packed
}

/// Unpack up to `count` entries. A short word array yields only the
/// decodable prefix; the missing entries are air.
pub fn unpack(words: &[i64], bits: u32, count: usize, layout: PackingLayout) -> Vec<u32> {
    let layout = match layout {
        PackingLayout::Auto => {
            let spanning = spanning_word_count(count, bits);
            if words.len() == spanning && spanning != aligned_word_count(count, bits) {
                PackingLayout::Spanning
            } else {
                PackingLayout::Aligned
            }
        }
        explicit => explicit,
    };

    let available = count.min(word_capacity(words.len(), bits));
    let values = match layout {
        PackingLayout::Spanning => unpack_spanning(words, bits, available),
        _ => unpack_aligned(words, bits, available),
    };
    if values.len() < count {
        log::warn!(
            "Block state array holds {} of {} entries; the rest are air",
            values.len(),
            count
        );
    }
    values
}

fn unpack_aligned(words: &[i64], bits: u32, count: usize) -> Vec<u32> {
    let per_word = (64 / bits) as usize;
    let mask = mask(bits);
    let mut values = Vec::with_capacity(count);

    'words: for &word in words {
        let word = word as u64;
        for slot in 0..per_word {
            if values.len() >= count {
                break 'words;
            }
            values.push(((word >> (slot as u32 * bits)) & mask) as u32);
        }
    }
    values
}

fn unpack_spanning(words: &[i64], bits: u32, count: usize) -> Vec<u32> {
    let mask = mask(bits);
    let mut values = Vec::with_capacity(count);

    for i in 0..count {
        let bit = i * bits as usize;
        let word = bit / 64;
        let offset = (bit % 64) as u32;
        let Some(&low) = words.get(word) else {
            break;
        };
        let mut value = (low as u64) >> offset;
        if offset + bits > 64 {
            match words.get(word + 1) {
                Some(&high) => value |= (high as u64) << (64 - offset),
                None => break,
            }
        }
        values.push((value & mask) as u32);
    }
    values
}

// ─── Chunk Sections ─────────────────────────────────────────────────────────

pub const SECTION_VOLUME: usize = 16 * 16 * 16;

/// Chunk sections use the aligned layout with at least 4 bits per entry.
pub fn unpack_section(words: &[i64], palette_len: usize) -> Vec<u32> {
    if palette_len <= 1 || words.is_empty() {
        return vec![0; SECTION_VOLUME];
    }
    let bits = ceil_log2(palette_len).max(4);
    let mut cells = unpack(words, bits, SECTION_VOLUME, PackingLayout::Aligned);
    cells.resize(SECTION_VOLUME, 0);
    cells
}

pub fn pack_section(indices: &[u32], palette_len: usize) -> Vec<i64> {
    if palette_len <= 1 {
        return Vec::new();
    }
    pack_aligned(indices, ceil_log2(palette_len).max(4))
}

// ─── Flat Bytes ─────────────────────────────────────────────────────────────

/// One byte per cell. Indices above 255 are rejected.
pub fn encode_bytes(indices: &[u32]) -> Result<Vec<i8>> {
    indices
        .iter()
        .map(|&index| {
            u8::try_from(index)
                .map(|b| b as i8)
                .map_err(|_| Error::PaletteOverflow {
                    index,
                    format: FormatTag::WorldEdit,
                })
        })
        .collect()
}

pub fn decode_bytes(data: &[i8]) -> Vec<u32> {
    data.iter().map(|&b| b as u8 as u32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(count: usize, palette_len: usize) -> Vec<u32> {
        (0..count)
            .map(|i| ((i * 7 + i / 3) % palette_len) as u32)
            .collect()
    }

    #[test]
    fn test_extent_linearization_is_x_then_z_then_y() {
        let extent = Extent::new(3, 4, 5);
        assert_eq!(extent.position_of(0), [0, 0, 0]);
        assert_eq!(extent.position_of(1), [1, 0, 0]);
        assert_eq!(extent.position_of(3), [0, 0, 1]);
        assert_eq!(extent.position_of(15), [0, 1, 0]);
        for i in 0..extent.volume() {
            assert_eq!(extent.index_of(extent.position_of(i)), Some(i));
        }
        assert_eq!(extent.index_of([3, 0, 0]), None);
        assert_eq!(extent.index_of([0, -1, 0]), None);
    }

    #[test]
    fn test_bits_for_palette() {
        assert_eq!(bits_for_palette(0), 2);
        assert_eq!(bits_for_palette(2), 2);
        assert_eq!(bits_for_palette(4), 2);
        assert_eq!(bits_for_palette(5), 3);
        assert_eq!(bits_for_palette(256), 8);
        // No clamp at 8 bits.
        assert_eq!(bits_for_palette(257), 9);
        assert_eq!(bits_for_palette(5000), 13);
    }

    #[test]
    fn test_aligned_roundtrip_for_every_width_up_to_8() {
        for bits in 2..=8u32 {
            let palette_len = 1usize << bits;
            let per_word = (64 / bits) as usize;
            // Deliberately not a multiple of entries-per-word.
            let count = per_word * 5 + 3;
            let indices = pattern(count, palette_len);

            let packed = pack_aligned(&indices, bits);
            assert_eq!(packed.len(), 6);
            assert_eq!(unpack(&packed, bits, count, PackingLayout::Aligned), indices);
            assert_eq!(unpack(&packed, bits, count, PackingLayout::Auto), indices);
        }
    }

    #[test]
    fn test_entries_never_straddle_words() {
        // 3 bits: 21 entries per word, top bit of each word unused.
        let indices = vec![7u32; 22];
        let packed = pack_aligned(&indices, 3);
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[0] as u64 >> 63, 0);
        assert_eq!(packed[1], 7);
    }

    #[test]
    fn test_wide_palette_roundtrip() {
        let indices = pattern(1000, 600);
        let bits = bits_for_palette(600);
        assert_eq!(bits, 10);
        let packed = pack_aligned(&indices, bits);
        assert_eq!(unpack(&packed, bits, 1000, PackingLayout::Auto), indices);
    }

    #[test]
    fn test_spanning_layout_is_detected_by_word_count() {
        let bits = 3;
        // Equal word counts are ambiguous and read as aligned.
        assert_eq!(spanning_word_count(250, bits), 12);
        assert_eq!(aligned_word_count(250, bits), 12);

        let count = 1000;
        assert_eq!(spanning_word_count(count, bits), 47);
        assert_eq!(aligned_word_count(count, bits), 48);

        let indices = pattern(count, 8);
        let mut words = vec![0u64; 47];
        for (i, &v) in indices.iter().enumerate() {
            let bit = i * 3;
            let (word, offset) = (bit / 64, bit % 64);
            words[word] |= (v as u64) << offset;
            if offset + 3 > 64 {
                words[word + 1] |= (v as u64) >> (64 - offset);
            }
        }
        let words: Vec<i64> = words.into_iter().map(|w| w as i64).collect();
        assert_eq!(unpack(&words, bits, count, PackingLayout::Auto), indices);
        assert_eq!(unpack(&words, bits, count, PackingLayout::Spanning), indices);
    }

    #[test]
    fn test_short_word_array_yields_prefix() {
        let indices = vec![1u32; 40];
        let packed = pack_aligned(&indices, 2);
        let values = unpack(&packed[..1], 2, 40, PackingLayout::Aligned);
        assert_eq!(values, &indices[..32]);
        assert_eq!(unpack(&packed[..1], 2, 40, PackingLayout::Spanning), &indices[..32]);
    }

    #[test]
    fn test_declared_count_does_not_size_the_output() {
        let values = unpack(&[1], 2, 1 << 60, PackingLayout::Auto);
        assert_eq!(values.len(), 32);
        assert_eq!(values[0], 1);
        assert_eq!(unpack(&[], 2, usize::MAX, PackingLayout::Auto), Vec::<u32>::new());
    }

    #[test]
    fn test_checked_volume() {
        assert_eq!(Extent::new(2, 3, 4).checked_volume(), Some(24));
        assert_eq!(Extent::new(1 << 30, 1 << 30, 1 << 30).checked_volume(), None);
        assert_eq!(Extent::new(1 << 40, 1 << 40, 0).checked_volume(), None);
    }

    #[test]
    fn test_section_roundtrip_uses_four_bit_minimum() {
        let indices = pattern(SECTION_VOLUME, 3);
        let packed = pack_section(&indices, 3);
        assert_eq!(packed.len(), SECTION_VOLUME / 16);
        assert_eq!(unpack_section(&packed, 3), indices);
        assert_eq!(unpack_section(&[], 1), vec![0; SECTION_VOLUME]);
    }

    #[test]
    fn test_flat_bytes() {
        let indices = vec![0u32, 1, 127, 128, 255];
        let bytes = encode_bytes(&indices).unwrap();
        assert_eq!(bytes[3], -128);
        assert_eq!(decode_bytes(&bytes), indices);
        assert!(matches!(
            encode_bytes(&[256]),
            Err(Error::PaletteOverflow { index: 256, .. })
        ));
    }
}
