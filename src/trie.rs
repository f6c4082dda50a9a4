// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;

use anyhow::{bail, ensure};
use rayon::prelude::*;
use thiserror::Error;

use crate::ucd::{CODEPOINTS, DenseMapping, WidthClass};

/// The ASCII bytes "CWT1", read as a little-endian u32.
pub const FORMAT_TAG: u32 = u32::from_le_bytes(*b"CWT1");

/// Fixed header: format tag, block size, high start, high value,
/// index length, data length. Six u32 fields, little-endian.
pub const HEADER_LEN: usize = 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("dense mapping has {0} entries, expected 0x110000")]
    EmptyMapping(usize),
}

/// A two-level lookup table over the code point space: `index` maps a block
/// number to a byte offset in `data`, identical blocks sharing one offset.
/// Code points at or above `high_start` are not stored at all and resolve
/// to `high_value` directly.
pub struct CompactTrie {
    block_size: u32,
    shift: u32,
    high_start: u32,
    high_value: u8,
    index: Vec<u32>,
    data: Vec<u8>,
    covered: usize,
}

/// Builds the trie for one fixed block size. Deterministic: the same mapping
/// and block size always produce the same trie, because blocks are visited in
/// code point order and a repeated block always reuses its first occurrence.
pub fn build(mapping: &DenseMapping, block_size: usize) -> Result<CompactTrie, BuildError> {
    if mapping.len() != CODEPOINTS {
        return Err(BuildError::EmptyMapping(mapping.len()));
    }
    assert!(
        block_size.is_power_of_two() && CODEPOINTS % block_size == 0,
        "invalid block size {block_size}"
    );

    // Unset is a resolution-time concept. In the trie it is narrow.
    let values: Vec<u8> = mapping.iter().map(|v| v.unwrap_or(WidthClass::Narrow) as u8).collect();
    let covered = mapping.iter().filter(|v| v.is_some()).count();

    // The trailing run of all-narrow blocks is covered by `high_value` alone.
    let high_value = WidthClass::Narrow as u8;
    let mut high_start = CODEPOINTS;
    while high_start >= block_size
        && values[high_start - block_size..high_start].iter().all(|&v| v == high_value)
    {
        high_start -= block_size;
    }

    let mut index = Vec::with_capacity(high_start / block_size);
    let mut data = Vec::new();
    let mut dedup: HashMap<&[u8], u32> = HashMap::new();

    for block in values[..high_start].chunks_exact(block_size) {
        let offset = *dedup.entry(block).or_insert_with(|| {
            let offset = data.len() as u32;
            data.extend_from_slice(block);
            offset
        });
        index.push(offset);
    }

    Ok(CompactTrie {
        block_size: block_size as u32,
        shift: block_size.trailing_zeros(),
        high_start: high_start as u32,
        high_value,
        index,
        data,
        covered,
    })
}

/// Builds the trie once per block size in `[1 << min_shift, 1 << max_shift]`
/// and keeps the one that serializes smallest. The combined size/block-size
/// key is unique per candidate, so the parallel reduction order cannot
/// change the result.
pub fn build_best(
    mapping: &DenseMapping,
    min_shift: u32,
    max_shift: u32,
) -> Result<CompactTrie, BuildError> {
    let shifts: Vec<u32> = (min_shift..=max_shift).collect();
    let tries = shifts
        .par_iter()
        .map(|&shift| build(mapping, 1 << shift))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tries.into_iter().min_by_key(|t| (t.serialized_len(), t.block_size)).unwrap())
}

impl CompactTrie {
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Count of code points the input documents actually asserted a value
    /// for. Reporting only; not part of the serialized format.
    pub fn covered(&self) -> usize {
        self.covered
    }

    pub fn serialized_len(&self) -> usize {
        HEADER_LEN + self.index.len() * 4 + self.data.len()
    }

    /// O(1) lookup, independent of how many ranges produced the mapping.
    pub fn get(&self, cp: u32) -> u8 {
        if cp >= self.high_start {
            return self.high_value;
        }
        let offset = self.index[(cp >> self.shift) as usize];
        self.data[offset as usize + (cp & (self.block_size - 1)) as usize]
    }

    /// Flattens the trie into the `CWT1` binary layout: header, u32 index
    /// array, u8 data array, all little-endian, no padding.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        buf.extend_from_slice(&FORMAT_TAG.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.high_start.to_le_bytes());
        buf.extend_from_slice(&(self.high_value as u32).to_le_bytes());
        buf.extend_from_slice(&(self.index.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        for &offset in &self.index {
            buf.extend_from_slice(&offset.to_le_bytes());
        }
        buf.extend_from_slice(&self.data);
        buf
    }
}

/// Read-only view over a serialized blob. This is what a consumer of the
/// emitted literal does; it never re-interprets the data bytes.
pub struct TrieView<'a> {
    shift: u32,
    mask: u32,
    high_start: u32,
    high_value: u8,
    index: &'a [u8],
    data: &'a [u8],
}

impl<'a> TrieView<'a> {
    pub fn parse(blob: &'a [u8]) -> anyhow::Result<Self> {
        ensure!(blob.len() >= HEADER_LEN, "blob too short for header");

        let field = |i: usize| read_u32(blob, i * 4);
        ensure!(field(0) == FORMAT_TAG, "unrecognized format tag {:#010x}", field(0));

        let block_size = field(1);
        let high_start = field(2);
        let high_value = field(3);
        let index_len = field(4) as usize;
        let data_len = field(5) as usize;

        ensure!(block_size.is_power_of_two(), "invalid block size {block_size}");
        ensure!(high_value <= 0xFF, "high value {high_value} does not fit a byte");
        ensure!(
            blob.len() == HEADER_LEN + index_len * 4 + data_len,
            "blob length {} does not match header",
            blob.len()
        );
        ensure!(
            high_start as usize == index_len * block_size as usize,
            "index length {index_len} does not cover high start {high_start:#x}"
        );

        let index = &blob[HEADER_LEN..HEADER_LEN + index_len * 4];
        let data = &blob[HEADER_LEN + index_len * 4..];

        for i in 0..index_len {
            let offset = read_u32(index, i * 4) as usize;
            if offset + block_size as usize > data_len {
                bail!("index entry {i} points past the data array");
            }
        }

        Ok(TrieView {
            shift: block_size.trailing_zeros(),
            mask: block_size - 1,
            high_start,
            high_value: high_value as u8,
            index,
            data,
        })
    }

    pub fn get(&self, cp: u32) -> u8 {
        if cp >= self.high_start {
            return self.high_value;
        }
        let offset = read_u32(self.index, ((cp >> self.shift) * 4) as usize);
        self.data[offset as usize + (cp & self.mask) as usize]
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut field = [0; 4];
    field.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(field)
}
