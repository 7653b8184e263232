// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The per-column chain of compression processes.

use crate::{
    huffman,
    schema::{ColumnDescriptor, ColumnType, RowOrdering},
    tile::{BLOCK_HEADER_SIZE, BlockHeader},
};
use log::debug;
use std::str::FromStr;
use strum_macros::{EnumIter, EnumString, IntoStaticStr};

/// A compression process applied to a column block.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, EnumIter, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab_case")]
pub enum Codec {
    /// Stores the bytes unchanged.
    Raw,
    /// Replaces every 16-bit sample by its difference to the mean of the two samples before it.
    Smoothing,
    /// Huffman codes the block as 16-bit symbols.
    #[strum(serialize = "huffman16")]
    Huffman16,
}

impl Codec {
    /// The id stored in block headers.
    pub fn id(self) -> u16 {
        match self {
            Codec::Raw => 0,
            Codec::Smoothing => 1,
            Codec::Huffman16 => 2,
        }
    }

    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Codec::Raw),
            1 => Some(Codec::Smoothing),
            2 => Some(Codec::Huffman16),
            _ => None,
        }
    }

    /// Whether this process produces the stored payload.
    fn is_terminal(self) -> bool {
        matches!(self, Codec::Raw | Codec::Huffman16)
    }
}

/// How a column is compressed: the processes applied in order and the tile layout they see.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Compression {
    sequence: Vec<Codec>,
    ordering: RowOrdering,
}

impl Compression {
    pub fn new(sequence: Vec<Codec>, ordering: RowOrdering) -> Self {
        Self { sequence, ordering }
    }

    pub fn raw() -> Self {
        Self::new(vec![Codec::Raw], RowOrdering::ByColumn)
    }

    pub fn huffman() -> Self {
        Self::new(vec![Codec::Huffman16], RowOrdering::ByColumn)
    }

    /// Smoothing followed by Huffman coding, the usual choice for camera waveforms.
    pub fn smoothed_huffman() -> Self {
        Self::new(vec![Codec::Smoothing, Codec::Huffman16], RowOrdering::ByColumn)
    }

    pub fn with_ordering(self, ordering: RowOrdering) -> Self {
        Self { ordering, ..self }
    }

    pub fn sequence(&self) -> &[Codec] {
        &self.sequence
    }

    pub fn ordering(&self) -> RowOrdering {
        self.ordering
    }

    fn is_raw(&self) -> bool {
        self.sequence == [Codec::Raw]
    }

    pub(crate) fn validate(&self, column_type: ColumnType) -> Result<(), &'static str> {
        let Some((last, init)) = self.sequence.split_last() else {
            return Err("the sequence is empty");
        };
        if !last.is_terminal() {
            return Err("the sequence must end with raw or huffman16");
        }
        if init.iter().any(|codec| *codec != Codec::Smoothing) {
            return Err("only smoothing may precede the last process");
        }
        let needs_samples = self
            .sequence
            .iter()
            .any(|codec| matches!(codec, Codec::Smoothing | Codec::Huffman16));
        if self.sequence.len() > usize::from(u8::MAX) {
            return Err("a block records at most 255 processes");
        }
        if needs_samples && column_type.size() < 2 {
            return Err("smoothing and huffman16 need elements of at least 2 bytes");
        }
        Ok(())
    }
}

impl Default for Compression {
    fn default() -> Self {
        Self::raw()
    }
}

/// Parses a comma separated list of codec names, e.g. `smoothing,huffman16`, in column order.
impl FromStr for Compression {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sequence = s
            .split(',')
            .map(|name| Codec::from_str(name.trim()))
            .collect::<Result<_, _>>()?;
        Ok(Self::new(sequence, RowOrdering::ByColumn))
    }
}

/// Append the block of one column to `out` and return its size, header included.
///
/// `data` holds the transposed column and may be modified in place. Columns without bytes produce
/// no block. A block that does not shrink is stored with [`Codec::Raw`] instead.
pub(crate) fn encode_column(
    column: &ColumnDescriptor,
    rows: usize,
    data: &mut [u8],
    out: &mut Vec<u8>,
) -> usize {
    if data.is_empty() {
        return 0;
    }
    let compression = &column.compression;
    let ordering = compression.ordering();
    let start = out.len();
    let raw_len = data.len();
    out.resize(start + BLOCK_HEADER_SIZE + 2 * compression.sequence.len(), 0);

    let mut smoothed = 0;
    let mut overflow = false;
    for codec in &compression.sequence {
        match codec {
            Codec::Raw => out.extend_from_slice(data),
            Codec::Smoothing => {
                smooth(data);
                smoothed += 1;
            }
            Codec::Huffman16 => {
                let streams = match ordering {
                    RowOrdering::ByColumn => column.count,
                    RowOrdering::ByRow => rows,
                };
                if huffman::compress(data, streams, raw_len, out).is_err() {
                    overflow = true;
                    break;
                }
            }
        }
    }

    let size = out.len() - start;
    if !compression.is_raw() && (overflow || size > raw_len + BLOCK_HEADER_SIZE + 1) {
        debug!(
            "Column '{}' does not compress ({} of {raw_len} bytes), storing it raw",
            column.name,
            if overflow { "overflow".to_string() } else { size.to_string() }
        );
        out.truncate(start);
        for _ in 0..smoothed {
            unsmooth(data);
        }
        out.resize(start + BLOCK_HEADER_SIZE + 2, 0);
        out.extend_from_slice(data);
        return finish_block(out, start, ordering, &[Codec::Raw]);
    }
    finish_block(out, start, ordering, &compression.sequence)
}

fn finish_block(out: &mut [u8], start: usize, ordering: RowOrdering, sequence: &[Codec]) -> usize {
    let size = out.len() - start;
    let header = BlockHeader {
        size: size as u64,
        ordering,
        num_procs: sequence.len() as u8,
    };
    out[start..start + BLOCK_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    for (i, codec) in sequence.iter().enumerate() {
        let at = start + BLOCK_HEADER_SIZE + 2 * i;
        out[at..at + 2].copy_from_slice(&codec.id().to_le_bytes());
    }
    size
}

/// Undo the processes recorded in `block`. Returns the ordering of the block and the transposed
/// column of `rows * element_size * count` bytes.
pub(crate) fn decode_column(
    block: &[u8],
    element_size: usize,
    count: usize,
    rows: usize,
) -> Result<(RowOrdering, Vec<u8>), String> {
    let header = BlockHeader::parse(block).ok_or("malformed block header")?;
    let ids_end = BLOCK_HEADER_SIZE + 2 * usize::from(header.num_procs);
    let size = usize::try_from(header.size).map_err(|_| "block size overflows")?;
    if size > block.len() || size < ids_end {
        return Err(format!(
            "block size {size} does not fit the {} available bytes",
            block.len()
        ));
    }
    let sequence = block[BLOCK_HEADER_SIZE..ids_end]
        .chunks_exact(2)
        .map(|id| {
            let id = u16::from_le_bytes([id[0], id[1]]);
            Codec::from_id(id).ok_or_else(|| format!("unknown compression process id {id}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let payload = &block[ids_end..size];
    let raw_len = rows * element_size * count;

    let mut data: Option<Vec<u8>> = None;
    for codec in sequence.iter().rev() {
        match (codec, data.as_mut()) {
            (Codec::Raw, None) => data = Some(payload.to_vec()),
            (Codec::Huffman16, None) => {
                let streams = match header.ordering {
                    RowOrdering::ByColumn => count,
                    RowOrdering::ByRow => rows,
                };
                let stream_len = raw_len.checked_div(streams).ok_or("no streams to decode")?;
                let mut decoded = Vec::with_capacity(raw_len);
                huffman::decompress(payload, streams, stream_len, &mut decoded)?;
                data = Some(decoded);
            }
            (Codec::Smoothing, Some(data)) => unsmooth(data),
            _ => return Err(format!("invalid process sequence {sequence:?}")),
        }
    }

    let data = data.ok_or("block lists no compression process")?;
    if data.len() != raw_len {
        return Err(format!(
            "decoded {} bytes instead of {raw_len}",
            data.len()
        ));
    }
    Ok((header.ordering, data))
}

fn sample(data: &[u8], i: usize) -> i32 {
    i32::from(i16::from_le_bytes([data[2 * i], data[2 * i + 1]]))
}

fn store(data: &mut [u8], i: usize, value: i32) {
    data[2 * i..2 * i + 2].copy_from_slice(&(value as i16).to_le_bytes());
}

fn smooth(data: &mut [u8]) {
    for i in (2..data.len() / 2).rev() {
        let value = sample(data, i) - (sample(data, i - 1) + sample(data, i - 2)) / 2;
        store(data, i, value);
    }
}

fn unsmooth(data: &mut [u8]) {
    for i in 2..data.len() / 2 {
        let value = sample(data, i) + (sample(data, i - 1) + sample(data, i - 2)) / 2;
        store(data, i, value);
    }
}
