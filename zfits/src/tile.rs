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

//! Tile framing: the per-tile and per-block markers, the row accumulator and the transposer.

use crate::schema::{ColumnDescriptor, RowOrdering};
use std::mem;

/// Size of the marker that opens every tile in the heap.
pub const TILE_HEADER_SIZE: usize = 16;
/// Size of the fixed part of a column block header.
pub const BLOCK_HEADER_SIZE: usize = 10;

const TILE_MAGIC: &[u8; 4] = b"TILE";

/// Marker preceding every tile: `TILE`, the row count and the tile size including the marker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileHeader {
    pub num_rows: u32,
    pub size: u64,
}

impl TileHeader {
    pub fn to_bytes(&self) -> [u8; TILE_HEADER_SIZE] {
        let mut bytes = [0; TILE_HEADER_SIZE];
        bytes[..4].copy_from_slice(TILE_MAGIC);
        bytes[4..8].copy_from_slice(&self.num_rows.to_le_bytes());
        bytes[8..].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    /// Returns `None` unless `bytes` starts with a well-formed marker.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..TILE_HEADER_SIZE)?;
        if &bytes[..4] != TILE_MAGIC {
            return None;
        }
        Some(TileHeader {
            num_rows: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            size: u64::from_le_bytes(bytes[8..].try_into().ok()?),
        })
    }
}

/// Header of one column block. It is followed by `num_procs` little-endian `u16` codec ids.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    /// Size of the whole block, header and codec ids included.
    pub size: u64,
    pub ordering: RowOrdering,
    pub num_procs: u8,
}

impl BlockHeader {
    pub fn to_bytes(&self) -> [u8; BLOCK_HEADER_SIZE] {
        let mut bytes = [0; BLOCK_HEADER_SIZE];
        bytes[..8].copy_from_slice(&self.size.to_le_bytes());
        bytes[8] = self.ordering.to_byte();
        bytes[9] = self.num_procs;
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..BLOCK_HEADER_SIZE)?;
        Some(BlockHeader {
            size: u64::from_le_bytes(bytes[..8].try_into().ok()?),
            ordering: RowOrdering::from_byte(bytes[8])?,
            num_procs: bytes[9],
        })
    }
}

/// Collects rows into a tile-sized, row-major buffer.
#[derive(Debug)]
pub(crate) struct RowAccumulator {
    row_width: usize,
    rows_per_tile: usize,
    buffer: Vec<u8>,
    rows: usize,
    total_rows: u64,
}

impl RowAccumulator {
    pub(crate) fn new(row_width: usize, rows_per_tile: usize) -> Self {
        RowAccumulator {
            row_width,
            rows_per_tile,
            buffer: vec![0; row_width * rows_per_tile],
            rows: 0,
            total_rows: 0,
        }
    }

    /// Copy one row in. Returns `true` once the tile is full.
    pub(crate) fn push(&mut self, row: &[u8]) -> bool {
        let start = self.rows * self.row_width;
        self.buffer[start..start + self.row_width].copy_from_slice(row);
        self.rows += 1;
        self.total_rows += 1;
        self.rows == self.rows_per_tile
    }

    /// Rows buffered for the tile that is currently being filled.
    pub(crate) fn pending_rows(&self) -> usize {
        self.rows
    }

    pub(crate) fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Hand out the buffered tile and start a new one. A buffer must be given back with
    /// [`restore`](Self::restore) before the next row is pushed.
    pub(crate) fn take(&mut self) -> Vec<u8> {
        self.rows = 0;
        mem::take(&mut self.buffer)
    }

    pub(crate) fn restore(&mut self, mut buffer: Vec<u8>) {
        buffer.resize(self.row_width * self.rows_per_tile, 0);
        self.buffer = buffer;
    }
}

/// Copy one column out of a row-major tile into `out`, laid out according to its ordering.
pub(crate) fn transpose_column(
    tile: &[u8],
    row_width: usize,
    rows: usize,
    column: &ColumnDescriptor,
    out: &mut [u8],
) {
    let width = column.width();
    match column.compression.ordering() {
        RowOrdering::ByRow => {
            for (row, chunk) in out.chunks_exact_mut(width).take(rows).enumerate() {
                let start = row * row_width + column.offset;
                chunk.copy_from_slice(&tile[start..start + width]);
            }
        }
        RowOrdering::ByColumn => {
            let size = column.column_type.size();
            for element in 0..column.count {
                let run = &mut out[element * rows * size..(element + 1) * rows * size];
                for (row, sample) in run.chunks_exact_mut(size).enumerate() {
                    let start = row * row_width + column.offset + element * size;
                    sample.copy_from_slice(&tile[start..start + size]);
                }
            }
        }
    }
}

/// Inverse of [`transpose_column`]: scatter a decoded column back into a row-major tile.
#[allow(clippy::too_many_arguments)]
pub(crate) fn untranspose_column(
    data: &[u8],
    ordering: RowOrdering,
    row_width: usize,
    rows: usize,
    offset: usize,
    element_size: usize,
    count: usize,
    tile: &mut [u8],
) {
    let width = element_size * count;
    match ordering {
        RowOrdering::ByRow => {
            for (row, chunk) in data.chunks_exact(width).take(rows).enumerate() {
                let start = row * row_width + offset;
                tile[start..start + width].copy_from_slice(chunk);
            }
        }
        RowOrdering::ByColumn => {
            for element in 0..count {
                let run = &data[element * rows * element_size..(element + 1) * rows * element_size];
                for (row, sample) in run.chunks_exact(element_size).enumerate() {
                    let start = row * row_width + offset + element * element_size;
                    tile[start..start + element_size].copy_from_slice(sample);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::Compression, schema::ColumnType};
    use pretty_assertions::assert_eq;

    fn column(ordering: RowOrdering) -> ColumnDescriptor {
        ColumnDescriptor {
            name: "Data".to_string(),
            column_type: ColumnType::Short,
            count: 3,
            offset: 1,
            compression: Compression::new(vec![crate::codec::Codec::Raw], ordering),
        }
    }

    // Rows are one marker byte followed by three 2-byte samples.
    fn tile() -> Vec<u8> {
        vec![
            0xAA, 1, 0, 2, 0, 3, 0, //
            0xBB, 4, 0, 5, 0, 6, 0,
        ]
    }

    #[test]
    fn markers_have_the_documented_layout() {
        let tile = TileHeader {
            num_rows: 10,
            size: 0x0102,
        };
        assert_eq!(
            tile.to_bytes(),
            [b'T', b'I', b'L', b'E', 10, 0, 0, 0, 2, 1, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(TileHeader::parse(&tile.to_bytes()), Some(tile));
        assert_eq!(TileHeader::parse(b"TOLE\0\0\0\0\0\0\0\0\0\0\0\0"), None);

        let block = BlockHeader {
            size: 22,
            ordering: RowOrdering::ByColumn,
            num_procs: 2,
        };
        assert_eq!(block.to_bytes(), [22, 0, 0, 0, 0, 0, 0, 0, b'C', 2]);
        assert_eq!(BlockHeader::parse(&block.to_bytes()), Some(block));
    }

    #[test]
    fn by_column_groups_each_element_across_rows() {
        let mut out = vec![0; 12];
        transpose_column(&tile(), 7, 2, &column(RowOrdering::ByColumn), &mut out);
        assert_eq!(out, vec![1, 0, 4, 0, 2, 0, 5, 0, 3, 0, 6, 0]);

        let mut back = vec![0; 14];
        untranspose_column(&out, RowOrdering::ByColumn, 7, 2, 1, 2, 3, &mut back);
        assert_eq!(&back[1..7], &tile()[1..7]);
        assert_eq!(&back[8..], &tile()[8..]);
    }

    #[test]
    fn by_row_keeps_rows_contiguous() {
        let mut out = vec![0; 12];
        transpose_column(&tile(), 7, 2, &column(RowOrdering::ByRow), &mut out);
        assert_eq!(out, vec![1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0]);
    }

    #[test]
    fn accumulator_reports_full_tiles() {
        let mut rows = RowAccumulator::new(2, 2);
        assert!(!rows.push(&[1, 2]));
        assert!(rows.push(&[3, 4]));
        let full = rows.take();
        assert_eq!(full, vec![1, 2, 3, 4]);
        assert_eq!(rows.pending_rows(), 0);
        rows.restore(Vec::new());
        assert!(!rows.push(&[5, 6]));
        assert_eq!(rows.total_rows(), 3);
    }
}
