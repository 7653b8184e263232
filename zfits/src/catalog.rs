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

//! The tile catalog: one `(size, offset)` pair per tile and column, stored in front of the heap.

use crate::tile::TILE_HEADER_SIZE;

/// Bytes taken by one catalog entry.
pub const CATALOG_ENTRY_SIZE: usize = 16;

/// Location of one column block in the heap.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CatalogEntry {
    pub size: u64,
    pub offset: u64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct TileRecord {
    num_rows: usize,
    size: u64,
    /// Offsets relative to the end of the tile marker.
    entries: Vec<CatalogEntry>,
}

/// Catalog of a table with room for a fixed number of tiles.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct TileCatalog {
    num_columns: usize,
    max_tiles: usize,
    tiles: Vec<TileRecord>,
}

impl TileCatalog {
    pub(crate) fn new(num_columns: usize, max_tiles: usize) -> Self {
        TileCatalog {
            num_columns,
            max_tiles,
            tiles: Vec::new(),
        }
    }

    /// Record the next tile. `entries` hold offsets relative to the end of its marker.
    pub(crate) fn push_tile(&mut self, num_rows: usize, size: u64, entries: &[CatalogEntry]) {
        debug_assert_eq!(entries.len(), self.num_columns);
        self.tiles.push(TileRecord {
            num_rows,
            size,
            entries: entries.to_vec(),
        });
    }

    pub(crate) fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub(crate) fn num_rows(&self) -> u64 {
        self.tiles.iter().map(|tile| tile.num_rows as u64).sum()
    }

    /// Bytes of heap taken by the recorded tiles, markers included.
    pub(crate) fn heap_size(&self) -> u64 {
        self.tiles.iter().map(|tile| tile.size).sum()
    }

    /// Size of the catalog region in the file.
    pub(crate) fn byte_size(&self) -> usize {
        self.max_tiles * self.num_columns * CATALOG_ENTRY_SIZE
    }

    /// Entries with offsets counted from the start of the heap. Empty blocks keep offset 0.
    pub(crate) fn absolute_entries(&self) -> Vec<Vec<CatalogEntry>> {
        let mut tile_start = 0;
        self.tiles
            .iter()
            .map(|tile| {
                let entries = tile
                    .entries
                    .iter()
                    .map(|entry| CatalogEntry {
                        size: entry.size,
                        offset: if entry.size == 0 {
                            0
                        } else {
                            tile_start + TILE_HEADER_SIZE as u64 + entry.offset
                        },
                    })
                    .collect();
                tile_start += tile.size;
                entries
            })
            .collect()
    }

    /// The catalog region as stored: big-endian `(size, offset)` pairs, unused rows zero.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_size());
        for entry in self.absolute_entries().iter().flatten() {
            bytes.extend_from_slice(&entry.size.to_be_bytes());
            bytes.extend_from_slice(&entry.offset.to_be_bytes());
        }
        bytes.resize(self.byte_size(), 0);
        bytes
    }
}

/// Read `num_tiles` rows of `num_columns` entries from a stored catalog region.
pub(crate) fn parse_entries(
    bytes: &[u8],
    num_tiles: usize,
    num_columns: usize,
) -> Option<Vec<Vec<CatalogEntry>>> {
    let row_len = num_columns * CATALOG_ENTRY_SIZE;
    let rows = bytes.get(..num_tiles * row_len)?;
    if num_columns == 0 {
        return Some(vec![Vec::new(); num_tiles]);
    }
    let parse = |pair: &[u8]| {
        let mut size = [0; 8];
        let mut offset = [0; 8];
        size.copy_from_slice(&pair[..8]);
        offset.copy_from_slice(&pair[8..]);
        CatalogEntry {
            size: u64::from_be_bytes(size),
            offset: u64::from_be_bytes(offset),
        }
    };
    Some(
        rows.chunks_exact(row_len)
            .map(|row| row.chunks_exact(CATALOG_ENTRY_SIZE).map(parse).collect())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(size: u64, offset: u64) -> CatalogEntry {
        CatalogEntry { size, offset }
    }

    #[test]
    fn offsets_become_heap_relative() {
        let mut catalog = TileCatalog::new(3, 4);
        catalog.push_tile(10, 16 + 30 + 40, &[entry(30, 0), entry(0, 30), entry(40, 30)]);
        catalog.push_tile(5, 16 + 12 + 20, &[entry(12, 0), entry(0, 12), entry(20, 12)]);

        assert_eq!(catalog.num_tiles(), 2);
        assert_eq!(catalog.num_rows(), 15);
        assert_eq!(catalog.heap_size(), 86 + 48);
        assert_eq!(
            catalog.absolute_entries(),
            vec![
                vec![entry(30, 16), entry(0, 0), entry(40, 46)],
                vec![entry(12, 102), entry(0, 0), entry(20, 114)],
            ]
        );
    }

    #[test]
    fn stored_catalog_keeps_its_capacity() {
        let mut catalog = TileCatalog::new(2, 3);
        assert_eq!(catalog.to_bytes(), vec![0; 96]);

        catalog.push_tile(1, 16 + 14, &[entry(14, 0), entry(0, 14)]);
        let bytes = catalog.to_bytes();
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[..16], &[0, 0, 0, 0, 0, 0, 0, 14, 0, 0, 0, 0, 0, 0, 0, 16]);
        assert!(bytes[32..].iter().all(|&b| b == 0));

        assert_eq!(
            parse_entries(&bytes, 1, 2).unwrap(),
            vec![vec![entry(14, 16), entry(0, 0)]]
        );
        assert!(parse_entries(&bytes, 4, 2).is_none());
    }
}
