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

//! Logic handling reading compressed tables back.

use crate::{
    ZfitsResult,
    catalog::{CATALOG_ENTRY_SIZE, CatalogEntry, parse_entries},
    checksum::Checksum,
    codec::decode_column,
    drs::{DRS_EXTNAME, DrsCalibration},
    error::Details,
    header::Header,
    schema::ColumnType,
    tile::{TILE_HEADER_SIZE, TileHeader, untranspose_column},
    util::{padding_to_block, safe_len},
};
use log::{debug, warn};
use regex_lite::Regex;
use std::{
    fs::File,
    io::{BufReader, Read, Seek, SeekFrom},
    path::Path,
    sync::OnceLock,
};

const VERIFY_CHUNK_SIZE: usize = 64 * 1024;

/// A column as described by the table header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
    pub count: usize,
    /// Byte offset inside a row.
    pub offset: usize,
}

impl ColumnInfo {
    pub fn width(&self) -> usize {
        self.column_type.size() * self.count
    }
}

/// One header and data unit of the file.
#[derive(Clone, Debug, PartialEq)]
pub struct Hdu {
    pub header: Header,
    pub header_start: u64,
    pub data_start: u64,
    /// Bytes of data, without the padding to the next block.
    pub data_len: u64,
}

impl Hdu {
    pub fn name(&self) -> Option<&str> {
        self.header.string("EXTNAME").ok()
    }
}

/// Result of recomputing the checksums of one HDU.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HduChecksum {
    pub name: Option<String>,
    /// The whole HDU sums to all ones.
    pub checksum_ok: bool,
    /// The data sum matches `DATASUM`.
    pub datasum_ok: bool,
}

impl HduChecksum {
    pub fn is_ok(&self) -> bool {
        self.checksum_ok && self.datasum_ok
    }
}

/// Main interface for reading compressed tables.
///
/// Opening a file walks all its HDUs, keeps the DRS calibration if there is one and loads the
/// catalog of the first compressed table. Tiles are read and decoded on demand.
pub struct TableReader<R> {
    reader: R,
    hdus: Vec<Hdu>,
    table: usize,
    columns: Vec<ColumnInfo>,
    row_width: usize,
    rows_per_tile: usize,
    num_rows: u64,
    catalog: Vec<Vec<CatalogEntry>>,
    heap_start: u64,
    drs: Option<DrsCalibration>,
}

impl TableReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> ZfitsResult<Self> {
        let file = File::open(path.as_ref()).map_err(Details::OpenFile)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> TableReader<R> {
    pub fn new(mut reader: R) -> ZfitsResult<Self> {
        let file_len = reader.seek(SeekFrom::End(0)).map_err(Details::Seek)?;
        let mut hdus = Vec::new();
        let mut drs = None;
        let mut position = 0;
        while position < file_len {
            reader
                .seek(SeekFrom::Start(position))
                .map_err(Details::Seek)?;
            let (header, header_len) = Header::read_from(&mut reader)?;
            let data_start = position + header_len as u64;
            let data_len = data_size(&header)?;
            let hdu = Hdu {
                header,
                header_start: position,
                data_start,
                data_len,
            };
            if hdu.name() == Some(DRS_EXTNAME) {
                let mut data = vec![0; safe_len(data_len as usize)?];
                reader.read_exact(&mut data).map_err(Details::ReadData)?;
                drs = Some(DrsCalibration::from_data(&data)?);
            }
            position = data_start + data_len + padding_to_block(data_len);
            hdus.push(hdu);
        }

        let table = hdus
            .iter()
            .position(|hdu| hdu.header.logical("ZTABLE").unwrap_or(false))
            .ok_or(Details::NoCompressedTable)?;
        let header = &hdus[table].header;

        let columns = parse_columns(header)?;
        let row_width = columns.iter().map(ColumnInfo::width).sum();
        let declared_width = header.size("ZNAXIS1")?;
        if declared_width != row_width {
            return Err(invalid_keyword("ZNAXIS1", declared_width));
        }
        let rows_per_tile = header.size("ZTILELEN")?;
        if rows_per_tile == 0 {
            return Err(invalid_keyword("ZTILELEN", rows_per_tile));
        }
        let num_rows = header.size("ZNAXIS2")? as u64;
        let catalog_rows = header.size("NAXIS2")?;
        let catalog_width = header.size("NAXIS1")?;
        if catalog_width != columns.len() * CATALOG_ENTRY_SIZE {
            return Err(invalid_keyword("NAXIS1", catalog_width));
        }
        let num_tiles = num_rows.div_ceil(rows_per_tile as u64) as usize;
        if num_tiles > catalog_rows {
            return Err(invalid_keyword("ZNAXIS2", num_rows));
        }
        let heap_offset = match header.size("THEAP") {
            Ok(offset) => offset as u64,
            Err(_) => (catalog_rows * catalog_width) as u64,
        };

        let data_start = hdus[table].data_start;
        reader
            .seek(SeekFrom::Start(data_start))
            .map_err(Details::Seek)?;
        let mut stored = vec![0; safe_len(num_tiles * catalog_width)?];
        reader.read_exact(&mut stored).map_err(Details::ReadData)?;
        let catalog = parse_entries(&stored, num_tiles, columns.len())
            .ok_or(Details::NoCompressedTable)?;

        debug!(
            "Opened table {:?}: {} columns, {num_rows} rows in {num_tiles} tiles",
            hdus[table].name(),
            columns.len()
        );
        Ok(Self {
            reader,
            hdus,
            table,
            columns,
            row_width,
            rows_per_tile,
            num_rows,
            catalog,
            heap_start: data_start + heap_offset,
            drs,
        })
    }

    /// Header of the compressed table.
    pub fn header(&self) -> &Header {
        &self.hdus[self.table].header
    }

    pub fn hdus(&self) -> &[Hdu] {
        &self.hdus
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn row_width(&self) -> usize {
        self.row_width
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    pub fn rows_per_tile(&self) -> usize {
        self.rows_per_tile
    }

    pub fn num_tiles(&self) -> usize {
        self.catalog.len()
    }

    /// Catalog entries of the written tiles, offsets counted from the start of the heap.
    pub fn catalog(&self) -> &[Vec<CatalogEntry>] {
        &self.catalog
    }

    pub fn drs_calibration(&self) -> Option<&DrsCalibration> {
        self.drs.as_ref()
    }

    /// Number of rows stored in `tile`.
    pub fn tile_rows(&self, tile: usize) -> usize {
        let before = (tile * self.rows_per_tile) as u64;
        self.num_rows.saturating_sub(before).min(self.rows_per_tile as u64) as usize
    }

    fn check_tile(&self, tile: usize) -> ZfitsResult<()> {
        if tile < self.num_tiles() {
            Ok(())
        } else {
            Err(Details::TileOutOfRange {
                tile,
                num_tiles: self.num_tiles(),
            }
            .into())
        }
    }

    /// Heap offset of the marker of `tile`, if any of its columns has a block.
    fn tile_start(&self, tile: usize) -> ZfitsResult<Option<u64>> {
        let Some(first) = self.catalog[tile]
            .iter()
            .filter(|entry| entry.size > 0)
            .map(|entry| entry.offset)
            .min()
        else {
            return Ok(None);
        };
        first
            .checked_sub(TILE_HEADER_SIZE as u64)
            .map(Some)
            .ok_or_else(|| invalid_tile(tile, "first block overlaps the tile marker"))
    }

    /// Read the marker in front of `tile`.
    pub fn tile_header(&mut self, tile: usize) -> ZfitsResult<TileHeader> {
        self.check_tile(tile)?;
        let start = self
            .tile_start(tile)?
            .ok_or_else(|| invalid_tile(tile, "no column has a block"))?;
        let mut marker = [0; TILE_HEADER_SIZE];
        self.read_at(self.heap_start + start, &mut marker)?;
        TileHeader::parse(&marker).ok_or_else(|| invalid_tile(tile, "missing tile marker"))
    }

    /// The stored bytes of one column block, header included.
    pub fn read_block(&mut self, tile: usize, column: usize) -> ZfitsResult<Vec<u8>> {
        self.check_tile(tile)?;
        let entry = self.catalog[tile]
            .get(column)
            .copied()
            .ok_or_else(|| invalid_tile(tile, format!("no column {column}")))?;
        let mut block = vec![0; safe_len(entry.size as usize)?];
        self.read_at(self.heap_start + entry.offset, &mut block)?;
        Ok(block)
    }

    /// Decode `tile` into row-major bytes.
    pub fn read_tile(&mut self, tile: usize) -> ZfitsResult<Vec<u8>> {
        self.check_tile(tile)?;
        let rows = self.tile_rows(tile);
        let mut out = vec![0; safe_len(rows * self.row_width)?];
        let Some(start) = self.tile_start(tile)? else {
            return Ok(out);
        };

        let marker = self.tile_header(tile)?;
        if marker.num_rows as usize != rows {
            return Err(invalid_tile(
                tile,
                format!("marker holds {} rows instead of {rows}", marker.num_rows),
            ));
        }
        let body_len = (marker.size as usize)
            .checked_sub(TILE_HEADER_SIZE)
            .ok_or_else(|| invalid_tile(tile, "tile is smaller than its marker"))?;
        let mut body = vec![0; safe_len(body_len)?];
        let body_start = start + TILE_HEADER_SIZE as u64;
        self.read_at(self.heap_start + body_start, &mut body)?;

        for (index, (column, entry)) in self.columns.iter().zip(&self.catalog[tile]).enumerate() {
            let invalid = |reason: String| Details::InvalidBlock {
                tile,
                column: index,
                reason,
            };
            if entry.size == 0 {
                if column.width() != 0 {
                    return Err(invalid("column has no block".to_string()).into());
                }
                continue;
            }
            let block = entry
                .offset
                .checked_sub(body_start)
                .and_then(|begin| {
                    let begin = usize::try_from(begin).ok()?;
                    body.get(begin..begin.checked_add(entry.size as usize)?)
                })
                .ok_or_else(|| invalid("block lies outside its tile".to_string()))?;
            let size = column.column_type.size();
            let (ordering, data) =
                decode_column(block, size, column.count, rows).map_err(invalid)?;
            untranspose_column(
                &data,
                ordering,
                self.row_width,
                rows,
                column.offset,
                size,
                column.count,
                &mut out,
            );
        }
        Ok(out)
    }

    /// Iterate over all rows, decoding one tile at a time.
    pub fn rows(&mut self) -> Rows<'_, R> {
        Rows {
            reader: self,
            tile: 0,
            row: 0,
            rows_in_tile: 0,
            buffer: Vec::new(),
            failed: false,
        }
    }

    /// Recompute `CHECKSUM` and `DATASUM` of every HDU.
    pub fn verify(&mut self) -> ZfitsResult<Vec<HduChecksum>> {
        let mut results = Vec::with_capacity(self.hdus.len());
        let mut chunk = vec![0; VERIFY_CHUNK_SIZE];
        for index in 0..self.hdus.len() {
            let Hdu {
                header_start,
                data_start,
                data_len,
                ..
            } = self.hdus[index];

            let mut header = vec![0; (data_start - header_start) as usize];
            self.read_at(header_start, &mut header)?;
            let mut hdu_sum = Checksum::new();
            hdu_sum.update(&header);

            let mut data_sum = Checksum::new();
            let mut remaining = data_len;
            while remaining > 0 {
                let n = remaining.min(VERIFY_CHUNK_SIZE as u64) as usize;
                self.reader
                    .read_exact(&mut chunk[..n])
                    .map_err(Details::ReadData)?;
                data_sum.update(&chunk[..n]);
                remaining -= n as u64;
            }
            hdu_sum.merge(&data_sum);

            let hdu = &self.hdus[index];
            let stored_datasum = hdu
                .header
                .string("DATASUM")
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());
            let result = HduChecksum {
                name: hdu.name().map(str::to_string),
                checksum_ok: hdu.header.contains("CHECKSUM") && hdu_sum.value() == u32::MAX,
                datasum_ok: stored_datasum == Some(data_sum.value()),
            };
            if !result.is_ok() {
                warn!("Checksum mismatch in HDU {index} ({:?})", result.name);
            }
            results.push(result);
        }
        Ok(results)
    }

    fn read_at(&mut self, position: u64, buf: &mut [u8]) -> ZfitsResult<()> {
        self.reader
            .seek(SeekFrom::Start(position))
            .map_err(Details::Seek)?;
        self.reader.read_exact(buf).map_err(Details::ReadData)?;
        Ok(())
    }
}

/// Iterator over the rows of a table, see [`TableReader::rows`].
pub struct Rows<'a, R> {
    reader: &'a mut TableReader<R>,
    tile: usize,
    row: usize,
    rows_in_tile: usize,
    buffer: Vec<u8>,
    failed: bool,
}

impl<R: Read + Seek> Iterator for Rows<'_, R> {
    type Item = ZfitsResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        while self.row == self.rows_in_tile {
            if self.tile == self.reader.num_tiles() {
                return None;
            }
            match self.reader.read_tile(self.tile) {
                Ok(buffer) => {
                    self.rows_in_tile = self.reader.tile_rows(self.tile);
                    self.buffer = buffer;
                    self.row = 0;
                    self.tile += 1;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        let width = self.reader.row_width;
        let row = self.buffer[self.row * width..(self.row + 1) * width].to_vec();
        self.row += 1;
        Some(Ok(row))
    }
}

fn zform_regex() -> &'static Regex {
    static ZFORM_ONCE: OnceLock<Regex> = OnceLock::new();
    ZFORM_ONCE.get_or_init(|| Regex::new(r"^(\d*)([LABIJKED])$").expect("Regex is valid"))
}

fn parse_columns(header: &Header) -> ZfitsResult<Vec<ColumnInfo>> {
    let num_columns = header.size("TFIELDS")?;
    let mut columns = Vec::with_capacity(num_columns.min(999));
    let mut offset = 0;
    for n in 1..=num_columns {
        let name = header.string(&format!("TTYPE{n}"))?.to_string();
        let key = format!("ZFORM{n}");
        let format = header.string(&key)?;
        let captures = zform_regex()
            .captures(format.trim())
            .ok_or_else(|| invalid_keyword(&key, format))?;
        let count = match &captures[1] {
            "" => 1,
            digits => digits
                .parse::<usize>()
                .map_err(|_| invalid_keyword(&key, format))?,
        };
        let column_type = captures[2]
            .chars()
            .next()
            .and_then(ColumnType::from_letter)
            .ok_or_else(|| invalid_keyword(&key, format))?;
        if let Ok(scheme) = header.string(&format!("ZCTYP{n}")) {
            if scheme != "FACT" {
                warn!("Column '{name}' uses compression scheme '{scheme}'");
            }
        }

        let column = ColumnInfo {
            name,
            column_type,
            count,
            offset,
        };
        offset += column.width();
        columns.push(column);
    }
    Ok(columns)
}

/// Size of the data area described by a header, without padding.
fn data_size(header: &Header) -> ZfitsResult<u64> {
    let naxis = header.size("NAXIS")?;
    if naxis == 0 {
        return Ok(0);
    }
    let mut size = header.integer("BITPIX")?.unsigned_abs() / 8;
    for i in 1..=naxis {
        let key = format!("NAXIS{i}");
        let axis = header.size(&key)? as u64;
        size = size
            .checked_mul(axis)
            .ok_or_else(|| invalid_keyword(&key, axis))?;
    }
    let pcount = header.size("PCOUNT").unwrap_or(0) as u64;
    let gcount = header.size("GCOUNT").unwrap_or(1) as u64;
    size.checked_add(pcount)
        .and_then(|size| size.checked_mul(gcount))
        .ok_or_else(|| invalid_keyword("PCOUNT", pcount))
}

fn invalid_keyword(key: &str, value: impl ToString) -> crate::Error {
    Details::InvalidKeyword {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}

fn invalid_tile(tile: usize, reason: impl Into<String>) -> crate::Error {
    Details::InvalidTile {
        tile,
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::HeaderCard;
    use pretty_assertions::assert_eq;

    fn header(cards: &[HeaderCard]) -> Header {
        let mut header = Header::new();
        for card in cards {
            header.set(card.clone());
        }
        header
    }

    #[test]
    fn data_size_of_tables_and_images() {
        let primary = header(&[
            HeaderCard::new("SIMPLE", true, ""),
            HeaderCard::new("BITPIX", 8, ""),
            HeaderCard::new("NAXIS", 0, ""),
        ]);
        assert_eq!(data_size(&primary).unwrap(), 0);

        let table = header(&[
            HeaderCard::new("BITPIX", 8, ""),
            HeaderCard::new("NAXIS", 2, ""),
            HeaderCard::new("NAXIS1", 32, ""),
            HeaderCard::new("NAXIS2", 1000, ""),
            HeaderCard::new("PCOUNT", 90, ""),
            HeaderCard::new("GCOUNT", 1, ""),
        ]);
        assert_eq!(data_size(&table).unwrap(), 32_090);

        let image = header(&[
            HeaderCard::new("BITPIX", -32, ""),
            HeaderCard::new("NAXIS", 2, ""),
            HeaderCard::new("NAXIS1", 10, ""),
            HeaderCard::new("NAXIS2", 3, ""),
        ]);
        assert_eq!(data_size(&image).unwrap(), 120);
    }

    #[test]
    fn columns_follow_the_zform_cards() {
        let header = header(&[
            HeaderCard::new("TFIELDS", 3, ""),
            HeaderCard::new("TTYPE1", "EventNum", ""),
            HeaderCard::new("ZFORM1", "1J", ""),
            HeaderCard::new("TTYPE2", "Data", ""),
            HeaderCard::new("ZFORM2", "300I", ""),
            HeaderCard::new("TTYPE3", "Flag", ""),
            HeaderCard::new("ZFORM3", "L", ""),
        ]);
        let columns = parse_columns(&header).unwrap();
        assert_eq!(
            columns,
            vec![
                ColumnInfo {
                    name: "EventNum".to_string(),
                    column_type: ColumnType::Int,
                    count: 1,
                    offset: 0,
                },
                ColumnInfo {
                    name: "Data".to_string(),
                    column_type: ColumnType::Short,
                    count: 300,
                    offset: 4,
                },
                ColumnInfo {
                    name: "Flag".to_string(),
                    column_type: ColumnType::Bool,
                    count: 1,
                    offset: 604,
                },
            ]
        );
    }

    #[test]
    fn unknown_zform_is_rejected() {
        let header = header(&[
            HeaderCard::new("TFIELDS", 1, ""),
            HeaderCard::new("TTYPE1", "X", ""),
            HeaderCard::new("ZFORM1", "2X", ""),
        ]);
        let err = parse_columns(&header).unwrap_err();
        assert!(matches!(
            err.details(),
            Details::InvalidKeyword { key, .. } if key == "ZFORM1"
        ));
    }

    #[test]
    fn file_without_compressed_table() {
        let primary = header(&[
            HeaderCard::new("SIMPLE", true, ""),
            HeaderCard::new("BITPIX", 8, ""),
            HeaderCard::new("NAXIS", 0, ""),
        ])
        .render();
        let err = TableReader::new(std::io::Cursor::new(primary))
            .err()
            .expect("no table");
        assert!(matches!(err.details(), Details::NoCompressedTable));
    }
}
