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

//! Logic handling writing compressed tables.

use crate::{
    ZfitsResult,
    catalog::{CATALOG_ENTRY_SIZE, TileCatalog},
    checksum::{CHECKSUM_PLACEHOLDER, Checksum, seal},
    codec::Compression,
    drs::DrsCalibration,
    error::Details,
    header::{Header, HeaderCard, HeaderValue, is_reserved_keyword},
    pipeline::{CompressionPipeline, Sink, TileEncoder},
    schema::{ColumnDescriptor, ColumnType, TableSchema},
    tile::RowAccumulator,
    util::padding_to_block,
};
use log::{debug, error};
use std::{
    fs::File,
    io::{BufWriter, Seek, SeekFrom, Write},
    mem,
    path::Path,
    sync::Arc,
    thread,
};

pub const DEFAULT_ROWS_PER_TILE: usize = 100;
pub const DEFAULT_MAX_TILES: usize = 1000;
/// Largest number of compression threads a writer may use.
pub const MAX_THREADS: usize = 64;

/// Where a [`TableWriter`] is in its life.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TableState {
    /// Columns and header keys may still be added.
    Created,
    /// The headers and the empty catalog are on disk.
    HeaderWritten,
    /// Rows are being accepted and compressed.
    WritingRows,
    Closing,
    /// Nothing more can be written.
    Closed,
}

enum Output<W> {
    Pending(W),
    Running(CompressionPipeline<W>),
    Finished(W),
    Gone,
}

/// Main interface for writing a compressed FITS table.
///
/// Rows are gathered into tiles of `rows_per_tile` rows, which are compressed by a pool of
/// threads and appended to the heap in order. The table header and the tile catalog are
/// rewritten in place when the table is closed.
///
/// Dropping an open writer closes it and logs any error. Call [`close`](TableWriter::close) to
/// see the error instead.
pub struct TableWriter<W: Write + Seek + Send + 'static> {
    output: Output<W>,
    state: TableState,
    table_name: String,
    schema: TableSchema,
    /// Column and user cards, in the order they were set.
    header: Header,
    drs: Option<DrsCalibration>,
    rows_per_tile: usize,
    max_tiles: usize,
    num_threads: usize,
    rows: RowAccumulator,
    file_start: u64,
    table_start: u64,
    heap_start: u64,
}

#[bon::bon]
impl<W: Write + Seek + Send + 'static> TableWriter<W> {
    #[builder]
    pub fn builder(
        writer: W,
        #[builder(into)] table_name: String,
        #[builder(default = DEFAULT_ROWS_PER_TILE)] rows_per_tile: usize,
        /// Number of tiles the catalog has room for.
        #[builder(default = DEFAULT_MAX_TILES)]
        max_tiles: usize,
        #[builder(default = 1)] num_threads: usize,
    ) -> ZfitsResult<Self> {
        if rows_per_tile == 0 {
            error!("Rows per tile must be at least 1");
            return Err(Details::InvalidRowsPerTile.into());
        }
        check_num_threads(num_threads)?;
        Ok(Self {
            output: Output::Pending(writer),
            state: TableState::Created,
            table_name,
            schema: TableSchema::default(),
            header: Header::new(),
            drs: None,
            rows_per_tile,
            max_tiles,
            num_threads,
            rows: RowAccumulator::new(0, rows_per_tile),
            file_start: 0,
            table_start: 0,
            heap_start: 0,
        })
    }
}

impl TableWriter<BufWriter<File>> {
    /// Create the file at `path`, truncating it if it exists.
    pub fn create(path: impl AsRef<Path>, table_name: &str) -> ZfitsResult<Self> {
        let file = File::create(path.as_ref()).map_err(Details::CreateFile)?;
        Self::new(BufWriter::new(file), table_name)
    }
}

impl<W: Write + Seek + Send + 'static> TableWriter<W> {
    /// Creates a `TableWriter` with the default tile size writing to `writer`.
    pub fn new(writer: W, table_name: &str) -> ZfitsResult<Self> {
        Self::builder()
            .writer(writer)
            .table_name(table_name)
            .build()
    }

    pub fn state(&self) -> TableState {
        self.state
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        self.schema.columns()
    }

    pub fn row_width(&self) -> usize {
        self.schema.row_width()
    }

    /// Rows accepted so far.
    pub fn num_rows(&self) -> u64 {
        self.rows.total_rows()
    }

    pub fn rows_per_tile(&self) -> usize {
        self.rows_per_tile
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// The column and user header cards.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Append a column to the row layout. Only possible before the first row is written.
    pub fn add_column(
        &mut self,
        name: &str,
        column_type: ColumnType,
        count: usize,
        compression: Compression,
    ) -> ZfitsResult<()> {
        if self.state != TableState::Created {
            error!("Cannot add column '{name}' once rows have been written");
            return Err(Details::ColumnsFrozen(name.to_string()).into());
        }
        let column = self
            .schema
            .add_column(name, column_type, count, compression)
            .inspect_err(|e| error!("{e}"))?;
        let format = column.format();

        let n = self.schema.len();
        for card in [
            HeaderCard::new(&format!("TTYPE{n}"), name, &format!("label for field {n:>3}")),
            HeaderCard::new(&format!("TFORM{n}"), "1QB", &format!("data format of field {n}")),
            HeaderCard::new(
                &format!("ZFORM{n}"),
                format.as_str(),
                &format!("Original format of field {n}"),
            ),
            HeaderCard::new(&format!("ZCTYP{n}"), "FACT", &format!("Comp. Scheme of field {n}")),
        ] {
            self.header.set(card);
        }
        debug!("Added column '{name}' as field {n} ({format})");
        Ok(())
    }

    /// Set a user header key. New keys are only accepted before the first row, existing keys
    /// may be updated until the table is closed.
    pub fn set_header_key(
        &mut self,
        key: &str,
        value: impl Into<HeaderValue>,
        comment: &str,
    ) -> ZfitsResult<()> {
        if matches!(self.state, TableState::Closing | TableState::Closed) {
            return Err(Details::TableClosed.into());
        }
        let card = HeaderCard::new(key, value, comment);
        if is_reserved_keyword(card.key()) {
            error!("Header keyword '{}' is reserved", card.key());
            return Err(Details::ReservedKeyword(card.key().to_string()).into());
        }
        if self.state != TableState::Created && !self.header.contains(card.key()) {
            error!(
                "Cannot add header keyword '{}' once rows have been written",
                card.key()
            );
            return Err(Details::HeaderFrozen(card.key().to_string()).into());
        }
        self.header.set(card);
        Ok(())
    }

    /// Rename a user header key, keeping its value and comment.
    pub fn rename_header_key(&mut self, from: &str, to: &str) -> ZfitsResult<()> {
        if matches!(self.state, TableState::Closing | TableState::Closed) {
            return Err(Details::TableClosed.into());
        }
        for key in [from, to] {
            if is_reserved_keyword(key) {
                error!("Header keyword '{key}' is reserved");
                return Err(Details::ReservedKeyword(key.to_string()).into());
            }
        }
        if self.header.contains(to) {
            error!("Cannot rename '{from}' to '{to}': the keyword exists");
            return Err(Details::HeaderKeyExists(to.to_string()).into());
        }
        if !self.header.rename(from, to) {
            error!("Cannot rename '{from}': no such keyword");
            return Err(Details::UnknownHeaderKey(from.to_string()).into());
        }
        Ok(())
    }

    /// Set the number of compression threads. Only possible before the first row is written.
    pub fn set_num_threads(&mut self, num_threads: usize) -> ZfitsResult<()> {
        if self.state != TableState::Created {
            error!("Cannot change the number of threads once rows have been written");
            return Err(Details::ThreadsFrozen.into());
        }
        check_num_threads(num_threads)?;
        self.num_threads = num_threads;
        Ok(())
    }

    /// Store a DRS calibration in its own table ahead of the data. Only possible before the
    /// first row is written.
    pub fn set_drs_calibration(&mut self, offsets: Vec<i16>) -> ZfitsResult<()> {
        if self.state != TableState::Created {
            error!("DRS calibration must be set before the first row is written");
            return Err(Details::DrsCalibrationFrozen.into());
        }
        let calibration = DrsCalibration::new(offsets).inspect_err(|e| error!("{e}"))?;
        self.drs = Some(calibration);
        Ok(())
    }

    /// Append one row, given as the concatenation of its columns' bytes.
    ///
    /// The first row writes the headers and starts the compression threads.
    pub fn write_row(&mut self, row: &[u8]) -> ZfitsResult<()> {
        if matches!(self.state, TableState::Closing | TableState::Closed) {
            return Err(Details::TableClosed.into());
        }
        let row_width = self.schema.row_width();
        if row_width == 0 {
            error!("Cannot write rows to table '{}' without columns", self.table_name);
            return Err(Details::EmptyRow.into());
        }
        if row.len() != row_width {
            error!("Row has {} bytes instead of {row_width}", row.len());
            return Err(Details::RowWidthMismatch {
                expected: row_width,
                actual: row.len(),
            }
            .into());
        }
        if self.rows.total_rows() >= (self.max_tiles * self.rows_per_tile) as u64 {
            error!("Catalog of table '{}' is full", self.table_name);
            return Err(Details::CatalogFull {
                max_tiles: self.max_tiles,
                rows_per_tile: self.rows_per_tile,
            }
            .into());
        }
        if self.state == TableState::Created {
            self.start()?;
        }

        let Output::Running(pipeline) = &mut self.output else {
            return Err(Details::TableClosed.into());
        };
        if self.rows.push(row) {
            let spare = pipeline.submit(self.rows_per_tile, self.rows.take());
            self.rows.restore(spare);
        }
        pipeline.check()
    }

    /// Drain the compression threads, write the last partial tile and rewrite the header and
    /// catalog. The stream is padded to a whole number of blocks and flushed.
    pub fn close(&mut self) -> ZfitsResult<()> {
        let output = mem::replace(&mut self.output, Output::Gone);
        let previous = mem::replace(&mut self.state, TableState::Closed);
        let mut sink = match output {
            Output::Pending(stream) => self.write_prelude(stream)?,
            Output::Running(pipeline) => {
                let pending = self.rows.pending_rows();
                let trailing = (pending > 0).then(|| (pending, self.rows.take()));
                pipeline.finish(trailing)
            }
            done @ (Output::Finished(_) | Output::Gone) => {
                self.output = done;
                debug_assert_eq!(previous, TableState::Closed);
                return Err(Details::TableClosed.into());
            }
        };

        self.state = TableState::Closing;
        let result = self.finalize(&mut sink);
        self.output = Output::Finished(sink.stream);
        self.state = TableState::Closed;
        result
    }

    /// Close the table and return the underlying writer.
    pub fn into_inner(mut self) -> ZfitsResult<W> {
        if self.state != TableState::Closed {
            self.close()?;
        }
        match mem::replace(&mut self.output, Output::Gone) {
            Output::Finished(stream) => Ok(stream),
            _ => Err(Details::TableClosed.into()),
        }
    }

    fn start(&mut self) -> ZfitsResult<()> {
        let Output::Pending(stream) = mem::replace(&mut self.output, Output::Gone) else {
            return Err(Details::TableClosed.into());
        };
        self.state = TableState::Closed;
        let sink = self.write_prelude(stream)?;
        self.state = TableState::HeaderWritten;

        let row_width = self.schema.row_width();
        self.rows = RowAccumulator::new(row_width, self.rows_per_tile);
        let encoder = TileEncoder::new(self.schema.columns().to_vec(), row_width);
        let pipeline = CompressionPipeline::spawn(sink, Arc::new(encoder), self.num_threads)
            .inspect_err(|_| self.state = TableState::Closed)?;
        self.output = Output::Running(pipeline);
        self.state = TableState::WritingRows;
        Ok(())
    }

    /// Write the primary header, the calibration table if any, the table header and an empty
    /// catalog.
    fn write_prelude(&mut self, mut stream: W) -> ZfitsResult<Sink<W>> {
        self.file_start = stream.stream_position().map_err(Details::Seek)?;
        stream
            .write_all(&primary_header().render())
            .map_err(Details::WriteBytes)?;
        if let Some(drs) = &self.drs {
            stream
                .write_all(&drs.to_hdu())
                .map_err(Details::WriteBytes)?;
        }

        self.table_start = stream.stream_position().map_err(Details::Seek)?;
        let catalog = TileCatalog::new(self.schema.len(), self.max_tiles);
        let header = self.table_header(&catalog, &Checksum::new()).render();
        stream.write_all(&header).map_err(Details::WriteBytes)?;
        stream
            .write_all(&catalog.to_bytes())
            .map_err(Details::WriteBytes)?;
        self.heap_start = self.table_start + (header.len() + catalog.byte_size()) as u64;

        debug!(
            "Wrote headers of table '{}', heap starts at byte {}",
            self.table_name, self.heap_start
        );
        Ok(Sink::new(stream, catalog))
    }

    fn finalize(&self, sink: &mut Sink<W>) -> ZfitsResult<()> {
        sink.check()?;

        let catalog = sink.catalog.to_bytes();
        let mut data_sum = Checksum::new();
        data_sum.update(&catalog);
        data_sum.merge(&sink.checksum);
        let header = self.table_header(&sink.catalog, &data_sum).render();
        let heap_end = self.heap_start + sink.catalog.heap_size();

        let stream = &mut sink.stream;
        stream
            .seek(SeekFrom::Start(self.table_start))
            .map_err(Details::Seek)?;
        stream.write_all(&header).map_err(Details::WriteBytes)?;
        stream.write_all(&catalog).map_err(Details::WriteBytes)?;
        stream
            .seek(SeekFrom::Start(heap_end))
            .map_err(Details::Seek)?;
        let padding = padding_to_block(heap_end - self.file_start) as usize;
        stream
            .write_all(&vec![0; padding])
            .map_err(Details::WriteBytes)?;
        stream.flush().map_err(Details::FlushWriter)?;

        debug!(
            "Closed table '{}': {} rows in {} tiles, {} heap bytes",
            self.table_name,
            sink.catalog.num_rows(),
            sink.catalog.num_tiles(),
            sink.catalog.heap_size()
        );
        Ok(())
    }

    /// The table header for the given catalog and data checksum. Rendering it twice for the
    /// same state gives the same bytes.
    fn table_header(&self, catalog: &TileCatalog, data_sum: &Checksum) -> Header {
        let num_columns = self.schema.len();
        let catalog_size = catalog.byte_size();
        let mut header = Header::new();
        for card in [
            HeaderCard::new("XTENSION", "BINTABLE", "binary table extension"),
            HeaderCard::new("BITPIX", 8, "8-bit bytes"),
            HeaderCard::new("NAXIS", 2, "2-dimensional binary table"),
            HeaderCard::new(
                "NAXIS1",
                num_columns * CATALOG_ENTRY_SIZE,
                "width of table in bytes",
            ),
            // The catalog keeps its full capacity so the heap never has to move when the header
            // is rewritten at close. Unused rows stay zero.
            HeaderCard::new("NAXIS2", self.max_tiles, "num of rows in table"),
            HeaderCard::new("PCOUNT", catalog.heap_size(), "size of special data area"),
            HeaderCard::new("GCOUNT", 1, "one data group (required keyword)"),
            HeaderCard::new("TFIELDS", num_columns, "number of fields in each row"),
            HeaderCard::new("CHECKSUM", CHECKSUM_PLACEHOLDER, "Checksum for the whole HDU"),
            HeaderCard::new("DATASUM", "         0", "Checksum for the data block"),
            HeaderCard::new("ZTABLE", true, "Table is compressed"),
            HeaderCard::new("ZNAXIS1", self.schema.row_width(), "Width of uncompressed rows"),
            HeaderCard::new("ZNAXIS2", catalog.num_rows(), "Number of uncompressed rows"),
            HeaderCard::new("ZPCOUNT", 0, ""),
            HeaderCard::new("ZHEAPPTR", catalog_size, ""),
            HeaderCard::new("ZTILELEN", self.rows_per_tile, "Number of rows per tile"),
            HeaderCard::new("THEAP", catalog_size, ""),
            HeaderCard::new(
                "EXTNAME",
                self.table_name.as_str(),
                "name of this binary table extension",
            ),
        ] {
            header.set(card);
        }
        for card in self.header.cards() {
            header.set(card.clone());
        }
        seal(&mut header, data_sum);
        header
    }
}

impl<W: Write + Seek + Send + 'static> Drop for TableWriter<W> {
    /// Close the table if that has not happened yet, logging any error.
    fn drop(&mut self) {
        if self.state == TableState::Closed || thread::panicking() {
            return;
        }
        if let Err(e) = self.close() {
            error!("Failed to close table '{}': {e}", self.table_name);
        }
    }
}

fn check_num_threads(num_threads: usize) -> ZfitsResult<()> {
    if (1..=MAX_THREADS).contains(&num_threads) {
        Ok(())
    } else {
        error!("Number of threads must be between 1 and {MAX_THREADS}, got {num_threads}");
        Err(Details::InvalidThreadCount(num_threads).into())
    }
}

/// The empty primary HDU every file starts with.
fn primary_header() -> Header {
    let mut header = Header::new();
    for card in [
        HeaderCard::new("SIMPLE", true, "file does conform to FITS standard"),
        HeaderCard::new("BITPIX", 8, "number of bits per data pixel"),
        HeaderCard::new("NAXIS", 0, "number of data axes"),
        HeaderCard::new("EXTEND", true, "FITS dataset may contain extensions"),
        HeaderCard::new("CHECKSUM", CHECKSUM_PLACEHOLDER, "Checksum for the whole HDU"),
        HeaderCard::new("DATASUM", "         0", "Checksum for the data block"),
        HeaderCard::commentary(
            "COMMENT",
            "FITS (Flexible Image Transport System) format is defined in 'Astronomy",
        ),
        HeaderCard::commentary(
            "COMMENT",
            "and Astrophysics', volume 376, page 359; bibcode: 2001A&A...376..359H",
        ),
    ] {
        header.set(card);
    }
    seal(&mut header, &Checksum::new());
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::BLOCK_SIZE;
    use pretty_assertions::assert_eq;
    use std::{
        io::{self, Cursor},
        sync::Mutex,
    };

    /// A stream that stays readable after the writer that owns a clone of it is dropped.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Cursor<Vec<u8>>>>);

    impl SharedBuffer {
        fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().get_ref().clone()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for SharedBuffer {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.lock().unwrap().seek(pos)
        }
    }

    fn writer() -> TableWriter<Cursor<Vec<u8>>> {
        let mut writer = TableWriter::builder()
            .writer(Cursor::new(Vec::new()))
            .table_name("Events")
            .rows_per_tile(10)
            .max_tiles(5)
            .build()
            .unwrap();
        writer
            .add_column("EventNum", ColumnType::Int, 1, Compression::raw())
            .unwrap();
        writer
            .add_column("Data", ColumnType::Short, 4, Compression::smoothed_huffman())
            .unwrap();
        writer
    }

    fn row(i: u32) -> Vec<u8> {
        let mut row = i.to_le_bytes().to_vec();
        for j in 0..4i16 {
            row.extend_from_slice(&(100 + j).to_le_bytes());
        }
        row
    }

    #[test]
    fn builder_defaults_and_validation() {
        let writer = TableWriter::new(Cursor::new(Vec::new()), "Events").unwrap();
        assert_eq!(writer.rows_per_tile(), DEFAULT_ROWS_PER_TILE);
        assert_eq!(writer.num_threads(), 1);
        assert_eq!(writer.state(), TableState::Created);

        let err = TableWriter::builder()
            .writer(Cursor::new(Vec::new()))
            .table_name("Events")
            .rows_per_tile(0)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err.details(), Details::InvalidRowsPerTile));

        let mut writer = writer;
        assert!(writer.set_num_threads(0).is_err());
        assert!(writer.set_num_threads(65).is_err());
        writer.set_num_threads(64).unwrap();
        assert_eq!(writer.num_threads(), 64);
    }

    #[test]
    fn columns_produce_their_header_cards() {
        let writer = writer();
        assert_eq!(writer.row_width(), 12);
        let header = writer.header();
        assert_eq!(header.string("TTYPE2").unwrap(), "Data");
        assert_eq!(header.string("TFORM2").unwrap(), "1QB");
        assert_eq!(header.string("ZFORM2").unwrap(), "4I");
        assert_eq!(header.string("ZCTYP2").unwrap(), "FACT");
        assert_eq!(header.get("TTYPE1").unwrap().comment(), "label for field   1");
    }

    #[test]
    fn configuration_is_frozen_by_the_first_row() {
        let mut writer = writer();
        writer.set_header_key("RUNID", 42, "run number").unwrap();
        writer.write_row(&row(0)).unwrap();
        assert_eq!(writer.state(), TableState::WritingRows);

        let columns = writer.columns().to_vec();
        let err = writer
            .add_column("Late", ColumnType::Byte, 1, Compression::raw())
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(writer.columns(), &columns[..]);

        assert!(matches!(
            writer.set_header_key("NEWKEY", 1, "").unwrap_err().details(),
            Details::HeaderFrozen(_)
        ));
        assert!(matches!(
            writer.set_num_threads(2).unwrap_err().details(),
            Details::ThreadsFrozen
        ));
        assert!(matches!(
            writer.set_drs_calibration(Vec::new()).unwrap_err().details(),
            Details::DrsCalibrationFrozen
        ));
        writer.set_header_key("RUNID", 43, "").unwrap();
        assert_eq!(writer.header().integer("RUNID").unwrap(), 43);
        writer.close().unwrap();
    }

    #[test]
    fn reserved_and_unknown_keys_are_rejected() {
        let mut writer = writer();
        for key in ["NAXIS2", "ZTILELEN", "TFORM3", "CHECKSUM"] {
            assert!(matches!(
                writer.set_header_key(key, 1, "").unwrap_err().details(),
                Details::ReservedKeyword(_)
            ));
        }
        writer.set_header_key("TELESCOP", "FACT", "").unwrap();
        writer.set_header_key("RUNID", 1, "").unwrap();
        assert!(matches!(
            writer.rename_header_key("NIGHT", "DATE").unwrap_err().details(),
            Details::UnknownHeaderKey(_)
        ));
        assert!(matches!(
            writer.rename_header_key("RUNID", "TELESCOP").unwrap_err().details(),
            Details::HeaderKeyExists(_)
        ));
        writer.rename_header_key("RUNID", "RUN").unwrap();
        assert_eq!(writer.header().integer("RUN").unwrap(), 1);
        assert!(!writer.header().contains("RUNID"));
    }

    #[test]
    fn rows_are_checked_before_they_are_accepted() {
        let mut writer = writer();
        assert!(matches!(
            writer.write_row(&[0; 5]).unwrap_err().details(),
            Details::RowWidthMismatch {
                expected: 12,
                actual: 5
            }
        ));
        assert_eq!(writer.state(), TableState::Created);

        for i in 0..50 {
            writer.write_row(&row(i)).unwrap();
        }
        assert!(matches!(
            writer.write_row(&row(50)).unwrap_err().details(),
            Details::CatalogFull {
                max_tiles: 5,
                rows_per_tile: 10
            }
        ));
        assert_eq!(writer.num_rows(), 50);

        let mut empty = TableWriter::new(Cursor::new(Vec::new()), "Empty").unwrap();
        assert!(matches!(
            empty.write_row(&[]).unwrap_err().details(),
            Details::EmptyRow
        ));
    }

    #[test]
    fn closing_twice_fails_and_keeps_the_output() {
        let mut writer = writer();
        for i in 0..25 {
            writer.write_row(&row(i)).unwrap();
        }
        writer.close().unwrap();
        assert_eq!(writer.state(), TableState::Closed);
        assert!(matches!(
            writer.close().unwrap_err().details(),
            Details::TableClosed
        ));
        assert!(matches!(
            writer.write_row(&row(25)).unwrap_err().details(),
            Details::TableClosed
        ));

        let bytes = writer.into_inner().unwrap().into_inner();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        assert!(bytes.starts_with(primary_header().render().as_slice()));
    }

    #[test]
    fn primary_header_matches_the_camera_files() {
        let header = primary_header();
        assert_eq!(header.string("CHECKSUM").unwrap(), "4AcB48bA4AbA45bA");
        assert_eq!(header.render().len(), BLOCK_SIZE);
    }

    #[test]
    fn table_header_rendering_is_idempotent() {
        let writer = writer();
        let mut catalog = TileCatalog::new(2, 5);
        catalog.push_tile(
            10,
            90,
            &[
                crate::catalog::CatalogEntry { size: 52, offset: 0 },
                crate::catalog::CatalogEntry { size: 22, offset: 52 },
            ],
        );
        let mut data = Checksum::new();
        data.update(&catalog.to_bytes());

        let first = writer.table_header(&catalog, &data);
        let second = writer.table_header(&catalog, &data);
        assert_eq!(first.render(), second.render());
        assert_eq!(first.integer("PCOUNT").unwrap(), 90);
        assert_eq!(first.integer("ZNAXIS2").unwrap(), 10);
        assert_eq!(first.integer("THEAP").unwrap(), 160);
        assert_eq!(first.integer("NAXIS1").unwrap(), 32);
        assert_eq!(first.integer("NAXIS2").unwrap(), 5);
        assert_eq!(
            first.string("DATASUM").unwrap(),
            format!("{:>10}", data.value())
        );

        let empty = writer.table_header(&TileCatalog::new(2, 5), &Checksum::new());
        assert_eq!(empty.len(), first.len());
    }

    #[test]
    fn dropping_an_open_writer_closes_it() {
        let buffer = SharedBuffer::default();
        {
            let mut writer = TableWriter::builder()
                .writer(buffer.clone())
                .table_name("Events")
                .rows_per_tile(4)
                .num_threads(3)
                .build()
                .unwrap();
            writer
                .add_column("Data", ColumnType::Short, 2, Compression::huffman())
                .unwrap();
            for i in 0..10i16 {
                writer.write_row(&[i.to_le_bytes(), i.to_le_bytes()].concat()).unwrap();
            }
        }
        let bytes = buffer.bytes();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);

        let mut checksum = Checksum::new();
        checksum.update(&bytes[BLOCK_SIZE..]);
        assert_eq!(checksum.value(), 0xffff_ffff);
    }
}
