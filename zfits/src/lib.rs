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

//! Writer and reader for tiled, column-compressed FITS tables as produced by the FACT
//! telescope data acquisition.
//!
//! A file holds a minimal primary header, an optional table with the DRS cell offsets and one
//! binary table whose rows are grouped into tiles. Each tile stores one block per column, each
//! block compressed with its own sequence of [`Codec`]s. A catalog in front of the heap records
//! the size and position of every block, so readers can seek to any tile.
//!
//! Rows are handed to the [`TableWriter`] as plain bytes in the layout given by its columns.
//! Full tiles are compressed on worker threads and written strictly in order.
//!
//! ```no_run
//! use zfits::{ColumnType, Compression, TableReader, TableWriter};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut writer = TableWriter::builder()
//!     .writer(std::io::BufWriter::new(std::fs::File::create("events.fits.fz")?))
//!     .table_name("Events")
//!     .rows_per_tile(100)
//!     .num_threads(4)
//!     .build()?;
//! writer.add_column("EventNum", ColumnType::Int, 1, Compression::raw())?;
//! writer.add_column("Data", ColumnType::Short, 300, Compression::smoothed_huffman())?;
//!
//! let mut row = vec![0u8; writer.row_width()];
//! for event in 0u32..1000 {
//!     row[..4].copy_from_slice(&event.to_le_bytes());
//!     writer.write_row(&row)?;
//! }
//! writer.close()?;
//!
//! let mut reader = TableReader::open("events.fits.fz")?;
//! assert_eq!(reader.num_rows(), 1000);
//! for row in reader.rows() {
//!     let row = row?;
//!     assert_eq!(row.len(), 604);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Samples are stored in little-endian byte order. Header values and the catalog follow the FITS
//! conventions and are big-endian.

mod catalog;
mod drs;
mod huffman;
mod pipeline;
mod reader;
mod tile;
mod writer;

pub mod checksum;
pub mod codec;
pub mod error;
pub mod header;
pub mod schema;
pub mod util;

pub use catalog::CatalogEntry;
pub use checksum::Checksum;
pub use codec::{Codec, Compression};
pub use drs::{DRS_NUM_CELLS, DRS_NUM_PIXELS, DRS_NUM_SAMPLES, DrsCalibration};
pub use error::{Details, Error};
pub use header::{Header, HeaderCard, HeaderValue};
pub use reader::{ColumnInfo, Hdu, HduChecksum, Rows, TableReader};
pub use schema::{ColumnDescriptor, ColumnType, RowOrdering};
pub use tile::{BLOCK_HEADER_SIZE, BlockHeader, TILE_HEADER_SIZE, TileHeader};
pub use util::max_allocation_bytes;
pub use writer::{
    DEFAULT_MAX_TILES, DEFAULT_ROWS_PER_TILE, MAX_THREADS, TableState, TableWriter,
};

/// A convenience type alias for `Result`s with `Error`s.
pub type ZfitsResult<T> = Result<T, Error>;
