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

//! Errors reported while writing or reading compressed tables.

use crate::{codec::Codec, schema::ColumnType};
use std::{error::Error as _, fmt};

/// Errors encountered by zfits.
///
/// To inspect the details of the error use [`details`](Self::details) or
/// [`into_details`](Self::into_details) to get a [`Details`] which contains more precise error
/// information.
#[derive(thiserror::Error, Debug)]
#[repr(transparent)]
#[error(transparent)]
pub struct Error {
    details: Box<Details>,
}

impl Error {
    pub fn new(details: Details) -> Self {
        Self {
            details: Box::new(details),
        }
    }

    pub fn details(&self) -> &Details {
        &self.details
    }

    pub fn into_details(self) -> Details {
        *self.details
    }

    /// Whether this error rejected a configuration change and left the table untouched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            *self.details,
            Details::ColumnsFrozen(_)
                | Details::DuplicateColumn(_)
                | Details::InvalidThreadCount(_)
                | Details::ThreadsFrozen
                | Details::InvalidCompression { .. }
                | Details::ReservedKeyword(_)
                | Details::HeaderFrozen(_)
                | Details::UnknownHeaderKey(_)
                | Details::HeaderKeyExists(_)
                | Details::CatalogFull { .. }
                | Details::InvalidDrsCalibration { .. }
                | Details::DrsCalibrationFrozen
                | Details::RowWidthMismatch { .. }
                | Details::EmptyRow
                | Details::InvalidRowsPerTile
        )
    }
}

impl From<Details> for Error {
    fn from(details: Details) -> Self {
        Self::new(details)
    }
}

#[derive(thiserror::Error)]
pub enum Details {
    #[error("Cannot add column '{0}': rows have already been written")]
    ColumnsFrozen(String),

    #[error("Column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("Number of compression threads must be between 1 and 64, got {0}")]
    InvalidThreadCount(usize),

    #[error("Number of compression threads cannot change once rows have been written")]
    ThreadsFrozen,

    #[error("Rows per tile must be at least 1")]
    InvalidRowsPerTile,

    #[error("Invalid compression {sequence:?} for column '{column}' of type {column_type:?}: {reason}")]
    InvalidCompression {
        column: String,
        column_type: ColumnType,
        sequence: Vec<Codec>,
        reason: &'static str,
    },

    #[error("Header keyword '{0}' is reserved and managed by the writer")]
    ReservedKeyword(String),

    #[error("New header keyword '{0}' cannot be added once rows have been written")]
    HeaderFrozen(String),

    #[error("Header keyword '{0}' does not exist")]
    UnknownHeaderKey(String),

    #[error("Header keyword '{0}' already exists")]
    HeaderKeyExists(String),

    #[error("Catalog is full: at most {max_tiles} tiles of {rows_per_tile} rows fit in this table")]
    CatalogFull { max_tiles: usize, rows_per_tile: usize },

    #[error("DRS calibration must hold {expected} samples, got {actual}")]
    InvalidDrsCalibration { expected: usize, actual: usize },

    #[error("DRS calibration must be set before the first row is written")]
    DrsCalibrationFrozen,

    #[error("Row has {actual} bytes but the table rows are {expected} bytes wide")]
    RowWidthMismatch { expected: usize, actual: usize },

    #[error("Cannot write rows to a table without columns")]
    EmptyRow,

    #[error("The table has already been closed")]
    TableClosed,

    #[error("Failed to open file: {0}")]
    OpenFile(#[source] std::io::Error),

    #[error("Failed to create file: {0}")]
    CreateFile(#[source] std::io::Error),

    #[error("Failed to write bytes: {0}")]
    WriteBytes(#[source] std::io::Error),

    #[error("Failed to seek: {0}")]
    Seek(#[source] std::io::Error),

    #[error("Failed to flush the underlying writer: {0}")]
    FlushWriter(#[source] std::io::Error),

    #[error("Failed to start a compression thread: {0}")]
    SpawnWorker(#[source] std::io::Error),

    #[error("The output stream failed earlier and can no longer be written")]
    StreamFault,

    #[error("Failed to read header: {0}")]
    ReadHeader(#[source] std::io::Error),

    #[error("Failed to read table data: {0}")]
    ReadData(#[source] std::io::Error),

    #[error("Header card is not valid: {0:?}")]
    InvalidCard(String),

    #[error("Header ended without an END card")]
    MissingEnd,

    #[error("Keyword '{0}' is missing from the header")]
    MissingKeyword(String),

    #[error("Keyword '{key}' has an invalid value '{value}'")]
    InvalidKeyword { key: String, value: String },

    #[error("File does not contain a compressed table")]
    NoCompressedTable,

    #[error("Tile {tile} is out of range, the table has {num_tiles} tiles")]
    TileOutOfRange { tile: usize, num_tiles: usize },

    #[error("Tile {tile} is corrupt: {reason}")]
    InvalidTile { tile: usize, reason: String },

    #[error("Block of column {column} in tile {tile} is corrupt: {reason}")]
    InvalidBlock {
        tile: usize,
        column: usize,
        reason: String,
    },

    #[error(
        "Unable to allocate {desired} bytes (maximum allowed: {maximum}). Change the limit using `zfits::max_allocation_bytes`"
    )]
    MemoryAllocation { desired: usize, maximum: usize },
}

impl fmt::Debug for Details {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut msg = self.to_string();
        if let Some(e) = self.source() {
            msg.extend([": ", &e.to_string()]);
        }
        write!(f, "{msg}")
    }
}
