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

//! The DRS cell offset calibration, stored as a single-row binary table ahead of the event table.

use crate::{
    ZfitsResult,
    checksum::{CHECKSUM_PLACEHOLDER, Checksum, seal},
    error::Details,
    header::{Header, HeaderCard},
};

pub const DRS_NUM_PIXELS: usize = 1440;
pub const DRS_NUM_CELLS: usize = 1024;
/// Number of offsets in a calibration: one per pixel and capacitor cell.
pub const DRS_NUM_SAMPLES: usize = DRS_NUM_PIXELS * DRS_NUM_CELLS;

pub(crate) const DRS_EXTNAME: &str = "ZDrsCellOffsets";
const DRS_DATA_SIZE: usize = 2 * DRS_NUM_SAMPLES;

/// Offsets of every capacitor cell of every pixel, pixel major.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DrsCalibration {
    offsets: Vec<i16>,
}

impl DrsCalibration {
    pub fn new(offsets: Vec<i16>) -> ZfitsResult<Self> {
        if offsets.len() != DRS_NUM_SAMPLES {
            return Err(Details::InvalidDrsCalibration {
                expected: DRS_NUM_SAMPLES,
                actual: offsets.len(),
            }
            .into());
        }
        Ok(Self { offsets })
    }

    pub fn offsets(&self) -> &[i16] {
        &self.offsets
    }

    pub fn offset(&self, pixel: usize, cell: usize) -> Option<i16> {
        if cell >= DRS_NUM_CELLS {
            return None;
        }
        self.offsets.get(pixel * DRS_NUM_CELLS + cell).copied()
    }

    /// Header and data of the calibration HDU.
    pub(crate) fn to_hdu(&self) -> Vec<u8> {
        let data: Vec<u8> = self.offsets.iter().flat_map(|v| v.to_be_bytes()).collect();
        let mut checksum = Checksum::new();
        checksum.update(&data);

        let mut header = header();
        seal(&mut header, &checksum);
        let mut hdu = header.render();
        hdu.extend_from_slice(&data);
        hdu
    }

    /// Parse the data area of a calibration HDU.
    pub(crate) fn from_data(data: &[u8]) -> ZfitsResult<Self> {
        if data.len() != DRS_DATA_SIZE {
            return Err(Details::InvalidDrsCalibration {
                expected: DRS_NUM_SAMPLES,
                actual: data.len() / 2,
            }
            .into());
        }
        Self::new(
            data.chunks_exact(2)
                .map(|v| i16::from_be_bytes([v[0], v[1]]))
                .collect(),
        )
    }
}

fn header() -> Header {
    let mut header = Header::new();
    for card in [
        HeaderCard::new("XTENSION", "BINTABLE", "binary table extension"),
        HeaderCard::new("BITPIX", 8, "8-bit bytes"),
        HeaderCard::new("NAXIS", 2, "2-dimensional binary table"),
        HeaderCard::new("NAXIS1", DRS_DATA_SIZE, "width of table in bytes"),
        HeaderCard::new("NAXIS2", 1, "number of rows in table"),
        HeaderCard::new("PCOUNT", 0, "size of special data area"),
        HeaderCard::new("GCOUNT", 1, "one data group (required keyword)"),
        HeaderCard::new("TFIELDS", 1, "number of fields in each row"),
        HeaderCard::new("CHECKSUM", CHECKSUM_PLACEHOLDER, "Checksum for the whole HDU"),
        HeaderCard::new("DATASUM", "         0", "Checksum for the data block"),
        HeaderCard::new("EXTNAME", DRS_EXTNAME, "name of this binary table extension"),
        HeaderCard::new("TTYPE1", "OffsetCalibration", "label for field   1"),
        HeaderCard::new(
            "TFORM1",
            format!("{DRS_NUM_SAMPLES}I"),
            "data format of field: 2-byte INTEGER",
        ),
    ] {
        header.set(card);
    }
    header
}
