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

use std::env;
use zfits::{ColumnType, Compression, TableReader, TableWriter};

/// Writes a small run of synthetic events to the path given as first argument and prints how
/// each column compressed.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = env::args().nth(1).unwrap_or_else(|| "run.fits.fz".to_string());

    let mut writer = TableWriter::create(&path, "Events")?;
    writer.set_num_threads(4)?;
    writer.set_header_key("TELESCOP", "FACT", "telescope that took the data")?;
    writer.set_header_key("RUNID", 42, "run number")?;
    writer.add_column("EventNum", ColumnType::Int, 1, Compression::raw())?;
    writer.add_column("Data", ColumnType::Short, 1024, Compression::smoothed_huffman())?;

    for number in 0u32..1000 {
        let mut row = number.to_le_bytes().to_vec();
        for i in 0..1024 {
            let sample = ((i as f64 * 0.02).sin() * 300.0) as i16 + (number % 4) as i16;
            row.extend_from_slice(&sample.to_le_bytes());
        }
        writer.write_row(&row)?;
    }
    writer.close()?;

    let mut reader = TableReader::open(&path)?;
    println!(
        "{path}: {} rows in {} tiles",
        reader.num_rows(),
        reader.num_tiles()
    );
    for (index, column) in reader.columns().iter().enumerate() {
        let stored: u64 = reader.catalog().iter().map(|tile| tile[index].size).sum();
        let raw = reader.num_rows() * column.width() as u64;
        println!("  {:<10} {stored:>10} of {raw:>10} bytes", column.name);
    }
    for hdu in reader.verify()? {
        println!("  {:?}: checksum ok = {}", hdu.name, hdu.is_ok());
    }
    Ok(())
}
