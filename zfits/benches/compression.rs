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

use criterion::{Criterion, criterion_group, criterion_main};
use std::{hint::black_box, io::Cursor, time::Duration};
use zfits::{ColumnType, Compression, TableReader, TableWriter, ZfitsResult};

const PIXELS: usize = 1440;
const SAMPLES: usize = 300;

/// One camera event: event number and 300 samples for each of the 1440 pixels.
fn event(number: u32) -> Vec<u8> {
    let mut row = number.to_le_bytes().to_vec();
    for pixel in 0..PIXELS {
        for i in 0..SAMPLES {
            let pulse = if (50..80).contains(&i) { 120 } else { 0 };
            let sample = pulse + ((pixel * 7 + i * 13 + number as usize) % 5) as i16;
            row.extend_from_slice(&sample.to_le_bytes());
        }
    }
    row
}

fn write(events: &[Vec<u8>], num_threads: usize) -> ZfitsResult<Vec<u8>> {
    let mut writer = TableWriter::builder()
        .writer(Cursor::new(Vec::new()))
        .table_name("Events")
        .rows_per_tile(10)
        .num_threads(num_threads)
        .build()?;
    writer.add_column("EventNum", ColumnType::Int, 1, Compression::raw())?;
    writer.add_column(
        "Data",
        ColumnType::Short,
        PIXELS * SAMPLES,
        Compression::smoothed_huffman(),
    )?;
    for event in events {
        writer.write_row(event)?;
    }
    Ok(writer.into_inner()?.into_inner())
}

fn read(bytes: &[u8]) -> ZfitsResult<usize> {
    let mut reader = TableReader::new(Cursor::new(bytes))?;
    let mut total = 0;
    for row in reader.rows() {
        total += row?.len();
    }
    Ok(total)
}

fn bench_write(c: &mut Criterion, num_threads: usize, name: &str) {
    let events: Vec<_> = (0..40).map(event).collect();
    c.bench_function(name, |b| {
        b.iter(|| write(black_box(&events), num_threads).unwrap())
    });
}

fn bench_write_1_thread(c: &mut Criterion) {
    bench_write(c, 1, "write 40 events, 1 thread");
}

fn bench_write_4_threads(c: &mut Criterion) {
    bench_write(c, 4, "write 40 events, 4 threads");
}

fn bench_read(c: &mut Criterion) {
    let events: Vec<_> = (0..40).map(event).collect();
    let bytes = write(&events, 4).unwrap();
    c.bench_function("read 40 events", |b| {
        b.iter(|| read(black_box(&bytes)).unwrap())
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10).measurement_time(Duration::from_secs(10));
    targets =
        bench_write_1_thread,
        bench_write_4_threads,
        bench_read
);

criterion_main!(benches);
