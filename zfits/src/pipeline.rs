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

//! Parallel tile compression.
//!
//! Tile `t` is handed to worker `t mod N`. Every worker holds at most one tile at a time and
//! moves through `Waiting -> Compressing -> Writing -> Waiting`. Compression runs concurrently,
//! but a worker may only append its tile to the output once all tiles before it are written, so
//! the heap always holds tiles in increasing index order.

use crate::{
    ZfitsResult,
    catalog::{CatalogEntry, TileCatalog},
    checksum::Checksum,
    codec::encode_column,
    error::Details,
    schema::ColumnDescriptor,
    tile::{TILE_HEADER_SIZE, TileHeader, transpose_column},
};
use log::{debug, error};
use parking_lot::{Condvar, Mutex};
use std::{
    io::{self, Write},
    mem, panic,
    sync::Arc,
    thread::{self, JoinHandle},
};

/// A tile handed to a worker: its index, the number of valid rows and the row-major bytes.
pub(crate) struct TileJob {
    pub(crate) index: usize,
    pub(crate) rows: usize,
    pub(crate) data: Vec<u8>,
}

/// Buffers owned by a single worker and reused for every tile it compresses.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    pub(crate) transposed: Vec<u8>,
    pub(crate) compressed: Vec<u8>,
    pub(crate) entries: Vec<CatalogEntry>,
}

pub(crate) trait TileCompressor: Send + Sync + 'static {
    /// Fill `scratch.compressed` with the tile, marker included, and `scratch.entries` with one
    /// entry per column whose offset is relative to the end of the marker.
    fn compress(&self, job: &TileJob, scratch: &mut Scratch);
}

/// Transposes each column of a tile and runs it through its codec chain.
pub(crate) struct TileEncoder {
    columns: Vec<ColumnDescriptor>,
    row_width: usize,
}

impl TileEncoder {
    pub(crate) fn new(columns: Vec<ColumnDescriptor>, row_width: usize) -> Self {
        Self { columns, row_width }
    }
}

impl TileCompressor for TileEncoder {
    fn compress(&self, job: &TileJob, scratch: &mut Scratch) {
        let Scratch {
            transposed,
            compressed,
            entries,
        } = scratch;
        transposed.clear();
        transposed.resize(job.rows * self.row_width, 0);
        compressed.clear();
        compressed.resize(TILE_HEADER_SIZE, 0);
        entries.clear();

        let mut start = 0;
        for column in &self.columns {
            let len = job.rows * column.width();
            let run = &mut transposed[start..start + len];
            transpose_column(&job.data, self.row_width, job.rows, column, run);
            let offset = compressed.len() - TILE_HEADER_SIZE;
            let size = encode_column(column, job.rows, run, compressed);
            entries.push(CatalogEntry {
                size: size as u64,
                offset: offset as u64,
            });
            start += len;
        }

        let marker = TileHeader {
            num_rows: job.rows as u32,
            size: compressed.len() as u64,
        };
        compressed[..TILE_HEADER_SIZE].copy_from_slice(&marker.to_bytes());
    }
}

/// The output stream together with everything that changes when a tile is written to it.
pub(crate) struct Sink<W> {
    pub(crate) stream: W,
    pub(crate) catalog: TileCatalog,
    /// Checksum of the heap written so far.
    pub(crate) checksum: Checksum,
    pub(crate) tiles_written: usize,
    fault: Option<io::Error>,
    failed: bool,
    poisoned: bool,
}

impl<W: Write> Sink<W> {
    pub(crate) fn new(stream: W, catalog: TileCatalog) -> Self {
        Self {
            stream,
            catalog,
            checksum: Checksum::new(),
            tiles_written: 0,
            fault: None,
            failed: false,
            poisoned: false,
        }
    }

    fn write_tile(&mut self, rows: usize, scratch: &Scratch) {
        let index = self.tiles_written;
        self.tiles_written += 1;
        if self.failed {
            return;
        }
        match self.stream.write_all(&scratch.compressed) {
            Ok(()) => {
                self.checksum.update(&scratch.compressed);
                self.catalog.push_tile(
                    rows,
                    scratch.compressed.len() as u64,
                    &scratch.entries,
                );
            }
            Err(e) => {
                error!("Failed to write tile {index}: {e}");
                self.fault = Some(e);
                self.failed = true;
            }
        }
    }

    /// Report the first write error once, and [`Details::StreamFault`] after that.
    pub(crate) fn check(&mut self) -> ZfitsResult<()> {
        match self.fault.take() {
            Some(e) => Err(Details::WriteBytes(e).into()),
            None if self.failed => Err(Details::StreamFault.into()),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum WorkerState {
    Waiting,
    Compressing,
    Writing,
    Exiting,
}

struct Slot {
    state: WorkerState,
    job: Option<TileJob>,
    /// Row buffer of the last tile, returned for reuse.
    spare: Vec<u8>,
}

struct Worker {
    slot: Mutex<Slot>,
    changed: Condvar,
}

struct Shared<W> {
    sink: Mutex<Sink<W>>,
    fence: Condvar,
    workers: Vec<Worker>,
}

impl<W: Write> Shared<W> {
    fn write_in_order(&self, index: usize, rows: usize, scratch: &Scratch) {
        let mut sink = self.sink.lock();
        while sink.tiles_written < index && !sink.poisoned {
            self.fence.wait(&mut sink);
        }
        if sink.poisoned {
            return;
        }
        assert_eq!(
            sink.tiles_written, index,
            "tile {index} reached the output out of order"
        );
        sink.write_tile(rows, scratch);
        drop(sink);
        self.fence.notify_all();
    }
}

/// Marks the worker as gone and releases the fence if its thread unwinds.
struct PanicGuard<'a, W> {
    shared: &'a Shared<W>,
    id: usize,
}

impl<W> Drop for PanicGuard<'_, W> {
    fn drop(&mut self) {
        if thread::panicking() {
            let worker = &self.shared.workers[self.id];
            worker.slot.lock().state = WorkerState::Exiting;
            worker.changed.notify_all();
            self.shared.sink.lock().poisoned = true;
            self.shared.fence.notify_all();
        }
    }
}

fn run_worker<W: Write>(shared: Arc<Shared<W>>, id: usize, compressor: Arc<dyn TileCompressor>) {
    let _guard = PanicGuard {
        shared: &shared,
        id,
    };
    let worker = &shared.workers[id];
    let mut scratch = Scratch::default();
    loop {
        let job = {
            let mut slot = worker.slot.lock();
            while slot.state == WorkerState::Waiting {
                worker.changed.wait(&mut slot);
            }
            match (slot.state, slot.job.take()) {
                (WorkerState::Exiting, _) => return,
                (WorkerState::Compressing, Some(job)) => job,
                (state, _) => panic!("compression worker {id} woke up in state {state:?} without a tile"),
            }
        };

        compressor.compress(&job, &mut scratch);
        let TileJob { index, rows, data } = job;
        {
            let mut slot = worker.slot.lock();
            slot.spare = data;
            slot.state = WorkerState::Writing;
        }

        shared.write_in_order(index, rows, &scratch);

        worker.slot.lock().state = WorkerState::Waiting;
        worker.changed.notify_all();
    }
}

/// A fixed pool of compression threads sharing one output [`Sink`].
pub(crate) struct CompressionPipeline<W> {
    shared: Arc<Shared<W>>,
    handles: Vec<JoinHandle<()>>,
    compressor: Arc<dyn TileCompressor>,
    next_index: usize,
}

impl<W: Write + Send + 'static> CompressionPipeline<W> {
    pub(crate) fn spawn(
        sink: Sink<W>,
        compressor: Arc<dyn TileCompressor>,
        num_workers: usize,
    ) -> ZfitsResult<Self> {
        let workers = (0..num_workers)
            .map(|_| Worker {
                slot: Mutex::new(Slot {
                    state: WorkerState::Waiting,
                    job: None,
                    spare: Vec::new(),
                }),
                changed: Condvar::new(),
            })
            .collect();
        let mut pipeline = Self {
            shared: Arc::new(Shared {
                sink: Mutex::new(sink),
                fence: Condvar::new(),
                workers,
            }),
            handles: Vec::with_capacity(num_workers),
            compressor,
            next_index: 0,
        };

        for id in 0..num_workers {
            let shared = Arc::clone(&pipeline.shared);
            let compressor = Arc::clone(&pipeline.compressor);
            let spawned = thread::Builder::new()
                .name(format!("zfits-compress-{id}"))
                .spawn(move || run_worker(shared, id, compressor));
            match spawned {
                Ok(handle) => pipeline.handles.push(handle),
                Err(e) => {
                    error!("Failed to start compression worker {id}: {e}");
                    let _ = pipeline.shutdown();
                    return Err(Details::SpawnWorker(e).into());
                }
            }
        }
        debug!("Started {num_workers} compression workers");
        Ok(pipeline)
    }

    /// Hand a full tile to its worker, blocking while that worker is busy with its previous tile.
    /// Returns a buffer to fill with the next tile.
    pub(crate) fn submit(&mut self, rows: usize, data: Vec<u8>) -> Vec<u8> {
        let index = self.next_index;
        let shared = Arc::clone(&self.shared);
        let id = index % shared.workers.len();
        let worker = &shared.workers[id];

        let mut slot = worker.slot.lock();
        loop {
            match slot.state {
                WorkerState::Waiting => break,
                WorkerState::Compressing | WorkerState::Writing => {
                    worker.changed.wait(&mut slot)
                }
                WorkerState::Exiting => {
                    drop(slot);
                    if let Err(payload) = self.shutdown() {
                        panic::resume_unwind(payload);
                    }
                    panic!("compression worker {id} stopped while the table was open");
                }
            }
        }
        slot.job = Some(TileJob { index, rows, data });
        slot.state = WorkerState::Compressing;
        let spare = mem::take(&mut slot.spare);
        drop(slot);
        worker.changed.notify_all();

        self.next_index += 1;
        spare
    }

    /// The first write error of the workers, if any.
    pub(crate) fn check(&self) -> ZfitsResult<()> {
        self.shared.sink.lock().check()
    }

    /// Stop the workers once they are idle, then compress and write the `trailing` partial tile
    /// on the calling thread. Returns the sink with every tile written.
    pub(crate) fn finish(mut self, trailing: Option<(usize, Vec<u8>)>) -> Sink<W> {
        if let Err(payload) = self.shutdown() {
            panic::resume_unwind(payload);
        }
        let Ok(shared) = Arc::try_unwrap(self.shared) else {
            panic!("compression workers outlived their pipeline");
        };
        let mut sink = shared.sink.into_inner();

        if let Some((rows, data)) = trailing {
            let job = TileJob {
                index: self.next_index,
                rows,
                data,
            };
            let mut scratch = Scratch::default();
            self.compressor.compress(&job, &mut scratch);
            assert_eq!(
                sink.tiles_written, job.index,
                "trailing tile reached the output out of order"
            );
            sink.write_tile(rows, &scratch);
        }
        debug!("Compression finished after {} tiles", sink.tiles_written);
        sink
    }

    fn shutdown(&mut self) -> thread::Result<()> {
        for worker in &self.shared.workers {
            let mut slot = worker.slot.lock();
            while matches!(
                slot.state,
                WorkerState::Compressing | WorkerState::Writing
            ) {
                worker.changed.wait(&mut slot);
            }
            slot.state = WorkerState::Exiting;
            drop(slot);
            worker.changed.notify_all();
        }

        let mut result = Ok(());
        for handle in self.handles.drain(..) {
            if let Err(payload) = handle.join() {
                if result.is_ok() {
                    result = Err(payload);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::Rng;
    use std::time::Duration;

    /// Stores the first byte of every row, so the output shows which tile went where.
    struct Tagging;

    impl TileCompressor for Tagging {
        fn compress(&self, job: &TileJob, scratch: &mut Scratch) {
            let marker = TileHeader {
                num_rows: job.rows as u32,
                size: (TILE_HEADER_SIZE + job.rows) as u64,
            };
            scratch.compressed.clear();
            scratch.compressed.extend_from_slice(&marker.to_bytes());
            scratch.compressed.extend_from_slice(&job.data[..job.rows]);
            scratch.entries = vec![CatalogEntry {
                size: job.rows as u64,
                offset: 0,
            }];
        }
    }

    struct Jittered<C>(C);

    impl<C: TileCompressor> TileCompressor for Jittered<C> {
        fn compress(&self, job: &TileJob, scratch: &mut Scratch) {
            let delay = rand::rng().random_range(0..4);
            thread::sleep(Duration::from_millis(delay));
            self.0.compress(job, scratch);
        }
    }

    struct Exploding;

    impl TileCompressor for Exploding {
        fn compress(&self, job: &TileJob, scratch: &mut Scratch) {
            if job.index == 2 {
                panic!("boom");
            }
            Tagging.compress(job, scratch);
        }
    }

    /// Accepts a fixed number of bytes, then fails every write.
    struct Failing {
        budget: usize,
    }

    impl Write for Failing {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.budget {
                return Err(io::Error::other("disk full"));
            }
            self.budget -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn tile(index: usize, rows: usize, mut buffer: Vec<u8>) -> Vec<u8> {
        buffer.clear();
        buffer.resize(rows, index as u8);
        buffer
    }

    fn run<W: Write + Send + 'static>(
        sink: Sink<W>,
        compressor: impl TileCompressor,
        workers: usize,
        tiles: usize,
    ) -> Sink<W> {
        let mut pipeline = CompressionPipeline::spawn(sink, Arc::new(compressor), workers).unwrap();
        let mut buffer = Vec::new();
        for index in 0..tiles {
            buffer = pipeline.submit(3, tile(index, 3, buffer));
        }
        pipeline.finish(Some((2, tile(tiles, 2, buffer))))
    }

    #[test]
    fn tiles_are_written_in_order_despite_jitter() {
        let sink = Sink::new(Vec::new(), TileCatalog::new(1, 100));
        let sink = run(sink, Jittered(Tagging), 4, 40);

        assert_eq!(sink.tiles_written, 41);
        assert_eq!(sink.catalog.num_tiles(), 41);
        assert_eq!(sink.catalog.num_rows(), 40 * 3 + 2);

        let mut seen = Vec::new();
        let mut rest = sink.stream.as_slice();
        while !rest.is_empty() {
            let marker = TileHeader::parse(rest).unwrap();
            let (tile, tail) = rest.split_at(marker.size as usize);
            seen.extend_from_slice(&tile[TILE_HEADER_SIZE..]);
            rest = tail;
        }
        let expected: Vec<u8> = (0..40u8)
            .flat_map(|i| [i; 3])
            .chain([40, 40])
            .collect();
        assert_eq!(seen, expected);

        let mut checksum = Checksum::new();
        checksum.update(&sink.stream);
        assert_eq!(sink.checksum, checksum);
    }

    #[test]
    fn a_single_worker_needs_no_trailing_tile() {
        let sink = Sink::new(Vec::new(), TileCatalog::new(1, 10));
        let mut pipeline = CompressionPipeline::spawn(sink, Arc::new(Tagging), 1).unwrap();
        let spare = pipeline.submit(3, vec![7; 3]);
        assert!(spare.is_empty());
        let sink = pipeline.finish(None);
        assert_eq!(sink.tiles_written, 1);
        assert_eq!(&sink.stream[TILE_HEADER_SIZE..], &[7, 7, 7]);
    }

    #[test]
    fn write_errors_are_reported_once() {
        let sink = Sink::new(Failing { budget: 40 }, TileCatalog::new(1, 10));
        let mut sink = run(sink, Tagging, 2, 5);

        assert_eq!(sink.tiles_written, 6);
        assert_eq!(sink.catalog.num_tiles(), 2);
        assert!(matches!(
            sink.check().unwrap_err().details(),
            Details::WriteBytes(_)
        ));
        assert!(matches!(
            sink.check().unwrap_err().details(),
            Details::StreamFault
        ));
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn worker_panics_reach_the_caller() {
        let sink = Sink::new(Vec::new(), TileCatalog::new(1, 10));
        run(sink, Exploding, 2, 6);
    }
}
