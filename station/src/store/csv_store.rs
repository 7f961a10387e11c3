//! Append-only CSV file store.
//!
//! One row per record with a header line. Readers never look past the
//! committed length, the byte size of the file after the last complete
//! append, so a query sees a consistent prefix while the writer is active.
//! A sparse index of row offsets lets a range scan start near its first
//! record instead of at the top of the file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use station_shared::{BucketAggregate, Frame, Orientation, Timestamp};
use tracing::{error, info, warn};

use super::{check_order, SampleRecord, SampleStore, StoreError};
use crate::downsampler::{BucketAccumulator, BucketPlan};

/// Rows between sparse index entries.
const INDEX_STRIDE: usize = 4096;

/// Flat on-disk row. Unknown orientation angles are written as `NaN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CsvRow {
    ts_seconds: u64,
    ts_nanos: u64,
    temperature: f64,
    relative_humidity: f64,
    lux: u32,
    infrared: u32,
    visible: u32,
    accel_x: f64,
    accel_y: f64,
    accel_z: f64,
    gyro_x: f64,
    gyro_y: f64,
    gyro_z: f64,
    mag_x: f64,
    mag_y: f64,
    mag_z: f64,
    roll: f64,
    pitch: f64,
    yaw: f64,
}

impl From<&SampleRecord> for CsvRow {
    fn from(record: &SampleRecord) -> Self {
        let f = &record.frame;
        Self {
            ts_seconds: record.timestamp.seconds,
            ts_nanos: record.timestamp.nanos,
            temperature: f.temperature,
            relative_humidity: f.humidity,
            lux: f.lux,
            infrared: f.infrared,
            visible: f.visible,
            accel_x: f.acceleration[0],
            accel_y: f.acceleration[1],
            accel_z: f.acceleration[2],
            gyro_x: f.gyro[0],
            gyro_y: f.gyro[1],
            gyro_z: f.gyro[2],
            mag_x: f.magnetic[0],
            mag_y: f.magnetic[1],
            mag_z: f.magnetic[2],
            roll: record.orientation.roll,
            pitch: record.orientation.pitch,
            yaw: record.orientation.yaw,
        }
    }
}

impl From<CsvRow> for SampleRecord {
    fn from(row: CsvRow) -> Self {
        Self {
            timestamp: Timestamp::new(row.ts_seconds, row.ts_nanos),
            frame: Frame {
                temperature: row.temperature,
                humidity: row.relative_humidity,
                lux: row.lux,
                infrared: row.infrared,
                visible: row.visible,
                acceleration: [row.accel_x, row.accel_y, row.accel_z],
                gyro: [row.gyro_x, row.gyro_y, row.gyro_z],
                magnetic: [row.mag_x, row.mag_y, row.mag_z],
            },
            orientation: Orientation::new(row.roll, row.pitch, row.yaw),
        }
    }
}

struct Writer {
    file: File,
    last: Option<Timestamp>,
    rows: usize,
}

/// A row's timestamp and the byte offset where the row begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    timestamp: Timestamp,
    offset: u64,
}

/// The readable prefix of an existing store file.
#[derive(Debug, Default)]
struct Recovered {
    valid_len: u64,
    last: Option<Timestamp>,
    rows: usize,
    index: Vec<IndexEntry>,
}

pub struct CsvStore {
    path: PathBuf,
    writer: Mutex<Writer>,
    index: RwLock<Vec<IndexEntry>>,
    index_stride: usize,
    committed: AtomicU64,
}

impl CsvStore {
    /// Open `path` for appending, creating it with a header row if it does
    /// not exist.
    ///
    /// Existing rows are scanned once to recover the newest timestamp and
    /// build the row index. A last row cut short by a crash is truncated
    /// away; an unreadable row with more rows after it is an error.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_stride(path, INDEX_STRIDE)
    }

    fn open_with_stride(path: &Path, index_stride: usize) -> Result<Self, StoreError> {
        let index_stride = index_stride.max(1);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let existing = file.metadata()?.len();

        let recovered = recover(path, existing, index_stride)?;
        if recovered.valid_len < existing {
            warn!(
                "Discarding {} bytes of incomplete trailing data in {}",
                existing - recovered.valid_len,
                path.display()
            );
            file.set_len(recovered.valid_len)?;
        }

        info!(
            "Opened sample store {} ({} existing records)",
            path.display(),
            recovered.rows
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(Writer {
                file,
                last: recovered.last,
                rows: recovered.rows,
            }),
            index: RwLock::new(recovered.index),
            index_stride,
            committed: AtomicU64::new(recovered.valid_len),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of the file covered by complete appends.
    pub fn committed_len(&self) -> u64 {
        self.committed.load(Ordering::Acquire)
    }

    /// Latest index entry strictly before `start` that lies inside the
    /// committed prefix. Every row before it is older than `start`.
    fn index_entry_before(&self, start: Timestamp, committed: u64) -> Option<IndexEntry> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let before = index.partition_point(|e| e.timestamp < start);
        index[..before]
            .iter()
            .rev()
            .find(|e| e.offset < committed)
            .copied()
    }

    /// Stream committed records in file order, starting at the last indexed
    /// row older than `start`.
    fn for_each_committed_from(
        &self,
        start: Timestamp,
        mut visit: impl FnMut(SampleRecord) -> bool,
    ) -> Result<(), StoreError> {
        let committed = self.committed_len();
        if committed == 0 {
            return Ok(());
        }

        let mut file = File::open(&self.path)?;
        let (headers, data_start) = {
            let mut reader = csv::Reader::from_reader((&mut file).take(committed));
            let headers = reader.byte_headers()?.clone();
            (headers, reader.position().byte())
        };
        let offset = self
            .index_entry_before(start, committed)
            .map_or(data_start, |entry| entry.offset);

        file.seek(SeekFrom::Start(offset))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(file.take(committed - offset));
        let mut record = csv::ByteRecord::new();
        while reader.read_byte_record(&mut record)? {
            let row: CsvRow = record.deserialize(Some(&headers))?;
            if !visit(SampleRecord::from(row)) {
                break;
            }
        }
        Ok(())
    }
}

/// Scan the first `len` bytes of `path` for complete, parseable rows.
///
/// Only the final row may be bad (torn by a crash mid-append, including a
/// row missing its newline); it is left outside `valid_len`. A torn header
/// leaves nothing valid at all.
fn recover(path: &Path, len: u64, index_stride: usize) -> Result<Recovered, StoreError> {
    let mut recovered = Recovered::default();
    if len == 0 {
        return Ok(recovered);
    }

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last_byte = [0u8; 1];
    file.read_exact(&mut last_byte)?;
    let ends_with_newline = last_byte[0] == b'\n';
    file.seek(SeekFrom::Start(0))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(file.take(len));
    let headers = reader.byte_headers()?.clone();
    let header_end = reader.position().byte();
    if header_end >= len && !ends_with_newline {
        return Ok(recovered);
    }
    recovered.valid_len = header_end;

    let mut record = csv::ByteRecord::new();
    let mut bad_row: Option<u64> = None;
    loop {
        let start = reader.position().byte();
        if !reader.read_byte_record(&mut record)? {
            break;
        }
        if let Some(offset) = bad_row {
            return Err(StoreError::Corrupt { offset });
        }

        let end = reader.position().byte();
        let complete = end < len || ends_with_newline;
        match record.deserialize::<CsvRow>(Some(&headers)) {
            Ok(row) if complete => {
                let timestamp = Timestamp::new(row.ts_seconds, row.ts_nanos);
                if recovered.rows > 0 && recovered.rows % index_stride == 0 {
                    recovered.index.push(IndexEntry {
                        timestamp,
                        offset: start,
                    });
                }
                recovered.last = Some(timestamp);
                recovered.rows += 1;
                recovered.valid_len = end;
            }
            _ => bad_row = Some(start),
        }
    }
    Ok(recovered)
}

impl SampleStore for CsvStore {
    fn append(&self, record: &SampleRecord) -> Result<(), StoreError> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Writes the whole batch with one `write_all`. On failure the file is
    /// cut back to the committed length, so a failed batch leaves nothing
    /// behind for later appends or readers.
    fn append_batch(&self, records: &[SampleRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let last = check_order(writer.last, records)?;
        let committed = self.committed_len();

        // Leftovers of an earlier failed append that could not be rolled back
        if writer.file.metadata()?.len() != committed {
            writer.file.set_len(committed)?;
        }

        let mut csv = csv::WriterBuilder::new()
            .has_headers(committed == 0)
            .from_writer(Vec::new());
        let mut rows = writer.rows;
        let mut new_entries = Vec::new();
        for record in records {
            csv.flush()?;
            if rows > 0 && rows % self.index_stride == 0 {
                new_entries.push(IndexEntry {
                    timestamp: record.timestamp,
                    offset: committed + csv.get_ref().len() as u64,
                });
            }
            csv.serialize(CsvRow::from(record))?;
            rows += 1;
        }
        let bytes = csv.into_inner().map_err(|e| e.into_error())?;

        if let Err(e) = writer.file.write_all(&bytes) {
            if let Err(rollback) = writer.file.set_len(committed) {
                error!(
                    "Failed to roll back partial append to {}: {rollback}",
                    self.path.display()
                );
            }
            return Err(e.into());
        }

        writer.last = last;
        writer.rows = rows;
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(new_entries);
        self.committed
            .store(committed + bytes.len() as u64, Ordering::Release);
        Ok(())
    }

    fn last_timestamp(&self) -> Option<Timestamp> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last
    }

    fn aggregate_range(&self, plan: &BucketPlan) -> Result<Vec<BucketAggregate>, StoreError> {
        let mut acc = BucketAccumulator::new(*plan);
        self.for_each_committed_from(plan.start(), |record| {
            if record.timestamp >= plan.end() {
                return false;
            }
            acc.add(&record);
            true
        })?;
        Ok(acc.finish())
    }
}
