//! Append-only operation log: binary protobuf frames on disk.
//!
//! Storage format: length-prefixed protobuf frames.
//!   [4-byte LE length][ProtoOperationRecord][4-byte LE length][...]...
//!
//! Rules:
//!   - Strict append only: no mutation, no deletion, no reordering
//!   - Sequence strictly increasing (validated on append and on load)
//!   - fsync after every write when `sync_writes` is set
//!   - Records with a foreign `format_version` fail the open
//!   - Retraction and reset append tombstones; loading folds them

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use prost::Message;
use reducer_kernel::{Operation, FORMAT_VERSION};

use crate::error::{ReplayError, StorageError};
use crate::proto_bridge::{proto_to_stored, stored_to_proto, tombstone};
use crate::proto_types::{ProtoOperationRecord, RecordKind};
use crate::store::{Checkpoint, CheckpointStore, LiveView, StoredOperation};

const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// File-backed `CheckpointStore`.
#[derive(Debug)]
pub struct OperationLog {
    path: PathBuf,
    sync_writes: bool,
    last_sequence: u64,
    view: LiveView,
}

impl OperationLog {
    /// Open or create a log at `path`, folding existing records into the
    /// live view.
    pub fn open(path: &Path, sync_writes: bool) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut view = LiveView::default();
        let mut last_sequence = 0;
        if path.exists() {
            for record in Self::read_all_from_file(path)? {
                if record.sequence <= last_sequence {
                    return Err(StorageError::Sequence {
                        expected: last_sequence + 1,
                        got: record.sequence,
                    });
                }
                last_sequence = record.sequence;
                Self::fold(&mut view, &record)?;
            }
        }
        tracing::debug!(
            path = %path.display(),
            records = view.len(),
            last_sequence,
            "operation log opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            sync_writes,
            last_sequence,
            view,
        })
    }

    fn fold(view: &mut LiveView, record: &ProtoOperationRecord) -> Result<(), StorageError> {
        match RecordKind::try_from(record.record_kind) {
            Ok(RecordKind::Operation) => view.push(proto_to_stored(record)?),
            Ok(RecordKind::Retraction) => {
                view.discard_block(&record.reducer_key, &record.block_hash);
            }
            Ok(RecordKind::Reset) => {
                view.reset(&record.reducer_key);
            }
            Err(_) => {
                return Err(StorageError::Corrupt(format!(
                    "record {} has unknown kind {}",
                    record.sequence, record.record_kind
                )))
            }
        }
        Ok(())
    }

    /// Append one record. `record.sequence` must be `last_sequence + 1`.
    pub fn append(&mut self, record: &ProtoOperationRecord) -> Result<(), StorageError> {
        let expected = self.last_sequence + 1;
        if record.sequence != expected {
            return Err(StorageError::Sequence {
                expected,
                got: record.sequence,
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let buf = record.encode_to_vec();
        let len = buf.len() as u32;

        {
            let mut writer = BufWriter::new(&mut file);
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&buf)?;
            writer.flush()?;
        }
        if self.sync_writes {
            file.sync_all()?;
        }

        self.last_sequence = record.sequence;
        Ok(())
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live operations across every reducer key, in sequence order.
    pub fn records(&self) -> &[StoredOperation] {
        self.view.records()
    }

    /// Read every frame, validating frame integrity and format version.
    fn read_all_from_file(path: &Path) -> Result<Vec<ProtoOperationRecord>, StorageError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut len_buf = [0u8; 4];

        loop {
            match read_prefix(&mut reader, &mut len_buf)? {
                0 => break,
                4 => {}
                n => {
                    return Err(StorageError::Corrupt(format!(
                        "torn length prefix: {} of 4 bytes",
                        n
                    )))
                }
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len == 0 || len > MAX_FRAME_LEN {
                return Err(StorageError::Corrupt(format!("invalid frame length: {}", len)));
            }

            let mut frame = vec![0u8; len];
            reader
                .read_exact(&mut frame)
                .map_err(|e| StorageError::Corrupt(format!("truncated frame: {}", e)))?;

            let record = ProtoOperationRecord::decode(frame.as_slice())
                .map_err(|e| StorageError::Corrupt(format!("protobuf decode error: {}", e)))?;
            if record.format_version != FORMAT_VERSION {
                return Err(StorageError::FormatVersion {
                    found: record.format_version,
                    expected: FORMAT_VERSION,
                });
            }
            records.push(record);
        }

        Ok(records)
    }

    fn append_tombstone(
        &mut self,
        kind: RecordKind,
        reducer_key: &str,
        block_hash: &str,
    ) -> Result<(), StorageError> {
        let record = tombstone(self.last_sequence + 1, kind, reducer_key, block_hash);
        self.append(&record)
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF.
fn read_prefix(reader: &mut impl Read, buf: &mut [u8; 4]) -> Result<usize, StorageError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

impl CheckpointStore for OperationLog {
    fn latest_checkpoint(&self, reducer_key: &str) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self.view.latest(reducer_key))
    }

    fn write_operation(
        &mut self,
        reducer_key: &str,
        block_hash: &str,
        patch_id: &str,
        operation: &Operation,
    ) -> Result<(), StorageError> {
        let stored = StoredOperation {
            sequence: self.last_sequence + 1,
            reducer_key: reducer_key.to_string(),
            patch_id: patch_id.to_string(),
            block_hash: block_hash.to_string(),
            operation: operation.clone(),
        };
        self.append(&stored_to_proto(&stored)?)?;
        self.view.push(stored);
        Ok(())
    }

    fn operations_through(
        &self,
        reducer_key: &str,
        block_hash: &str,
    ) -> Result<Vec<StoredOperation>, ReplayError> {
        self.view.through(reducer_key, block_hash)
    }

    fn block_operations(
        &self,
        reducer_key: &str,
        block_hash: &str,
    ) -> Result<Vec<StoredOperation>, StorageError> {
        Ok(self.view.block(reducer_key, block_hash))
    }

    fn discard_block(&mut self, reducer_key: &str, block_hash: &str) -> Result<(), StorageError> {
        if self.view.block(reducer_key, block_hash).is_empty() {
            return Ok(());
        }
        self.append_tombstone(RecordKind::Retraction, reducer_key, block_hash)?;
        let voided = self.view.discard_block(reducer_key, block_hash);
        tracing::debug!(reducer = reducer_key, block_hash, voided, "block retracted in log");
        Ok(())
    }

    fn setup(&mut self, _reducer_key: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn setdown(&mut self, reducer_key: &str) -> Result<(), StorageError> {
        self.append_tombstone(RecordKind::Reset, reducer_key, "")?;
        let voided = self.view.reset(reducer_key);
        tracing::debug!(reducer = reducer_key, voided, "reducer log reset");
        Ok(())
    }
}
