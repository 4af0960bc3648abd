//! Write-Ahead Log (WAL) implementation
//!
//! Every committed transaction is appended as one record before its changes
//! become visible. On disk a record is a little-endian `u32` payload length,
//! a `u32` CRC32 of the payload, then the bincode payload. Files are named
//! `wal-<first sequence in hex>.log` and roll over once they exceed the
//! configured segment size.
//!
//! A failed append is cut back off the file before the error is returned,
//! so the log never holds a record its caller was told did not happen.

use crate::graph::{ChangeSet, EntityClass};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// WAL errors
#[derive(Error, Debug)]
pub enum WalError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Corruption detected
    #[error("WAL corruption detected in {file:?} at offset {offset}")]
    Corruption { file: PathBuf, offset: u64 },

    /// A failed append could not be rolled back; no further appends are accepted
    #[error("WAL is unusable after a failed append")]
    Poisoned,
}

pub type WalResult<T> = Result<T, WalError>;

/// Write-Ahead Log entry types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    /// A committed transaction
    Commit {
        version: u64,
        /// Commit time (Unix milliseconds)
        timestamp: i64,
        changes: ChangeSet,
    },
    /// Ids of `class` below `limit` may have been handed out
    Reserve { class: EntityClass, limit: u64 },
}

/// WAL record with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalRecord {
    /// Sequence number (monotonically increasing)
    sequence: u64,
    /// Entry data
    entry: WalEntry,
}

const HEADER_LEN: u64 = 8;

/// Write-Ahead Log manager
pub struct Wal {
    /// Path to WAL directory
    path: PathBuf,
    /// Current WAL file
    current_file: Option<BufWriter<File>>,
    /// Bytes written to the current file
    current_len: u64,
    /// Current sequence number
    sequence: u64,
    /// Sync mode (fsync after every append)
    sync_mode: bool,
    /// Roll over to a new file once the current one reaches this size
    segment_bytes: u64,
    /// Set when a failed append left bytes that could not be removed
    poisoned: bool,
    #[cfg(test)]
    fault: Option<Fault>,
}

impl Wal {
    /// Open (or create) the WAL in `path`
    pub fn new(path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();

        // Create directory if it doesn't exist
        std::fs::create_dir_all(&path)?;

        info!("Initializing WAL at {:?}", path);

        Ok(Self {
            path,
            current_file: None,
            current_len: 0,
            sequence: 0,
            sync_mode: true,
            segment_bytes: 64 * 1024 * 1024,
            poisoned: false,
            #[cfg(test)]
            fault: None,
        })
    }

    /// Set sync mode
    pub fn set_sync_mode(&mut self, sync: bool) {
        self.sync_mode = sync;
        debug!("WAL sync mode: {}", sync);
    }

    pub fn set_segment_bytes(&mut self, bytes: u64) {
        self.segment_bytes = bytes.max(HEADER_LEN);
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Append an entry to the WAL, returning its sequence number
    ///
    /// On error nothing of the entry remains in the log.
    pub fn append(&mut self, entry: WalEntry) -> WalResult<u64> {
        if self.poisoned {
            return Err(WalError::Poisoned);
        }
        let sequence = self.sequence + 1;
        let payload = bincode::serialize(&WalRecord { sequence, entry })?;
        let mut record = Vec::with_capacity(HEADER_LEN as usize + payload.len());
        record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        record.extend_from_slice(&payload);

        if self.current_file.is_none() || self.current_len >= self.segment_bytes {
            self.open_new_file(sequence)?;
        }

        let start = self.current_len;
        if let Err(e) = self.write_record(&record) {
            warn!("WAL append of sequence {} failed: {}", sequence, e);
            self.discard_tail(start);
            return Err(e.into());
        }

        self.current_len += record.len() as u64;
        self.sequence = sequence;
        Ok(sequence)
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        let file = self
            .current_file
            .as_mut()
            .ok_or_else(|| io::Error::other("WAL file not open"))?;
        #[cfg(test)]
        if let Some(fault) = self.fault.take() {
            return fault.inject(file, record);
        }
        file.write_all(record)?;
        if self.sync_mode {
            file.flush()?;
            file.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Cut the current file back to `len` bytes after a failed append
    ///
    /// Bytes below `len` still sitting in the write buffer belong to earlier
    /// appends and are written out first. When the file cannot be restored
    /// the log is poisoned.
    fn discard_tail(&mut self, len: u64) {
        let Some(writer) = self.current_file.take() else {
            return;
        };
        let (mut file, buffered) = writer.into_parts();
        let buffered = buffered.unwrap_or_else(|panicked| panicked.into_inner());

        let mut restore = || -> io::Result<()> {
            let on_disk = file.metadata()?.len();
            if on_disk < len {
                let missing = (len - on_disk) as usize;
                let earlier = buffered
                    .get(..missing)
                    .ok_or_else(|| io::Error::other("buffered WAL bytes were lost"))?;
                file.write_all(earlier)?;
            }
            file.set_len(len)?;
            file.sync_data()
        };

        match restore() {
            Ok(()) => {
                debug!("Discarded partial WAL record, file back to {} bytes", len);
                self.current_len = len;
                self.current_file = Some(BufWriter::new(file));
            }
            Err(e) => {
                error!("Could not discard partial WAL record: {}", e);
                self.poisoned = true;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn inject_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    /// Force flush the WAL
    pub fn flush(&mut self) -> WalResult<()> {
        if let Some(ref mut file) = self.current_file {
            file.flush()?;
            file.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Flush and close the current file
    pub fn close(&mut self) -> WalResult<()> {
        self.flush()?;
        self.current_file = None;
        Ok(())
    }

    /// Replay every record, in sequence order, through `callback`
    ///
    /// A record cut short at the end of a file (a torn write) ends that
    /// file's replay. A record whose checksum does not match is corruption.
    /// Returns the number of records replayed; afterwards new appends
    /// continue after the highest replayed sequence.
    pub fn replay<F, E>(&mut self, mut callback: F) -> Result<u64, E>
    where
        F: FnMut(WalEntry) -> Result<(), E>,
        E: From<WalError>,
    {
        info!("Replaying WAL at {:?}", self.path);

        let files = self.get_wal_files()?;
        let mut replayed = 0u64;

        for file_path in files {
            let file = File::open(&file_path).map_err(WalError::from)?;
            let mut reader = BufReader::new(file);
            let mut offset = 0u64;
            let mut buf = Vec::new();

            loop {
                let mut header = [0u8; HEADER_LEN as usize];
                match read_full(&mut reader, &mut header)? {
                    ReadOutcome::Complete => {}
                    ReadOutcome::Eof => break,
                    ReadOutcome::Torn => {
                        warn!("Ignoring torn WAL header in {:?} at offset {}", file_path, offset);
                        break;
                    }
                }

                let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
                let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

                buf.resize(len, 0);
                if read_full(&mut reader, &mut buf)? != ReadOutcome::Complete {
                    warn!("Ignoring torn WAL record in {:?} at offset {}", file_path, offset);
                    break;
                }

                if crc32fast::hash(&buf) != expected {
                    warn!("WAL checksum mismatch in {:?} at offset {}", file_path, offset);
                    return Err(WalError::Corruption {
                        file: file_path,
                        offset,
                    }
                    .into());
                }

                let record: WalRecord = bincode::deserialize(&buf).map_err(WalError::from)?;
                self.sequence = self.sequence.max(record.sequence);
                callback(record.entry)?;
                replayed += 1;
                offset += HEADER_LEN + len as u64;
            }
        }

        info!("Replayed {} WAL entries, last sequence: {}", replayed, self.sequence);
        Ok(replayed)
    }

    /// Open a new WAL file
    fn open_new_file(&mut self, first_sequence: u64) -> WalResult<()> {
        if let Some(mut previous) = self.current_file.take() {
            previous.flush()?;
        }

        let filename = format!("wal-{:016x}.log", first_sequence);
        let file_path = self.path.join(filename);

        debug!("Opening new WAL file: {:?}", file_path);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        self.current_len = file.metadata()?.len();
        self.current_file = Some(BufWriter::new(file));
        Ok(())
    }

    /// Get all WAL files in sequence order
    fn get_wal_files(&self) -> WalResult<Vec<PathBuf>> {
        let mut files = Vec::new();

        let entries = std::fs::read_dir(&self.path)?;

        for entry in entries.flatten() {
            if let Some(filename) = entry.file_name().to_str() {
                if filename.starts_with("wal-") && filename.ends_with(".log") {
                    files.push(entry.path());
                }
            }
        }

        // Sort by filename (which includes sequence)
        files.sort();

        Ok(files)
    }
}

/// Write failures for exercising the append error path
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Half of the record reaches the file, then the write fails
    TornWrite,
    /// The whole record reaches the file, then the sync fails
    FailedSync,
}

#[cfg(test)]
impl Fault {
    fn inject(self, file: &mut BufWriter<File>, record: &[u8]) -> io::Result<()> {
        let written = match self {
            Fault::TornWrite => record.len() / 2,
            Fault::FailedSync => record.len(),
        };
        file.write_all(&record[..written])?;
        file.flush()?;
        Err(io::Error::other("injected WAL failure"))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReadOutcome {
    Complete,
    /// Nothing left to read
    Eof,
    /// Some bytes, then end of file
    Torn,
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> WalResult<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(ReadOutcome::Eof),
            Ok(0) => return Ok(ReadOutcome::Torn),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ReadOutcome::Complete)
}
