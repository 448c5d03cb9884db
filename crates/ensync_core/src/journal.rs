//! Append-only journal backing a replica.
//!
//! Every committed generation is one journal record. A record reaches the
//! journal before the in-memory state changes, so replaying the journal
//! after a crash yields exactly the committed generations.
//!
//! ## File Format
//!
//! ```text
//! | magic (8) | frame | frame | ...
//! frame: | len (4, LE) | crc32 (4, LE) | payload (len) |
//! ```
//!
//! A frame whose header or checksum does not validate marks the end of the
//! journal; the torn tail is truncated on open. A failed append cuts the
//! file back to the last complete frame so later appends stay reachable.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

const JOURNAL_MAGIC: &[u8; 8] = b"ENSJRNL\x01";
const FRAME_HEADER_SIZE: usize = 8;

/// Durable, ordered record log.
pub trait Journal: Send + Sync {
    /// Appends one record. When this returns `Ok`, the record is part of
    /// every later [`replay`](Self::replay).
    fn append(&self, record: &[u8]) -> CoreResult<()>;

    /// Returns every record in append order.
    fn replay(&self) -> CoreResult<Vec<Vec<u8>>>;
}

/// In-memory journal.
///
/// Clones share the same records, so a clone handed to a second replica
/// simulates reopening after a restart.
#[derive(Clone, Default)]
pub struct MemoryJournal {
    records: Arc<RwLock<Vec<Vec<u8>>>>,
    fail_appends: Arc<AtomicBool>,
}

impl MemoryJournal {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent appends fail with an I/O error.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no record was appended.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Journal for MemoryJournal {
    fn append(&self, record: &[u8]) -> CoreResult<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "journal append failed",
            )));
        }
        self.records.write().push(record.to_vec());
        Ok(())
    }

    fn replay(&self) -> CoreResult<Vec<Vec<u8>>> {
        Ok(self.records.read().clone())
    }
}

/// File-backed journal.
pub struct FileJournal {
    path: PathBuf,
    tail: Mutex<Tail>,
    sync_on_append: bool,
}

struct Tail {
    file: File,
    /// Length of the valid prefix; every append starts here.
    end: u64,
    /// Set when a failed append could not be rolled back.
    failed: bool,
}

impl FileJournal {
    /// Opens or creates the journal at `path`, truncating any torn tail.
    pub fn open(path: &Path, sync_on_append: bool) -> CoreResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if data.is_empty() {
            file.write_all(JOURNAL_MAGIC)?;
            file.sync_all()?;
        } else {
            let (_, valid_len) = parse_frames(&data)?;
            if valid_len < data.len() {
                warn!(
                    path = %path.display(),
                    valid_len,
                    file_len = data.len(),
                    "truncating torn journal tail"
                );
                file.set_len(valid_len as u64)?;
                file.sync_all()?;
            }
        }

        let end = file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            tail: Mutex::new(Tail {
                file,
                end,
                failed: false,
            }),
            sync_on_append,
        })
    }

    /// Returns the journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_frame(
        &self,
        frame: &[u8],
        write: impl FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    ) -> CoreResult<()> {
        let mut guard = self.tail.lock();
        let Tail { file, end, failed } = &mut *guard;
        if *failed {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "journal is unusable after a failed append",
            )));
        }

        let written = write(file, frame).and_then(|()| {
            if self.sync_on_append {
                file.sync_data()
            } else {
                file.flush()
            }
        });

        match written {
            Ok(()) => {
                *end += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                let rollback = file
                    .set_len(*end)
                    .and_then(|()| file.seek(SeekFrom::Start(*end)).map(|_| ()));
                if let Err(rollback) = rollback {
                    warn!(
                        path = %self.path.display(),
                        error = %rollback,
                        "cannot roll back failed journal append"
                    );
                    *failed = true;
                }
                Err(e.into())
            }
        }
    }
}

impl Journal for FileJournal {
    fn append(&self, record: &[u8]) -> CoreResult<()> {
        let len = u32::try_from(record.len())
            .map_err(|_| CoreError::codec("journal record exceeds 4 GiB"))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + record.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&compute_crc32(record).to_le_bytes());
        frame.extend_from_slice(record);

        self.append_frame(&frame, |file, frame| file.write_all(frame))
    }

    fn replay(&self) -> CoreResult<Vec<Vec<u8>>> {
        let mut data = Vec::new();
        File::open(&self.path)?.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let (frames, _) = parse_frames(&data)?;
        Ok(frames)
    }
}

/// Splits journal bytes into records. Returns the records and the length of
/// the valid prefix.
fn parse_frames(data: &[u8]) -> CoreResult<(Vec<Vec<u8>>, usize)> {
    if data.len() < JOURNAL_MAGIC.len() || &data[..JOURNAL_MAGIC.len()] != JOURNAL_MAGIC {
        return Err(CoreError::invalid_format("not an ensync journal"));
    }

    let mut frames = Vec::new();
    let mut offset = JOURNAL_MAGIC.len();

    while data.len() - offset >= FRAME_HEADER_SIZE {
        let header = &data[offset..offset + FRAME_HEADER_SIZE];
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let start = offset + FRAME_HEADER_SIZE;
        let Some(payload) = data.get(start..start + len) else {
            break;
        };
        if compute_crc32(payload) != crc {
            break;
        }

        frames.push(payload.to_vec());
        offset = start + len;
    }

    Ok((frames, offset))
}

/// CRC32 (IEEE) of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    !data.iter().fold(0xFFFF_FFFF_u32, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize]
    })
}
