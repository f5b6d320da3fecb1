//! Durable, multi-process coordination record.
//!
//! The record lives in one memory-mapped file:
//!
//! ```text
//! 0       64                128                 128 + body_len
//! ┌────────┬─────────────────┬───────────────────┐
//! │ header │ remaining_slots │ JSON body         │
//! │ (const)│ (CAS'd)         │ (address, roles)  │
//! └────────┴─────────────────┴───────────────────┘
//! ```
//!
//! Replacement is write-to-temp then rename, so a reader maps either the old
//! file or the new one, never a partial write. Claims are a compare-and-swap
//! on the mapped counter followed by a synchronous flush.

use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use log::{debug, info};

use crate::coord::record::{CoordinationRecord, RecordBody};
use crate::coord::role::SessionRole;
use crate::core::mmap::MmapFile;
use crate::core::{Error, Result};

pub const RECORD_MAGIC: u32 = 0x504C_5352; // 'PLSR'
pub const RECORD_VERSION: u32 = 1;

const INIT_WRITING: u32 = 1;
const INIT_READY: u32 = 2;

#[repr(C, align(64))]
pub struct RecordHeader {
    // Written once by the creating process.
    pub magic: AtomicU32,
    pub version: AtomicU32,
    pub init_state: AtomicU32,
    pub body_len: AtomicU32,
    pub body_crc: AtomicU32,
    pub slot_count: AtomicU32,
    pub _pad0: [u8; 40],

    // Claim-hot, shared by every consumer process.
    pub remaining_slots: AtomicU32,
    pub _pad1: [u8; 60],
}

pub const HEADER_SIZE: usize = size_of::<RecordHeader>();

/// Location of the coordination record in shared storage.
#[derive(Clone, Debug)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces whatever record is stored with `record`.
    pub fn persist(&self, record: &CoordinationRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_vec(&record.body())
            .map_err(|_| Error::Corrupt("record body not serializable"))?;
        let body_len =
            u32::try_from(body.len()).map_err(|_| Error::Corrupt("record body too large"))?;

        let tmp_path = self.path.with_extension("tmp");
        let mut mmap = MmapFile::create(&tmp_path, HEADER_SIZE + body.len())?;
        mmap.as_mut_slice()[HEADER_SIZE..].copy_from_slice(&body);
        let header = unsafe { &*(mmap.as_ptr() as *const RecordHeader) };
        header.init_state.store(INIT_WRITING, Ordering::Relaxed);
        header.version.store(RECORD_VERSION, Ordering::Relaxed);
        header.body_len.store(body_len, Ordering::Relaxed);
        header
            .body_crc
            .store(crc32fast::hash(&body), Ordering::Relaxed);
        header
            .slot_count
            .store(record.slot_count(), Ordering::Relaxed);
        header
            .remaining_slots
            .store(record.remaining_slots, Ordering::Relaxed);
        header.magic.store(RECORD_MAGIC, Ordering::Relaxed);
        header.init_state.store(INIT_READY, Ordering::Release);
        mmap.sync()?;
        drop(mmap);
        std::fs::rename(&tmp_path, &self.path)?;

        info!(
            "persisted coordination record at {} ({} slots, {} remaining)",
            self.path.display(),
            record.slot_count(),
            record.remaining_slots
        );
        Ok(())
    }

    pub fn load(&self) -> Result<CoordinationRecord> {
        self.open()?.record()
    }

    /// Atomically takes the next free slot.
    ///
    /// The winning compare-and-swap observes `remaining_slots = k` and hands out
    /// ordinal `k - 1`; the returned record reflects the post-claim counter.
    pub fn claim_next_role(&self) -> Result<(SessionRole, CoordinationRecord)> {
        let file = self.open()?;
        let mut record = file.record()?;
        let ordinal = file.claim()?;
        let role = record
            .role_at(ordinal)
            .ok_or(Error::Corrupt("claimed ordinal outside role assignments"))?;
        record.remaining_slots = ordinal;
        debug!("claimed slot {ordinal} ({role}) from {}", self.path.display());
        Ok((SessionRole { ordinal, role }, record))
    }

    fn open(&self) -> Result<RecordFile> {
        let mmap = match MmapFile::open(&self.path) {
            Ok(mmap) => mmap,
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound)
            }
            Err(err) => return Err(err),
        };
        RecordFile::new(mmap)
    }
}

struct RecordFile {
    mmap: MmapFile,
    ptr: *const RecordHeader,
}

impl RecordFile {
    fn new(mmap: MmapFile) -> Result<Self> {
        if mmap.len() < HEADER_SIZE {
            return Err(Error::Corrupt("record shorter than header"));
        }
        let ptr = mmap.as_ptr() as *const RecordHeader;
        let file = Self { mmap, ptr };
        file.validate()?;
        Ok(file)
    }

    fn header(&self) -> &RecordHeader {
        unsafe { &*self.ptr }
    }

    fn validate(&self) -> Result<()> {
        let header = self.header();
        if header.init_state.load(Ordering::Acquire) != INIT_READY {
            return Err(Error::Corrupt("record not initialised"));
        }
        if header.magic.load(Ordering::Acquire) != RECORD_MAGIC {
            return Err(Error::Corrupt("record magic mismatch"));
        }
        let version = header.version.load(Ordering::Acquire);
        if version != RECORD_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let body_len = header.body_len.load(Ordering::Acquire) as usize;
        if HEADER_SIZE + body_len > self.mmap.len() {
            return Err(Error::Corrupt("record body truncated"));
        }
        if crc32fast::hash(self.body_bytes()) != header.body_crc.load(Ordering::Acquire) {
            return Err(Error::Corrupt("record body checksum mismatch"));
        }
        Ok(())
    }

    fn body_bytes(&self) -> &[u8] {
        let body_len = self.header().body_len.load(Ordering::Acquire) as usize;
        &self.mmap.as_slice()[HEADER_SIZE..HEADER_SIZE + body_len]
    }

    fn record(&self) -> Result<CoordinationRecord> {
        let body: RecordBody = serde_json::from_slice(self.body_bytes())
            .map_err(|_| Error::Corrupt("record body unparsable"))?;
        let header = self.header();
        let slot_count = header.slot_count.load(Ordering::Acquire);
        if body.role_assignments.len() != slot_count as usize {
            return Err(Error::Corrupt("slot count does not match role assignments"));
        }
        CoordinationRecord::from_body(body, header.remaining_slots.load(Ordering::Acquire))
    }

    fn claim(&self) -> Result<u32> {
        let slots = &self.header().remaining_slots;
        let mut current = slots.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(Error::NoSlotsRemaining);
            }
            match slots.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        // The decrement must be durable before the caller acts on its slot.
        self.mmap.flush_sync()?;
        Ok(current - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::role::Role;
    use tempfile::tempdir;

    #[test]
    fn header_is_two_cache_lines() {
        assert_eq!(HEADER_SIZE, 128);
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path().join("session.record"));
        let record = CoordinationRecord::create("/dev/shm/pulse", 1001, vec![Role::Slow, Role::Fast]);
        store.persist(&record).expect("persist");
        assert_eq!(store.load().expect("load"), record);
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn missing_record_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path().join("absent.record"));
        assert!(matches!(store.load(), Err(Error::NotFound)));
        assert!(matches!(store.claim_next_role(), Err(Error::NotFound)));
    }

    #[test]
    fn flipped_body_byte_is_corrupt() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("session.record");
        let store = RecordStore::new(&path);
        store
            .persist(&CoordinationRecord::create("addr", 1, vec![Role::Fast]))
            .expect("persist");

        let mut bytes = std::fs::read(&path).expect("read");
        bytes[HEADER_SIZE + 2] ^= 0xFF;
        std::fs::write(&path, bytes).expect("write");

        assert!(matches!(store.load(), Err(Error::Corrupt(_))));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("session.record");
        std::fs::write(&path, b"not a record").expect("write");
        assert!(matches!(RecordStore::new(&path).load(), Err(Error::Corrupt(_))));
    }

    #[test]
    fn claim_is_visible_to_later_loads() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path().join("session.record"));
        store
            .persist(&CoordinationRecord::create("addr", 1, vec![Role::Slow, Role::Fast]))
            .expect("persist");

        let (first, after) = store.claim_next_role().expect("claim");
        assert_eq!(first, SessionRole { ordinal: 1, role: Role::Fast });
        assert_eq!(after.remaining_slots, 1);
        assert_eq!(store.load().expect("load").remaining_slots, 1);
    }

    #[test]
    fn persist_replaces_previous_session() {
        let dir = tempdir().expect("tempdir");
        let store = RecordStore::new(dir.path().join("session.record"));
        store
            .persist(&CoordinationRecord::create("old", 1, vec![Role::Fast]))
            .expect("persist");
        store.claim_next_role().expect("claim");

        let fresh = CoordinationRecord::create("new", 2, vec![Role::Slow, Role::Slow]);
        store.persist(&fresh).expect("persist");
        assert_eq!(store.load().expect("load"), fresh);
    }
}
