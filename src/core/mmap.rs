use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};

use crate::core::{Error, Result};

/// A read-write shared mapping of a whole file.
///
/// Every process that maps the same file sees the same bytes, which is what the
/// coordination record and the shm channel rely on for cross-process atomics.
pub struct MmapFile {
    file: File,
    map: MmapMut,
    len: usize,
}

impl MmapFile {
    /// Creates (or truncates) `path` to `len` zeroed bytes and maps it.
    pub fn create(path: &Path, len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::Unsupported("mmap length must be non-zero"));
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(len as u64)?;
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self { file, map, len })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Err(Error::Corrupt("mapped file is empty"));
        }
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file)? };
        Ok(Self { file, map, len })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.map.as_ptr() as *mut u8
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn flush_sync(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.map.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_open_shares_bytes() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("shared.meta");

        let mut writer = MmapFile::create(&path, 128).expect("create");
        writer.as_mut_slice()[..4].copy_from_slice(b"puls");
        writer.flush_sync().expect("flush");

        let reader = MmapFile::open(&path).expect("open");
        assert_eq!(reader.len(), 128);
        assert_eq!(&reader.as_slice()[..4], b"puls");
    }

    #[test]
    fn zero_length_rejected() {
        let dir = tempdir().expect("tempdir");
        let err = MmapFile::create(&dir.path().join("empty"), 0).err().expect("error");
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
