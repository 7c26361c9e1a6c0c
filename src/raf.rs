// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The RAF handle (§4.C): a scoped-lock random-access file. Callers acquire
//! the lock for the full duration of a logical multi-step I/O sequence; the
//! lock is released on every exit path because it is an RAII guard.

#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::{fs::File, io, path::Path};

use parking_lot::{Mutex, MutexGuard};

/// Process-wide handle to the backing random-access file shared by all
/// segments of a splitfile (§5 "Resource sharing").
pub struct RafHandle {
    file: Mutex<File>,
}

impl RafHandle {
    /// Opens (creating if absent) the backing file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Wraps an already-open file.
    #[must_use]
    pub fn from_file(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }

    /// Acquires the exclusive RAF lock for the duration of the returned
    /// guard. Lock order is always segment lock → RAF lock (§5).
    pub fn lock(&self) -> RafLock<'_> {
        RafLock(self.file.lock())
    }
}

/// Scoped exclusive lock on the backing file. Released on drop.
pub struct RafLock<'a>(MutexGuard<'a, File>);

impl RafLock<'_> {
    /// Reads exactly `buf.len()` bytes starting at `offset`.
    pub fn pread(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.0.read_exact_at(buf, offset)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &*self.0;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)
        }
    }

    /// Writes `buf` starting at `offset`.
    pub fn pwrite(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        #[cfg(unix)]
        {
            self.0.write_all_at(buf, offset)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut file = &*self.0;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(buf)
        }
    }

    /// Flushes any OS-buffered writes to stable storage.
    pub fn sync(&self) -> io::Result<()> {
        self.0.sync_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let raf = RafHandle::open(&dir.path().join("raf.bin")).unwrap();

        {
            let lock = raf.lock();
            lock.pwrite(128, b"hello world").unwrap();
        }

        let mut buf = [0u8; 11];
        raf.lock().pread(128, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn lock_is_released_after_scope() {
        let dir = tempfile::tempdir().unwrap();
        let raf = RafHandle::open(&dir.path().join("raf.bin")).unwrap();

        {
            let _lock = raf.lock();
        }
        // A second lock acquisition must not deadlock.
        let _lock2 = raf.lock();
    }
}
