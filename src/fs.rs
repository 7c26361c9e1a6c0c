// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Small filesystem helpers shared by the metadata and key-list writers.

use std::{io::Write, path::Path};

/// Atomically rewrites a file's contents.
///
/// Used by [`crate::segment::Segment::write_fixed_metadata`] to persist the
/// fixed metadata descriptor (§6), which must never be observed
/// half-written after a crash.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path
        .parent()
        .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = std::fs::File::open(path)?;
        file.sync_all()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn atomic_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.txt");
        fs::write(&path, b"asdasdasdasdasd").unwrap();

        rewrite_atomic(&path, b"newcontent").unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!("newcontent", content);
    }
}
