// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{io::Write, path::Path};

pub const MAGIC_BYTES: [u8; 4] = [b'B', b'P', b'T', 1];

/// Partition header file
pub const HEADER_FILE: &str = "-part.txt";

/// Legacy header file name, recognized for reading only
pub const LEGACY_HEADER_FILE: &str = "table.tdc";

/// Compressed active-row mask
pub const MASK_FILE: &str = "-part.msk";

/// Raw row identifiers
pub const RIDS_FILE: &str = "-rids";

/// Sorted row identifiers for binary-search lookup
pub const SORTED_RIDS_FILE: &str = "-rids.srt";

/// Suffix of the CATEGORY code file
pub const CATEGORY_SUFFIX: &str = ".int";

/// Suffix of the TEXT/BLOB start-offset side file
pub const OFFSETS_SUFFIX: &str = ".sp";

/// Suffix of the CATEGORY dictionary file
pub const DICTIONARY_SUFFIX: &str = ".dic";

/// Suffix of a column's bitmap index file
pub const INDEX_SUFFIX: &str = ".idx";

/// Suffix of a column's null mask file
pub const NULL_MASK_SUFFIX: &str = ".msk";

/// Reads an exact byte range from a file using `pread`.
///
/// Does not move the file cursor, so cached descriptors can be shared
/// across concurrent scans.
#[cfg(unix)]
pub fn read_exact_at(
    file: &std::fs::File,
    offset: u64,
    buf: &mut [u8],
) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

/// Reads an exact byte range from a file using positioned reads.
#[cfg(windows)]
pub fn read_exact_at(
    file: &std::fs::File,
    offset: u64,
    buf: &mut [u8],
) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;

    let mut done = 0;
    while done < buf.len() {
        let n = file.seek_read(
            buf.get_mut(done..).unwrap_or_default(),
            offset + done as u64,
        )?;

        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "positioned read hit end of file",
            ));
        }
        done += n;
    }

    Ok(())
}

/// Atomically rewrites a file.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[allow(clippy::expect_used, reason = "every file should have a parent directory")]
    let folder = path.parent().expect("should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path).map_err(|e| e.error)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = std::fs::File::open(path)?;
        file.sync_all()?;

        fsync_directory(folder)?;
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_log::test;

    #[test]
    fn atomic_rewrite() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let path = dir.path().join("test.txt");
        {
            let mut file = std::fs::File::create(&path)?;
            write!(file, "asdasdasdasdasd")?;
        }

        rewrite_atomic(&path, b"newcontent")?;

        let content = std::fs::read_to_string(&path)?;
        assert_eq!("newcontent", content);

        Ok(())
    }

    #[test]
    fn positioned_read() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let path = dir.path().join("data");
        std::fs::write(&path, b"0123456789")?;

        let file = std::fs::File::open(&path)?;

        let mut buf = [0u8; 3];
        read_exact_at(&file, 3, &mut buf)?;
        assert_eq!(b"345", &buf);

        // the cursor did not move
        read_exact_at(&file, 0, &mut buf)?;
        assert_eq!(b"012", &buf);

        Ok(())
    }
}
