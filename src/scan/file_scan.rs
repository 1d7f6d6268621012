// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! File-backed scan kernel.
//!
//! Used when a column cannot be kept resident. Reads are guided by the
//! mask's index-set iterator: contiguous runs become large positioned
//! sequential reads, scattered groups become individual element reads.
//! All I/O uses `pread`-style positioned reads, so a descriptor shared by
//! concurrent scans never sees its cursor move. Bytes touched are
//! reported back to the file manager for cache accounting.

use super::{Scalar, ValueTest};
use crate::{
    bitvector::{Bitvector, HitBuilder, IndexSet},
    file::read_exact_at,
    file_manager::FileManager,
};
use std::fs::File;

/// Reasonable sequential I/O unit
const READ_CHUNK_BYTES: usize = 1 << 20;

/// Evaluates `test` over the mask-selected rows of an on-disk column.
///
/// The file must hold `mask.len()` host-order elements of `T` (the full
/// representation; packed files do not exist on disk).
pub(crate) fn scan_file_bits<T: Scalar, P: ValueTest<T>>(
    file: &File,
    test: P,
    mask: &Bitvector,
    fm: &FileManager,
) -> crate::Result<Bitvector> {
    let mut hits = HitBuilder::for_density(mask.len(), mask.count_ones());
    let mut bytes_touched = 0u64;

    let chunk_elements = (READ_CHUNK_BYTES / T::SIZE).max(1);
    let mut buf = vec![0u8; chunk_elements * T::SIZE];

    for set in mask.index_sets() {
        match set {
            IndexSet::Range { start, count } => {
                // bulk sequential reads over the run
                let mut row = start;
                let mut remaining = count;

                while remaining > 0 {
                    let n = remaining.min(chunk_elements);
                    let want = n * T::SIZE;

                    let chunk = buf.get_mut(..want).unwrap_or_default();
                    read_exact_at(file, (row * T::SIZE) as u64, chunk)?;
                    bytes_touched += want as u64;

                    for i in 0..n {
                        let v = T::read_host(chunk.get(i * T::SIZE..).unwrap_or_default());
                        if test.test(v) {
                            hits.set(row + i);
                        }
                    }

                    row += n;
                    remaining -= n;
                }
            }
            IndexSet::Bits { .. } => {
                // sparse set, read element by element
                let mut elem = [0u8; 16];
                let elem = elem.get_mut(..T::SIZE).unwrap_or_default();

                for row in set.iter() {
                    read_exact_at(file, (row * T::SIZE) as u64, elem)?;
                    bytes_touched += T::SIZE as u64;

                    if test.test(T::read_host(elem)) {
                        hits.set(row);
                    }
                }
            }
        }
    }

    fm.record_read(bytes_touched);

    Ok(hits.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{scan_bits, Above};
    use test_log::test;

    fn write_column(path: &std::path::Path, values: &[i32]) -> std::io::Result<()> {
        let mut bytes = vec![];
        for v in values {
            bytes.extend_from_slice(&v.to_ne_bytes());
        }
        std::fs::write(path, bytes)
    }

    #[test]
    fn file_scan_matches_memory_scan() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("col");

        let values: Vec<i32> = (0..5_000).map(|i| i * 3 % 101).collect();
        write_column(&path, &values)?;

        // a mask with both a long run and scattered bits
        let mut rows: Vec<usize> = (100..2_000).collect();
        rows.extend((2_500..5_000).step_by(97));
        let mask = Bitvector::from_indices(5_000, rows.iter().copied());

        let test = Above {
            bound: 50i32,
            strict: false,
        };

        let fm = FileManager::with_capacity_bytes(1 << 20);
        let file = File::open(&path)?;

        let from_file = scan_file_bits(&file, test, &mask, &fm)?;
        let from_memory = scan_bits(&values.as_slice(), test, &mask)?;

        assert_eq!(from_memory, from_file);
        assert!(fm.bytes_read() >= (1_900 * 4) as u64);

        Ok(())
    }

    #[test]
    fn empty_mask_reads_nothing() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("col");
        write_column(&path, &[1, 2, 3])?;

        let fm = FileManager::with_capacity_bytes(1 << 20);
        let file = File::open(&path)?;

        let hits = scan_file_bits(
            &file,
            Above {
                bound: 0i32,
                strict: true,
            },
            &Bitvector::with_len(3, false),
            &fm,
        )?;

        assert_eq!(0, hits.count_ones());
        assert_eq!(0, fm.bytes_read());

        Ok(())
    }

    #[test]
    fn shared_descriptor_scans_concurrently() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("col");

        let values: Vec<i32> = (0..10_000).collect();
        write_column(&path, &values)?;

        let fm = FileManager::with_capacity_bytes(1 << 20);
        let file = fm.fetch_descriptor(&path)?;
        let mask = Bitvector::with_len(10_000, true);

        let expected = scan_bits(
            &values.as_slice(),
            Above {
                bound: 5_000i32,
                strict: false,
            },
            &mask,
        )?;

        std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let file = file.clone();
                    let mask = &mask;
                    let fm = &fm;
                    s.spawn(move || {
                        scan_file_bits(
                            &file,
                            Above {
                                bound: 5_000i32,
                                strict: false,
                            },
                            mask,
                            fm,
                        )
                    })
                })
                .collect();

            for handle in handles {
                let hits = handle.join().expect("thread panicked")?;
                assert_eq!(expected, hits);
            }

            Ok::<_, crate::Error>(())
        })?;

        Ok(())
    }
}
