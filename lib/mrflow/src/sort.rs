use crate::io::read_bin_line;
use anyhow::{Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct SortOutcome {
    pub lines_in: u64,
    pub bytes_in: u64,
    pub sort_only_ms: u64,
    pub io_read_ms: u64,
    pub io_write_ms: u64,
}

// Record index entry: (file_idx, start, key_end, end). The key sits at [start+8..key_end],
// the value at [key_end..end], because [start..start+8) holds the two lengths.
type RecordIdx = (usize, usize, usize, usize);

// Given set of partition files, produce a single sorted file at out_path.
// Intermediate file format is binary records: [klen][vlen][k][v].
// Records are ordered by key bytes, then value bytes, so equal keys are adjacent and the
// value order inside a group does not depend on how map tasks interleaved their writes.
pub fn external_sort_by_key(input_paths: &[PathBuf], out_path: &Path) -> Result<SortOutcome> {
    let mut file_maps: Vec<Mmap> = Vec::new();
    let mut all_lines: Vec<RecordIdx> = Vec::new();
    let mut bytes_in: u64 = 0;
    let mut lines_in: u64 = 0;
    let mut io_read = Duration::from_nanos(0);

    for p in input_paths {
        let file = File::open(p).with_context(|| format!("open {}", p.display()))?;
        let meta_len = file.metadata().with_context(|| format!("stat {}", p.display()))?.len();
        if meta_len == 0 {
            continue;
        }
        bytes_in += meta_len;
        let read_start = Instant::now();
        // SAFETY: intermediates are private to this job and not modified while mapped.
        let map = unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", p.display()))?;
        let file_idx = file_maps.len();
        let mut off = 0usize;
        while let Some((k, _v, next)) = read_bin_line(&map[..], off) {
            let key_end = off + 8 + k.len();
            all_lines.push((file_idx, off, key_end, next));
            lines_in += 1;
            off = next;
        }
        anyhow::ensure!(off == map.len(), "truncated shuffle record in {} at byte {}", p.display(), off);
        file_maps.push(map);
        io_read += read_start.elapsed();
    }

    let sort_only_start = Instant::now();
    all_lines.par_sort_by(|a, b| {
        let (fia, sa, ka, ea) = *a;
        let (fib, sb, kb, eb) = *b;
        let (ma, mb) = (&file_maps[fia], &file_maps[fib]);
        ma[(sa + 8)..ka].cmp(&mb[(sb + 8)..kb]).then_with(|| ma[ka..ea].cmp(&mb[kb..eb]))
    });
    let sort_only_ms = sort_only_start.elapsed().as_millis() as u64;

    let io_write_start = Instant::now();
    let file = File::create(out_path).with_context(|| format!("create {}", out_path.display()))?;
    let mut w = BufWriter::with_capacity(8 * 1024 * 1024, file);
    for &(fi, s, _k, e) in &all_lines {
        w.write_all(&file_maps[fi][s..e]).with_context(|| format!("write {}", out_path.display()))?;
    }
    w.flush().with_context(|| format!("flush {}", out_path.display()))?;
    let io_write_ms = io_write_start.elapsed().as_millis() as u64;

    Ok(SortOutcome { lines_in, bytes_in, sort_only_ms, io_read_ms: io_read.as_millis() as u64, io_write_ms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::write_bin;

    #[test]
    fn records_from_several_files_come_out_grouped_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Vec::new();
        write_bin(&mut a, b"b", b"2");
        write_bin(&mut a, b"a", b"9");
        let mut b = Vec::new();
        write_bin(&mut b, b"a", b"1");
        write_bin(&mut b, b"b", b"1");
        let pa = dir.path().join("a.bin");
        let pb = dir.path().join("b.bin");
        let empty = dir.path().join("empty.bin");
        std::fs::write(&pa, &a).unwrap();
        std::fs::write(&pb, &b).unwrap();
        std::fs::write(&empty, b"").unwrap();

        let out = dir.path().join("sorted.bin");
        let outcome = external_sort_by_key(&[pa, pb, empty], &out).unwrap();
        assert_eq!(outcome.lines_in, 4);

        let bytes = std::fs::read(&out).unwrap();
        let mut off = 0;
        let mut seen = Vec::new();
        while let Some((k, v, next)) = read_bin_line(&bytes, off) {
            seen.push((k.to_vec(), v.to_vec()));
            off = next;
        }
        let expected: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"a".to_vec(), b"9".to_vec()),
            (b"b".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
        ];
        assert_eq!(seen, expected);
    }

    #[test]
    fn truncated_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = Vec::new();
        write_bin(&mut a, b"key", b"value");
        a.pop();
        let pa = dir.path().join("a.bin");
        std::fs::write(&pa, &a).unwrap();
        assert!(external_sort_by_key(&[pa], &dir.path().join("out.bin")).is_err());
    }
}
