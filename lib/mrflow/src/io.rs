use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref()).with_context(|| format!("create_dir_all {}", path.as_ref().display()))
}

/// Removes a directory tree if it exists.
pub fn remove_dir_if_exists(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("remove_dir_all {}", path.display()))?;
    }
    Ok(())
}

/// Removes `path` only when it is an empty directory. Returns whether it was removed.
pub fn remove_dir_if_empty(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("read_dir {}", path.display())),
    };
    if entries.next().is_some() {
        return Ok(false);
    }
    fs::remove_dir(path).with_context(|| format!("remove_dir {}", path.display()))?;
    Ok(true)
}

/// Data files under `path`, sorted. Names starting with `_` or `.` are markers
/// and bookkeeping, not data.
pub fn list_files_recursive(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(path.as_ref()) {
        let entry = entry.with_context(|| format!("walk {}", path.as_ref().display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let hidden = entry
            .file_name()
            .to_str()
            .map(|n| n.starts_with('_') || n.starts_with('.'))
            .unwrap_or(false);
        if !hidden {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

pub fn read_lines(path: impl AsRef<Path>) -> Result<impl Iterator<Item = Result<String>>> {
    let file = File::open(path.as_ref()).with_context(|| format!("open {}", path.as_ref().display()))?;
    let reader = BufReader::new(file);
    Ok(reader.lines().map(|l| l.map_err(anyhow::Error::from)))
}

/// Every line of every data file under `path`, in file order.
pub fn read_all_lines(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for file in list_files_recursive(path)? {
        for line in read_lines(&file)? {
            out.push(line?);
        }
    }
    Ok(out)
}

/// Partition for an already encoded key. Equal keys encode to equal bytes, so they
/// always land on the same reducer.
pub fn hash_to_partition(key_bytes: &[u8], num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    hasher.write(key_bytes);
    (hasher.finish() as usize) % num_partitions.max(1)
}

/// Appends one shuffle record `[klen u32][vlen u32][k][v]` to `buf`.
pub fn write_bin(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

/// Reads the shuffle record starting at `off`. Returns key, value and the offset of
/// the next record, or `None` at the end of the buffer or on a truncated record.
pub fn read_bin_line(bytes: &[u8], off: usize) -> Option<(&[u8], &[u8], usize)> {
    let header_end = off.checked_add(8)?;
    if header_end > bytes.len() {
        return None;
    }
    let klen = u32::from_le_bytes(bytes[off..off + 4].try_into().ok()?) as usize;
    let vlen = u32::from_le_bytes(bytes[off + 4..header_end].try_into().ok()?) as usize;
    let key_end = header_end + klen;
    let end = key_end + vlen;
    if end > bytes.len() {
        return None;
    }
    Some((&bytes[header_end..key_end], &bytes[key_end..end], end))
}

pub fn open_writer(path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        ensure_dir(parent)?;
    }
    let file = File::create(path.as_ref()).with_context(|| format!("create {}", path.as_ref().display()))?;
    Ok(BufWriter::new(file))
}

// ========== Sinks ==========

/// Writes job output records into a part file opened by the runtime.
pub trait Sink<T> {
    fn write_record(&self, writer: &mut BufWriter<File>, record: &T) -> Result<()>;
}

/// One record per line, as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLineSink;

impl<T: AsRef<str>> Sink<T> for TextLineSink {
    fn write_record(&self, writer: &mut BufWriter<File>, record: &T) -> Result<()> {
        writer.write_all(record.as_ref().as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}
