use anyhow::{anyhow, Context, Result};
use crossbeam_channel as channel;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

// Shuffle writer pool used by map tasks.
// Strategy: one dedicated IO thread per partition (file). Senders are bounded for backpressure.
pub struct WriterPool {
    senders: Vec<channel::Sender<WriterMsg>>,
    metrics: Vec<Arc<PartitionCounters>>,
    paths: Vec<PathBuf>,
}

enum WriterMsg {
    Data(Vec<u8>),
    Close,
}

pub struct WriterJoiner {
    handles: Vec<thread::JoinHandle<Result<()>>>,
}

impl WriterJoiner {
    /// Waits for every IO thread and returns the first write failure, if any.
    pub fn join_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for h in self.handles.drain(..) {
            let res = h.join().map_err(|_| anyhow!("writer thread panicked")).and_then(|r| r);
            if let Err(e) = res {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl WriterPool {
    pub fn new(
        base_dir: &Path,
        num_partitions: usize,
        flush_bytes: usize,
        flush_interval: Duration,
        queue_cap: usize,
    ) -> Result<(Self, WriterJoiner)> {
        crate::io::ensure_dir(base_dir)?;
        let mut senders = Vec::with_capacity(num_partitions);
        let mut handles = Vec::with_capacity(num_partitions);
        let mut metrics = Vec::with_capacity(num_partitions);
        let mut paths = Vec::with_capacity(num_partitions);
        for part in 0..num_partitions {
            let (tx, rx) = channel::bounded::<WriterMsg>(queue_cap);
            let path = base_dir.join(format!("map_part{}.bin", part));
            let counters = Arc::new(PartitionCounters::default());
            let thread_counters = Arc::clone(&counters);
            let thread_path = path.clone();
            let handle = thread::Builder::new()
                .name(format!("mrflow-writer-{}", part))
                .spawn(move || partition_writer_loop(&thread_path, rx, &thread_counters, flush_bytes, flush_interval))
                .context("spawn writer thread")?;
            senders.push(tx);
            handles.push(handle);
            metrics.push(counters);
            paths.push(path);
        }
        Ok((Self { senders, metrics, paths }, WriterJoiner { handles }))
    }

    /// File that receives the records of `partition`.
    pub fn partition_path(&self, partition: usize) -> &Path {
        &self.paths[partition]
    }

    // Callers pass a Vec<u8> chunk to write to partition.
    // The pool takes ownership, enqueues, and IO threads handle batching and flush policy.
    pub fn write_chunk(&self, partition: usize, bytes: Vec<u8>) -> Result<()> {
        let counters = &self.metrics[partition];
        counters.enq_count.fetch_add(1, Ordering::Relaxed);
        counters.enq_bytes.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        let q = counters.queue_len.fetch_add(1, Ordering::Relaxed) + 1;
        counters.max_queue_len.fetch_max(q, Ordering::Relaxed);
        self.senders[partition]
            .send(WriterMsg::Data(bytes))
            .map_err(|_| anyhow!("writer for partition {} is gone", partition))
    }

    pub fn close_all(&self) {
        for tx in &self.senders {
            // A closed receiver means the thread already exited with an error, which join_all reports.
            let _ = tx.send(WriterMsg::Close);
        }
    }

    pub fn make_thread_writer(&self, local_batch_bytes: usize) -> ThreadWriter<'_> {
        ThreadWriter::new(self, self.senders.len(), local_batch_bytes)
    }

    pub fn metrics_snapshot(&self) -> Vec<WriterPartitionMetrics> {
        self.metrics
            .iter()
            .map(|c| WriterPartitionMetrics {
                max_queue_len: c.max_queue_len.load(Ordering::Relaxed),
                enq_count: c.enq_count.load(Ordering::Relaxed),
                enq_bytes: c.enq_bytes.load(Ordering::Relaxed),
                flush_by_size: c.flush_by_size.load(Ordering::Relaxed),
                flush_by_timer: c.flush_by_timer.load(Ordering::Relaxed),
                bytes_written: c.bytes_written.load(Ordering::Relaxed),
                write_calls: c.write_calls.load(Ordering::Relaxed),
            })
            .collect()
    }
}

fn partition_writer_loop(
    path: &Path,
    rx: channel::Receiver<WriterMsg>,
    counters: &PartitionCounters,
    flush_bytes: usize,
    flush_interval: Duration,
) -> Result<()> {
    let mut writer = crate::io::open_writer(path)?;
    let mut buf: Vec<u8> = Vec::with_capacity(flush_bytes.min(1 << 20));
    let mut last_flush = Instant::now();
    let write_out = |buf: &mut Vec<u8>, writer: &mut std::io::BufWriter<std::fs::File>| -> Result<()> {
        if !buf.is_empty() {
            writer.write_all(buf).with_context(|| format!("write {}", path.display()))?;
            counters.bytes_written.fetch_add(buf.len() as u64, Ordering::Relaxed);
            counters.write_calls.fetch_add(1, Ordering::Relaxed);
            buf.clear();
        }
        Ok(())
    };
    loop {
        // We aim to batch writes up to flush_bytes or flush_interval.
        let timeout = flush_interval.saturating_sub(last_flush.elapsed());
        match rx.recv_timeout(timeout) {
            Ok(WriterMsg::Data(bytes)) => {
                counters.queue_len.fetch_sub(1, Ordering::Relaxed);
                buf.extend_from_slice(&bytes);
            }
            Ok(WriterMsg::Close) | Err(channel::RecvTimeoutError::Disconnected) => {
                write_out(&mut buf, &mut writer)?;
                writer.flush().with_context(|| format!("flush {}", path.display()))?;
                debug!(path = %path.display(), "partition writer closed");
                return Ok(());
            }
            Err(channel::RecvTimeoutError::Timeout) => {}
        }
        let due_to_size = buf.len() >= flush_bytes;
        let due_to_timer = !due_to_size && last_flush.elapsed() >= flush_interval;
        if due_to_size || due_to_timer {
            write_out(&mut buf, &mut writer)?;
            if due_to_size {
                counters.flush_by_size.fetch_add(1, Ordering::Relaxed);
            }
            if due_to_timer {
                counters.flush_by_timer.fetch_add(1, Ordering::Relaxed);
            }
            writer.flush().with_context(|| format!("flush {}", path.display()))?;
            last_flush = Instant::now();
        }
    }
}

/// Per-task batching front end of the pool.
pub struct ThreadWriter<'a> {
    pool: &'a WriterPool,
    local_buffers: Vec<Vec<u8>>, // per-partition aggregation buffers
    batch_bytes: usize,
    flushes: u64,
    bytes_sent: u64,
}

impl<'a> ThreadWriter<'a> {
    fn new(pool: &'a WriterPool, num_partitions: usize, batch_bytes: usize) -> Self {
        let local_buffers = (0..num_partitions).map(|_| Vec::new()).collect();
        Self { pool, local_buffers, batch_bytes, flushes: 0, bytes_sent: 0 }
    }

    pub fn buffer_mut(&mut self, partition: usize) -> &mut Vec<u8> {
        &mut self.local_buffers[partition]
    }

    /// Sends the partition buffer to the pool once it has grown past the batch size.
    pub fn maybe_flush(&mut self, partition: usize) -> Result<()> {
        if self.local_buffers[partition].len() >= self.batch_bytes {
            self.flush_partition(partition)?;
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> Result<()> {
        for p in 0..self.local_buffers.len() {
            if !self.local_buffers[p].is_empty() {
                self.flush_partition(p)?;
            }
        }
        Ok(())
    }

    fn flush_partition(&mut self, partition: usize) -> Result<()> {
        let chunk = std::mem::take(&mut self.local_buffers[partition]);
        self.bytes_sent += chunk.len() as u64;
        self.flushes += 1;
        self.pool.write_chunk(partition, chunk)
    }

    /// (flushes, bytes sent)
    pub fn stats(&self) -> (u64, u64) {
        (self.flushes, self.bytes_sent)
    }
}

#[derive(Default)]
struct PartitionCounters {
    queue_len: AtomicUsize,
    max_queue_len: AtomicUsize,
    enq_count: AtomicU64,
    enq_bytes: AtomicU64,
    flush_by_size: AtomicU64,
    flush_by_timer: AtomicU64,
    bytes_written: AtomicU64,
    write_calls: AtomicU64,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct WriterPartitionMetrics {
    pub max_queue_len: usize,
    pub enq_count: u64,
    pub enq_bytes: u64,
    pub flush_by_size: u64,
    pub flush_by_timer: u64,
    pub bytes_written: u64,
    pub write_calls: u64,
}
