use crate::api::{Combiner, ExecutablePipeline, Mapper, Reducer};
use crate::config::RuntimeConfig;
use crate::constants::SUCCESS_MARKER;
use crate::io::{
    ensure_dir, hash_to_partition, list_files_recursive, open_writer, read_bin_line, read_lines,
    remove_dir_if_empty, remove_dir_if_exists, write_bin, Sink,
};
use crate::sort::external_sort_by_key;
use crate::stats::{JobReport, MapTaskStats, ReduceStats, SortStats};
use crate::utils::next_job_id;
use crate::writer::{ThreadWriter, WriterPool};
use anyhow::{Context, Result};
use memmap2::Mmap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::hash::Hash;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

type LineParser<In> = Arc<dyn Fn(String) -> Result<In> + Send + Sync>;

struct InputSpec<In> {
    path: PathBuf,
    parse: LineParser<In>,
}

/// A file assigned to a map task together with the parser of the input it came from.
type TaskFile<In> = (PathBuf, LineParser<In>);

struct JobSetup<In> {
    job_id: String,
    output_dir: PathBuf,
    launch_root: PathBuf,
    tasks: Vec<Vec<TaskFile<In>>>,
}

/// Local, multi-threaded MapReduce runtime: parallel map tasks, a hash shuffle through
/// per-partition writer threads, an mmap sort per partition and parallel reducers.
pub struct RuntimePipeline<In> {
    inputs: Vec<InputSpec<In>>,
    output: Option<PathBuf>,
    num_reducers: Option<usize>,
    config: RuntimeConfig,
}

impl<In: Send + 'static> RuntimePipeline<In> {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::from_env())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self { inputs: vec![], output: None, num_reducers: None, config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn prepare(&self) -> Result<JobSetup<In>> {
        let output_dir = self.output.clone().context("output not set")?;
        anyhow::ensure!(!self.inputs.is_empty(), "no inputs registered for {}", output_dir.display());
        let job_id = next_job_id();
        let launch_root = self.config.work_dir.join(&job_id);

        let mut all_files: Vec<TaskFile<In>> = Vec::new();
        for inp in &self.inputs {
            for file in list_files_recursive(&inp.path)? {
                all_files.push((file, Arc::clone(&inp.parse)));
            }
        }

        // Prepare output directory (clean it before starting)
        remove_dir_if_exists(&output_dir)?;
        ensure_dir(&output_dir)?;

        // partition files among logical tasks
        let ntasks = self.config.local_tasks.min(all_files.len()).max(1);
        let mut tasks: Vec<Vec<TaskFile<In>>> = (0..ntasks).map(|_| Vec::new()).collect();
        for (idx, file) in all_files.into_iter().enumerate() {
            tasks[idx % ntasks].push(file);
        }
        Ok(JobSetup { job_id, output_dir, launch_root, tasks })
    }

    fn thread_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.rayon_threads.unwrap_or(0))
            .thread_name(|i| format!("mrflow-worker-{}", i))
            .build()
            .context("build rayon pool")
    }

    /// Runs `body` inside the job's thread pool. On success the output is marked complete;
    /// on failure the output directory is removed so no partial result survives.
    fn execute<F>(&self, setup: &JobSetup<In>, body: F) -> Result<JobReport>
    where
        F: FnOnce(&JobSetup<In>) -> Result<JobReport> + Send,
        In: Sync,
    {
        let start = Instant::now();
        let result = self.thread_pool()?.install(|| body(setup));
        if !self.config.keep_intermediates {
            if let Err(e) = remove_dir_if_exists(&setup.launch_root) {
                error!(job_id = %setup.job_id, "intermediate cleanup failed: {:#}", e);
            } else if let Err(e) = remove_dir_if_empty(&self.config.work_dir) {
                // another job may still be using it
                debug!(job_id = %setup.job_id, "work dir kept: {:#}", e);
            }
        }
        match result {
            Ok(report) => {
                fs::write(setup.output_dir.join(SUCCESS_MARKER), b"")
                    .with_context(|| format!("write success marker in {}", setup.output_dir.display()))?;
                info!(job_id = %setup.job_id, output = %setup.output_dir.display(),
                      records_out = report.records_out(), wall_ms = start.elapsed().as_millis() as u64,
                      "Job complete");
                Ok(report)
            }
            Err(e) => {
                error!(job_id = %setup.job_id, output = %setup.output_dir.display(), "Job failed: {:#}", e);
                if let Err(cleanup) = remove_dir_if_exists(&setup.output_dir) {
                    error!(job_id = %setup.job_id, "output cleanup failed: {:#}", cleanup);
                }
                Err(e)
            }
        }
    }

    fn run_map_reduce<M, C, R, S>(&mut self, mapper: M, combiner: Option<C>, reducer: R, sink: S) -> Result<JobReport>
    where
        M: Mapper<Input = In> + Send + Sync + 'static,
        C: Combiner<Key = M::Key, Value = M::Value> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
        S: Sink<R::Out> + Send + Sync + 'static,
        In: Sync,
    {
        let setup = self.prepare()?;
        let num_reducers = self
            .num_reducers
            .or(self.config.num_reducers)
            .unwrap_or(setup.tasks.len())
            .max(1);
        let config = self.config.clone();
        info!(job_id = %setup.job_id, ntasks = setup.tasks.len(), num_reducers,
              combiner = combiner.is_some(), output = %setup.output_dir.display(),
              "Starting map phase");

        self.execute(&setup, |setup| {
            let mut report = JobReport::new(setup.job_id.clone());
            let map_out_dir = setup.launch_root.join("map_out");
            let sort_out_dir = setup.launch_root.join("sort_out");
            ensure_dir(&sort_out_dir)?;

            // Map phase
            let (pool, mut joiner) = WriterPool::new(
                &map_out_dir,
                num_reducers,
                config.flush_bytes,
                config.flush_interval,
                config.writer_queue_cap,
            )?;
            let map_phase_start = Instant::now();
            let map_result: Result<Vec<MapTaskStats>> = setup
                .tasks
                .par_iter()
                .enumerate()
                .map(|(task_id, files)| {
                    let writer = pool.make_thread_writer(config.local_batch_bytes);
                    let output = ShuffleOutput::<M::Key, M::Value, C>::new(
                        writer,
                        num_reducers,
                        combiner.as_ref(),
                        config.combine_spill_entries,
                    );
                    run_map_task(task_id, files, &mapper, output)
                })
                .collect();
            // Ensure all writers are closed before proceeding, even when a task failed
            pool.close_all();
            let join_result = joiner.join_all();
            let map_stats = map_result?;
            join_result?;
            report.record_map(&map_stats, map_phase_start.elapsed().as_millis() as u64);
            report.writers = pool.metrics_snapshot();
            if let Some(m) = &report.map {
                info!(phase = "map", tasks = m.tasks, records_in = m.records_in, total_emits = m.total_emits,
                      records_out = m.records_out, combine_spills = m.combine_spills,
                      total_bytes_out = m.total_bytes_out, wall_ms = m.wall_ms, "Map phase complete");
            }

            // Sort/shuffle
            let sort_phase_start = Instant::now();
            let sort_stats: Vec<SortStats> = (0..num_reducers)
                .into_par_iter()
                .map(|r| {
                    let reducer_start = Instant::now();
                    let out_path = sort_out_dir.join(format!("reduce_in_part{}.bin", r));
                    let outcome = external_sort_by_key(&[pool.partition_path(r).to_path_buf()], &out_path)
                        .with_context(|| format!("sort partition {}", r))?;
                    debug!(reducer = r, lines_in = outcome.lines_in, sort_ms = outcome.sort_only_ms, "partition sorted");
                    Ok(SortStats {
                        reducer: r,
                        lines_in: outcome.lines_in,
                        bytes_in: outcome.bytes_in,
                        sort_only_ms: outcome.sort_only_ms,
                        io_read_ms: outcome.io_read_ms,
                        io_write_ms: outcome.io_write_ms,
                        wall_ms: reducer_start.elapsed().as_millis() as u64,
                    })
                })
                .collect::<Result<_>>()?;
            report.record_sort(&sort_stats, sort_phase_start.elapsed().as_millis() as u64);
            if let Some(s) = &report.sort {
                info!(phase = "sort", reducers = s.reducers, total_lines = s.total_lines,
                      total_bytes = s.total_bytes, io_read_ms = s.total_io_read_ms,
                      io_write_ms = s.total_io_write_ms, wall_ms = s.wall_ms, "Sort phase complete");
            }

            // Reduce phase
            let reduce_phase_start = Instant::now();
            let reduce_stats: Vec<ReduceStats> = (0..num_reducers)
                .into_par_iter()
                .map(|r| {
                    let in_path = sort_out_dir.join(format!("reduce_in_part{}.bin", r));
                    run_reduce_task(r, &in_path, &setup.output_dir, &reducer, &sink)
                        .with_context(|| format!("reduce partition {}", r))
                })
                .collect::<Result<_>>()?;
            report.record_reduce(&reduce_stats, reduce_phase_start.elapsed().as_millis() as u64);
            if let Some(r) = &report.reduce {
                info!(phase = "reduce", reducers = r.reducers, total_lines = r.total_lines,
                      total_groups = r.total_groups, records_out = r.records_out,
                      wall_ms = r.wall_ms, "Reduce phase complete");
            }
            Ok(report)
        })
    }
}

impl<In: Send + 'static> Default for RuntimePipeline<In> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: Send + Sync + 'static> ExecutablePipeline for RuntimePipeline<In> {
    type Input = In;

    fn add_input<P>(&mut self, input_path: impl Into<PathBuf>, parse: P)
    where
        P: Fn(String) -> Result<In> + Send + Sync + 'static,
    {
        self.inputs.push(InputSpec { path: input_path.into(), parse: Arc::new(parse) });
    }

    fn add_output(&mut self, output_path: impl Into<PathBuf>) {
        self.output = Some(output_path.into());
    }

    fn set_num_reducers(&mut self, n: usize) {
        self.num_reducers = Some(n.max(1));
    }

    fn map_only<M, S>(&mut self, mapper: M, sink: S) -> Result<JobReport>
    where
        M: Mapper<Input = In> + Send + Sync + 'static,
        S: Sink<M::Value> + Send + Sync + 'static,
    {
        let setup = self.prepare()?;
        info!(job_id = %setup.job_id, ntasks = setup.tasks.len(), output = %setup.output_dir.display(),
              "Starting map-only job");
        self.execute(&setup, |setup| {
            let mut report = JobReport::new(setup.job_id.clone());
            let map_phase_start = Instant::now();
            let map_stats: Vec<MapTaskStats> = setup
                .tasks
                .par_iter()
                .enumerate()
                .map(|(task_id, files)| {
                    let out_path = setup.output_dir.join(format!("part-m-{:05}", task_id));
                    let output = SinkOutput { writer: open_writer(&out_path)?, sink: &sink, error: None, records_out: 0 };
                    run_map_task(task_id, files, &mapper, output)
                })
                .collect::<Result<_>>()?;
            report.record_map(&map_stats, map_phase_start.elapsed().as_millis() as u64);
            if let Some(m) = &report.map {
                info!(phase = "map", tasks = m.tasks, records_in = m.records_in,
                      records_out = m.records_out, wall_ms = m.wall_ms, "Map phase complete");
            }
            Ok(report)
        })
    }

    fn map_reduce<M, R, S>(&mut self, mapper: M, reducer: R, sink: S) -> Result<JobReport>
    where
        M: Mapper<Input = In> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
        S: Sink<R::Out> + Send + Sync + 'static,
    {
        self.run_map_reduce(mapper, None::<NoCombiner<M::Key, M::Value>>, reducer, sink)
    }

    fn map_combine_reduce<M, C, R, S>(&mut self, mapper: M, combiner: C, reducer: R, sink: S) -> Result<JobReport>
    where
        M: Mapper<Input = In> + Send + Sync + 'static,
        C: Combiner<Key = M::Key, Value = M::Value> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
        S: Sink<R::Out> + Send + Sync + 'static,
    {
        self.run_map_reduce(mapper, Some(combiner), reducer, sink)
    }
}

// ============== Map side ==============

/// Where a map task sends its emits: the shuffle, or straight into a part file.
trait MapOutput<K, V> {
    fn emit(&mut self, key: K, value: V);
    /// Flushes buffered records and fills in the output counters of `stats`.
    fn finish(self, stats: &mut MapTaskStats) -> Result<()>;
}

/// Stops at the first failed record and keeps the error for the task to report.
struct UntilError<'e, I> {
    inner: I,
    error: &'e mut Option<anyhow::Error>,
    seen: u64,
}

impl<T, I: Iterator<Item = Result<T>>> Iterator for UntilError<'_, I> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.error.is_some() {
            return None;
        }
        match self.inner.next()? {
            Ok(v) => {
                self.seen += 1;
                Some(v)
            }
            Err(e) => {
                *self.error = Some(e);
                None
            }
        }
    }
}

fn task_records<In: 'static>(files: &[TaskFile<In>]) -> impl Iterator<Item = Result<In>> + '_ {
    files.iter().flat_map(|(path, parse)| -> Box<dyn Iterator<Item = Result<In>>> {
        match read_lines(path) {
            Ok(lines) => {
                let parse = Arc::clone(parse);
                let path = path.clone();
                Box::new(lines.enumerate().map(move |(n, line)| {
                    line.and_then(|l| (parse.as_ref())(l))
                        .with_context(|| format!("{}:{}", path.display(), n + 1))
                }))
            }
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    })
}

fn run_map_task<M, O>(task_id: usize, files: &[TaskFile<M::Input>], mapper: &M, mut output: O) -> Result<MapTaskStats>
where
    M: Mapper,
    O: MapOutput<M::Key, M::Value>,
{
    let task_start = Instant::now();
    debug!(task_id, num_files = files.len(), "map task starting");
    let mut read_err = None;
    let mut emits = 0u64;
    let mut records = UntilError { inner: task_records(files), error: &mut read_err, seen: 0 };
    let map_result = mapper.do_map(records.by_ref(), &mut |k, v| {
        emits += 1;
        output.emit(k, v);
    });
    let records_in = records.seen;
    drop(records);
    if let Some(e) = read_err {
        return Err(e.context(format!("map task {} failed reading input", task_id)));
    }
    map_result.with_context(|| format!("map task {} failed", task_id))?;

    let mut stats = MapTaskStats {
        task_id,
        num_files: files.len() as u64,
        records_in,
        total_emits: emits,
        ..MapTaskStats::default()
    };
    output.finish(&mut stats).with_context(|| format!("map task {} failed writing output", task_id))?;
    stats.wall_ms = task_start.elapsed().as_millis() as u64;
    Ok(stats)
}

/// Placeholder combiner for jobs without one; the runtime passes it as `None`.
struct NoCombiner<K, V>(PhantomData<fn() -> (K, V)>);

impl<K, V> Combiner for NoCombiner<K, V> {
    type Key = K;
    type Value = V;

    fn combine(&self, _key: &K, _acc: V, next: V) -> V {
        next
    }
}

struct ShuffleOutput<'p, 'c, K, V, C> {
    writer: ThreadWriter<'p>,
    num_partitions: usize,
    combiner: Option<&'c C>,
    combine_buf: HashMap<K, V>,
    spill_entries: usize,
    error: Option<anyhow::Error>,
    records_out: u64,
    spills: u64,
}

impl<'p, 'c, K, V, C> ShuffleOutput<'p, 'c, K, V, C>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
    C: Combiner<Key = K, Value = V>,
{
    fn new(writer: ThreadWriter<'p>, num_partitions: usize, combiner: Option<&'c C>, spill_entries: usize) -> Self {
        Self {
            writer,
            num_partitions,
            combiner,
            combine_buf: HashMap::new(),
            spill_entries: spill_entries.max(1),
            error: None,
            records_out: 0,
            spills: 0,
        }
    }

    fn write_record(&mut self, key: &K, value: &V) -> Result<()> {
        let key_bytes = bincode::serialize(key).context("encode shuffle key")?;
        let val_bytes = bincode::serialize(value).context("encode shuffle value")?;
        let part = hash_to_partition(&key_bytes, self.num_partitions);
        write_bin(self.writer.buffer_mut(part), &key_bytes, &val_bytes);
        self.records_out += 1;
        self.writer.maybe_flush(part)
    }

    fn spill(&mut self) -> Result<()> {
        if self.combine_buf.is_empty() {
            return Ok(());
        }
        self.spills += 1;
        let buffered = std::mem::take(&mut self.combine_buf);
        for (k, v) in buffered {
            self.write_record(&k, &v)?;
        }
        Ok(())
    }
}

impl<K, V, C> MapOutput<K, V> for ShuffleOutput<'_, '_, K, V, C>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
    C: Combiner<Key = K, Value = V>,
{
    fn emit(&mut self, key: K, value: V) {
        if self.error.is_some() {
            return;
        }
        let res = match self.combiner {
            Some(c) => {
                let merged = match self.combine_buf.remove(&key) {
                    Some(acc) => c.combine(&key, acc, value),
                    None => value,
                };
                self.combine_buf.insert(key, merged);
                if self.combine_buf.len() >= self.spill_entries {
                    self.spill()
                } else {
                    Ok(())
                }
            }
            None => self.write_record(&key, &value),
        };
        if let Err(e) = res {
            self.error = Some(e);
        }
    }

    fn finish(mut self, stats: &mut MapTaskStats) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.spill()?;
        self.writer.flush_all()?;
        let (flushes, bytes) = self.writer.stats();
        stats.records_out = self.records_out;
        stats.combine_spills = self.spills;
        stats.total_flushes = flushes;
        stats.total_bytes_out = bytes;
        Ok(())
    }
}

/// Map-only output: values go through the sink into the task's own part file; keys are dropped.
struct SinkOutput<'s, S> {
    writer: BufWriter<File>,
    sink: &'s S,
    error: Option<anyhow::Error>,
    records_out: u64,
}

impl<K, V, S: Sink<V>> MapOutput<K, V> for SinkOutput<'_, S> {
    fn emit(&mut self, _key: K, value: V) {
        if self.error.is_some() {
            return;
        }
        match self.sink.write_record(&mut self.writer, &value) {
            Ok(()) => self.records_out += 1,
            Err(e) => self.error = Some(e),
        }
    }

    fn finish(mut self, stats: &mut MapTaskStats) -> Result<()> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.writer.flush().context("flush map output")?;
        stats.records_out = self.records_out;
        Ok(())
    }
}

// ============== Reduce side ==============

fn run_reduce_task<R, S>(r: usize, in_path: &Path, output_dir: &Path, reducer: &R, sink: &S) -> Result<ReduceStats>
where
    R: Reducer,
    S: Sink<R::Out>,
{
    let reducer_start = Instant::now();
    let file = File::open(in_path).with_context(|| format!("open {}", in_path.display()))?;
    let len = file.metadata().with_context(|| format!("stat {}", in_path.display()))?.len();
    let map = if len == 0 {
        None
    } else {
        // SAFETY: the sorted run is private to this job and not modified while mapped.
        Some(unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", in_path.display()))?)
    };
    let bytes: &[u8] = map.as_deref().unwrap_or(&[]);

    let mut out_writer = open_writer(output_dir.join(format!("part-r-{:05}", r)))?;
    let mut lines_in = 0u64;
    let mut groups = 0u64;
    let mut records_out = 0u64;
    let mut group: Option<(&[u8], Vec<&[u8]>)> = None;
    let mut off = 0usize;
    while let Some((k, v, next)) = read_bin_line(bytes, off) {
        lines_in += 1;
        match &mut group {
            Some((cur, vals)) if *cur == k => vals.push(v),
            slot => {
                if let Some((cur, vals)) = slot.take() {
                    records_out += reduce_group(reducer, sink, &mut out_writer, cur, &vals)?;
                    groups += 1;
                }
                *slot = Some((k, vec![v]));
            }
        }
        off = next;
    }
    if let Some((cur, vals)) = group.take() {
        records_out += reduce_group(reducer, sink, &mut out_writer, cur, &vals)?;
        groups += 1;
    }
    out_writer.flush().context("flush reduce output")?;
    debug!(reducer = r, lines_in, groups, records_out, "reducer finished");
    Ok(ReduceStats { reducer: r, lines_in, groups, records_out, wall_ms: reducer_start.elapsed().as_millis() as u64 })
}

fn reduce_group<R, S>(reducer: &R, sink: &S, out: &mut BufWriter<File>, key: &[u8], vals: &[&[u8]]) -> Result<u64>
where
    R: Reducer,
    S: Sink<R::Out>,
{
    let key: R::Key = bincode::deserialize(key).context("decode shuffle key")?;
    let values = vals
        .iter()
        .map(|v| bincode::deserialize::<R::ValueIn>(v))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("decode shuffle value")?;
    let mut written = 0u64;
    let mut sink_err: Option<anyhow::Error> = None;
    reducer.do_reduce(&key, values, &mut |record: R::Out| {
        if sink_err.is_some() {
            return;
        }
        match sink.write_record(out, &record) {
            Ok(()) => written += 1,
            Err(e) => sink_err = Some(e),
        }
    })?;
    match sink_err {
        Some(e) => Err(e),
        None => Ok(written),
    }
}
