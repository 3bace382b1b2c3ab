use crate::constants::*;
use crate::utils::{env_parse, env_var_truthy};
use std::path::PathBuf;
use std::time::Duration;

/// Tuning knobs for a local run. `from_env` reads the `MRFLOW_*` variables.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub local_tasks: usize,
    /// `None` means one reducer per map task.
    pub num_reducers: Option<usize>,
    pub rayon_threads: Option<usize>,
    pub flush_bytes: usize,
    pub flush_interval: Duration,
    pub writer_queue_cap: usize,
    pub local_batch_bytes: usize,
    pub combine_spill_entries: usize,
    pub work_dir: PathBuf,
    pub keep_intermediates: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            local_tasks: num_cpus::get().max(1),
            num_reducers: None,
            rayon_threads: None,
            flush_bytes: DEFAULT_FLUSH_BYTES,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            writer_queue_cap: DEFAULT_WRITER_QUEUE_CAP,
            local_batch_bytes: DEFAULT_LOCAL_BATCH_BYTES,
            combine_spill_entries: DEFAULT_COMBINE_SPILL_ENTRIES,
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            keep_intermediates: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            local_tasks: env_parse::<usize>(ENV_LOCAL_TASKS).unwrap_or(d.local_tasks).max(1),
            num_reducers: env_parse::<usize>(ENV_NUM_REDUCERS).filter(|n| *n > 0),
            rayon_threads: env_parse::<usize>(ENV_RAYON_THREADS).filter(|n| *n > 0),
            flush_bytes: env_parse(ENV_FLUSH_BYTES).unwrap_or(d.flush_bytes),
            flush_interval: env_parse::<u64>(ENV_FLUSH_INTERVAL_MS)
                .map(Duration::from_millis)
                .unwrap_or(d.flush_interval),
            writer_queue_cap: env_parse::<usize>(ENV_WRITER_QUEUE_CAP).unwrap_or(d.writer_queue_cap).max(1),
            local_batch_bytes: env_parse(ENV_LOCAL_BATCH_BYTES).unwrap_or(d.local_batch_bytes),
            combine_spill_entries: env_parse::<usize>(ENV_COMBINE_SPILL_ENTRIES)
                .unwrap_or(d.combine_spill_entries)
                .max(1),
            work_dir: std::env::var(ENV_WORK_DIR).map(PathBuf::from).unwrap_or(d.work_dir),
            keep_intermediates: env_var_truthy(ENV_KEEP_INTERMEDIATES),
        }
    }

    pub fn with_local_tasks(mut self, n: usize) -> Self {
        self.local_tasks = n.max(1);
        self
    }

    pub fn with_num_reducers(mut self, n: usize) -> Self {
        self.num_reducers = Some(n.max(1));
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_combine_spill_entries(mut self, n: usize) -> Self {
        self.combine_spill_entries = n.max(1);
        self
    }
}
