//! Centralized environment variable names and default values for mrflow runtime tuning.

// Environment variable names
pub const ENV_KEEP_INTERMEDIATES: &str = "MRFLOW_KEEP_INTERMEDIATES";
pub const ENV_RAYON_THREADS: &str = "MRFLOW_RAYON_THREADS";
pub const ENV_NUM_REDUCERS: &str = "MRFLOW_NUM_REDUCERS";
pub const ENV_FLUSH_BYTES: &str = "MRFLOW_FLUSH_BYTES";
pub const ENV_FLUSH_INTERVAL_MS: &str = "MRFLOW_FLUSH_INTERVAL_MS";
pub const ENV_WRITER_QUEUE_CAP: &str = "MRFLOW_WRITER_QUEUE_CAP";
pub const ENV_LOCAL_BATCH_BYTES: &str = "MRFLOW_LOCAL_BATCH_BYTES";
pub const ENV_LOCAL_TASKS: &str = "MRFLOW_LOCAL_TASKS";
pub const ENV_COMBINE_SPILL_ENTRIES: &str = "MRFLOW_COMBINE_SPILL_ENTRIES";
pub const ENV_WORK_DIR: &str = "MRFLOW_WORK_DIR";

// Defaults (picked to reduce wakeups/syscalls under heavy shuffle)
pub const DEFAULT_LOCAL_BATCH_BYTES: usize = 256 * 1024; // per partition, per map task
pub const DEFAULT_WRITER_QUEUE_CAP: usize = 1024;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 200;
pub const DEFAULT_FLUSH_BYTES: usize = 16 * 1024 * 1024; // 16 MiB
/// Distinct keys a map task may hold in its combine buffer before spilling.
pub const DEFAULT_COMBINE_SPILL_ENTRIES: usize = 64 * 1024;
pub const DEFAULT_WORK_DIR: &str = ".mrflow_runs";

/// Marker written into an output directory once a job has completed.
pub const SUCCESS_MARKER: &str = "_SUCCESS";
