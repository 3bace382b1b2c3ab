use serde::Serialize;

use crate::writer::WriterPartitionMetrics;

/// Counters of a single map task.
#[derive(Clone, Debug, Default)]
pub struct MapTaskStats {
    pub task_id: usize,
    pub num_files: u64,
    pub records_in: u64,
    pub total_emits: u64,
    /// Records that left the task after combining (equal to emits without a combiner).
    pub records_out: u64,
    pub total_bytes_out: u64,
    pub total_flushes: u64,
    pub combine_spills: u64,
    pub wall_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SortStats {
    pub reducer: usize,
    pub lines_in: u64,
    pub bytes_in: u64,
    pub sort_only_ms: u64,
    pub io_read_ms: u64,
    pub io_write_ms: u64,
    pub wall_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ReduceStats {
    pub reducer: usize,
    pub lines_in: u64,
    pub groups: u64,
    pub records_out: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct MapStats {
    pub tasks: usize,
    pub records_in: u64,
    pub total_emits: u64,
    pub records_out: u64,
    pub total_bytes_out: u64,
    pub total_flushes: u64,
    pub combine_spills: u64,
    pub min_task_ms: u64,
    pub max_task_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct SortStatsAgg {
    pub reducers: usize,
    pub total_lines: u64,
    pub total_bytes: u64,
    /// Summed over partitions, so these can exceed `wall_ms`.
    pub total_sort_only_ms: u64,
    pub total_io_read_ms: u64,
    pub total_io_write_ms: u64,
    pub min_reducer_ms: u64,
    pub max_reducer_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct ReduceStatsAgg {
    pub reducers: usize,
    pub total_lines: u64,
    pub total_groups: u64,
    pub records_out: u64,
    pub min_reducer_ms: u64,
    pub max_reducer_ms: u64,
    pub wall_ms: u64,
}

/// What a finished job did, phase by phase. Map-only jobs leave `sort` and `reduce` empty.
#[derive(Default, Clone, Debug, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub map: Option<MapStats>,
    pub sort: Option<SortStatsAgg>,
    pub reduce: Option<ReduceStatsAgg>,
    pub writers: Vec<WriterPartitionMetrics>,
}

impl JobReport {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self { job_id: job_id.into(), ..Self::default() }
    }

    /// Records written to the job output.
    pub fn records_out(&self) -> u64 {
        match (&self.reduce, &self.map) {
            (Some(r), _) => r.records_out,
            (None, Some(m)) => m.records_out,
            (None, None) => 0,
        }
    }

    pub fn record_map(&mut self, per_task: &[MapTaskStats], wall_ms: u64) {
        if per_task.is_empty() {
            self.map = Some(MapStats { wall_ms, ..MapStats::default() });
            return;
        }
        self.map = Some(MapStats {
            tasks: per_task.len(),
            records_in: per_task.iter().map(|t| t.records_in).sum(),
            total_emits: per_task.iter().map(|t| t.total_emits).sum(),
            records_out: per_task.iter().map(|t| t.records_out).sum(),
            total_bytes_out: per_task.iter().map(|t| t.total_bytes_out).sum(),
            total_flushes: per_task.iter().map(|t| t.total_flushes).sum(),
            combine_spills: per_task.iter().map(|t| t.combine_spills).sum(),
            min_task_ms: per_task.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_task_ms: per_task.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        });
    }

    pub fn record_sort(&mut self, per_reducer: &[SortStats], wall_ms: u64) {
        self.sort = Some(SortStatsAgg {
            reducers: per_reducer.len(),
            total_lines: per_reducer.iter().map(|s| s.lines_in).sum(),
            total_bytes: per_reducer.iter().map(|s| s.bytes_in).sum(),
            total_sort_only_ms: per_reducer.iter().map(|s| s.sort_only_ms).sum(),
            total_io_read_ms: per_reducer.iter().map(|s| s.io_read_ms).sum(),
            total_io_write_ms: per_reducer.iter().map(|s| s.io_write_ms).sum(),
            min_reducer_ms: per_reducer.iter().map(|s| s.wall_ms).min().unwrap_or(0),
            max_reducer_ms: per_reducer.iter().map(|s| s.wall_ms).max().unwrap_or(0),
            wall_ms,
        });
    }

    pub fn record_reduce(&mut self, per_reducer: &[ReduceStats], wall_ms: u64) {
        self.reduce = Some(ReduceStatsAgg {
            reducers: per_reducer.len(),
            total_lines: per_reducer.iter().map(|s| s.lines_in).sum(),
            total_groups: per_reducer.iter().map(|s| s.groups).sum(),
            records_out: per_reducer.iter().map(|s| s.records_out).sum(),
            min_reducer_ms: per_reducer.iter().map(|s| s.wall_ms).min().unwrap_or(0),
            max_reducer_ms: per_reducer.iter().map(|s| s.wall_ms).max().unwrap_or(0),
            wall_ms,
        });
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_totals_sum_over_tasks() {
        let mut report = JobReport::new("job");
        let tasks = vec![
            MapTaskStats { task_id: 0, records_in: 3, total_emits: 3, records_out: 2, wall_ms: 5, ..Default::default() },
            MapTaskStats { task_id: 1, records_in: 4, total_emits: 1, records_out: 1, wall_ms: 9, ..Default::default() },
        ];
        report.record_map(&tasks, 12);
        let map = report.map.as_ref().unwrap();
        assert_eq!((map.tasks, map.records_in, map.total_emits), (2, 7, 4));
        assert_eq!((map.min_task_ms, map.max_task_ms), (5, 9));
        assert_eq!(report.records_out(), 3);
    }

    #[test]
    fn sort_timings_are_summed_per_partition() {
        let mut report = JobReport::new("job");
        let partition = |reducer, io_read_ms, io_write_ms| SortStats {
            reducer,
            lines_in: 5,
            bytes_in: 50,
            sort_only_ms: 2,
            io_read_ms,
            io_write_ms,
            wall_ms: 10,
        };
        report.record_sort(&[partition(0, 3, 4), partition(1, 1, 6)], 11);
        let sort = report.sort.as_ref().unwrap();
        assert_eq!((sort.total_lines, sort.total_bytes), (10, 100));
        assert_eq!((sort.total_sort_only_ms, sort.total_io_read_ms, sort.total_io_write_ms), (4, 4, 10));
        assert!(report.to_json().contains("\"total_io_write_ms\":10"));
    }

    #[test]
    fn reduce_output_wins_over_map_output() {
        let mut report = JobReport::new("job");
        report.record_map(&[MapTaskStats { records_out: 10, ..Default::default() }], 1);
        report.record_reduce(&[ReduceStats { reducer: 0, lines_in: 10, groups: 4, records_out: 2, wall_ms: 1 }], 1);
        assert_eq!(report.records_out(), 2);
        assert!(report.to_json().contains("\"total_groups\":4"));
    }
}
