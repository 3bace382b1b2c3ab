use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use mrflow::io::remove_dir_if_exists;
use mrflow::{JobReport, RuntimeConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::aggregate_answer_times;
use crate::error::PipelineError;
use crate::filter::{filter_posts, PostKind};
use crate::join::join_accepted_answers;
use crate::top_k::select_top_k;
use crate::user_join::join_users;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    FilterQuestions,
    FilterAnswers,
    Join,
    Aggregation,
    UserJoin,
    TopK,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::FilterQuestions => "filter_questions",
            Stage::FilterAnswers => "filter_answers",
            Stage::Join => "join",
            Stage::Aggregation => "aggregation",
            Stage::UserJoin => "user_join",
            Stage::TopK => "top_k",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where each stage leaves its output: `<output>_stage/<artifact>`, final rows in `<output>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagingLayout {
    pub root: PathBuf,
    pub questions: PathBuf,
    pub answers: PathBuf,
    pub joined: PathBuf,
    pub aggregates: PathBuf,
    pub enriched: PathBuf,
    pub output: PathBuf,
}

impl StagingLayout {
    pub fn for_output(output: impl AsRef<Path>) -> Self {
        let output = output.as_ref().to_path_buf();
        // a trailing separator must not put staging inside the output directory
        let root = match (output.parent(), output.file_name()) {
            (Some(parent), Some(name)) => {
                let mut name = name.to_os_string();
                name.push("_stage");
                parent.join(name)
            }
            _ => {
                let mut root = output.clone().into_os_string();
                root.push("_stage");
                PathBuf::from(root)
            }
        };
        StagingLayout {
            questions: root.join("questions"),
            answers: root.join("answers"),
            joined: root.join("questions_answers_join"),
            aggregates: root.join("average_answer_time"),
            enriched: root.join("users_aggregates_join"),
            root,
            output,
        }
    }

    pub fn cleanup(&self) -> anyhow::Result<()> {
        remove_dir_if_exists(&self.root)
    }
}

/// Which stages to run. A disabled stage reuses what an earlier run left in staging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageSelection {
    pub filters: bool,
    pub join: bool,
    pub aggregation: bool,
    pub user_join: bool,
    pub top_k: bool,
}

impl StageSelection {
    pub fn all() -> Self {
        StageSelection { filters: true, join: true, aggregation: true, user_join: true, top_k: true }
    }

    pub fn enabled(&self) -> Vec<Stage> {
        let mut stages = Vec::new();
        if self.filters {
            stages.extend([Stage::FilterQuestions, Stage::FilterAnswers]);
        }
        for (on, stage) in [
            (self.join, Stage::Join),
            (self.aggregation, Stage::Aggregation),
            (self.user_join, Stage::UserJoin),
            (self.top_k, Stage::TopK),
        ] {
            if on {
                stages.push(stage);
            }
        }
        stages
    }
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub posts: PathBuf,
    pub users: PathBuf,
    pub output: PathBuf,
    pub stages: StageSelection,
    pub top_k: NonZeroUsize,
    pub runtime: RuntimeConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub report: JobReport,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn get(&self, stage: Stage) -> Option<&JobReport> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| &s.report)
    }
}

fn run_stage<F>(report: &mut PipelineReport, stage: Stage, inputs: &[&Path], job: F) -> Result<(), PipelineError>
where
    F: FnOnce() -> anyhow::Result<JobReport>,
{
    for input in inputs {
        if !input.exists() {
            return Err(PipelineError::MissingArtifact { stage, path: input.to_path_buf() });
        }
    }
    info!(stage = %stage, "Starting stage");
    let start = Instant::now();
    let job_report = job().map_err(|source| PipelineError::StageFailed { stage, source })?;
    info!(stage = %stage, records_out = job_report.records_out(),
          groups = job_report.reduce.as_ref().map(|r| r.total_groups).unwrap_or(0),
          wall_ms = start.elapsed().as_millis() as u64, "Stage complete");
    debug!(stage = %stage, report = %job_report.to_json(), "Stage report");
    report.stages.push(StageReport { stage, report: job_report });
    Ok(())
}

/// Runs the enabled stages in order and removes the staging directory once all of them succeed.
pub fn run_pipeline(options: &PipelineOptions) -> Result<PipelineReport, PipelineError> {
    let layout = StagingLayout::for_output(&options.output);
    let sel = options.stages;
    let cfg = &options.runtime;
    let mut report = PipelineReport::default();

    if sel.filters {
        run_stage(&mut report, Stage::FilterQuestions, &[options.posts.as_path()], || {
            filter_posts(cfg, &options.posts, &layout.questions, PostKind::Question)
        })?;
        run_stage(&mut report, Stage::FilterAnswers, &[options.posts.as_path()], || {
            filter_posts(cfg, &options.posts, &layout.answers, PostKind::Answer)
        })?;
    }
    if sel.join {
        run_stage(&mut report, Stage::Join, &[layout.questions.as_path(), layout.answers.as_path()], || {
            join_accepted_answers(cfg, &layout.questions, &layout.answers, &layout.joined)
        })?;
    }
    if sel.aggregation {
        run_stage(&mut report, Stage::Aggregation, &[layout.joined.as_path()], || {
            aggregate_answer_times(cfg, &layout.joined, &layout.aggregates)
        })?;
    }
    if sel.user_join {
        run_stage(&mut report, Stage::UserJoin, &[layout.aggregates.as_path(), options.users.as_path()], || {
            join_users(cfg, &layout.aggregates, &options.users, &layout.enriched)
        })?;
    }
    if sel.top_k {
        run_stage(&mut report, Stage::TopK, &[layout.enriched.as_path()], || {
            select_top_k(cfg, &layout.enriched, &layout.output, options.top_k)
        })?;
    }

    if let Err(e) = layout.cleanup() {
        warn!(staging = %layout.root.display(), "staging cleanup failed: {:#}", e);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_sits_next_to_the_output() {
        let layout = StagingLayout::for_output("/data/out");
        assert_eq!(layout.root, PathBuf::from("/data/out_stage"));
        assert_eq!(layout.questions, PathBuf::from("/data/out_stage/questions"));
        assert_eq!(layout.answers, PathBuf::from("/data/out_stage/answers"));
        assert_eq!(layout.joined, PathBuf::from("/data/out_stage/questions_answers_join"));
        assert_eq!(layout.aggregates, PathBuf::from("/data/out_stage/average_answer_time"));
        assert_eq!(layout.enriched, PathBuf::from("/data/out_stage/users_aggregates_join"));
        assert_eq!(layout.output, PathBuf::from("/data/out"));

        assert_eq!(StagingLayout::for_output("/data/out/").root, PathBuf::from("/data/out_stage"));
        assert_eq!(StagingLayout::for_output("out/").root, PathBuf::from("out_stage"));
        assert_eq!(StagingLayout::for_output("out").enriched, PathBuf::from("out_stage/users_aggregates_join"));
    }

    #[test]
    fn selection_lists_stages_in_run_order() {
        assert_eq!(StageSelection::all().enabled().len(), 6);
        let partial = StageSelection { filters: false, join: false, aggregation: true, user_join: false, top_k: true };
        assert_eq!(partial.enabled(), vec![Stage::Aggregation, Stage::TopK]);
    }

    #[test]
    fn missing_artifact_names_the_stage() {
        let dir = tempfile::tempdir().unwrap();
        let options = PipelineOptions {
            posts: dir.path().join("posts"),
            users: dir.path().join("users"),
            output: dir.path().join("out"),
            stages: StageSelection { filters: false, join: false, aggregation: true, user_join: false, top_k: false },
            top_k: NonZeroUsize::new(3).unwrap(),
            runtime: RuntimeConfig::default().with_work_dir(dir.path().join("work")),
        };
        let err = run_pipeline(&options).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Aggregation));
        assert!(matches!(err, PipelineError::MissingArtifact { .. }));
        assert!(err.to_string().contains("questions_answers_join"));
    }
}
