use std::path::PathBuf;

use crate::pipeline::Stage;

/// Failures of the fastest-answerers stages and their driver.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A raw `<row .../>` line that cannot be turned into named fields.
    #[error("malformed xml row: {reason}: {line}")]
    MalformedRow { line: String, reason: String },

    /// A staging record with too few fields or an unparseable required number.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("missing field {0}")]
    MissingField(String),

    /// A skipped stage left no output for a later stage to read.
    #[error("stage {stage} needs {}, which does not exist", .path.display())]
    MissingArtifact { stage: Stage, path: PathBuf },

    #[error("stage {stage} failed")]
    StageFailed {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// The stage a driver-level error belongs to.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::MissingArtifact { stage, .. } | PipelineError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
