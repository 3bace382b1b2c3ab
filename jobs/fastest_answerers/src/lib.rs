//! Finds the StackOverflow users who answer correctly the fastest.
//!
//! Five map-reduce stages run on the local `mrflow` runtime: post filtering, the
//! question/accepted-answer join, per-answerer latency aggregation, the join with user
//! names and the top-K selection. Each stage writes a staging artifact the next reads.

pub mod aggregate;
pub mod error;
pub mod filter;
pub mod join;
pub mod model;
pub mod pipeline;
pub mod record;
pub mod time;
pub mod top_k;
pub mod user_join;
pub mod xml;

pub use error::PipelineError;
pub use pipeline::{run_pipeline, PipelineOptions, PipelineReport, Stage, StageSelection, StagingLayout};
