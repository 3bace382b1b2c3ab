//! A small local MapReduce runtime: typed mappers, optional map-side combiners and
//! reducers, wired through a hash shuffle, an mmap sort and per-partition part files.

pub mod api;
pub mod config;
pub mod constants;
pub mod io;
pub mod runtime;
pub mod sort;
pub mod stats;
pub mod utils;
pub mod writer;

pub use api::{Combiner, ExecutablePipeline, Mapper, Reducer};
pub use config::RuntimeConfig;
pub use io::{Sink, TextLineSink};
pub use runtime::RuntimePipeline;
pub use stats::JobReport;
