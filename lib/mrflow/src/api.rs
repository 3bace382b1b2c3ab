use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::hash::Hash;
use std::path::PathBuf;

use crate::io::Sink;
use crate::stats::JobReport;

// ========== Core MapReduce traits ==========

/// A mapper is invoked once per map task with every input record of that task,
/// so per-task state (local pre-selection, caches) lives inside `do_map`.
/// Returning an error fails the task and with it the whole job.
pub trait Mapper {
    type Input: Send + 'static;
    type Key: Send + Serialize + DeserializeOwned + Hash + Eq + Clone + 'static;
    type Value: Send + Serialize + DeserializeOwned + Clone + 'static;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value);
}

/// Map-side partial aggregation. `combine` must be associative and commutative:
/// the runtime folds values in whatever order a task happens to emit them and may
/// spill the same key several times.
pub trait Combiner {
    type Key;
    type Value;

    fn combine(&self, key: &Self::Key, acc: Self::Value, next: Self::Value) -> Self::Value;
}

/// Reducer produces typed output records per grouped key.
/// The grouping key is internal to the framework; the reducer emits final records
/// which will be written by a pluggable Sink implementation.
pub trait Reducer {
    type Key: Send + Serialize + DeserializeOwned + Hash + Eq + Clone + 'static;
    type ValueIn: Send + Serialize + DeserializeOwned + Clone + 'static;
    type Out: Send + 'static;

    fn do_reduce<I, F>(&self, key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out);
}

// ========== Executable pipeline interface (format- and sink-agnostic) ==========

pub trait ExecutablePipeline {
    type Input: Send + 'static;

    /// Registers an input directory (or file). Every line read from it is turned into
    /// a pipeline input by `parse`; this is where multi-source jobs tag their records.
    fn add_input<P>(&mut self, input_path: impl Into<PathBuf>, parse: P)
    where
        P: Fn(String) -> Result<Self::Input> + Send + Sync + 'static;

    fn add_output(&mut self, output_path: impl Into<PathBuf>);

    fn set_num_reducers(&mut self, n: usize);

    fn map_only<M, S>(&mut self, mapper: M, sink: S) -> Result<JobReport>
    where
        M: Mapper<Input = Self::Input> + Send + Sync + 'static,
        S: Sink<M::Value> + Send + Sync + 'static;

    fn map_reduce<M, R, S>(&mut self, mapper: M, reducer: R, sink: S) -> Result<JobReport>
    where
        M: Mapper<Input = Self::Input> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
        S: Sink<R::Out> + Send + Sync + 'static;

    fn map_combine_reduce<M, C, R, S>(
        &mut self,
        mapper: M,
        combiner: C,
        reducer: R,
        sink: S,
    ) -> Result<JobReport>
    where
        M: Mapper<Input = Self::Input> + Send + Sync + 'static,
        C: Combiner<Key = M::Key, Value = M::Value> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
        S: Sink<R::Out> + Send + Sync + 'static;
}
