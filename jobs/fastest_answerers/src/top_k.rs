//! Two-level selection of the K fastest answerers.
//!
//! Every map task keeps its own K best rows and emits them when its input is done; a
//! single reducer repeats the same bounded insertion over all task-local winners.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::Result;
use mrflow::{ExecutablePipeline, JobReport, Mapper, Reducer, RuntimeConfig, RuntimePipeline, TextLineSink};
use ordered_float::OrderedFloat;

use crate::model::EnrichedRow;

/// The K rows with the lowest average latency seen so far. Rows are ordered by
/// (average, answerer id), so equal averages of different answerers never collide.
#[derive(Debug, Clone)]
pub struct BoundedTopK {
    k: usize,
    entries: BTreeMap<(OrderedFloat<f64>, i64), EnrichedRow>,
}

impl BoundedTopK {
    pub fn new(k: NonZeroUsize) -> Self {
        BoundedTopK { k: k.get(), entries: BTreeMap::new() }
    }

    pub fn insert(&mut self, row: EnrichedRow) {
        self.entries.insert((OrderedFloat(row.average), row.answerer_id), row);
        if self.entries.len() > self.k {
            self.entries.pop_last();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retained rows, fastest first.
    pub fn into_sorted(self) -> Vec<EnrichedRow> {
        self.entries.into_values().collect()
    }
}

pub struct TopKMapper {
    pub k: NonZeroUsize,
}

impl Mapper for TopKMapper {
    type Input = String;
    type Key = ();
    type Value = String;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        let mut local = BoundedTopK::new(self.k);
        for line in input {
            local.insert(EnrichedRow::decode(&line)?);
        }
        for row in local.into_sorted() {
            emit((), row.encode());
        }
        Ok(())
    }
}

pub struct TopKReducer {
    pub k: NonZeroUsize,
}

impl Reducer for TopKReducer {
    type Key = ();
    type ValueIn = String;
    type Out = String;

    fn do_reduce<I, F>(&self, _key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let mut global = BoundedTopK::new(self.k);
        for line in values {
            global.insert(EnrichedRow::decode(&line)?);
        }
        for row in global.into_sorted() {
            emit(row.encode());
        }
        Ok(())
    }
}

pub fn select_top_k(config: &RuntimeConfig, enriched: &Path, output: &Path, k: NonZeroUsize) -> Result<JobReport> {
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config.clone());
    p.add_input(enriched, Ok);
    p.add_output(output);
    p.set_num_reducers(1);
    p.map_reduce(TopKMapper { k }, TopKReducer { k }, TextLineSink)
}
