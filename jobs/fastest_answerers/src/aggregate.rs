use std::path::Path;

use anyhow::Result;
use mrflow::{Combiner, ExecutablePipeline, JobReport, Mapper, Reducer, RuntimeConfig, RuntimePipeline, TextLineSink};

use crate::error::PipelineError;
use crate::model::{AggregateRow, JoinedAnswer, Stats};
use crate::record::parse_id;

/// Answerers need strictly more accepted answers than this to be reported.
pub const MIN_ANSWERS: u64 = 3;

/// One observation per joined answer, keyed by the answer's owner.
pub struct AggregationMapper;

impl Mapper for AggregationMapper {
    type Input = String;
    type Key = i64;
    type Value = Stats;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for line in input {
            let joined = JoinedAnswer::decode(&line)?;
            let owner = parse_id(joined.answer_owner()).ok_or_else(|| {
                PipelineError::MalformedRecord(format!("answer owner is not an id: {:?}", joined.answer_owner()))
            })?;
            emit(owner, Stats::observation(joined.seconds_to_answer));
        }
        Ok(())
    }
}

pub struct StatsCombiner;

impl Combiner for StatsCombiner {
    type Key = i64;
    type Value = Stats;

    fn combine(&self, _key: &i64, acc: Stats, next: Stats) -> Stats {
        acc.merge(next)
    }
}

pub struct AggregationReducer;

impl Reducer for AggregationReducer {
    type Key = i64;
    type ValueIn = Stats;
    type Out = String;

    fn do_reduce<I, F>(&self, key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let stats = values.into_iter().fold(Stats::default(), Stats::merge);
        if stats.count > MIN_ANSWERS {
            emit(AggregateRow { answerer_id: *key, stats }.encode());
        }
        Ok(())
    }
}

pub fn aggregate_answer_times(config: &RuntimeConfig, joined: &Path, output: &Path) -> Result<JobReport> {
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config.clone());
    p.add_input(joined, Ok);
    p.add_output(output);
    p.map_combine_reduce(AggregationMapper, StatsCombiner, AggregationReducer, TextLineSink)
}
