use std::path::Path;

use anyhow::Result;
use mrflow::{ExecutablePipeline, JobReport, Mapper, Reducer, RuntimeConfig, RuntimePipeline, TextLineSink};
use serde::{Deserialize, Serialize};

use crate::model::{AggregateRow, EnrichedRow};
use crate::record::{field, parse_fields, parse_id, to_sequence_string, AGGREGATE_FIELDS, USER_FIELDS};
use crate::xml::XmlRowParser;

/// A line of either join input. Users arrive as raw dump rows, aggregates as staging records.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum UserJoinRecord {
    Aggregate(String),
    User(String),
}

pub struct UserJoinMapper;

impl Mapper for UserJoinMapper {
    type Input = UserJoinRecord;
    type Key = i64;
    type Value = UserJoinRecord;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        let parser = XmlRowParser::new()?;
        for record in input {
            match record {
                UserJoinRecord::Aggregate(line) => {
                    let row = parse_fields(&line, &AGGREGATE_FIELDS)?;
                    if let Some(id) = parse_id(row.get("AnswerOwnerUserId").map(String::as_str)) {
                        emit(id, UserJoinRecord::Aggregate(to_sequence_string(&row, &AGGREGATE_FIELDS)));
                    }
                }
                UserJoinRecord::User(line) => {
                    let Some(row) = parser.parse(&line)? else { continue };
                    if let Some(id) = parse_id(row.get("Id").map(String::as_str)) {
                        emit(id, UserJoinRecord::User(to_sequence_string(&row, &USER_FIELDS)));
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct UserJoinReducer;

impl Reducer for UserJoinReducer {
    type Key = i64;
    type ValueIn = UserJoinRecord;
    type Out = String;

    fn do_reduce<I, F>(&self, _key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let mut aggregates = Vec::new();
        let mut names = Vec::new();
        for v in values {
            match v {
                UserJoinRecord::Aggregate(line) => aggregates.push(AggregateRow::decode(&line)?),
                UserJoinRecord::User(line) => {
                    let row = parse_fields(&line, &USER_FIELDS)?;
                    names.push(field(&row, "DisplayName")?.to_string());
                }
            }
        }
        for name in &names {
            for aggregate in &aggregates {
                emit(EnrichedRow::new(aggregate, name).encode());
            }
        }
        Ok(())
    }
}

pub fn join_users(config: &RuntimeConfig, aggregates: &Path, users: &Path, output: &Path) -> Result<JobReport> {
    let mut p: RuntimePipeline<UserJoinRecord> = RuntimePipeline::with_config(config.clone());
    p.add_input(aggregates, |line| Ok(UserJoinRecord::Aggregate(line)));
    p.add_input(users, |line| Ok(UserJoinRecord::User(line)));
    p.add_output(output);
    p.map_reduce(UserJoinMapper, UserJoinReducer, TextLineSink)
}
