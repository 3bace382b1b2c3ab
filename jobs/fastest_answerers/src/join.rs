//! Reduce-side join of questions and their accepted answers.
//!
//! Both staging streams are read by one job. Every line is tagged with the stream it
//! came from, keyed by `AcceptedAnswerId` (questions) or `Id` (answers), and each key
//! group is turned into the cross product of its questions and answers.

use std::path::Path;

use anyhow::Result;
use mrflow::{ExecutablePipeline, JobReport, Mapper, Reducer, RuntimeConfig, RuntimePipeline, TextLineSink};
use serde::{Deserialize, Serialize};

use crate::model::JoinedAnswer;
use crate::record::{field, parse_fields, parse_id, Row, POST_FIELDS};
use crate::time::{parse_timestamp_millis, seconds_between};

/// Latency an answer to somebody else's question must exceed.
pub const MIN_SECONDS_OTHER: i64 = 5 * 60;
/// Latency a self-answer must exceed.
pub const MIN_SECONDS_SELF: i64 = 60 * 60;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum TaggedPost {
    Question(String),
    Answer(String),
}

/// Whether a pair looks like a genuine answer rather than rating farming.
pub fn is_fair(self_answer: bool, seconds_to_answer: i64) -> bool {
    if self_answer {
        seconds_to_answer > MIN_SECONDS_SELF
    } else {
        seconds_to_answer > MIN_SECONDS_OTHER
    }
}

pub struct JoinMapper;

impl Mapper for JoinMapper {
    type Input = TaggedPost;
    type Key = i64;
    type Value = TaggedPost;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for post in input {
            let (line, key_field) = match &post {
                TaggedPost::Question(line) => (line, "AcceptedAnswerId"),
                TaggedPost::Answer(line) => (line, "Id"),
            };
            let row = parse_fields(line, &POST_FIELDS)?;
            // a question without an accepted answer cannot match anything
            if let Some(key) = parse_id(row.get(key_field).map(String::as_str)) {
                emit(key, post);
            }
        }
        Ok(())
    }
}

pub struct JoinReducer;

impl JoinReducer {
    fn pair(question: &Row, answer: &Row) -> Result<Option<JoinedAnswer>> {
        let question_ms = parse_timestamp_millis(field(question, "CreationDate")?)?;
        let answer_ms = parse_timestamp_millis(field(answer, "CreationDate")?)?;
        let joined = JoinedAnswer {
            question: question.clone(),
            answer: answer.clone(),
            seconds_to_answer: seconds_between(question_ms, answer_ms),
        };
        let owners_known = [joined.question_owner(), joined.answer_owner()]
            .into_iter()
            .all(|o| o.is_some_and(|id| !id.trim().is_empty()));
        if owners_known && is_fair(joined.self_answer(), joined.seconds_to_answer) {
            Ok(Some(joined))
        } else {
            Ok(None)
        }
    }
}

impl Reducer for JoinReducer {
    type Key = i64;
    type ValueIn = TaggedPost;
    type Out = String;

    fn do_reduce<I, F>(&self, _key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let mut questions = Vec::new();
        let mut answers = Vec::new();
        for v in values {
            match v {
                TaggedPost::Question(line) => questions.push(parse_fields(&line, &POST_FIELDS)?),
                TaggedPost::Answer(line) => answers.push(parse_fields(&line, &POST_FIELDS)?),
            }
        }
        for q in &questions {
            for a in &answers {
                if let Some(joined) = Self::pair(q, a)? {
                    emit(joined.encode());
                }
            }
        }
        Ok(())
    }
}

pub fn join_accepted_answers(config: &RuntimeConfig, questions: &Path, answers: &Path, output: &Path) -> Result<JobReport> {
    let mut p: RuntimePipeline<TaggedPost> = RuntimePipeline::with_config(config.clone());
    p.add_input(questions, |line| Ok(TaggedPost::Question(line)));
    p.add_input(answers, |line| Ok(TaggedPost::Answer(line)));
    p.add_output(output);
    p.map_reduce(JoinMapper, JoinReducer, TextLineSink)
}
