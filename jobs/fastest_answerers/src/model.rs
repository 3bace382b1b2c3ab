use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::record::{
    field, parse_fields, parse_number, push_field, split_fields, to_sequence_string, Row, AGGREGATE_FIELDS,
    ENRICHED_FIELDS, POST_FIELDS,
};

/// Mean answer latency and number of answers behind it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct Stats {
    pub average: f64,
    pub count: u64,
}

impl Stats {
    pub fn observation(seconds: i64) -> Self {
        Stats { average: seconds as f64, count: 1 }
    }

    /// Weighted merge of two partial aggregates. Associative and commutative up to
    /// floating point rounding, so partials can be merged in any grouping.
    pub fn merge(self, other: Stats) -> Stats {
        if other.count == 0 {
            return self;
        }
        if self.count == 0 {
            return other;
        }
        let count = self.count + other.count;
        let average = self.average + (other.average - self.average) * (other.count as f64 / count as f64);
        Stats { average, count }
    }
}

/// An accepted answer paired with its question.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinedAnswer {
    pub question: Row,
    pub answer: Row,
    pub seconds_to_answer: i64,
}

impl JoinedAnswer {
    pub fn question_owner(&self) -> Option<&str> {
        self.question.get("OwnerUserId").map(String::as_str)
    }

    pub fn answer_owner(&self) -> Option<&str> {
        self.answer.get("OwnerUserId").map(String::as_str)
    }

    pub fn self_answer(&self) -> bool {
        self.question_owner() == self.answer_owner()
    }

    /// Question fields, then answer fields, then the latency.
    pub fn encode(&self) -> String {
        let mut line = to_sequence_string(&self.question, &POST_FIELDS);
        line.push_str(&to_sequence_string(&self.answer, &POST_FIELDS));
        push_field(&mut line, &self.seconds_to_answer.to_string());
        line
    }

    pub fn decode(line: &str) -> Result<Self, PipelineError> {
        let parts = split_fields(line);
        let n = POST_FIELDS.len();
        if parts.len() < 2 * n + 1 {
            return Err(PipelineError::MalformedRecord(format!(
                "joined answer needs {} fields, found {}",
                2 * n + 1,
                parts.len()
            )));
        }
        let side = |values: &[&str]| -> Row {
            POST_FIELDS.iter().zip(values).map(|(f, v)| (f.to_string(), v.to_string())).collect()
        };
        let seconds_to_answer = parts[2 * n].trim().parse().map_err(|_| {
            PipelineError::MalformedRecord(format!("seconds to answer is not a number: {:?}", parts[2 * n]))
        })?;
        Ok(JoinedAnswer { question: side(&parts[..n]), answer: side(&parts[n..2 * n]), seconds_to_answer })
    }
}

/// Per-answerer statistics that passed the answer-count threshold.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateRow {
    pub answerer_id: i64,
    pub stats: Stats,
}

impl AggregateRow {
    pub fn encode(&self) -> String {
        let mut line = String::new();
        push_field(&mut line, &self.answerer_id.to_string());
        push_field(&mut line, &self.stats.average.to_string());
        push_field(&mut line, &self.stats.count.to_string());
        line
    }

    pub fn decode(line: &str) -> Result<Self, PipelineError> {
        let row = parse_fields(line, &AGGREGATE_FIELDS)?;
        Ok(AggregateRow {
            answerer_id: parse_number(&row, "AnswerOwnerUserId")?,
            stats: Stats {
                average: parse_number(&row, "AverageTimeToAnswerInSeconds")?,
                count: parse_number(&row, "TotalAnswersCount")?,
            },
        })
    }
}

/// Aggregate joined with the answerer's display name.
#[derive(Clone, Debug, PartialEq)]
pub struct EnrichedRow {
    pub answerer_id: i64,
    pub display_name: String,
    pub average: f64,
    pub count: u64,
}

impl EnrichedRow {
    pub fn new(aggregate: &AggregateRow, display_name: &str) -> Self {
        EnrichedRow {
            answerer_id: aggregate.answerer_id,
            display_name: display_name.to_string(),
            average: aggregate.stats.average,
            count: aggregate.stats.count,
        }
    }

    pub fn encode(&self) -> String {
        let mut line = String::new();
        push_field(&mut line, &self.answerer_id.to_string());
        push_field(&mut line, &self.display_name);
        push_field(&mut line, &self.average.to_string());
        push_field(&mut line, &self.count.to_string());
        line
    }

    pub fn decode(line: &str) -> Result<Self, PipelineError> {
        let row = parse_fields(line, &ENRICHED_FIELDS)?;
        Ok(EnrichedRow {
            answerer_id: parse_number(&row, "AnswerOwnerUserId")?,
            display_name: field(&row, "DisplayName")?.to_string(),
            average: parse_number(&row, "AverageTimeToAnswerInSeconds")?,
            count: parse_number(&row, "TotalAnswersCount")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_weights_by_count() {
        let a = Stats { average: 100.0, count: 3 };
        let b = Stats { average: 500.0, count: 1 };
        assert_eq!(a.merge(b), Stats { average: 200.0, count: 4 });
        assert_eq!(b.merge(a), Stats { average: 200.0, count: 4 });
    }

    #[test]
    fn empty_stats_is_the_identity() {
        let a = Stats { average: 42.5, count: 2 };
        assert_eq!(a.merge(Stats::default()), a);
        assert_eq!(Stats::default().merge(a), a);
    }

    #[test]
    fn running_mean_matches_bulk_mean() {
        let values = [400, 100, 200, 300];
        let running = values.iter().fold(Stats::default(), |acc, v| acc.merge(Stats::observation(*v)));
        assert_eq!(running.count, 4);
        assert!((running.average - 250.0).abs() < 1e-9);
    }

    #[test]
    fn joined_answer_survives_encoding() {
        let mut question = Row::new();
        question.insert("Id".into(), "1".into());
        question.insert("OwnerUserId".into(), "10".into());
        let mut answer = Row::new();
        answer.insert("Id".into(), "2".into());
        answer.insert("OwnerUserId".into(), "10".into());
        let joined = JoinedAnswer { question, answer, seconds_to_answer: 3601 };

        let line = joined.encode();
        assert_eq!(line.matches(crate::record::SEP).count(), 45);
        let back = JoinedAnswer::decode(&line).unwrap();
        assert_eq!(back.seconds_to_answer, 3601);
        assert_eq!(back.answer_owner(), Some("10"));
        assert_eq!(back.question["Title"], "");
        assert!(back.self_answer());
    }

    #[test]
    fn short_joined_line_is_malformed() {
        assert!(matches!(JoinedAnswer::decode("1\x012\x01"), Err(PipelineError::MalformedRecord(_))));
    }

    #[test]
    fn enriched_row_reads_aggregate_columns() {
        let agg = AggregateRow::decode("20\x01250\x014\x01").unwrap();
        assert_eq!(agg, AggregateRow { answerer_id: 20, stats: Stats { average: 250.0, count: 4 } });
        let enriched = EnrichedRow::new(&agg, "Jon");
        assert_eq!(enriched.encode(), "20\x01Jon\x01250\x014\x01");
        assert_eq!(EnrichedRow::decode(&enriched.encode()).unwrap(), enriched);
    }
}
