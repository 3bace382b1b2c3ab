use std::path::Path;

use anyhow::Result;
use mrflow::{ExecutablePipeline, JobReport, Mapper, RuntimeConfig, RuntimePipeline, TextLineSink};

use crate::record::{to_sequence_string, POST_FIELDS};
use crate::xml::XmlRowParser;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostKind {
    Question,
    Answer,
}

impl PostKind {
    /// `PostTypeId` value of this kind in the dumps.
    pub fn type_id(self) -> &'static str {
        match self {
            PostKind::Question => "1",
            PostKind::Answer => "2",
        }
    }
}

/// Keeps the posts of one kind and re-encodes them as staging records.
pub struct PostFilter {
    kind: PostKind,
}

impl PostFilter {
    pub fn questions() -> Self {
        PostFilter { kind: PostKind::Question }
    }

    pub fn answers() -> Self {
        PostFilter { kind: PostKind::Answer }
    }
}

impl Mapper for PostFilter {
    type Input = String;
    type Key = ();
    type Value = String;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        let parser = XmlRowParser::new()?;
        for line in input {
            let Some(row) = parser.parse(&line)? else { continue };
            if row.get("PostTypeId").map(|t| t.trim()) == Some(self.kind.type_id()) {
                emit((), to_sequence_string(&row, &POST_FIELDS));
            }
        }
        Ok(())
    }
}

/// Map-only pass over the raw posts that writes the posts of `kind` to `output`.
pub fn filter_posts(config: &RuntimeConfig, posts: &Path, output: &Path, kind: PostKind) -> Result<JobReport> {
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config.clone());
    p.add_input(posts, Ok);
    p.add_output(output);
    let mapper = match kind {
        PostKind::Question => PostFilter::questions(),
        PostKind::Answer => PostFilter::answers(),
    };
    p.map_only(mapper, TextLineSink)
}
