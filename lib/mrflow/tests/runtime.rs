use anyhow::{bail, Result};
use mrflow::io::read_all_lines;
use mrflow::{Combiner, ExecutablePipeline, Mapper, Reducer, RuntimeConfig, RuntimePipeline, TextLineSink};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn config(work: &Path, tasks: usize, reducers: usize) -> RuntimeConfig {
    RuntimeConfig::default()
        .with_local_tasks(tasks)
        .with_num_reducers(reducers)
        .with_work_dir(work)
}

fn write_input(dir: &Path, name: &str, body: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), body).unwrap();
}

fn sorted(mut lines: Vec<String>) -> Vec<String> {
    lines.sort();
    lines
}

struct WordMapper;

impl Mapper for WordMapper {
    type Input = String;
    type Key = String;
    type Value = u64;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for line in input {
            for w in line.split_whitespace() {
                emit(w.to_lowercase(), 1);
            }
        }
        Ok(())
    }
}

struct SumCombiner;

impl Combiner for SumCombiner {
    type Key = String;
    type Value = u64;

    fn combine(&self, _key: &String, acc: u64, next: u64) -> u64 {
        acc + next
    }
}

struct SumReducer;

impl Reducer for SumReducer {
    type Key = String;
    type ValueIn = u64;
    type Out = String;

    fn do_reduce<I, F>(&self, key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let sum: u64 = values.into_iter().sum();
        emit(format!("{}\t{}", key, sum));
        Ok(())
    }
}

#[test]
fn wordcount_matches_with_and_without_combiner() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    write_input(&input, "a.txt", "the quick fox\nthe lazy dog\n");
    write_input(&input, "b.txt", "The fox\n");
    write_input(&input, "_SUCCESS", "ignored words here\n");

    let plain_out = dir.path().join("plain");
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&dir.path().join("work"), 2, 3));
    p.add_input(&input, Ok);
    p.add_output(&plain_out);
    let plain = p.map_reduce(WordMapper, SumReducer, TextLineSink).unwrap();

    let combined_out = dir.path().join("combined");
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(
        config(&dir.path().join("work"), 2, 3).with_combine_spill_entries(1),
    );
    p.add_input(&input, Ok);
    p.add_output(&combined_out);
    let combined = p.map_combine_reduce(WordMapper, SumCombiner, SumReducer, TextLineSink).unwrap();

    let expected = vec!["dog\t1", "fox\t2", "lazy\t1", "quick\t1", "the\t3"];
    assert_eq!(sorted(read_all_lines(&plain_out).unwrap()), expected);
    assert_eq!(sorted(read_all_lines(&combined_out).unwrap()), expected);

    assert_eq!(plain.map.as_ref().unwrap().total_emits, 8);
    assert_eq!(plain.reduce.as_ref().unwrap().total_groups, 5);
    assert!(combined_out.join("_SUCCESS").exists());
    // every emit spilled on its own with a one-entry combine buffer
    assert_eq!(combined.map.as_ref().unwrap().records_out, 8);
}

#[test]
fn combiner_shrinks_the_shuffle() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    write_input(&input, "a.txt", "x x x x y\n");

    let out = dir.path().join("out");
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&dir.path().join("work"), 1, 1));
    p.add_input(&input, Ok);
    p.add_output(&out);
    let report = p.map_combine_reduce(WordMapper, SumCombiner, SumReducer, TextLineSink).unwrap();

    let map = report.map.unwrap();
    assert_eq!(map.total_emits, 5);
    assert_eq!(map.records_out, 2);
    assert_eq!(sorted(read_all_lines(&out).unwrap()), vec!["x\t4", "y\t1"]);
}

#[derive(Serialize, Deserialize, Clone, Debug)]
enum Side {
    Left(String),
    Right(String),
}

struct TagMapper;

impl Mapper for TagMapper {
    type Input = Side;
    type Key = u32;
    type Value = Side;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for rec in input {
            let line = match &rec {
                Side::Left(l) | Side::Right(l) => l.clone(),
            };
            let Some((key, _)) = line.split_once(',') else { continue };
            emit(key.parse()?, rec);
        }
        Ok(())
    }
}

struct PairReducer;

impl Reducer for PairReducer {
    type Key = u32;
    type ValueIn = Side;
    type Out = String;

    fn do_reduce<I, F>(&self, _key: &Self::Key, values: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out),
    {
        let (mut left, mut right) = (Vec::new(), Vec::new());
        for v in values {
            match v {
                Side::Left(l) => left.push(l),
                Side::Right(r) => right.push(r),
            }
        }
        for l in &left {
            for r in &right {
                emit(format!("{}|{}", l, r));
            }
        }
        Ok(())
    }
}

#[test]
fn tagged_inputs_meet_in_the_reducer() {
    let dir = tempfile::tempdir().unwrap();
    write_input(&dir.path().join("left"), "l.txt", "1,a\n2,b\n2,c\n");
    write_input(&dir.path().join("right"), "r.txt", "2,x\n3,y\n");

    let out = dir.path().join("out");
    let mut p: RuntimePipeline<Side> = RuntimePipeline::with_config(config(&dir.path().join("work"), 2, 2));
    p.add_input(dir.path().join("left"), |l| Ok(Side::Left(l)));
    p.add_input(dir.path().join("right"), |l| Ok(Side::Right(l)));
    p.add_output(&out);
    p.map_reduce(TagMapper, PairReducer, TextLineSink).unwrap();

    assert_eq!(sorted(read_all_lines(&out).unwrap()), vec!["2,b|2,x", "2,c|2,x"]);
}

struct KeepLong;

impl Mapper for KeepLong {
    type Input = String;
    type Key = ();
    type Value = String;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for line in input {
            if line.len() > 3 {
                emit((), line);
            }
        }
        Ok(())
    }
}

#[test]
fn map_only_writes_one_part_per_task() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    write_input(&input, "a.txt", "abcd\nab\n");
    write_input(&input, "b.txt", "xyzzy\n");

    let out = dir.path().join("out");
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&dir.path().join("work"), 4, 1));
    p.add_input(&input, Ok);
    p.add_output(&out);
    let report = p.map_only(KeepLong, TextLineSink).unwrap();

    assert_eq!(report.map.as_ref().unwrap().tasks, 2);
    assert_eq!(report.records_out(), 2);
    assert!(out.join("part-m-00000").exists());
    assert!(out.join("part-m-00001").exists());
    assert_eq!(sorted(read_all_lines(&out).unwrap()), vec!["abcd", "xyzzy"]);
}

struct FailingMapper;

impl Mapper for FailingMapper {
    type Input = String;
    type Key = String;
    type Value = u64;

    fn do_map<I, F>(&self, input: I, emit: &mut F) -> Result<()>
    where
        I: IntoIterator<Item = Self::Input>,
        F: FnMut(Self::Key, Self::Value),
    {
        for line in input {
            if line == "boom" {
                bail!("cannot map {:?}", line);
            }
            emit(line, 1);
        }
        Ok(())
    }
}

#[test]
fn failed_task_fails_the_job_and_removes_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    write_input(&input, "a.txt", "ok\nboom\n");

    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("part-r-00000"), "stale\n").unwrap();

    let work = dir.path().join("work");
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&work, 1, 1));
    p.add_input(&input, Ok);
    p.add_output(&out);
    let err = p.map_reduce(FailingMapper, SumReducer, TextLineSink).unwrap_err();

    assert!(format!("{:#}", err).contains("cannot map"));
    assert!(!out.exists());
    // intermediates are cleaned up after a failure too
    assert_eq!(fs::read_dir(&work).map(|d| d.count()).unwrap_or(0), 0);
}

#[test]
fn unparseable_input_line_fails_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    write_input(&input, "a.txt", "1\n2\nnot-a-number\n");

    let out = dir.path().join("out");
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&dir.path().join("work"), 1, 1));
    p.add_input(&input, |l| {
        l.parse::<u64>()?;
        Ok(l)
    });
    p.add_output(&out);
    let err = p.map_only(KeepLong, TextLineSink).unwrap_err();

    assert!(format!("{:#}", err).contains("a.txt:3"));
    assert!(!out.exists());
}

#[test]
fn missing_input_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&dir.path().join("work"), 1, 1));
    p.add_input(dir.path().join("nope"), Ok);
    p.add_output(dir.path().join("out"));
    assert!(p.map_only(KeepLong, TextLineSink).is_err());
    assert!(!dir.path().join("out").exists());
}

#[test]
fn output_is_identical_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    for i in 0..4 {
        write_input(&input, &format!("f{}.txt", i), "a b c a\nb c d\n");
    }
    let mut outputs = Vec::new();
    for run in 0..2 {
        let out = dir.path().join(format!("out{}", run));
        let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&dir.path().join("work"), 3, 2));
        p.add_input(&input, Ok);
        p.add_output(&out);
        p.map_reduce(WordMapper, SumReducer, TextLineSink).unwrap();
        let parts: Vec<String> = (0..2)
            .map(|r| fs::read_to_string(out.join(format!("part-r-{:05}", r))).unwrap())
            .collect();
        outputs.push(parts);
    }
    assert_eq!(outputs[0], outputs[1]);
}

#[test]
fn work_dir_is_removed_once_empty() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in");
    write_input(&input, "a.txt", "x y x\n");
    let work = dir.path().join("work");

    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&work, 1, 1));
    p.add_input(&input, Ok);
    p.add_output(dir.path().join("out"));
    p.map_reduce(WordMapper, SumReducer, TextLineSink).unwrap();
    assert!(!work.exists());

    // a work dir holding anything else is left alone
    write_input(&work, "keep.txt", "k\n");
    let mut p: RuntimePipeline<String> = RuntimePipeline::with_config(config(&work, 1, 1));
    p.add_input(&input, Ok);
    p.add_output(dir.path().join("out2"));
    p.map_reduce(WordMapper, SumReducer, TextLineSink).unwrap();
    assert!(work.join("keep.txt").exists());
    assert_eq!(fs::read_dir(&work).unwrap().count(), 1);
}
