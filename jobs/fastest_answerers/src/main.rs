use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use fastest_answerers::{run_pipeline, PipelineOptions, StageSelection};
use mrflow::RuntimeConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Finds the users who answer correctly the fastest.
#[derive(Parser, Debug)]
struct Args {
    /// Posts dump, one `<row .../>` per line
    posts: PathBuf,
    /// Users dump, one `<row .../>` per line
    users: PathBuf,
    /// Directory for the top-K rows; staging goes to `<output>_stage`
    output: PathBuf,
    #[arg(action = ArgAction::Set)]
    run_filters: bool,
    #[arg(action = ArgAction::Set)]
    run_join: bool,
    #[arg(action = ArgAction::Set)]
    run_aggregation: bool,
    #[arg(action = ArgAction::Set)]
    run_user_join: bool,
    #[arg(action = ArgAction::Set)]
    run_top_k: bool,
    /// Number of answerers to report
    top_k: NonZeroUsize,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let stages = StageSelection {
        filters: args.run_filters,
        join: args.run_join,
        aggregation: args.run_aggregation,
        user_join: args.run_user_join,
        top_k: args.run_top_k,
    };
    let options = PipelineOptions {
        posts: args.posts,
        users: args.users,
        output: args.output,
        stages,
        top_k: args.top_k,
        runtime: RuntimeConfig::from_env(),
    };
    let plan: Vec<&str> = stages.enabled().into_iter().map(|s| s.name()).collect();
    info!(posts = %options.posts.display(), users = %options.users.display(), output = %options.output.display(),
          top_k = options.top_k.get(), stages = ?plan, "Starting fastest answerers");

    match run_pipeline(&options) {
        Ok(report) => {
            info!(stages = report.stages.len(), "Fastest answerers complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let stage = e.stage().map(|s| s.name()).unwrap_or("pipeline");
            error!(stage, "Fastest answerers failed: {:#}", anyhow::Error::from(e));
            ExitCode::FAILURE
        }
    }
}
