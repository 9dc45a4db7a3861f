//! Run one stakeholder test
//!
//! Runs a single scenario in the given working directory, prints its report
//! and appends its record to a JSON test log. Exits non-zero when any check
//! failed or the test could not run.
//!
//! Usage:
//! ```
//! cargo run --release --bin run_stakeholder -- --scenario vlass::j1302_ql --data-path /data/stakeholder
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{error, info};
use stakeholder_harness::{
    find_scenario, run_scenario, CommandToolkit, EnvSettings, ImageToolkit, ImagingTask,
    MetricFormat, MockToolkit, RunOptions, RuntimePolicy, ScenarioEnv, TestLog,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// Default helper program of the command backend
const DEFAULT_TOOLKIT_CMD: &str = "casa_toolkit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// External helper program speaking JSON over stdin/stdout
    Command,
    /// In-process stand-in; creates empty products and has no statistics
    Mock,
}

/// Command line arguments for a single stakeholder test
#[derive(Parser, Debug)]
#[command(
    name = "run_stakeholder",
    about = "Runs one VLASS/ALMA stakeholder imaging test",
    long_about = None
)]
struct Args {
    /// Scenario module path or test name, e.g. vlass::j1302_ql
    #[arg(long)]
    scenario: String,

    /// Working directory for task products
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Root of the test data; each scenario reads its own subdirectory
    #[arg(long)]
    data_path: PathBuf,

    /// Toolkit backend
    #[arg(long, value_enum, default_value_t = Backend::Command)]
    backend: Backend,

    /// Helper program for the command backend
    #[arg(long, default_value = DEFAULT_TOOLKIT_CMD)]
    toolkit_cmd: PathBuf,

    /// Save measured metrics as `<test>_cur_stats` in this format
    #[arg(long, value_enum)]
    save_metrics: Option<MetricFormat>,

    /// Test log to append to (default: timestamped file in the working directory)
    #[arg(long)]
    log_json: Option<PathBuf>,

    /// Fail the test when the runtime exceeds its baseline
    #[arg(long)]
    enforce_runtime: bool,

    /// Run the imaging task in parallel mode
    #[arg(long)]
    parallel: bool,

    /// Keep task products after the test
    #[arg(long)]
    keep_products: bool,
}

fn run(args: &Args) -> Result<bool> {
    let scenario = find_scenario(&args.scenario)
        .with_context(|| format!("unknown scenario {}", args.scenario))?;
    let settings = EnvSettings::from_env().context("reading environment settings")?;

    let command: CommandToolkit;
    let mock: MockToolkit;
    let (task, toolkit): (&dyn ImagingTask, &dyn ImageToolkit) = match args.backend {
        Backend::Command => {
            command = CommandToolkit::new(args.toolkit_cmd.clone());
            (&command, &command)
        }
        Backend::Mock => {
            mock = MockToolkit::new();
            (&mock, &mock)
        }
    };

    let env = ScenarioEnv {
        task,
        toolkit,
        settings: &settings,
        runtime_policy: if args.enforce_runtime {
            RuntimePolicy::Enforced
        } else {
            RuntimePolicy::Advisory
        },
    };
    let opts = RunOptions {
        workdir: args.workdir.clone(),
        data_path: args.data_path.clone(),
        parallel: args.parallel,
        save_metrics: args.save_metrics,
        keep_products: args.keep_products,
    };

    std::fs::create_dir_all(&opts.workdir)
        .with_context(|| format!("creating {}", opts.workdir.display()))?;
    let outcome = run_scenario(scenario.as_ref(), &env, &opts)
        .with_context(|| format!("running {}", scenario.name()))?;

    let log_path = args.log_json.clone().unwrap_or_else(|| {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        opts.workdir
            .join(format!("stakeholder_{}_{timestamp}.json", outcome.name))
    });
    let mut log = if log_path.exists() {
        TestLog::load_from_file(&log_path)
            .with_context(|| format!("reading test log {}", log_path.display()))?
    } else {
        TestLog::new()
    };
    log.insert(outcome.name.clone(), outcome.record.clone());
    log.save_to_file(&log_path)
        .with_context(|| format!("writing test log {}", log_path.display()))?;
    info!("Test log written to {}", log_path.display());

    print!("{}", outcome.report);
    let passed = outcome.passed();
    println!("{}: {}", outcome.name, if passed { "PASS" } else { "FAIL" });
    Ok(passed)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
