//! Stakeholder test scenarios and the sequence that drives them.
//!
//! A scenario issues its task calls, measures the products into named
//! statistics records and verifies those records against reference values.
//! Measuring and verifying are separate so a saved set of metrics can be
//! re-verified without running the imaging task again.

pub mod alma;
pub mod references;
pub mod vlass;

use crate::context::{image_exists_check, RuntimeBaseline, RuntimePolicy, TestContext};
use crate::error::{HarnessError, HarnessResult};
use crate::params::TcleanOverrides;
use crate::persist::{latest_metrics_file, load_dict_from_file, save_dict_to_file, MetricDicts, MetricFormat};
use crate::record::TestRecord;
use crate::settings::EnvSettings;
use crate::task::TaskRunner;
use crate::toolkit::{ImageToolkit, ImagingTask, StatsRecord};
use log::{info, warn};
use std::path::PathBuf;
use tolerance::{Comparator, Report, Value};

/// Collaborators and run-wide settings shared by every scenario.
pub struct ScenarioEnv<'a> {
    pub task: &'a dyn ImagingTask,
    pub toolkit: &'a dyn ImageToolkit,
    pub settings: &'a EnvSettings,
    pub runtime_policy: RuntimePolicy,
}

pub trait Scenario {
    /// Test name, `test_` prefixed; also the top key of persisted metrics.
    fn name(&self) -> &'static str;

    /// Dispatcher path, e.g. `vlass::j1302_ql`.
    fn module_path(&self) -> &'static str;

    /// Measurement set the test images.
    fn dataset(&self) -> &'static str;

    /// Directory below the data root holding the inputs.
    fn data_subdir(&self) -> &'static str;

    /// Files and directories staged into the working directory.
    fn inputs(&self) -> Vec<&'static str>;

    fn runtime_baseline(&self) -> Option<RuntimeBaseline>;

    /// Parameters shared by every task call of the test.
    fn defaults(&self, settings: &EnvSettings) -> TcleanOverrides;

    /// Issue the task calls and build derived products.
    fn run(&self, ctx: &mut TestContext, runner: &mut TaskRunner, env: &ScenarioEnv) -> HarnessResult<()>;

    /// Query the products into named statistics records.
    fn measure(&self, ctx: &mut TestContext, env: &ScenarioEnv) -> HarnessResult<MetricDicts>;

    /// Compare measured records against the reference values.
    fn verify(&self, ctx: &TestContext, metrics: &MetricDicts) -> HarnessResult<Report>;
}

/// Where and how to run one scenario.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workdir: PathBuf,
    /// Root of the test data; each scenario reads from its own subdirectory
    pub data_path: PathBuf,
    pub parallel: bool,
    pub save_metrics: Option<MetricFormat>,
    pub keep_products: bool,
}

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub name: String,
    pub report: Report,
    pub record: TestRecord,
    pub metrics: MetricDicts,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.report.check_final()
    }

    /// Assert the aggregated verdict.
    pub fn into_result(self) -> HarnessResult<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(HarnessError::Verification {
                test: self.name.clone(),
                report: self.report.to_string(),
            })
        }
    }
}

/// Stem of the persisted metrics file of `test_name`.
pub fn metrics_stem(test_name: &str) -> String {
    format!("{test_name}_cur_stats")
}

/// Run one scenario end to end.
///
/// Setup and task failures abort with an error. A failed comparison only
/// shows up in the returned report.
pub fn run_scenario(
    scenario: &dyn Scenario,
    env: &ScenarioEnv,
    opts: &RunOptions,
) -> HarnessResult<ScenarioOutcome> {
    let name = scenario.name();
    let mut ctx = TestContext::setup(name, &opts.workdir, &opts.data_path, opts.parallel)?;
    ctx.set_data_path(&opts.data_path.join(scenario.data_subdir()));
    ctx.keep_products(opts.keep_products);

    let mut record = TestRecord::new(scenario.dataset(), opts.parallel);
    let cached = env.settings.use_cached_tclean_vals;

    let metrics = if cached {
        let path = latest_metrics_file(&opts.workdir, &metrics_stem(name))?.ok_or_else(|| {
            HarnessError::Setup(format!(
                "USE_CACHED_TCLEAN_VALS is set but no {} file exists in {}",
                metrics_stem(name),
                opts.workdir.display()
            ))
        })?;
        info!("{name}: verifying cached metrics from {}", path.display());
        let (topkey, metrics): (String, MetricDicts) = load_dict_from_file(&path)?;
        if topkey != name {
            warn!("{}: metrics were saved under {topkey}", path.display());
        }
        metrics
    } else {
        for input in scenario.inputs() {
            ctx.stage(input)?;
        }
        ctx.restart_timer();

        let mut runner = TaskRunner::new(
            env.task,
            ctx.workdir(),
            &scenario.defaults(env.settings),
            opts.parallel,
        );
        let outcome = scenario.run(&mut ctx, &mut runner, env);
        record.task_calls = runner.into_calls().iter().map(|c| c.to_record()).collect();
        outcome?;
        scenario.measure(&mut ctx, env)?
    };

    let mut report = scenario.verify(&ctx, &metrics)?;
    if !cached {
        if let Some(baseline) = scenario.runtime_baseline() {
            ctx.check_runtime(&baseline, env.runtime_policy, &mut report);
        }
        record.runtime = ctx.elapsed_secs();
    }

    record.prune_task_calls(opts.parallel);
    record.report = report.to_string();
    record.images = produced_images(&metrics);
    info!("{report}\nSuccess: {}", report.check_final());

    if let Some(format) = opts.save_metrics {
        let version = env.toolkit.version();
        save_dict_to_file(
            name,
            &metrics,
            &opts.workdir.join(metrics_stem(name)),
            version.as_deref(),
            format,
        )?;
    }

    ctx.teardown()?;
    Ok(ScenarioOutcome {
        name: name.to_string(),
        report,
        record,
        metrics,
    })
}

/// Every scenario this harness knows about.
pub fn registry() -> Vec<Box<dyn Scenario>> {
    vec![
        Box::new(vlass::MosaicNoncube),
        Box::new(vlass::Awproject),
        Box::new(vlass::MosaicCube),
        Box::new(vlass::QuickLook),
        Box::new(alma::StandardCubeBriggsBwTaper),
    ]
}

/// Look a scenario up by module path or by test name, with or without the `test_` prefix.
pub fn find_scenario(key: &str) -> Option<Box<dyn Scenario>> {
    registry().into_iter().find(|s| {
        s.module_path() == key || s.name() == key || s.name().strip_prefix("test_") == Some(key)
    })
}

/// Metric record of image name to existence flag.
pub(crate) const EXISTS: &str = "exists";

/// Rebuild the existence lines from a measured `EXISTS` record.
pub(crate) fn verify_existence(
    comparator: &Comparator,
    metrics: &MetricDicts,
    report: &mut Report,
) -> HarnessResult<()> {
    for (image, exists) in metric_record(metrics, EXISTS)? {
        let exists = matches!(exists, Value::Bool(true));
        report.push(image_exists_check(comparator, image, exists));
    }
    Ok(())
}

/// Images the existence checks found on disk.
fn produced_images(metrics: &MetricDicts) -> Vec<String> {
    metrics
        .get(EXISTS)
        .map(|record| {
            record
                .iter()
                .filter(|(_, exists)| matches!(exists, Value::Bool(true)))
                .map(|(image, _)| image.clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Fetch `record.key` from measured metrics.
pub(crate) fn metric<'a>(metrics: &'a MetricDicts, record: &str, key: &str) -> HarnessResult<&'a Value> {
    metrics
        .get(record)
        .and_then(|r| r.get(key))
        .ok_or_else(|| HarnessError::Metrics(format!("{record}.{key} was not measured")))
}

pub(crate) fn metric_f64(metrics: &MetricDicts, record: &str, key: &str) -> HarnessResult<f64> {
    metric(metrics, record, key)?
        .as_f64()
        .ok_or_else(|| HarnessError::Metrics(format!("{record}.{key} is not a number")))
}

pub(crate) fn metric_floats(metrics: &MetricDicts, record: &str, key: &str) -> HarnessResult<Vec<f64>> {
    metric(metrics, record, key)?
        .as_floats()
        .ok_or_else(|| HarnessError::Metrics(format!("{record}.{key} is not numeric")))
}

pub(crate) fn metric_record<'a>(metrics: &'a MetricDicts, record: &str) -> HarnessResult<&'a StatsRecord> {
    metrics
        .get(record)
        .ok_or_else(|| HarnessError::Metrics(format!("{record} was not measured")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names_are_unique() {
        let scenarios = registry();
        let mut names: Vec<_> = scenarios.iter().map(|s| s.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), scenarios.len());
        for s in &scenarios {
            assert!(s.name().starts_with("test_"));
        }
    }

    #[test]
    fn test_find_scenario_by_path_and_name() {
        assert_eq!(
            find_scenario("vlass::j1302_ql").map(|s| s.name()),
            Some("test_j1302_ql")
        );
        assert_eq!(
            find_scenario("standard_cube_briggsbwtaper").map(|s| s.module_path()),
            Some("alma::standard_cube_briggsbwtaper")
        );
        assert!(find_scenario("vlass::j1927_mosaic").is_none());
    }

    #[test]
    fn test_metric_lookup_errors() {
        let mut metrics = MetricDicts::new();
        let mut stats = StatsRecord::new();
        stats.insert("max".into(), Value::Float(0.5));
        stats.insert("fit".into(), Value::Text("x".into()));
        metrics.insert("stats".into(), stats);

        assert_eq!(metric_f64(&metrics, "stats", "max").unwrap(), 0.5);
        assert!(matches!(metric_f64(&metrics, "stats", "fit"), Err(HarnessError::Metrics(_))));
        assert!(matches!(metric_floats(&metrics, "beam", "x"), Err(HarnessError::Metrics(_))));
        assert!(metric_record(&metrics, "stats").is_ok());
    }

    #[test]
    fn test_produced_images_lists_existing_only() {
        let mut exists = StatsRecord::new();
        exists.insert("a.image".into(), Value::Bool(true));
        exists.insert("a.rms".into(), Value::Bool(false));
        let mut metrics = MetricDicts::new();
        assert!(produced_images(&metrics).is_empty());

        metrics.insert(EXISTS.into(), exists);
        assert_eq!(produced_images(&metrics), vec!["a.image".to_string()]);
    }

    #[test]
    fn test_outcome_into_result() {
        let mut report = Report::new();
        report.push_line("[ t ] x is 1.0 ( FAIL : should be < 0.1)\n", false);
        let outcome = ScenarioOutcome {
            name: "test_t".into(),
            report,
            record: TestRecord::default(),
            metrics: MetricDicts::new(),
        };
        match outcome.into_result() {
            Err(HarnessError::Verification { test, report }) => {
                assert_eq!(test, "test_t");
                assert!(report.contains("( FAIL "));
            }
            other => panic!("expected verification error, got {other:?}"),
        }
    }
}
