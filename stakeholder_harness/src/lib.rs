//! Stakeholder regression harness for the VLASS and ALMA imaging pipelines
//!
//! Each stakeholder test runs the imaging task with pipeline-realistic
//! parameters on a reference dataset, measures the products and compares
//! them against recorded reference values within tolerance bands. Results
//! are collected into a per-test report and an optional JSON test log.

pub mod context;
pub mod error;
pub mod expdicts;
pub mod params;
pub mod persist;
pub mod record;
pub mod scenarios;
pub mod settings;
pub mod task;
pub mod toolkit;

pub use context::{RuntimeBaseline, RuntimePolicy, TestContext};
pub use error::{HarnessError, HarnessResult, ToolkitError};
pub use params::{ParamDiff, ParamValue, TcleanOverrides, TcleanParams};
pub use persist::{load_dict_from_file, save_dict_to_file, MetricDicts, MetricFormat};
pub use record::{TestLog, TestRecord};
pub use scenarios::{find_scenario, registry, run_scenario, RunOptions, Scenario, ScenarioEnv, ScenarioOutcome};
pub use settings::{DispatchConfig, EnvSettings};
pub use task::TaskRunner;
pub use toolkit::{CommandToolkit, ImageToolkit, ImagingTask, MockToolkit};
