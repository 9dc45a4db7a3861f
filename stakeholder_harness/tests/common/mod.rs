//! Fixtures shared by the scenario integration tests

#![allow(dead_code)]

use stakeholder_harness::toolkit::mock::stats_record;
use stakeholder_harness::toolkit::RestoringBeam;
use stakeholder_harness::{EnvSettings, MockToolkit, RunOptions, RuntimePolicy, ScenarioEnv};
use std::path::{Path, PathBuf};
use test_helpers::{make_fake_table, scratch_dir};

pub const J1302_MOSAIC_DATA: &str = "J1302/Stakeholder-test-mosaic-data";
pub const J1302_CUBE_DATA: &str = "J1302/Stakeholder-test-mosaic-cube-data";
pub const J1302_INPUTS: [&str; 3] = ["J1302-12fields.ms", "QLcatmask.mask", "secondmask.mask"];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Data root with `inputs` under `subdir`, and an empty working directory.
pub fn fixture_dirs(name: &str, subdir: &str, inputs: &[&str]) -> (PathBuf, PathBuf) {
    let data = scratch_dir(&format!("{name}_data")).unwrap();
    for input in inputs {
        make_fake_table(&data.join(subdir), input).unwrap();
    }
    let workdir = scratch_dir(&format!("{name}_work")).unwrap();
    (data, workdir)
}

pub fn options(data: &Path, workdir: &Path) -> RunOptions {
    RunOptions {
        workdir: workdir.to_path_buf(),
        data_path: data.to_path_buf(),
        parallel: false,
        save_metrics: None,
        keep_products: false,
    }
}

pub fn scenario_env<'a>(toolkit: &'a MockToolkit, settings: &'a EnvSettings) -> ScenarioEnv<'a> {
    ScenarioEnv {
        task: toolkit,
        toolkit,
        settings,
        runtime_policy: RuntimePolicy::Advisory,
    }
}

pub fn beam(values: [f64; 3]) -> RestoringBeam {
    RestoringBeam::new(values[0], values[1], values[2])
}

/// Toolkit answering the Taylor-term queries of the mosaic and awproject tests.
pub fn taylor_toolkit(tt0: f64, tt1: f64, alpha: f64, restoring: [f64; 3]) -> MockToolkit {
    MockToolkit::new()
        .with_stats(".image.tt0", stats_record([("max", tt0)]))
        .with_stats(".image.tt1", stats_record([("max", tt1)]))
        .with_stats(".alpha", stats_record([("max", alpha)]))
        .with_stats(".residual.tt0", stats_record([("rms", 1.0e-4)]))
        .with_stats(".residual.tt1", stats_record([("rms", 1.0e-4)]))
        .with_beam(".image.tt0", beam(restoring))
}
