//! ALMA cube scenario against a fiducial file written into the test data

mod common;

use common::*;
use stakeholder_harness::scenarios::alma::{StandardCubeBriggsBwTaper, FIDUCIAL_FILE, VIS};
use stakeholder_harness::toolkit::mock::stats_record;
use stakeholder_harness::toolkit::RestoringBeam;
use stakeholder_harness::{run_scenario, EnvSettings, HarnessError, MockToolkit};
use std::path::Path;
use tolerance::Value;

const FIDUCIALS: &str = r#"{
    "casa_version": "6.3.0.22",
    "test_standard_cube_briggsbwtaper": {
        "exp_im_stats": {"npts": [true, 6400], "max_val": [false, 1.25]},
        "exp_mask_stats": {"mask_pix": [true, 437]},
        "exp_pb_stats": {"max_val": [false, 1.0]},
        "exp_psf_stats": {"max_val": [false, 1.0]},
        "exp_resid_stats": {"max_val": [false, 0.0459]},
        "exp_model_stats": {"max_val": [false, 0.295]},
        "exp_sumwt_stats": {"max_val": [false, 94050.1]},
        "exp_bmin_dict": {"*0": 8.1, "*1": 8.1},
        "exp_bmaj_dict": {"*0": 9.2, "*1": 9.2},
        "exp_pa_dict": {"*0": -87.0, "*1": -87.0}
    }
}"#;

fn alma_dirs(name: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    let (data, workdir) = fixture_dirs(name, "alma", &[VIS]);
    std::fs::write(data.join("alma").join(FIDUCIAL_FILE), FIDUCIALS).unwrap();
    (data, workdir)
}

fn alma_toolkit(image_max: f64) -> MockToolkit {
    MockToolkit::new()
        .with_stats(
            ".image",
            stats_record([("npts", Value::Int(6400)), ("max_val", Value::Float(image_max))]),
        )
        .with_stats(".mask", stats_record([("mask_pix", Value::Int(437))]))
        .with_stats(".pb", stats_record([("max_val", 1.0)]))
        .with_stats(".psf", stats_record([("max_val", 1.0)]))
        .with_stats(".residual", stats_record([("max_val", 0.0460)]))
        .with_stats(".model", stats_record([("max_val", 0.295)]))
        .with_stats(".sumwt", stats_record([("max_val", 94050.1)]))
        .with_mask_pixel([40, 70, 0, 0], true)
        .with_mask_pixel([10, 40, 0, 0], true)
        .with_plane_beams(".psf", vec![RestoringBeam::new(9.2, 8.1, -87.0); 2])
}

fn labels_containing<'a>(lines: &'a [String], needle: &str) -> Vec<&'a str> {
    lines
        .iter()
        .filter(|l| l.contains(needle))
        .map(String::as_str)
        .collect()
}

#[test]
fn test_parallel_run_checks_fiducials_and_beams() {
    init_logging();
    let (data, workdir) = alma_dirs("alma_parallel");
    let toolkit = alma_toolkit(1.26);
    let settings = EnvSettings::default();
    let mut opts = options(&data, &workdir);
    opts.parallel = true;

    let outcome = run_scenario(&StandardCubeBriggsBwTaper, &scenario_env(&toolkit, &settings), &opts)
        .unwrap();
    assert!(outcome.passed(), "{}", outcome.report);

    // 8 products, 4 mask pixels, 8 fiducial entries, 3 beam summaries
    assert_eq!(outcome.report.len(), 23);
    assert_eq!(labels_containing(outcome.report.lines(), ".image bm").len(), 2);
    assert_eq!(labels_containing(outcome.report.lines(), "mask at").len(), 4);

    let calls = toolkit.tclean_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].imagename, "standard_cube_briggsbwtaper.iter0");
    assert!(!calls[0].restoration);
    assert_eq!(calls[1].imagename, "standard_cube_briggsbwtaper.iter1");
    assert!(calls[1].pbcor && !calls[1].calcpsf);
    assert!(calls.iter().all(|c| c.parallel));

    assert_eq!(outcome.metrics["bmaj_dict"]["*1"], Value::Float(9.2));
    assert!(!workdir.join("standard_cube_briggsbwtaper.iter1.image").exists());
}

#[test]
fn test_serial_run_skips_beam_checks() {
    init_logging();
    let (data, workdir) = alma_dirs("alma_serial");
    let toolkit = alma_toolkit(1.25);
    let settings = EnvSettings::default();

    let outcome = run_scenario(
        &StandardCubeBriggsBwTaper,
        &scenario_env(&toolkit, &settings),
        &options(&data, &workdir),
    )
    .unwrap();
    assert!(outcome.passed(), "{}", outcome.report);
    assert_eq!(outcome.report.len(), 20);
    assert!(labels_containing(outcome.report.lines(), " chan").is_empty());
}

#[test]
fn test_image_outside_epsilon_fails() {
    init_logging();
    let (data, workdir) = alma_dirs("alma_fail");
    let toolkit = alma_toolkit(1.40);
    let settings = EnvSettings::default();

    let outcome = run_scenario(
        &StandardCubeBriggsBwTaper,
        &scenario_env(&toolkit, &settings),
        &options(&data, &workdir),
    )
    .unwrap();
    let failures = outcome.report.failures();
    assert_eq!(failures.len(), 1, "{}", outcome.report);
    assert!(failures[0].contains(".image max_val"));
}

#[test]
fn test_missing_fiducials_are_reference_error() {
    init_logging();
    let (data, workdir) = fixture_dirs("alma_no_fiducials", "alma", &[VIS]);
    let toolkit = alma_toolkit(1.25);
    let settings = EnvSettings::default();

    let result = run_scenario(
        &StandardCubeBriggsBwTaper,
        &scenario_env(&toolkit, &settings),
        &options(&data, &workdir),
    );
    assert!(matches!(result, Err(HarnessError::Reference(_))));
    assert!(!Path::new(&workdir).join(VIS).exists());
}
