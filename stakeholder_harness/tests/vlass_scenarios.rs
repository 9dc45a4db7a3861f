//! End-to-end runs of the VLASS scenarios against the mock toolkit

mod common;

use approx::assert_relative_eq;
use common::*;
use stakeholder_harness::scenarios::references::{
    AWPROJECT_BEAM_CASA613, AWPROJECT_CASA613, CUBE_SPW_CASA613, MOSAIC_BEAM_CASA613,
    MOSAIC_CASA613, QL_BEAM_CASA613, QL_FLUX_CASA613,
};
use stakeholder_harness::scenarios::vlass::{Awproject, MosaicCube, MosaicNoncube, QuickLook};
use stakeholder_harness::toolkit::mock::stats_record;
use stakeholder_harness::{run_scenario, EnvSettings, HarnessError, MockToolkit, ParamValue};
use std::path::PathBuf;

const QL_ITER1: &str = "VLASS1.2.ql.T08t20.J1302.10.2048.v1.I.iter1";

fn ql_toolkit(columns: &[&str]) -> MockToolkit {
    let subim = ".image.pbcor.tt0.subim";
    MockToolkit::new()
        .with_columns(columns)
        .with_stats(subim, stats_record([("max", QL_FLUX_CASA613)]))
        .with_beam(subim, beam(QL_BEAM_CASA613))
}

fn cube_toolkit() -> MockToolkit {
    let mut toolkit = MockToolkit::new();
    for r in &CUBE_SPW_CASA613 {
        let image = format!("_{}_IQUV.image.tt0", r.spw);
        let residual = format!("_{}_IQUV.residual.tt0", r.spw);
        for (i, stokes) in ["I", "Q", "U", "V"].into_iter().enumerate() {
            toolkit = toolkit
                .with_stokes_stats(&image, stokes, stats_record([("max", r.iquv[i])]))
                .with_stokes_stats(&residual, stokes, stats_record([("rms", r.rms_iquv[i])]));
        }
        toolkit = toolkit.with_plane_beams(&format!("_{}_IQUV.psf.tt0", r.spw), vec![beam(r.beam)]);
    }
    toolkit
}

#[test]
fn test_mosaic_noncube_fails_only_on_tt1_against_onaxis() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_noncube", J1302_MOSAIC_DATA, &J1302_INPUTS);
    let toolkit = taylor_toolkit(
        MOSAIC_CASA613.tt0,
        MOSAIC_CASA613.tt1,
        MOSAIC_CASA613.alpha,
        MOSAIC_BEAM_CASA613,
    );
    let settings = EnvSettings::default();

    let outcome = run_scenario(&MosaicNoncube, &scenario_env(&toolkit, &settings), &options(&data, &workdir))
        .unwrap();

    // the on-axis and 6.1.3 tt1 references differ in sign
    let failures = outcome.report.failures();
    assert_eq!(failures.len(), 1, "{}", outcome.report);
    assert!(failures[0].contains("Frac Diff F_nu_tt1 vs. on-axis"));
    assert!(!outcome.passed());
    assert_eq!(outcome.report.len(), 8);

    let calls = toolkit.tclean_calls();
    assert_eq!(calls.len(), 5);
    assert!(calls.iter().all(|c| c.imagename == "J1302_iter2"));
    assert!(calls[0].calcres && calls[0].calcpsf);
    assert_eq!(calls[1].mask, "QLcatmask.mask");
    assert_eq!(calls[2].savemodel, "modelcolumn");
    assert_eq!(calls[2].datacolumn, "data");
    assert_eq!(calls[3].mask, "combined.mask");
    assert_eq!(calls[4].usemask, "pb");
    assert_eq!(calls[4].cycleniter, 100);
    assert_eq!(outcome.record.task_calls.len(), 5);
    assert!(outcome.record.images.is_empty());

    assert!(!workdir.join("J1302_iter2.image.tt0").exists());
    assert!(!workdir.join("combined.mask").exists());
    assert!(!workdir.join("J1302-12fields.ms").exists());
}

#[test]
fn test_awproject_passes_and_reuses_psf() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_awproject", J1302_MOSAIC_DATA, &J1302_INPUTS);
    let toolkit = taylor_toolkit(
        AWPROJECT_CASA613.tt0,
        AWPROJECT_CASA613.tt1,
        AWPROJECT_CASA613.alpha,
        AWPROJECT_BEAM_CASA613,
    );
    let settings = EnvSettings {
        cfcache: Some(PathBuf::from("/scratch/cf.cache")),
        ..Default::default()
    };

    let outcome = run_scenario(&Awproject, &scenario_env(&toolkit, &settings), &options(&data, &workdir))
        .unwrap();
    assert!(outcome.passed(), "{}", outcome.report);

    let calls = toolkit.tclean_calls();
    assert_eq!(calls.len(), 6);
    assert_eq!(calls[0].imagename, "J1302_iter0d");
    assert_eq!(calls[0].cfcache, "/scratch/cf.cache");
    assert!(!calls[0].wbawp);
    for call in &calls[1..] {
        assert_eq!(call.imagename, "J1302_iter2");
        assert!(call.cfcache.is_empty());
        assert!(call.wbawp);
    }
    assert_eq!(calls[5].pbmask, 0.4);

    let stats = &outcome.metrics["stats"];
    assert_relative_eq!(stats["tt0_max"].as_f64().unwrap(), AWPROJECT_CASA613.tt0);
}

#[test]
fn test_quick_look_builds_derived_products() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_ql", J1302_MOSAIC_DATA, &J1302_INPUTS[..1]);
    let toolkit = ql_toolkit(&["UVW", "DATA", "MODEL_DATA"]);
    let settings = EnvSettings::default();

    let outcome = run_scenario(&QuickLook, &scenario_env(&toolkit, &settings), &options(&data, &workdir))
        .unwrap();
    assert!(outcome.passed(), "{}", outcome.report);

    // 2 pbcor, 1 rms and 7 cutout existence checks, two fluxes, the beam and the model column
    assert_eq!(outcome.report.len(), 14);
    assert_eq!(outcome.metrics["exists"].len(), 10);
    assert_eq!(outcome.record.images.len(), 10);
    assert!(outcome.record.images.iter().any(|i| i.ends_with(".image.pbcor.tt0.subim")));
    let subim = format!("image_exists('{QL_ITER1}.image.pbcor.tt0.subim')");
    assert!(outcome.report.lines().iter().any(|l| l.contains(&subim)));

    let calls = toolkit.tclean_calls();
    assert_eq!(calls.len(), 2);
    assert!(!calls[0].restoration);
    assert_eq!(calls[1].imagename, QL_ITER1);
    assert_eq!(calls[1].cyclefactor, 2.0);
    let subimages = toolkit.calls().iter().filter(|c| c.op == "subimage").count();
    assert_eq!(subimages, 7);
}

#[test]
fn test_quick_look_without_model_column_fails_that_check() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_ql_nomodel", J1302_MOSAIC_DATA, &J1302_INPUTS[..1]);
    let toolkit = ql_toolkit(&["UVW", "DATA"]);
    let settings = EnvSettings::default();

    let outcome = run_scenario(&QuickLook, &scenario_env(&toolkit, &settings), &options(&data, &workdir))
        .unwrap();
    let failures = outcome.report.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("count('MODEL_DATA')"));
}

#[test]
fn test_quick_imsize_shrinks_quick_look() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_ql_quick", J1302_MOSAIC_DATA, &J1302_INPUTS[..1]);
    let toolkit = ql_toolkit(&["MODEL_DATA"]);
    let settings = EnvSettings {
        quick_imsize: Some(256),
        ..Default::default()
    };

    run_scenario(&QuickLook, &scenario_env(&toolkit, &settings), &options(&data, &workdir)).unwrap();
    assert!(toolkit
        .tclean_calls()
        .iter()
        .all(|c| c.imsize == ParamValue::from(256i64)));
}

#[test]
fn test_task_failure_aborts_scenario() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_task_failure", J1302_MOSAIC_DATA, &J1302_INPUTS);
    let toolkit = taylor_toolkit(
        MOSAIC_CASA613.tt0,
        MOSAIC_CASA613.tt1,
        MOSAIC_CASA613.alpha,
        MOSAIC_BEAM_CASA613,
    )
    .fail_on_call(1);
    let settings = EnvSettings::default();

    let result = run_scenario(&MosaicNoncube, &scenario_env(&toolkit, &settings), &options(&data, &workdir));
    match result {
        Err(HarnessError::Task { imagename, .. }) => assert_eq!(imagename, "J1302_iter2"),
        other => panic!("expected a task error, got {other:?}"),
    }
    assert_eq!(toolkit.tclean_calls().len(), 2);
    assert!(!workdir.join("J1302_iter2.psf.tt0").exists());
}

#[test]
fn test_missing_input_is_setup_error() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_missing_input", J1302_MOSAIC_DATA, &J1302_INPUTS[..1]);
    let toolkit = MockToolkit::new();
    let settings = EnvSettings::default();

    let result = run_scenario(&MosaicNoncube, &scenario_env(&toolkit, &settings), &options(&data, &workdir));
    assert!(matches!(result, Err(HarnessError::Setup(_))));
    assert!(toolkit.tclean_calls().is_empty());
}

#[test]
fn test_mosaic_cube_fits_across_spectral_windows() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_cube", J1302_CUBE_DATA, &J1302_INPUTS);
    let toolkit = cube_toolkit();
    let settings = EnvSettings::default();
    let mut opts = options(&data, &workdir);
    opts.parallel = true;

    let outcome = run_scenario(&MosaicCube, &scenario_env(&toolkit, &settings), &opts).unwrap();

    // 2 fit references x (F_nu, alpha), then IQUV x 2 and beam per window
    assert_eq!(outcome.report.len(), 4 + 3 * 3, "{}", outcome.report);
    for line in outcome.report.lines() {
        let against_613 = line.contains("(6.1.3 image)") || line.contains("vs 6.1.3");
        if against_613 {
            assert!(line.contains("( PASS "), "{line}");
        }
    }
    assert!(outcome
        .report
        .lines()
        .iter()
        .any(|l| l.contains("Diff alpha (on-axis)") && l.contains("( PASS ")));

    let calls = toolkit.tclean_calls();
    assert_eq!(calls.len(), 12);
    assert!(calls.iter().all(|c| !c.parallel && c.stokes == "IQUV" && c.nterms == 1));
    assert_eq!(calls[0].spw, ParamValue::from("2"));
    assert_eq!(calls[0].reffreq, "2.028GHz");
    assert_eq!(calls[8].imagename, "J1302_iter2_14_IQUV");
    assert_eq!(calls[11].usemask, "pb");

    assert_eq!(outcome.metrics.len(), 3);
    assert_relative_eq!(outcome.metrics["spw_14"]["freq"].as_f64().unwrap(), 3.564);
}

#[test]
fn test_mosaic_cube_single_window_skips_fit() {
    init_logging();
    let (data, workdir) = fixture_dirs("vlass_cube_quick", J1302_CUBE_DATA, &J1302_INPUTS);
    let toolkit = cube_toolkit();
    let settings = EnvSettings {
        quick_spwsel: Some("8".to_string()),
        ..Default::default()
    };

    let outcome = run_scenario(&MosaicCube, &scenario_env(&toolkit, &settings), &options(&data, &workdir))
        .unwrap();
    assert_eq!(outcome.report.len(), 3);
    assert!(outcome.report.lines().iter().all(|l| l.contains("(spw 8)")));
    assert_eq!(toolkit.tclean_calls().len(), 4);
}
