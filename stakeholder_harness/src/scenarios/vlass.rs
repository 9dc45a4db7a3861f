//! VLASS stakeholder tests on the J1302 field.
//!
//! Every test images `J1302-12fields.ms`. The Stokes I mosaic and awproject
//! tests clean in stages with a catalog mask, a combined mask and finally a
//! primary-beam mask; the cube test repeats that per spectral window in full
//! Stokes; the quick-look test makes a single cleaned image and then the
//! pbcor, RMS and cutout products the pipeline would.

use super::references::{
    spw_freq_ghz, spw_reference, spw_reffreq, TaylorReference, AWPROJECT_BEAM_CASA613,
    AWPROJECT_CASA613, CUBE_FIT_CASA613, CUBE_FIT_ONAXIS, CUBE_NU0_GHZ, CUBE_SPW_CASA613,
    CUBE_SPW_ONAXIS, J1302_RUNTIME, MOSAIC_BEAM_CASA613, MOSAIC_CASA613, ONAXIS, QL_BEAM_CASA613,
    QL_FLUX_CASA613, QL_FLUX_ONAXIS,
};
use super::{metric_f64, metric_floats, verify_existence, Scenario, ScenarioEnv, EXISTS};
use crate::context::{column_count_check, copy_recursive, RuntimeBaseline, TestContext};
use crate::error::{HarnessError, HarnessResult, ToolkitError};
use crate::params::{ParamValue, TcleanOverrides, TcleanParams};
use crate::persist::MetricDicts;
use crate::settings::EnvSettings;
use crate::task::TaskRunner;
use crate::toolkit::{stat_f64, ImageToolkit, RmsImageSpec, Selection, StatsRecord};
use log::{info, warn};
use tolerance::{fit_power_law, Comparator, DiffMode, NoiseEstimates, Report, Tolerance, Value};

pub const VIS: &str = "J1302-12fields.ms";
pub const PHASECENTER: &str = "13:03:13.874 -10.51.16.73";
const INTENT: &str = "OBSERVE_TARGET#UNSPECIFIED";

const MOSAIC_DATA: &str = "J1302/Stakeholder-test-mosaic-data";
const CUBE_DATA: &str = "J1302/Stakeholder-test-mosaic-cube-data";

const QL_MASK: &str = "QLcatmask.mask";
const SECOND_MASK: &str = "secondmask.mask";
const SUM_MASK: &str = "sum_of_masks.mask";
const COMBINED_MASK: &str = "combined.mask";
const MODEL_COLUMN: &str = "MODEL_DATA";

/// Metric record names
const STATS: &str = "stats";
const CHECKS: &str = "checks";

const CLEAN_SCALES: [i64; 3] = [0, 5, 12];

/// `x,y,x,y` box on the image center, moved when `QUICK_IMSIZE` shrinks the image.
fn center_box(settings: &EnvSettings, center: i64) -> String {
    let c = settings.imsize().map_or(center, |n| n / 2);
    format!("{c},{c},{c},{c}")
}

fn with_quick_imsize(overrides: TcleanOverrides, settings: &EnvSettings) -> TcleanOverrides {
    match settings.imsize() {
        Some(n) => overrides.imsize(n),
        None => overrides,
    }
}

fn clean_scales() -> ParamValue {
    ParamValue::from(CLEAN_SCALES.to_vec())
}

/// Sum the catalog and second-order masks and threshold them into `combined.mask`.
fn prepare_combined_mask(ctx: &mut TestContext, toolkit: &dyn ImageToolkit) -> HarnessResult<()> {
    ctx.track("sum_of_masks");
    ctx.track("combined");
    ctx.combine_masks(toolkit, SECOND_MASK, QL_MASK, SUM_MASK, COMBINED_MASK)
}

fn image_max(
    ctx: &TestContext,
    toolkit: &dyn ImageToolkit,
    name: &str,
    selection: &Selection,
) -> HarnessResult<f64> {
    let image = ctx.path(name);
    let stats = toolkit.statistics(&image, selection)?;
    Ok(stat_f64(&stats, "max", &image)?)
}

fn image_rms(
    ctx: &TestContext,
    toolkit: &dyn ImageToolkit,
    name: &str,
    selection: &Selection,
) -> HarnessResult<f64> {
    let image = ctx.path(name);
    let stats = toolkit.statistics(&image, selection)?;
    Ok(stat_f64(&stats, "rms", &image)?)
}

fn model_column_record(ctx: &TestContext, toolkit: &dyn ImageToolkit) -> HarnessResult<StatsRecord> {
    let mut checks = StatsRecord::new();
    let count = ctx.column_count(toolkit, VIS, MODEL_COLUMN)?;
    checks.insert(MODEL_COLUMN.to_string(), Value::Int(count));
    Ok(checks)
}

fn verify_model_column(comparator: &Comparator, metrics: &MetricDicts, report: &mut Report) -> HarnessResult<()> {
    let count = metric_f64(metrics, CHECKS, MODEL_COLUMN)? as i64;
    report.push(column_count_check(comparator, MODEL_COLUMN, count));
    Ok(())
}

/// Peaks of the two Taylor-term images and the spectral index image, the
/// residual noise of both terms, the restoring beam and the model column.
fn measure_taylor_terms(
    ctx: &TestContext,
    toolkit: &dyn ImageToolkit,
    img: &str,
    region_box: &str,
) -> HarnessResult<MetricDicts> {
    let peak = Selection::all().region_box(region_box);
    let mut stats = StatsRecord::new();
    for (key, ext) in [("tt0_max", ".image.tt0"), ("tt1_max", ".image.tt1"), ("alpha_max", ".alpha")] {
        let max = image_max(ctx, toolkit, &format!("{img}{ext}"), &peak)?;
        stats.insert(key.to_string(), Value::Float(max));
    }
    for (key, ext) in [("rms_tt0", ".residual.tt0"), ("rms_tt1", ".residual.tt1")] {
        let rms = image_rms(ctx, toolkit, &format!("{img}{ext}"), &Selection::all())?;
        stats.insert(key.to_string(), Value::Float(rms));
    }
    let beam = toolkit.restoring_beam(&ctx.path(&format!("{img}.image.tt0")))?;
    stats.insert("beam".to_string(), Value::Floats(beam.as_array().to_vec()));

    let mut metrics = MetricDicts::new();
    metrics.insert(STATS.to_string(), stats);
    metrics.insert(CHECKS.to_string(), model_column_record(ctx, toolkit)?);
    Ok(metrics)
}

/// Compare Taylor-term peaks against the on-axis and 6.1.3 values.
///
/// The spectral index is compared as an absolute difference reduced by the
/// uncertainty propagated from the Taylor-term noise.
fn verify_taylor_terms(
    comparator: &Comparator,
    metrics: &MetricDicts,
    casa613: &TaylorReference,
    beam613: &[f64; 3],
) -> HarnessResult<Report> {
    let tt0 = metric_f64(metrics, STATS, "tt0_max")?;
    let tt1 = metric_f64(metrics, STATS, "tt1_max")?;
    let alpha = metric_f64(metrics, STATS, "alpha_max")?;
    let noise = NoiseEstimates {
        tt0,
        rms_tt0: metric_f64(metrics, STATS, "rms_tt0")?,
        tt1,
        rms_tt1: metric_f64(metrics, STATS, "rms_tt1")?,
    };
    let references = [&ONAXIS, casa613];

    let mut report = Report::new();
    for r in references {
        let label = format!("Frac Diff F_nu_tt0 vs. {}", r.provenance);
        report.push(comparator.check_fracdiff(&tt0, &r.tt0, &label, Tolerance::FLUX)?);
    }
    for r in references {
        let label = format!("Frac Diff F_nu_tt1 vs. {}", r.provenance);
        report.push(comparator.check_fracdiff(&tt1, &r.tt1, &label, Tolerance::FLUX)?);
    }
    for r in references {
        let label = format!("Diff alpha vs. {}", r.provenance);
        report.push(comparator.check_spectral_index(alpha, r.alpha, noise, &label, Tolerance::SPECTRAL_INDEX));
    }
    let beam = metric_floats(metrics, STATS, "beam")?;
    report.push(comparator.check_fracdiff(&beam, beam613, "Frac Diff Maj, Min, PA vs 6.1.3", Tolerance::FLUX)?);
    verify_model_column(comparator, metrics, &mut report)?;
    Ok(report)
}

const NONCUBE_IMAGE: &str = "J1302_iter2";

/// Stokes I mosaic, mtmfs with two Taylor terms.
pub struct MosaicNoncube;

impl Scenario for MosaicNoncube {
    fn name(&self) -> &'static str {
        "test_j1302_mosaic_noncube"
    }

    fn module_path(&self) -> &'static str {
        "vlass::j1302_mosaic_noncube"
    }

    fn dataset(&self) -> &'static str {
        VIS
    }

    fn data_subdir(&self) -> &'static str {
        MOSAIC_DATA
    }

    fn inputs(&self) -> Vec<&'static str> {
        vec![VIS, QL_MASK, SECOND_MASK]
    }

    fn runtime_baseline(&self) -> Option<RuntimeBaseline> {
        Some(J1302_RUNTIME)
    }

    fn defaults(&self, settings: &EnvSettings) -> TcleanOverrides {
        let defaults = TcleanOverrides::default()
            .vis(VIS)
            .field("")
            .spw("")
            .antenna("")
            .scan("")
            .stokes("I")
            .intent(INTENT)
            .uvrange("<12km")
            .imagename(NONCUBE_IMAGE)
            .phasecenter(PHASECENTER)
            .reffreq("3.0GHz")
            .deconvolver("mtmfs")
            .cell("0.6arcsec")
            .imsize(4000)
            .gridder("mosaic")
            .uvtaper(vec![""])
            .restoringbeam(ParamValue::empty_list())
            .specmode("mfs")
            .nchan(-1)
            .usemask("user")
            .mask("")
            .pbmask(0.0)
            .outframe("LSRK")
            .wprojplanes(1)
            .mosweight(false)
            .conjbeams(false)
            .usepointing(false)
            .rotatepastep(5.0)
            .smallscalebias(0.4)
            .pblimit(0.1)
            .scales(vec![0])
            .nterms(2)
            .pbcor(false)
            .weighting("briggs")
            .perchanweightdensity(true)
            .robust(1.0)
            .npixels(0)
            .threshold(0.0)
            .nsigma(2.0)
            .cycleniter(500)
            .cyclefactor(3.0)
            .interactive(false)
            .fastnoise(true)
            .calcres(false)
            .calcpsf(false)
            .savemodel("none")
            .restoration(true);
        with_quick_imsize(defaults, settings)
    }

    fn run(&self, ctx: &mut TestContext, runner: &mut TaskRunner, env: &ScenarioEnv) -> HarnessResult<()> {
        ctx.track(NONCUBE_IMAGE);
        prepare_combined_mask(ctx, env.toolkit)?;
        let call = TcleanOverrides::default;

        // initialize, no cleaning
        runner.run_tclean(&call().niter(0).datacolumn("corrected").calcres(true).calcpsf(true), None)?;

        runner.run_tclean(
            &call()
                .niter(20000)
                .datacolumn("corrected")
                .mask(QL_MASK)
                .nsigma(3.0)
                .scales(clean_scales()),
            None,
        )?;

        // model column is not written by the pipeline here, only checked
        runner.run_tclean(&call().niter(0).datacolumn("data").savemodel("modelcolumn"), None)?;

        ctx.remove(&format!("{NONCUBE_IMAGE}.mask"))?;
        runner.run_tclean(
            &call()
                .niter(20000)
                .datacolumn("corrected")
                .mask(COMBINED_MASK)
                .nsigma(3.0)
                .scales(clean_scales()),
            None,
        )?;

        ctx.remove(&format!("{NONCUBE_IMAGE}.mask"))?;
        runner.run_tclean(
            &call()
                .niter(20000)
                .datacolumn("corrected")
                .usemask("pb")
                .mask("")
                .pbmask(0.4)
                .nsigma(4.5)
                .scales(clean_scales())
                .cycleniter(100),
            None,
        )?;
        Ok(())
    }

    fn measure(&self, ctx: &mut TestContext, env: &ScenarioEnv) -> HarnessResult<MetricDicts> {
        measure_taylor_terms(ctx, env.toolkit, NONCUBE_IMAGE, &center_box(env.settings, 2000))
    }

    fn verify(&self, ctx: &TestContext, metrics: &MetricDicts) -> HarnessResult<Report> {
        verify_taylor_terms(ctx.comparator(), metrics, &MOSAIC_CASA613, &MOSAIC_BEAM_CASA613)
    }
}

const AW_PSF_IMAGE: &str = "J1302_iter0d";
const AW_IMAGE: &str = "J1302_iter2";

/// Parameters the VLASS pipeline used for each awproject call, logged against the actual calls.
pub fn awproject_pipeline_records() -> Vec<TcleanParams> {
    let base = TcleanOverrides::default()
        .vis(VIS)
        .uvrange("<12km")
        .intent(INTENT)
        .imagename(AW_IMAGE)
        .imsize(5250)
        .cell("0.6arcsec")
        .phasecenter(PHASECENTER)
        .reffreq("3.0GHz")
        .gridder("awproject")
        .wprojplanes(32)
        .mosweight(false)
        .conjbeams(true)
        .usepointing(true)
        .rotatepastep(5.0)
        .pointingoffsetsigdev(vec![300, 30])
        .pblimit(0.02)
        .deconvolver("mtmfs")
        .scales(vec![0])
        .smallscalebias(0.4)
        .restoringbeam(ParamValue::empty_list())
        .uvtaper(vec![""])
        .weighting("briggs")
        .robust(1.0)
        .nsigma(2.0)
        .cycleniter(5000)
        .cyclefactor(3.0)
        .parallel(true);
    let cleaning = |mask: &str, nsigma: f64, cycleniter: i64| {
        TcleanOverrides::default()
            .niter(20000)
            .scales(clean_scales())
            .nsigma(nsigma)
            .cycleniter(cycleniter)
            .mask(mask)
            .calcres(false)
            .calcpsf(false)
    };
    let steps = [
        TcleanOverrides::default().imagename(AW_PSF_IMAGE).wbawp(false).calcres(false),
        TcleanOverrides::default(),
        cleaning("J1302_QLcatmask.mask", 3.0, 3000),
        TcleanOverrides::default()
            .datacolumn("data")
            .savemodel("modelcolumn")
            .calcres(false)
            .calcpsf(false),
        cleaning("J1302_combined.mask", 3.0, 3000),
        cleaning("", 4.5, 500).usemask("pb").pbmask(0.4),
    ];
    steps
        .iter()
        .map(|step| TcleanParams::default().merged(&base.layered(step)))
        .collect()
}

/// Stokes I with the awproject gridder and a PSF made without wideband A-projection.
pub struct Awproject;

impl Scenario for Awproject {
    fn name(&self) -> &'static str {
        "test_j1302_awproject"
    }

    fn module_path(&self) -> &'static str {
        "vlass::j1302_awproject"
    }

    fn dataset(&self) -> &'static str {
        VIS
    }

    fn data_subdir(&self) -> &'static str {
        MOSAIC_DATA
    }

    fn inputs(&self) -> Vec<&'static str> {
        vec![VIS, QL_MASK, SECOND_MASK]
    }

    fn runtime_baseline(&self) -> Option<RuntimeBaseline> {
        Some(J1302_RUNTIME)
    }

    fn defaults(&self, settings: &EnvSettings) -> TcleanOverrides {
        let defaults = TcleanOverrides::default()
            .vis(VIS)
            .field("")
            .spw("")
            .antenna("")
            .scan("")
            .stokes("I")
            .intent(INTENT)
            .datacolumn("corrected")
            .phasecenter(PHASECENTER)
            .reffreq("3.0GHz")
            .deconvolver("mtmfs")
            .cell("1.0arcsec")
            .imsize(7290)
            .gridder("awproject")
            .restoringbeam("common")
            .specmode("mfs")
            .nchan(-1)
            .outframe("LSRK")
            .perchanweightdensity(false)
            .wprojplanes(1)
            .mosweight(false)
            .conjbeams(true)
            .usepointing(false)
            .rotatepastep(5.0)
            .pblimit(0.02)
            .scales(vec![0])
            .nterms(2)
            .pbcor(false)
            .weighting("briggs")
            .robust(1.0)
            .npixels(0)
            .threshold(0.0)
            .nsigma(2.0)
            .cycleniter(5000)
            .cyclefactor(3.0)
            .interactive(false)
            .fastnoise(true)
            .gain(0.1)
            .wbawp(true)
            .pbmask(0.0)
            .smallscalebias(0.4)
            .pointingoffsetsigdev(vec![300, 30])
            .calcres(true)
            .calcpsf(true)
            .savemodel("none")
            .restart(true);
        with_quick_imsize(defaults, settings)
    }

    fn run(&self, ctx: &mut TestContext, runner: &mut TaskRunner, env: &ScenarioEnv) -> HarnessResult<()> {
        ctx.track(AW_PSF_IMAGE);
        ctx.track(AW_IMAGE);
        prepare_combined_mask(ctx, env.toolkit)?;

        let pipeline = awproject_pipeline_records();
        let cfcache = match &env.settings.cfcache {
            Some(path) => path.display().to_string(),
            None => {
                warn!("CFCACHE is not set, the wbawp=False call computes its own convolution functions");
                String::new()
            }
        };
        let call = || TcleanOverrides::default().imagename(AW_IMAGE);

        // robust PSFs without wideband A-projection
        runner.run_tclean(
            &call()
                .imagename(AW_PSF_IMAGE)
                .niter(0)
                .cfcache(cfcache)
                .calcres(false)
                .wbawp(false),
            Some(&pipeline[0]),
        )?;

        // initialize, no cleaning
        runner.run_tclean(&call().niter(0), Some(&pipeline[1]))?;

        ctx.replace_psf(AW_IMAGE, AW_PSF_IMAGE)?;

        runner.run_tclean(
            &call()
                .niter(20000)
                .scales(clean_scales())
                .nsigma(3.0)
                .cycleniter(3000)
                .mask(QL_MASK)
                .calcres(false)
                .calcpsf(false),
            Some(&pipeline[2]),
        )?;

        runner.run_tclean(
            &call().calcres(false).calcpsf(false).savemodel("modelcolumn"),
            Some(&pipeline[3]),
        )?;

        ctx.remove(&format!("{AW_IMAGE}.mask"))?;
        runner.run_tclean(
            &call()
                .niter(20000)
                .scales(clean_scales())
                .nsigma(3.0)
                .cycleniter(3000)
                .mask(COMBINED_MASK)
                .calcres(false)
                .calcpsf(false),
            Some(&pipeline[4]),
        )?;

        ctx.remove(&format!("{AW_IMAGE}.mask"))?;
        runner.run_tclean(
            &call()
                .niter(20000)
                .scales(clean_scales())
                .nsigma(4.5)
                .cycleniter(500)
                .mask("")
                .calcres(false)
                .calcpsf(false)
                .usemask("pb")
                .pbmask(0.4),
            Some(&pipeline[5]),
        )?;
        Ok(())
    }

    fn measure(&self, ctx: &mut TestContext, env: &ScenarioEnv) -> HarnessResult<MetricDicts> {
        measure_taylor_terms(ctx, env.toolkit, AW_IMAGE, &center_box(env.settings, 2625))
    }

    fn verify(&self, ctx: &TestContext, metrics: &MetricDicts) -> HarnessResult<Report> {
        verify_taylor_terms(ctx.comparator(), metrics, &AWPROJECT_CASA613, &AWPROJECT_BEAM_CASA613)
    }
}

const CUBE_SPWS: [&str; 3] = ["2", "8", "14"];
const CUBE_STOKES: &str = "IQUV";
const STOKES_PLANES: [&str; 4] = ["I", "Q", "U", "V"];

fn cube_image(spw: &str) -> String {
    format!("J1302_iter2_{}_{CUBE_STOKES}", spw.replace('~', "-"))
}

fn spw_record(spw: &str) -> String {
    format!("spw_{spw}")
}

/// Pipeline parameters of one cube call, for logging against the actual call.
fn cube_pipeline_record(spw: &str, reffreq: &str, step: &TcleanOverrides) -> TcleanParams {
    let base = TcleanOverrides::default()
        .vis(VIS)
        .spw(spw)
        .uvrange("<12km")
        .intent(INTENT)
        .datacolumn("corrected")
        .imagename(cube_image(spw))
        .imsize(4000)
        .cell("0.6arcsec")
        .phasecenter(PHASECENTER)
        .stokes(CUBE_STOKES)
        .reffreq(reffreq)
        .gridder("mosaic")
        .mosweight(false)
        .rotatepastep(5.0)
        .pblimit(0.1)
        .deconvolver("mtmfs")
        .scales(vec![0])
        .nterms(1)
        .smallscalebias(0.4)
        .restoringbeam(ParamValue::empty_list())
        .uvtaper(vec![""])
        .weighting("briggs")
        .robust(1.0)
        .nsigma(2.0)
        .cycleniter(500)
        .cyclefactor(3.0);
    TcleanParams::default().merged(&base.layered(step))
}

fn run_cube_step(
    runner: &mut TaskRunner,
    per_spw: &TcleanOverrides,
    spw: &str,
    reffreq: &str,
    step: TcleanOverrides,
) -> HarnessResult<TcleanParams> {
    let expected = cube_pipeline_record(spw, reffreq, &step);
    runner.run_tclean(&per_spw.layered(&step), Some(&expected))
}

/// Full-Stokes images of three spectral windows, with a power-law fit across them.
pub struct MosaicCube;

impl Scenario for MosaicCube {
    fn name(&self) -> &'static str {
        "test_j1302_mosaic_cube"
    }

    fn module_path(&self) -> &'static str {
        "vlass::j1302_mosaic_cube"
    }

    fn dataset(&self) -> &'static str {
        VIS
    }

    fn data_subdir(&self) -> &'static str {
        CUBE_DATA
    }

    fn inputs(&self) -> Vec<&'static str> {
        vec![VIS, QL_MASK, SECOND_MASK]
    }

    fn runtime_baseline(&self) -> Option<RuntimeBaseline> {
        Some(J1302_RUNTIME)
    }

    /// Serial only: the mosaic gridder does not support parallel Stokes imaging.
    fn defaults(&self, settings: &EnvSettings) -> TcleanOverrides {
        let defaults = TcleanOverrides::default()
            .vis(VIS)
            .field("")
            .spw("")
            .uvrange("<12km")
            .imsize(4000)
            .antenna("")
            .scan("")
            .stokes("I")
            .intent(INTENT)
            .cell("0.6arcsec")
            .datacolumn("data")
            .phasecenter(PHASECENTER)
            .reffreq("3.0GHz")
            .deconvolver("mtmfs")
            .gridder("mosaic")
            .restoringbeam(ParamValue::empty_list())
            .specmode("mfs")
            .nchan(-1)
            .outframe("LSRK")
            .perchanweightdensity(true)
            .mask("")
            .usemask("user")
            .pbmask(0.0)
            .wprojplanes(1)
            .mosweight(false)
            .conjbeams(false)
            .usepointing(false)
            .rotatepastep(5.0)
            .pblimit(0.1)
            .scales(vec![0])
            .nterms(1)
            .pbcor(false)
            .weighting("briggs")
            .smallscalebias(0.4)
            .robust(1.0)
            .uvtaper(vec![""])
            .gain(0.1)
            .npixels(0)
            .threshold(0.0)
            .nsigma(2.0)
            .cycleniter(500)
            .cyclefactor(3.0)
            .interactive(false)
            .fastnoise(true)
            .calcres(true)
            .calcpsf(true)
            .restoration(true)
            .savemodel("none")
            .parallel(false);
        with_quick_imsize(defaults, settings)
    }

    fn run(&self, ctx: &mut TestContext, runner: &mut TaskRunner, env: &ScenarioEnv) -> HarnessResult<()> {
        prepare_combined_mask(ctx, env.toolkit)?;

        let cleaning = |mask: &str, nsigma: f64, cycleniter: i64| {
            TcleanOverrides::default()
                .scales(clean_scales())
                .nsigma(nsigma)
                .niter(20000)
                .cycleniter(cycleniter)
                .mask(mask)
                .calcres(false)
                .calcpsf(false)
        };

        for spw in env.settings.spws(&CUBE_SPWS) {
            let reffreq = spw_reffreq(&spw)
                .ok_or_else(|| HarnessError::Config(format!("no reference frequency for spw {spw}")))?;
            let imagename = cube_image(&spw);
            ctx.track(imagename.clone());
            info!("{}: imaging spw {spw} at {reffreq}", ctx.test_name());

            let per_spw = TcleanOverrides::default()
                .imagename(imagename)
                .datacolumn("corrected")
                .spw(spw.as_str())
                .stokes(CUBE_STOKES)
                .reffreq(reffreq);
            // initialize, no cleaning
            run_cube_step(runner, &per_spw, &spw, reffreq, TcleanOverrides::default().niter(0))?;

            run_cube_step(runner, &per_spw, &spw, reffreq, cleaning(QL_MASK, 3.0, 500))?;

            ctx.remove_matching("", ".workdirectory")?;
            ctx.remove_matching("iter2", ".mask")?;
            run_cube_step(runner, &per_spw, &spw, reffreq, cleaning(COMBINED_MASK, 3.0, 500))?;

            let final_step = cleaning("", 4.5, 100).usemask("pb").pbmask(0.4);
            run_cube_step(runner, &per_spw, &spw, reffreq, final_step)?;
        }
        Ok(())
    }

    fn measure(&self, ctx: &mut TestContext, env: &ScenarioEnv) -> HarnessResult<MetricDicts> {
        let toolkit = env.toolkit;
        let region_box = center_box(env.settings, 2000);
        let mut metrics = MetricDicts::new();

        for spw in env.settings.spws(&CUBE_SPWS) {
            let imagename = cube_image(&spw);
            let image = format!("{imagename}.image.tt0");
            let residual = format!("{imagename}.residual.tt0");

            let mut iquv = Vec::with_capacity(STOKES_PLANES.len());
            let mut rms_iquv = Vec::with_capacity(STOKES_PLANES.len());
            for stokes in STOKES_PLANES {
                let peak = Selection::all().region_box(region_box.as_str()).stokes(stokes);
                iquv.push(image_max(ctx, toolkit, &image, &peak)?);
                rms_iquv.push(image_rms(ctx, toolkit, &residual, &Selection::all().stokes(stokes))?);
            }

            let psf = ctx.path(&format!("{imagename}.psf.tt0"));
            let beam = toolkit
                .per_plane_beams(&psf)?
                .first()
                .copied()
                .ok_or_else(|| ToolkitError::NoStatistics(format!("per-plane beams of {}", psf.display())))?;

            let freq = spw_freq_ghz(&spw)
                .ok_or_else(|| HarnessError::Config(format!("no reference frequency for spw {spw}")))?;

            let mut record = StatsRecord::new();
            record.insert("freq".to_string(), Value::Float(freq));
            record.insert("iquv".to_string(), Value::Floats(iquv));
            record.insert("rms_iquv".to_string(), Value::Floats(rms_iquv));
            record.insert("beam".to_string(), Value::Floats(beam.as_array().to_vec()));
            metrics.insert(spw_record(&spw), record);
        }
        Ok(metrics)
    }

    /// Fit F_nu0 and alpha across the windows, then compare each window's
    /// Stokes peaks and beam.
    ///
    /// Stokes Q, U and V are near zero, so peaks are compared relative to the
    /// larger of the reference and twice the worst measured Stokes noise.
    fn verify(&self, ctx: &TestContext, metrics: &MetricDicts) -> HarnessResult<Report> {
        let comparator = ctx.comparator();
        let mut report = Report::new();

        let mut spws: Vec<(String, f64)> = Vec::new();
        for name in metrics.keys() {
            if let Some(spw) = name.strip_prefix("spw_") {
                spws.push((spw.to_string(), metric_f64(metrics, name, "freq")?));
            }
        }
        spws.sort_by(|a, b| a.1.total_cmp(&b.1));

        if spws.len() >= 2 {
            let mut freqs = Vec::with_capacity(spws.len());
            let mut fluxes = Vec::with_capacity(spws.len());
            for (spw, freq) in &spws {
                freqs.push(*freq);
                fluxes.push(metric_floats(metrics, &spw_record(spw), "iquv")?[0]);
            }
            let fit = fit_power_law(&freqs, &fluxes, CUBE_NU0_GHZ)?;
            info!(
                "{}: fitted F_nu0 = {:.5}, alpha = {:.5} (+/- {:.5})",
                ctx.test_name(),
                fit.f_nu0,
                fit.alpha,
                fit.perr.0
            );
            for r in [&CUBE_FIT_ONAXIS, &CUBE_FIT_CASA613] {
                let label = format!("Frac Diff F_nu ({})", r.provenance);
                report.push(comparator.check_fracdiff(&fit.f_nu0, &r.f_nu0, &label, Tolerance::FLUX)?);
                let label = format!("Diff alpha ({})", r.provenance);
                report.push(comparator.check_diff(
                    DiffMode::Absolute,
                    &fit.alpha,
                    &r.alpha,
                    &label,
                    Tolerance::SPECTRAL_INDEX,
                )?);
            }
        } else {
            warn!(
                "{}: {} spectral window(s) measured, skipping the power-law fit",
                ctx.test_name(),
                spws.len()
            );
        }

        for (spw, _) in &spws {
            let (Some(casa613), Some(onaxis)) = (
                spw_reference(&CUBE_SPW_CASA613, spw),
                spw_reference(&CUBE_SPW_ONAXIS, spw),
            ) else {
                warn!("{}: no reference values for spw {spw}", ctx.test_name());
                continue;
            };
            let record = spw_record(spw);
            let iquv = metric_floats(metrics, &record, "iquv")?;
            let rms = metric_floats(metrics, &record, "rms_iquv")?
                .into_iter()
                .fold(0.0, f64::max);
            let beam = metric_floats(metrics, &record, "beam")?;

            let label = format!("Stokes Comparison (spw {spw}), Frac Diff IQUV vs 6.1.3");
            report.push(comparator.check_noise_floor(&iquv, &casa613.iquv, rms, &label, Tolerance::FLUX)?);
            let label = format!("Stokes Comparison (spw {spw}), Frac Diff IQUV vs on-axis");
            report.push(comparator.check_noise_floor(&iquv, &onaxis.iquv, rms, &label, Tolerance::FLUX)?);
            let label = format!("Stokes Comparison (spw {spw}), Frac Diff Beam vs 6.1.3");
            report.push(comparator.check_fracdiff(&beam, &casa613.beam, &label, Tolerance::FLUX)?);
        }
        Ok(report)
    }
}

const QL_ITER0: &str = "VLASS1.2.ql.T08t20.J1302.10.2048.v1.I.iter0";
const QL_ITER1: &str = "VLASS1.2.ql.T08t20.J1302.10.2048.v1.I.iter1";

/// iter0 products reused by the iter1 call.
const QL_SEED_EXTS: [&str; 14] = [
    ".weight.tt2",
    ".weight.tt0",
    ".psf.tt0",
    ".residual.tt0",
    ".weight.tt1",
    ".sumwt.tt2",
    ".psf.tt1",
    ".residual.tt1",
    ".psf.tt2",
    ".sumwt.tt1",
    ".model.tt0",
    ".pb.tt0",
    ".model.tt1",
    ".sumwt.tt0",
];

const QL_PBCOR: [(&str, &str); 2] = [
    (".image.tt0", ".image.pbcor.tt0"),
    (".residual.tt0", ".image.residual.pbcor.tt0"),
];

const QL_CUTOUT_EXTS: [&str; 7] = [
    ".image.tt0",
    ".residual.tt0",
    ".image.pbcor.tt0",
    ".image.pbcor.tt0.rms",
    ".psf.tt0",
    ".image.residual.pbcor.tt0",
    ".pb.tt0",
];

/// Cutout box and the center of the cutout.
fn ql_cutout(settings: &EnvSettings) -> (String, i64) {
    match settings.imsize() {
        Some(n) => (format!("0,0,{},{}", n - 1, n - 1), n / 2),
        None => ("1785.0,1785.0,5506.0,5506.0".to_string(), 1860),
    }
}

/// Quick-look imaging followed by primary-beam correction, RMS image and cutouts.
pub struct QuickLook;

impl Scenario for QuickLook {
    fn name(&self) -> &'static str {
        "test_j1302_ql"
    }

    fn module_path(&self) -> &'static str {
        "vlass::j1302_ql"
    }

    fn dataset(&self) -> &'static str {
        VIS
    }

    fn data_subdir(&self) -> &'static str {
        MOSAIC_DATA
    }

    fn inputs(&self) -> Vec<&'static str> {
        vec![VIS]
    }

    fn runtime_baseline(&self) -> Option<RuntimeBaseline> {
        Some(J1302_RUNTIME)
    }

    fn defaults(&self, settings: &EnvSettings) -> TcleanOverrides {
        let defaults = TcleanOverrides::default()
            .vis(VIS)
            .field("")
            .spw("")
            .antenna("")
            .scan("")
            .stokes("I")
            .intent(INTENT)
            .datacolumn("data")
            .phasecenter(PHASECENTER)
            .reffreq("3.0GHz")
            .deconvolver("mtmfs")
            .cell("1.0arcsec")
            .imsize(7290)
            .gridder("mosaic")
            .restoringbeam("common")
            .specmode("mfs")
            .nchan(-1)
            .outframe("LSRK")
            .perchanweightdensity(false)
            .wprojplanes(1)
            .mosweight(false)
            .conjbeams(false)
            .usepointing(false)
            .rotatepastep(360.0)
            .pblimit(0.2)
            .scales(vec![0])
            .nterms(2)
            .pbcor(false)
            .weighting("briggs")
            .robust(1.0)
            .npixels(0)
            .threshold(0.0)
            .nsigma(0.0)
            .cycleniter(-1)
            .cyclefactor(1.0)
            .interactive(false)
            .fastnoise(true)
            .calcres(true)
            .calcpsf(true)
            .savemodel("none");
        with_quick_imsize(defaults, settings)
    }

    fn run(&self, ctx: &mut TestContext, runner: &mut TaskRunner, env: &ScenarioEnv) -> HarnessResult<()> {
        let toolkit = env.toolkit;
        ctx.track(QL_ITER0);
        ctx.track(QL_ITER1);

        runner.run_tclean(
            &TcleanOverrides::default()
                .imagename(QL_ITER0)
                .niter(0)
                .restoration(false),
            None,
        )?;
        for ext in QL_SEED_EXTS {
            let dst = ctx.path(&format!("{QL_ITER1}{ext}"));
            copy_recursive(&ctx.path(&format!("{QL_ITER0}{ext}")), &dst)
                .map_err(|source| HarnessError::Staging { path: dst, source })?;
        }
        runner.run_tclean(
            &TcleanOverrides::default()
                .imagename(QL_ITER1)
                .niter(20000)
                .restoration(true)
                .nsigma(4.5)
                .cycleniter(500)
                .cyclefactor(2.0)
                .calcres(false)
                .calcpsf(false),
            None,
        )?;

        let pb = ctx.path(&format!("{QL_ITER1}.pb.tt0"));
        for (from, to) in QL_PBCOR {
            let outfile = format!("{QL_ITER1}{to}");
            toolkit.pbcor(&ctx.path(&format!("{QL_ITER1}{from}")), &pb, &ctx.path(&outfile), -1.0)?;
            ctx.check_img_exists(toolkit, &outfile);
        }

        let pbcor_image = format!("{QL_ITER1}.image.pbcor.tt0");
        let rms_image = format!("{pbcor_image}.rms");
        toolkit.rms_image(&ctx.path(&pbcor_image), &ctx.path(&rms_image), &RmsImageSpec::default())?;
        ctx.check_img_exists(toolkit, &rms_image);

        let (cutout_box, _) = ql_cutout(env.settings);
        for ext in QL_CUTOUT_EXTS {
            let image = format!("{QL_ITER1}{ext}");
            let subim = format!("{image}.subim");
            toolkit.subimage(&ctx.path(&image), &ctx.path(&subim), &cutout_box)?;
            ctx.check_img_exists(toolkit, &subim);
        }
        if !ctx.imgs_exist_results().passed() {
            warn!("{}: some derived products are missing", ctx.test_name());
        }
        Ok(())
    }

    fn measure(&self, ctx: &mut TestContext, env: &ScenarioEnv) -> HarnessResult<MetricDicts> {
        let toolkit = env.toolkit;
        let (_, center) = ql_cutout(env.settings);
        let subim = format!("{QL_ITER1}.image.pbcor.tt0.subim");

        let peak = Selection::all().region_box(format!("{center},{center},{center},{center}"));
        let mut stats = StatsRecord::new();
        stats.insert("max".to_string(), Value::Float(image_max(ctx, toolkit, &subim, &peak)?));
        let beam = toolkit.restoring_beam(&ctx.path(&subim))?;
        stats.insert("beam".to_string(), Value::Floats(beam.as_array().to_vec()));

        let mut metrics = MetricDicts::new();
        metrics.insert(EXISTS.to_string(), ctx.existence_record());
        metrics.insert(STATS.to_string(), stats);
        metrics.insert(CHECKS.to_string(), model_column_record(ctx, toolkit)?);
        Ok(metrics)
    }

    fn verify(&self, ctx: &TestContext, metrics: &MetricDicts) -> HarnessResult<Report> {
        let comparator = ctx.comparator();
        let mut report = Report::new();
        verify_existence(comparator, metrics, &mut report)?;

        let max = metric_f64(metrics, STATS, "max")?;
        report.push(comparator.check_fracdiff(&max, &QL_FLUX_ONAXIS, "Frac Diff F_nu vs. on-axis", Tolerance::FLUX)?);
        report.push(comparator.check_fracdiff(&max, &QL_FLUX_CASA613, "Frac Diff F_nu vs. 6.1.3 image", Tolerance::FLUX)?);

        let beam = metric_floats(metrics, STATS, "beam")?;
        report.push(comparator.check_fracdiff(
            &beam,
            &QL_BEAM_CASA613,
            "Frac Diff Maj, Min, PA vs 6.1.3",
            Tolerance::FLUX,
        )?);
        verify_model_column(comparator, metrics, &mut report)?;
        Ok(report)
    }
}
