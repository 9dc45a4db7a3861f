//! ALMA single-field cube, briggsbwtaper weighting, checked against fiducial dictionaries.

use super::{metric, metric_record, verify_existence, Scenario, ScenarioEnv, EXISTS};
use crate::context::{remove_prefix, RuntimeBaseline, TestContext};
use crate::error::HarnessResult;
use crate::expdicts::read_testcase_expdicts;
use crate::params::TcleanOverrides;
use crate::persist::MetricDicts;
use crate::settings::EnvSettings;
use crate::task::TaskRunner;
use crate::toolkit::{cube_beam_stats, Selection, StatsRecord};
use std::collections::BTreeMap;
use tolerance::{Match, Report, Value};

pub const VIS: &str = "E2E6.1.00034.S_tclean.ms";

/// Fiducial file in the data directory and the version it was recorded with.
pub const FIDUCIAL_FILE: &str = "test_stk_alma_pipeline_imaging_exp_dicts.json";
pub const REFVERSION: &str = "6.3.0.22";

const EPSILON: f64 = 0.01;

const IMAGE_REGION: &str =
    "ellipse[[11.47881897deg, -73.25881015deg], [9.0414arcsec, 8.4854arcsec], 90.00000000deg]";
const PB_REGION: &str =
    "ellipse[[11.47659846deg, -73.25817055deg], [23.1086arcsec, 23.0957arcsec], 90.00000000deg]";
const PSF_REGION: &str =
    "ellipse[[11.47648725deg, -73.25812003deg], [8.0291arcsec, 6.8080arcsec], 90.00000000deg]";

/// Products of a standard-gridder cube with pbcor.
const PRODUCT_EXTS: [&str; 8] = [
    ".psf",
    ".residual",
    ".image",
    ".image.pbcor",
    ".mask",
    ".pb",
    ".model",
    ".sumwt",
];

/// `.image` mask pixels on either side of the mask edge.
const MASK_PIXELS: [([i64; 4], bool); 4] = [
    ([40, 70, 0, 0], true),
    ([40, 71, 0, 0], false),
    ([10, 40, 0, 0], true),
    ([9, 40, 0, 0], false),
];
const IMGMASK: &str = "imgmask";

struct StatsQuery {
    record: &'static str,
    fiducial: &'static str,
    ext: &'static str,
}

const STATS_QUERIES: [StatsQuery; 7] = [
    StatsQuery { record: "im_stats_dict", fiducial: "exp_im_stats", ext: ".image" },
    StatsQuery { record: "mask_stats_dict", fiducial: "exp_mask_stats", ext: ".mask" },
    StatsQuery { record: "pb_stats_dict", fiducial: "exp_pb_stats", ext: ".pb" },
    StatsQuery { record: "psf_stats_dict", fiducial: "exp_psf_stats", ext: ".psf" },
    StatsQuery { record: "resid_stats_dict", fiducial: "exp_resid_stats", ext: ".residual" },
    StatsQuery { record: "model_stats_dict", fiducial: "exp_model_stats", ext: ".model" },
    StatsQuery { record: "sumwt_stats_dict", fiducial: "exp_sumwt_stats", ext: ".sumwt" },
];

/// Per-channel beam records, fiducials and report labels.
const BEAM_DICTS: [(&str, &str, &str); 3] = [
    ("bmin_dict", "exp_bmin_dict", ".image bmin"),
    ("bmaj_dict", "exp_bmaj_dict", ".image bmaj"),
    ("pa_dict", "exp_pa_dict", ".image pa"),
];

fn pixel_key(pixel: [i64; 4]) -> String {
    format!("{pixel:?}")
}

fn beam_record(beams: &BTreeMap<String, f64>) -> StatsRecord {
    beams
        .iter()
        .map(|(chan, v)| (chan.clone(), Value::Float(*v)))
        .collect()
}

/// Standard gridder cube of field 1, spw 0, with auto-multithresh masking.
pub struct StandardCubeBriggsBwTaper;

impl StandardCubeBriggsBwTaper {
    /// Image name of clean round `iter`, e.g. `standard_cube_briggsbwtaper.iter1`.
    fn image(&self, iter: u32) -> String {
        format!("{}.iter{iter}", remove_prefix(self.name(), "test_"))
    }

    fn selection(&self, ext: &str) -> Selection {
        match ext {
            ".image" | ".residual" => Selection::all().region(IMAGE_REGION),
            ".model" => Selection::all()
                .region(IMAGE_REGION)
                .mask(format!("{}.mask", self.image(1))),
            ".pb" => Selection::all().region(PB_REGION),
            ".psf" => Selection::all().region(PSF_REGION),
            _ => Selection::all(),
        }
    }
}

impl Scenario for StandardCubeBriggsBwTaper {
    fn name(&self) -> &'static str {
        "test_standard_cube_briggsbwtaper"
    }

    fn module_path(&self) -> &'static str {
        "alma::standard_cube_briggsbwtaper"
    }

    fn dataset(&self) -> &'static str {
        VIS
    }

    fn data_subdir(&self) -> &'static str {
        "alma"
    }

    fn inputs(&self) -> Vec<&'static str> {
        vec![VIS]
    }

    fn runtime_baseline(&self) -> Option<RuntimeBaseline> {
        None
    }

    fn defaults(&self, _settings: &EnvSettings) -> TcleanOverrides {
        TcleanOverrides::default()
            .vis(VIS)
            .field("1")
            .spw(vec!["0"])
            .imsize(vec![80, 80])
            .antenna("0,1,2,3,4,5,6,7,8")
            .scan("8,12,16")
            .intent("OBSERVE_TARGET#ON_SOURCE")
            .datacolumn("data")
            .cell(vec!["1.1arcsec"])
            .phasecenter("ICRS 00:45:54.3836 -073.15.29.413")
            .stokes("I")
            .specmode("cube")
            .nchan(508)
            .start("220.2526743594GHz")
            .width("0.2441741MHz")
            .outframe("LSRK")
            .pblimit(0.2)
            .perchanweightdensity(true)
            .gridder("standard")
            .mosweight(false)
            .deconvolver("hogbom")
            .usepointing(false)
            .weighting("briggsbwtaper")
            .restoringbeam("common")
            .robust(0.5)
            .npixels(0)
            .nsigma(0.0)
            .interactive(false)
            .usemask("auto-multithresh")
            .sidelobethreshold(1.25)
            .noisethreshold(5.0)
            .lownoisethreshold(2.0)
            .negativethreshold(0.0)
            .growiterations(75)
            .dogrowprune(true)
            .minpercentchange(1.0)
            .fastnoise(false)
            .savemodel("none")
            .verbose(true)
    }

    fn run(&self, ctx: &mut TestContext, runner: &mut TaskRunner, _env: &ScenarioEnv) -> HarnessResult<()> {
        let iter0 = self.image(0);
        let iter1 = self.image(1);
        ctx.track(remove_prefix(self.name(), "test_"));

        runner.run_tclean(
            &TcleanOverrides::default()
                .imagename(iter0.as_str())
                .restoration(false)
                .pbcor(false)
                .niter(0)
                .threshold("0.0mJy")
                .minbeamfrac(0.1),
            None,
        )?;

        ctx.copy_products(&iter0, &iter1, None)?;

        runner.run_tclean(
            &TcleanOverrides::default()
                .imagename(iter1.as_str())
                .restoration(true)
                .pbcor(true)
                .niter(20000)
                .threshold("0.354Jy")
                .minbeamfrac(0.08)
                .restart(true)
                .calcres(false)
                .calcpsf(false),
            None,
        )?;
        Ok(())
    }

    fn measure(&self, ctx: &mut TestContext, env: &ScenarioEnv) -> HarnessResult<MetricDicts> {
        let toolkit = env.toolkit;
        let img = self.image(1);
        let mut metrics = MetricDicts::new();

        for ext in PRODUCT_EXTS {
            ctx.check_img_exists(toolkit, &format!("{img}{ext}"));
        }

        let image = ctx.path(&format!("{img}.image"));
        let mut imgmask = StatsRecord::new();
        for (pixel, _) in MASK_PIXELS {
            imgmask.insert(pixel_key(pixel), Value::Bool(toolkit.pixel_mask(&image, pixel)?));
        }

        for query in &STATS_QUERIES {
            let path = ctx.path(&format!("{img}{}", query.ext));
            let stats = toolkit.statistics(&path, &self.selection(query.ext))?;
            metrics.insert(query.record.to_string(), stats);
        }

        let beams = cube_beam_stats(toolkit, &ctx.path(&format!("{img}.psf")))?;
        for ((record, _, _), dict) in BEAM_DICTS.iter().zip([&beams.bmin, &beams.bmaj, &beams.pa]) {
            metrics.insert(record.to_string(), beam_record(dict));
        }

        metrics.insert(EXISTS.to_string(), ctx.existence_record());
        metrics.insert(IMGMASK.to_string(), imgmask);
        Ok(metrics)
    }

    /// Per-channel beams are only compared for parallel runs, where the
    /// fiducials were recorded.
    fn verify(&self, ctx: &TestContext, metrics: &MetricDicts) -> HarnessResult<Report> {
        let comparator = ctx.comparator();
        let fiducials = read_testcase_expdicts(&ctx.data_path().join(FIDUCIAL_FILE), self.name(), REFVERSION)?;
        let img = self.image(1);

        let mut report = Report::new();
        verify_existence(comparator, metrics, &mut report)?;

        for (pixel, expected) in MASK_PIXELS {
            let key = pixel_key(pixel);
            let actual = metric(metrics, IMGMASK, &key)?;
            let label = format!("{img}.image mask at {key}");
            report.push(comparator.check_val(actual, &Value::Bool(expected), &label, Match::Exact));
        }

        for query in &STATS_QUERIES {
            let expected = fiducials.stats(query.fiducial)?;
            let actual = metric_record(metrics, query.record)?;
            report.extend(comparator.check_dict_vals(&expected, actual, query.ext, EPSILON));
        }

        if ctx.parallel() {
            for (record, fiducial, label) in BEAM_DICTS {
                let actual: BTreeMap<String, f64> = metric_record(metrics, record)?
                    .iter()
                    .filter_map(|(chan, v)| v.as_f64().map(|v| (chan.clone(), v)))
                    .collect();
                report.push(comparator.check_dict_vals_beam(&fiducials.beam(fiducial)?, &actual, label, EPSILON));
            }
        }
        Ok(report)
    }
}
