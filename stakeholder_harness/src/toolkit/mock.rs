use super::{
    ImageToolkit, ImagingTask, RestoringBeam, RmsImageSpec, Selection, StatsRecord, ToolkitResult,
};
use crate::error::ToolkitError;
use crate::params::TcleanParams;
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tolerance::Value;

/// One recorded toolkit operation.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub op: &'static str,
    pub target: PathBuf,
}

#[derive(Debug, Clone)]
struct StatsRule {
    suffix: String,
    stokes: Option<String>,
    record: StatsRecord,
}

/// In-process stand-in for the imaging task and the image toolkit.
///
/// Task calls create empty product directories named the way the real task
/// names them, so staging, copying and existence checks behave as they would
/// on disk. Statistics and beams are canned, keyed by image name suffix.
#[derive(Debug, Default)]
pub struct MockToolkit {
    stats: Vec<StatsRule>,
    beams: Vec<(String, RestoringBeam)>,
    plane_beams: Vec<(String, Vec<RestoringBeam>)>,
    mask_pixels: Vec<([i64; 4], bool)>,
    columns: Vec<String>,
    fail_on_call: Option<usize>,
    version: Option<String>,
    tclean_calls: Mutex<Vec<TcleanParams>>,
    calls: Mutex<Vec<MockCall>>,
    model_columns: Mutex<Vec<PathBuf>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Build a statistics record from `(key, value)` pairs.
pub fn stats_record<K, V, I>(entries: I) -> StatsRecord
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Product extensions the task writes for one call.
fn product_extensions(params: &TcleanParams) -> Vec<String> {
    let mut exts = Vec::new();
    if params.deconvolver == "mtmfs" {
        let nterms = params.nterms.max(1) as usize;
        let nweights = 2 * nterms - 1;
        for tt in 0..nterms {
            exts.push(format!(".residual.tt{tt}"));
            exts.push(format!(".model.tt{tt}"));
            if params.restoration {
                exts.push(format!(".image.tt{tt}"));
            }
        }
        for tt in 0..nweights {
            exts.push(format!(".psf.tt{tt}"));
            exts.push(format!(".sumwt.tt{tt}"));
            exts.push(format!(".weight.tt{tt}"));
        }
        exts.push(".pb.tt0".to_string());
        if params.restoration && nterms > 1 {
            exts.push(".alpha".to_string());
            exts.push(".alpha.error".to_string());
        }
        if params.pbcor && params.restoration {
            exts.push(".image.tt0.pbcor".to_string());
        }
    } else {
        for ext in [".residual", ".model", ".psf", ".sumwt", ".pb", ".weight"] {
            exts.push(ext.to_string());
        }
        if params.restoration {
            exts.push(".image".to_string());
            if params.pbcor {
                exts.push(".image.pbcor".to_string());
            }
        }
    }
    if params.usemask != "user" || !params.mask.is_empty() {
        exts.push(".mask".to_string());
    }
    if params.parallel {
        exts.push(".workdirectory".to_string());
    }
    exts
}

impl MockToolkit {
    pub fn new() -> Self {
        Self {
            columns: vec![
                "UVW".to_string(),
                "FLAG".to_string(),
                "DATA".to_string(),
                "CORRECTED_DATA".to_string(),
            ],
            ..Default::default()
        }
    }

    /// Statistics returned for images whose name ends in `suffix`.
    pub fn with_stats(mut self, suffix: &str, record: StatsRecord) -> Self {
        self.stats.push(StatsRule {
            suffix: suffix.to_string(),
            stokes: None,
            record,
        });
        self
    }

    /// Statistics for one Stokes plane of images ending in `suffix`.
    pub fn with_stokes_stats(mut self, suffix: &str, stokes: &str, record: StatsRecord) -> Self {
        self.stats.push(StatsRule {
            suffix: suffix.to_string(),
            stokes: Some(stokes.to_string()),
            record,
        });
        self
    }

    pub fn with_beam(mut self, suffix: &str, beam: RestoringBeam) -> Self {
        self.beams.push((suffix.to_string(), beam));
        self
    }

    pub fn with_plane_beams(mut self, suffix: &str, beams: Vec<RestoringBeam>) -> Self {
        self.plane_beams.push((suffix.to_string(), beams));
        self
    }

    pub fn with_mask_pixel(mut self, pixel: [i64; 4], value: bool) -> Self {
        self.mask_pixels.push((pixel, value));
        self
    }

    /// Columns every measurement set reports, before any model column is saved.
    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Make the `index`-th task call (0-based) fail.
    pub fn fail_on_call(mut self, index: usize) -> Self {
        self.fail_on_call = Some(index);
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    /// Every task call received, in order.
    pub fn tclean_calls(&self) -> Vec<TcleanParams> {
        lock(&self.tclean_calls).clone()
    }

    /// Every toolkit operation received, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, op: &'static str, target: &Path) {
        debug!("mock toolkit: {op} {}", target.display());
        lock(&self.calls).push(MockCall {
            op,
            target: target.to_path_buf(),
        });
    }

    fn require(&self, op: &str, image: &Path) -> ToolkitResult<()> {
        if image.exists() {
            Ok(())
        } else {
            Err(ToolkitError::Operation {
                op: op.to_string(),
                message: format!("{} does not exist", image.display()),
            })
        }
    }

    fn create(&self, op: &str, outfile: &Path) -> ToolkitResult<()> {
        fs::create_dir_all(outfile).map_err(|e| ToolkitError::Operation {
            op: op.to_string(),
            message: format!("cannot create {}: {e}", outfile.display()),
        })
    }

    /// Longest configured suffix matching the image name.
    fn best_match<'a, T>(entries: &'a [(String, T)], image: &Path) -> Option<&'a T> {
        let name = file_name(image);
        entries
            .iter()
            .filter(|(suffix, _)| name.ends_with(suffix.as_str()))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, value)| value)
    }
}

impl ImagingTask for MockToolkit {
    fn tclean(&self, workdir: &Path, params: &TcleanParams) -> ToolkitResult<()> {
        let index = {
            let mut calls = lock(&self.tclean_calls);
            calls.push(params.clone());
            calls.len() - 1
        };
        self.record("tclean", &workdir.join(&params.imagename));

        if self.fail_on_call == Some(index) {
            return Err(ToolkitError::Operation {
                op: "tclean".to_string(),
                message: format!("injected failure on call {index}"),
            });
        }
        let vis = workdir.join(&params.vis);
        if !params.vis.is_empty() && !vis.exists() {
            return Err(ToolkitError::Operation {
                op: "tclean".to_string(),
                message: format!("measurement set {} not found", vis.display()),
            });
        }
        if !params.mask.is_empty() {
            self.require("tclean", &workdir.join(&params.mask))?;
        }

        for ext in product_extensions(params) {
            self.create("tclean", &workdir.join(format!("{}{ext}", params.imagename)))?;
        }
        if params.savemodel == "modelcolumn" {
            lock(&self.model_columns).push(vis);
        }
        Ok(())
    }
}

impl ImageToolkit for MockToolkit {
    fn statistics(&self, image: &Path, selection: &Selection) -> ToolkitResult<StatsRecord> {
        self.record("statistics", image);
        self.require("statistics", image)?;
        let name = file_name(image);
        self.stats
            .iter()
            .filter(|rule| name.ends_with(rule.suffix.as_str()))
            .filter(|rule| rule.stokes.is_none() || rule.stokes == selection.stokes)
            .max_by_key(|rule| (rule.suffix.len(), rule.stokes.is_some()))
            .map(|rule| rule.record.clone())
            .ok_or_else(|| ToolkitError::NoStatistics(image.display().to_string()))
    }

    fn restoring_beam(&self, image: &Path) -> ToolkitResult<RestoringBeam> {
        self.record("restoring_beam", image);
        self.require("restoring_beam", image)?;
        Self::best_match(&self.beams, image)
            .copied()
            .ok_or_else(|| ToolkitError::NoStatistics(format!("beam of {}", image.display())))
    }

    fn per_plane_beams(&self, image: &Path) -> ToolkitResult<Vec<RestoringBeam>> {
        self.record("per_plane_beams", image);
        Self::best_match(&self.plane_beams, image)
            .cloned()
            .ok_or_else(|| ToolkitError::NoStatistics(format!("beams of {}", image.display())))
    }

    fn pixel_mask(&self, image: &Path, pixel: [i64; 4]) -> ToolkitResult<bool> {
        self.record("pixel_mask", image);
        self.require("pixel_mask", image)?;
        Ok(self
            .mask_pixels
            .iter()
            .find(|(p, _)| *p == pixel)
            .map(|(_, v)| *v)
            .unwrap_or(false))
    }

    fn pbcor(&self, image: &Path, pb: &Path, outfile: &Path, _cutoff: f64) -> ToolkitResult<()> {
        self.record("pbcor", outfile);
        self.require("pbcor", image)?;
        self.require("pbcor", pb)?;
        self.create("pbcor", outfile)
    }

    fn rms_image(&self, image: &Path, outfile: &Path, _spec: &RmsImageSpec) -> ToolkitResult<()> {
        self.record("rms_image", outfile);
        self.require("rms_image", image)?;
        self.create("rms_image", outfile)
    }

    fn subimage(&self, image: &Path, outfile: &Path, _region_box: &str) -> ToolkitResult<()> {
        self.record("subimage", outfile);
        self.require("subimage", image)?;
        self.create("subimage", outfile)
    }

    fn sum_masks(&self, first: &Path, second: &Path, outfile: &Path) -> ToolkitResult<()> {
        self.record("sum_masks", outfile);
        self.require("sum_masks", first)?;
        self.require("sum_masks", second)?;
        self.create("sum_masks", outfile)
    }

    fn threshold_mask(&self, image: &Path, outfile: &Path, _threshold: f64) -> ToolkitResult<()> {
        self.record("threshold_mask", outfile);
        self.require("threshold_mask", image)?;
        self.create("threshold_mask", outfile)
    }

    fn column_names(&self, table: &Path) -> ToolkitResult<Vec<String>> {
        self.record("column_names", table);
        self.require("column_names", table)?;
        let mut columns = self.columns.clone();
        let has_model = lock(&self.model_columns).iter().any(|t| t == table);
        if has_model && !columns.iter().any(|c| c == "MODEL_DATA") {
            columns.push("MODEL_DATA".to_string());
        }
        Ok(columns)
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::TcleanOverrides;
    use tempfile::TempDir;

    fn mtmfs_call(imagename: &str) -> TcleanParams {
        TcleanParams::default().merged(
            &TcleanOverrides::default()
                .imagename(imagename)
                .deconvolver("mtmfs")
                .nterms(2),
        )
    }

    #[test]
    fn test_mtmfs_products_created() {
        let dir = TempDir::new().unwrap();
        let mock = MockToolkit::new();
        mock.tclean(dir.path(), &mtmfs_call("img")).unwrap();

        for ext in [".image.tt0", ".image.tt1", ".psf.tt2", ".sumwt.tt2", ".alpha", ".pb.tt0"] {
            assert!(dir.path().join(format!("img{ext}")).is_dir(), "missing {ext}");
        }
        assert!(!dir.path().join("img.image.tt2").exists());
        assert!(!dir.path().join("img.mask").exists());
        assert_eq!(mock.tclean_calls().len(), 1);
    }

    #[test]
    fn test_no_restoration_skips_images() {
        let dir = TempDir::new().unwrap();
        let mock = MockToolkit::new();
        let params = mtmfs_call("img").merged(&TcleanOverrides::default().restoration(false));
        mock.tclean(dir.path(), &params).unwrap();
        assert!(!dir.path().join("img.image.tt0").exists());
        assert!(dir.path().join("img.residual.tt0").exists());
    }

    #[test]
    fn test_injected_failure() {
        let dir = TempDir::new().unwrap();
        let mock = MockToolkit::new().fail_on_call(1);
        let params = mtmfs_call("img");
        assert!(mock.tclean(dir.path(), &params).is_ok());
        assert!(matches!(
            mock.tclean(dir.path(), &params),
            Err(ToolkitError::Operation { .. })
        ));
    }

    #[test]
    fn test_missing_mask_fails_call() {
        let dir = TempDir::new().unwrap();
        let mock = MockToolkit::new();
        let params = mtmfs_call("img").merged(&TcleanOverrides::default().mask("nope.mask"));
        assert!(mock.tclean(dir.path(), &params).is_err());
    }

    #[test]
    fn test_stats_pick_most_specific_rule() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("x.image.tt0");
        fs::create_dir_all(&image).unwrap();
        let mock = MockToolkit::new()
            .with_stats(".tt0", stats_record([("max", 1.0)]))
            .with_stats(".image.tt0", stats_record([("max", 2.0)]))
            .with_stokes_stats(".image.tt0", "V", stats_record([("max", 3.0)]));

        let all = mock.statistics(&image, &Selection::all()).unwrap();
        assert_eq!(all["max"], Value::Float(2.0));
        let v = mock.statistics(&image, &Selection::all().stokes("V")).unwrap();
        assert_eq!(v["max"], Value::Float(3.0));
        let q = mock.statistics(&image, &Selection::all().stokes("Q")).unwrap();
        assert_eq!(q["max"], Value::Float(2.0));
    }

    #[test]
    fn test_model_column_after_savemodel() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("vis.ms")).unwrap();
        let mock = MockToolkit::new();
        let ms = dir.path().join("vis.ms");
        assert!(!mock.column_names(&ms).unwrap().contains(&"MODEL_DATA".to_string()));

        let params = mtmfs_call("img").merged(
            &TcleanOverrides::default()
                .vis("vis.ms")
                .savemodel("modelcolumn"),
        );
        mock.tclean(dir.path(), &params).unwrap();
        assert!(mock.column_names(&ms).unwrap().contains(&"MODEL_DATA".to_string()));
    }
}
