//! External collaborators of the harness.
//!
//! The imaging task and the image analysis toolkit are black boxes. The
//! harness only talks to them through the two traits in this module, so the
//! same scenarios run against a real installation (`CommandToolkit`) or an
//! in-process stand-in (`MockToolkit`).

pub mod command;
pub mod mock;

use crate::error::ToolkitError;
use crate::params::TcleanParams;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tolerance::Value;

pub use command::CommandToolkit;
pub use mock::MockToolkit;

pub type ToolkitResult<T> = Result<T, ToolkitError>;

/// Output of an image statistics query (`max`, `min`, `rms`, `npts`, ...).
pub type StatsRecord = BTreeMap<String, Value>;

/// Region and plane selection for a statistics query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(rename = "box", skip_serializing_if = "Option::is_none")]
    pub region_box: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stokes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chans: Option<String>,
    /// Region text, e.g. an `ellipse[[...]]` fit region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Mask image restricting the statistics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn region_box(mut self, region_box: impl Into<String>) -> Self {
        self.region_box = Some(region_box.into());
        self
    }

    pub fn stokes(mut self, stokes: impl Into<String>) -> Self {
        self.stokes = Some(stokes.into());
        self
    }

    pub fn chans(mut self, chans: impl Into<String>) -> Self {
        self.chans = Some(chans.into());
        self
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn mask(mut self, mask: impl Into<String>) -> Self {
        self.mask = Some(mask.into());
        self
    }
}

/// Restoring beam in arcsec (axes) and degrees (position angle).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RestoringBeam {
    pub major: f64,
    pub minor: f64,
    pub positionangle: f64,
}

impl RestoringBeam {
    pub fn new(major: f64, minor: f64, positionangle: f64) -> Self {
        Self {
            major,
            minor,
            positionangle,
        }
    }

    /// `[major, minor, positionangle]`, the order the references are recorded in.
    pub fn as_array(&self) -> [f64; 3] {
        [self.major, self.minor, self.positionangle]
    }
}

/// Parameters of the sliding-window noise image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmsImageSpec {
    pub grid: [u32; 2],
    pub anchor: String,
    pub xlength: String,
    pub ylength: String,
    pub interp: String,
    pub stattype: String,
    pub statalg: String,
    pub zscore: f64,
    pub maxiter: i64,
}

/// Quick-look pipeline settings.
impl Default for RmsImageSpec {
    fn default() -> Self {
        Self {
            grid: [10, 10],
            anchor: "ref".to_string(),
            xlength: "60arcsec".to_string(),
            ylength: "60arcsec".to_string(),
            interp: "cubic".to_string(),
            stattype: "xmadm".to_string(),
            statalg: "chauvenet".to_string(),
            zscore: -1.0,
            maxiter: -1,
        }
    }
}

/// The imaging task.
pub trait ImagingTask {
    /// Run one task call. Products are written under `workdir`.
    fn tclean(&self, workdir: &Path, params: &TcleanParams) -> ToolkitResult<()>;
}

/// Image analysis and table queries used for verification and post-processing.
pub trait ImageToolkit {
    fn statistics(&self, image: &Path, selection: &Selection) -> ToolkitResult<StatsRecord>;

    /// Single restoring beam from the image header.
    fn restoring_beam(&self, image: &Path) -> ToolkitResult<RestoringBeam>;

    /// One beam per channel, first polarization plane.
    fn per_plane_beams(&self, image: &Path) -> ToolkitResult<Vec<RestoringBeam>>;

    /// Pixel mask value at `[x, y, stokes, chan]`.
    fn pixel_mask(&self, image: &Path, pixel: [i64; 4]) -> ToolkitResult<bool>;

    /// Divide `image` by `pb` into `outfile`.
    fn pbcor(&self, image: &Path, pb: &Path, outfile: &Path, cutoff: f64) -> ToolkitResult<()>;

    fn rms_image(&self, image: &Path, outfile: &Path, spec: &RmsImageSpec) -> ToolkitResult<()>;

    fn subimage(&self, image: &Path, outfile: &Path, region_box: &str) -> ToolkitResult<()>;

    /// Pixel-wise sum of two masks.
    fn sum_masks(&self, first: &Path, second: &Path, outfile: &Path) -> ToolkitResult<()>;

    /// Mask of the pixels of `image` above `threshold`.
    fn threshold_mask(&self, image: &Path, outfile: &Path, threshold: f64) -> ToolkitResult<()>;

    fn column_names(&self, table: &Path) -> ToolkitResult<Vec<String>>;

    /// Toolkit version string, if the backend reports one.
    fn version(&self) -> Option<String>;

    fn image_exists(&self, image: &Path) -> bool {
        image.is_dir()
    }
}

/// Per-channel beam maps keyed `*0`, `*1`, ... as major, minor and position angle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CubeBeamStats {
    pub bmin: BTreeMap<String, f64>,
    pub bmaj: BTreeMap<String, f64>,
    pub pa: BTreeMap<String, f64>,
}

/// Split the per-plane beams of a cube into per-channel maps.
pub fn cube_beam_stats(toolkit: &dyn ImageToolkit, image: &Path) -> ToolkitResult<CubeBeamStats> {
    let mut stats = CubeBeamStats::default();
    for (chan, beam) in toolkit.per_plane_beams(image)?.iter().enumerate() {
        let key = format!("*{chan}");
        stats.bmin.insert(key.clone(), beam.minor);
        stats.bmaj.insert(key.clone(), beam.major);
        stats.pa.insert(key, beam.positionangle);
    }
    Ok(stats)
}

/// Fetch a single numeric statistic from a record.
pub fn stat_f64(record: &StatsRecord, key: &str, image: &Path) -> ToolkitResult<f64> {
    record
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolkitError::NoStatistics(format!("{key} of {}", image.display())))
}
