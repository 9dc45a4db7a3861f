//! Parameter records for the imaging task.
//!
//! `TcleanParams` is the complete, immutable argument set of one task call.
//! Scenarios describe their calls as `TcleanOverrides` layered on a per-test
//! default set, and `merged` produces the record that is actually executed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A parameter value as the task sees it.
///
/// Several task parameters accept either a scalar or a list (`imsize`,
/// `cell`, `scales`, `restoringbeam`, ...), so those fields carry this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    pub fn empty_list() -> Self {
        ParamValue::List(Vec::new())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        ParamValue::List(v.into_iter().map(Into::into).collect())
    }
}

/// Renders the way the task's own call logs show values: `True`, `'str'`, `[0, 5]`.
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => f.write_str("True"),
            ParamValue::Bool(false) => f.write_str("False"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v:?}"),
            ParamValue::Str(s) => write!(f, "'{s}'"),
            ParamValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// Flattened, ordered parameter map.
pub type ParamRecord = BTreeMap<String, ParamValue>;

macro_rules! tclean_params {
    ($($name:ident : $ty:ty = $default:expr),* $(,)?) => {
        /// Full argument set of one `tclean` call.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct TcleanParams {
            $(pub $name: $ty,)*
        }

        /// Task defaults as of CASA 6.4.0.
        impl Default for TcleanParams {
            fn default() -> Self {
                Self {
                    $($name: <$ty>::from($default),)*
                }
            }
        }

        /// Per-call overrides. Unset fields fall through to the base record.
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct TcleanOverrides {
            $(pub $name: Option<$ty>,)*
        }

        impl TcleanOverrides {
            $(
                pub fn $name(mut self, value: impl Into<$ty>) -> Self {
                    self.$name = Some(value.into());
                    self
                }
            )*

            /// Stack `top` over `self`; fields set in `top` win.
            pub fn layered(&self, top: &TcleanOverrides) -> TcleanOverrides {
                TcleanOverrides {
                    $($name: top.$name.clone().or_else(|| self.$name.clone()),)*
                }
            }

            /// Names of the fields that are set.
            pub fn set_fields(&self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(
                    if self.$name.is_some() {
                        names.push(stringify!($name));
                    }
                )*
                names
            }
        }

        impl TcleanParams {
            /// New record with every set override applied. `self` is untouched.
            pub fn merged(&self, overrides: &TcleanOverrides) -> TcleanParams {
                TcleanParams {
                    $($name: overrides.$name.clone().unwrap_or_else(|| self.$name.clone()),)*
                }
            }

            pub fn to_record(&self) -> ParamRecord {
                let mut record = ParamRecord::new();
                $(record.insert(stringify!($name).to_string(), ParamValue::from(self.$name.clone()));)*
                record
            }
        }
    };
}

tclean_params! {
    vis: String = "",
    selectdata: bool = true,
    field: String = "",
    spw: ParamValue = "",
    timerange: String = "",
    uvrange: String = "",
    antenna: String = "",
    scan: String = "",
    observation: String = "",
    intent: String = "",
    datacolumn: String = "corrected",
    imagename: String = "",
    imsize: ParamValue = vec![100],
    cell: ParamValue = vec!["1arcsec"],
    phasecenter: String = "",
    stokes: String = "I",
    projection: String = "SIN",
    startmodel: String = "",
    specmode: String = "mfs",
    reffreq: String = "",
    nchan: i64 = -1,
    start: String = "",
    width: String = "",
    outframe: String = "LSRK",
    veltype: String = "radio",
    restfreq: ParamValue = ParamValue::empty_list(),
    interpolation: String = "linear",
    perchanweightdensity: bool = true,
    gridder: String = "standard",
    facets: i64 = 1,
    psfphasecenter: String = "",
    wprojplanes: i64 = 1,
    vptable: String = "",
    mosweight: bool = true,
    aterm: bool = true,
    psterm: bool = false,
    wbawp: bool = true,
    conjbeams: bool = false,
    cfcache: String = "",
    usepointing: bool = false,
    computepastep: f64 = 360.0,
    rotatepastep: f64 = 360.0,
    pointingoffsetsigdev: ParamValue = ParamValue::empty_list(),
    pblimit: f64 = 0.2,
    normtype: String = "flatnoise",
    deconvolver: String = "hogbom",
    scales: ParamValue = "",
    nterms: i64 = 2,
    smallscalebias: f64 = 0.0,
    restoration: bool = true,
    restoringbeam: ParamValue = "",
    pbcor: bool = false,
    outlierfile: String = "",
    weighting: String = "natural",
    robust: f64 = 0.5,
    noise: String = "1.0Jy",
    npixels: i64 = 0,
    uvtaper: ParamValue = ParamValue::empty_list(),
    niter: i64 = 0,
    gain: f64 = 0.1,
    threshold: ParamValue = 0.0,
    nsigma: f64 = 0.0,
    cycleniter: i64 = -1,
    cyclefactor: f64 = 1.0,
    minpsffraction: f64 = 0.05,
    maxpsffraction: f64 = 0.8,
    interactive: bool = false,
    usemask: String = "user",
    mask: String = "",
    pbmask: f64 = 0.0,
    sidelobethreshold: f64 = 3.0,
    noisethreshold: f64 = 5.0,
    lownoisethreshold: f64 = 1.5,
    negativethreshold: f64 = 0.0,
    smoothfactor: f64 = 1.0,
    minbeamfrac: f64 = 0.3,
    cutthreshold: f64 = 0.01,
    growiterations: i64 = 75,
    dogrowprune: bool = true,
    minpercentchange: f64 = -1.0,
    verbose: bool = false,
    fastnoise: bool = true,
    restart: bool = true,
    savemodel: String = "none",
    calcres: bool = true,
    calcpsf: bool = true,
    parallel: bool = false,
}

/// Three-way classification of a call against a comparison record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamDiff {
    /// Same value in both records
    pub unchanged: Vec<String>,
    /// `(name, expected, actual)`
    pub changed: Vec<(String, ParamValue, ParamValue)>,
    /// Present only in the actual record
    pub added: Vec<(String, ParamValue)>,
}

impl ParamDiff {
    /// Classify every parameter of `actual` against `expected`.
    ///
    /// Keys present only in `expected` are not reported.
    pub fn between(actual: &ParamRecord, expected: &ParamRecord) -> Self {
        let mut diff = ParamDiff::default();
        for (name, value) in actual {
            match expected.get(name) {
                Some(exp) if exp == value => diff.unchanged.push(name.clone()),
                Some(exp) => diff
                    .changed
                    .push((name.clone(), exp.clone(), value.clone())),
                None => diff.added.push((name.clone(), value.clone())),
            }
        }
        diff
    }

    pub fn is_identical(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty()
    }

    /// Render the changed and added parameters as a call, e.g. `tclean(niter=0,mask='a.mask')`.
    pub fn call_string(&self, task: &str) -> String {
        let args: Vec<String> = self
            .changed
            .iter()
            .map(|(name, _, actual)| (name, actual))
            .chain(self.added.iter().map(|(name, value)| (name, value)))
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!("{task}({})", args.join(","))
    }

    /// Log the classification at info level.
    pub fn log(&self, task: &str) {
        log::info!("{task}: unchanged parameters: {:?}", self.unchanged);
        for (name, expected, actual) in &self.changed {
            log::info!("{task}: changed parameter {name}: {expected} -> {actual}");
        }
        for (name, value) in &self.added {
            log::info!("{task}: new parameter {name}: {value}");
        }
    }
}

/// Call string naming only the parameters that differ from `defaults`.
pub fn dev_task_call(task: &str, params: &ParamRecord, defaults: &ParamRecord) -> String {
    ParamDiff::between(params, defaults).call_string(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_task_defaults() {
        let p = TcleanParams::default();
        assert_eq!(p.datacolumn, "corrected");
        assert_eq!(p.imsize, ParamValue::List(vec![ParamValue::Int(100)]));
        assert_eq!(p.cell, ParamValue::from(vec!["1arcsec"]));
        assert_eq!(p.nchan, -1);
        assert_eq!(p.pblimit, 0.2);
        assert_eq!(p.growiterations, 75);
        assert!(p.restart);
        assert!(!p.parallel);
    }

    #[test]
    fn test_merge_is_pure_and_overrides_win() {
        let base = TcleanParams::default();
        let overrides = TcleanOverrides::default()
            .niter(20000)
            .mask("QLcatmask.mask")
            .scales(vec![0, 5, 12])
            .nsigma(3.0);
        let merged = base.merged(&overrides);

        assert_eq!(merged.niter, 20000);
        assert_eq!(merged.mask, "QLcatmask.mask");
        assert_eq!(merged.scales, ParamValue::from(vec![0, 5, 12]));
        assert_eq!(merged.gridder, base.gridder);
        assert_eq!(base, TcleanParams::default());
    }

    #[test]
    fn test_layered_overrides() {
        let scenario = TcleanOverrides::default().gridder("mosaic").niter(0);
        let call = TcleanOverrides::default().niter(100);
        let stacked = scenario.layered(&call);
        assert_eq!(stacked.gridder.as_deref(), Some("mosaic"));
        assert_eq!(stacked.niter, Some(100));
        assert_eq!(stacked.set_fields(), vec!["gridder", "niter"]);
    }

    #[test]
    fn test_record_flattens_every_field() {
        let record = TcleanParams::default().to_record();
        assert_eq!(record.len(), 87);
        assert_eq!(record["stokes"], ParamValue::Str("I".into()));
        assert_eq!(record["calcres"], ParamValue::Bool(true));
    }

    #[test]
    fn test_three_way_diff() {
        let mut expected = TcleanParams::default().to_record();
        expected.remove("parallel");
        let actual = TcleanParams::default()
            .merged(&TcleanOverrides::default().niter(5).mask("m.mask"))
            .to_record();

        let diff = ParamDiff::between(&actual, &expected);
        assert_eq!(diff.changed.len(), 2);
        assert_eq!(diff.added, vec![("parallel".to_string(), ParamValue::Bool(false))]);
        assert_eq!(diff.unchanged.len(), 84);
        assert!(!diff.is_identical());
    }

    #[test]
    fn test_dev_task_call_string() {
        let defaults = TcleanParams::default().to_record();
        let params = TcleanParams::default()
            .merged(&TcleanOverrides::default().mask("combined.mask").niter(20000).calcres(false))
            .to_record();
        assert_eq!(
            dev_task_call("tclean", &params, &defaults),
            "tclean(calcres=False,mask='combined.mask',niter=20000)"
        );
        assert_eq!(dev_task_call("tclean", &defaults, &defaults), "tclean()");
    }

    #[test]
    fn test_display_uses_task_log_style() {
        assert_eq!(ParamValue::from(vec![0, 5, 12]).to_string(), "[0, 5, 12]");
        assert_eq!(ParamValue::from(vec![""]).to_string(), "['']");
        assert_eq!(ParamValue::from(3.0).to_string(), "3.0");
    }
}
