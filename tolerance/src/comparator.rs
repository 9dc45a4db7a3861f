//! Metric comparator
//!
//! Compares an observed statistic (scalar or array) against a reference value
//! and produces a reproducible one-line report entry. Two thresholds apply:
//! exceeding `desired` logs a warning, exceeding `maximum` fails the check.
//! The band between the two is a soft-fail region that never flips the verdict.

use crate::report::Report;
use crate::value::Value;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised when two statistics cannot be compared at all.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComparisonError {
    #[error("{label}: actual has {actual} elements but expected has {expected}")]
    ShapeMismatch {
        label: String,
        actual: usize,
        expected: usize,
    },
    #[error("{0}: nothing to compare")]
    Empty(String),
}

/// Verdict string used in every report line.
pub fn verdict(passed: bool) -> &'static str {
    if passed {
        "PASS"
    } else {
        "FAIL"
    }
}

/// Desired/maximum tolerance pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Above this a warning is logged
    pub desired: f64,
    /// Above this the check fails (inclusive bound)
    pub maximum: f64,
}

impl Tolerance {
    /// Flux density: 5% goal, 10% acceptable
    pub const FLUX: Tolerance = Tolerance {
        desired: 0.05,
        maximum: 0.10,
    };

    /// Spectral index: 0.1 goal, 0.2 acceptable
    pub const SPECTRAL_INDEX: Tolerance = Tolerance {
        desired: 0.1,
        maximum: 0.2,
    };

    pub fn new(desired: f64, maximum: f64) -> Self {
        Self { desired, maximum }
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self::FLUX
    }
}

/// How the per-element difference is computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiffMode {
    /// `|a - e| / |e|`. Not guarded against a zero reference.
    Fractional,
    /// `|a - e| / max(|e|, 2 * rms)`
    NoiseFloor { rms: f64 },
    /// `|a - e|`
    Absolute,
}

impl DiffMode {
    fn element_diff(&self, actual: f64, expected: f64) -> f64 {
        let delta = (actual - expected).abs();
        match *self {
            DiffMode::Fractional => delta / expected.abs(),
            DiffMode::NoiseFloor { rms } => delta / expected.abs().max(2.0 * rms),
            DiffMode::Absolute => delta,
        }
    }
}

/// Anything that can be viewed as a flat run of f64 values.
pub trait AsValues {
    fn as_values(&self) -> &[f64];
}

impl AsValues for f64 {
    fn as_values(&self) -> &[f64] {
        std::slice::from_ref(self)
    }
}

impl AsValues for [f64] {
    fn as_values(&self) -> &[f64] {
        self
    }
}

impl<const N: usize> AsValues for [f64; N] {
    fn as_values(&self) -> &[f64] {
        self
    }
}

impl AsValues for Vec<f64> {
    fn as_values(&self) -> &[f64] {
        self
    }
}

/// Result of a single comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub passed: bool,
    /// Reduced difference that was thresholded
    pub diff: f64,
    /// Report line, newline terminated
    pub line: String,
}

/// Noise estimates of the two Taylor-term images a spectral index is derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseEstimates {
    pub tt0: f64,
    pub rms_tt0: f64,
    pub tt1: f64,
    pub rms_tt1: f64,
}

impl NoiseEstimates {
    /// Propagated uncertainty of `alpha = tt1 / tt0`.
    pub fn sigma_alpha(&self, alpha: f64) -> f64 {
        let r0 = self.rms_tt0 / self.tt0;
        let r1 = self.rms_tt1 / self.tt1;
        alpha.abs() * (r0 * r0 + r1 * r1).sqrt()
    }
}

/// How `check_val` decides equality.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Match {
    Exact,
    /// Fractional difference strictly below epsilon (absolute when the reference is 0)
    Epsilon(f64),
}

/// One fiducial entry: `[exact, value]` in the reference JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expected(pub bool, pub Value);

/// Fiducial dictionary for one image (`exp_im_stats`, `exp_pb_stats`, ...).
pub type ExpDict = BTreeMap<String, Expected>;

fn format_values(values: &[f64]) -> String {
    if values.len() == 1 {
        format!("{:?}", values[0])
    } else {
        format!("{values:?}")
    }
}

/// Reduce element differences with `max`, letting NaN poison the result.
fn reduce_max(diffs: &[f64]) -> f64 {
    if diffs.iter().any(|d| d.is_nan()) {
        return f64::NAN;
    }
    diffs.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Comparator bound to one test name, which prefixes every report line.
#[derive(Debug, Clone)]
pub struct Comparator {
    test_name: String,
}

impl Comparator {
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
        }
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    /// Element-wise differences, broadcasting a single-element side.
    fn element_diffs(
        &self,
        mode: DiffMode,
        actual: &[f64],
        expected: &[f64],
        label: &str,
    ) -> Result<Vec<f64>, ComparisonError> {
        Ok(pair_up(actual, expected, label)?
            .into_iter()
            .map(|(a, e)| mode.element_diff(a, e))
            .collect())
    }

    /// Compare with an explicit difference mode.
    pub fn check_diff<A, E>(
        &self,
        mode: DiffMode,
        actual: &A,
        expected: &E,
        label: &str,
        tolerance: Tolerance,
    ) -> Result<Comparison, ComparisonError>
    where
        A: AsValues + ?Sized,
        E: AsValues + ?Sized,
    {
        let actual = actual.as_values();
        let expected = expected.as_values();
        let diffs = self.element_diffs(mode, actual, expected, label)?;
        let diff = reduce_max(&diffs);

        if diff > tolerance.desired || diff.is_nan() {
            warn!(
                "Warning, {label}: {} vs desired {}, (actual: {}, expected: {})",
                format_values(&diffs),
                tolerance.desired,
                format_values(actual),
                format_values(expected)
            );
        }

        let passed = diff <= tolerance.maximum;
        let line = format!(
            "[ {} ] {} is {:?} ( {} : should be < {}) (raw actual/expected values: {}/{})\n",
            self.test_name,
            label,
            diff,
            verdict(passed),
            tolerance.maximum,
            format_values(actual),
            format_values(expected)
        );

        Ok(Comparison { passed, diff, line })
    }

    /// Fractional difference `|a - e| / |e|`, reduced with `max`.
    pub fn check_fracdiff<A, E>(
        &self,
        actual: &A,
        expected: &E,
        label: &str,
        tolerance: Tolerance,
    ) -> Result<Comparison, ComparisonError>
    where
        A: AsValues + ?Sized,
        E: AsValues + ?Sized,
    {
        self.check_diff(DiffMode::Fractional, actual, expected, label, tolerance)
    }

    /// Difference relative to `max(|e|, 2 * rms)`, safe for a zero reference.
    pub fn check_noise_floor<A, E>(
        &self,
        actual: &A,
        expected: &E,
        rms: f64,
        label: &str,
        tolerance: Tolerance,
    ) -> Result<Comparison, ComparisonError>
    where
        A: AsValues + ?Sized,
        E: AsValues + ?Sized,
    {
        self.check_diff(
            DiffMode::NoiseFloor { rms },
            actual,
            expected,
            label,
            tolerance,
        )
    }

    /// Spectral index comparison.
    ///
    /// The absolute difference is reduced by the uncertainty propagated from the
    /// two Taylor-term noise estimates before it is thresholded.
    pub fn check_spectral_index(
        &self,
        actual: f64,
        expected: f64,
        noise: NoiseEstimates,
        label: &str,
        tolerance: Tolerance,
    ) -> Comparison {
        let sigma = noise.sigma_alpha(actual);
        let raw = (actual - expected).abs();
        let diff = if raw.is_nan() || sigma.is_nan() {
            f64::NAN
        } else {
            (raw - sigma).max(0.0)
        };

        if diff > tolerance.desired || diff.is_nan() {
            warn!(
                "Warning, {label}: {diff:?} vs desired {} (actual: {actual:?}, expected: {expected:?}, sigma: {sigma:?})",
                tolerance.desired
            );
        }

        let passed = diff <= tolerance.maximum;
        let line = format!(
            "[ {} ] {} is {:?} ( {} : should be < {}) (raw actual/expected values: {:?}/{:?}, propagated error: {:?})\n",
            self.test_name,
            label,
            diff,
            verdict(passed),
            tolerance.maximum,
            actual,
            expected,
            sigma
        );
        Comparison { passed, diff, line }
    }

    /// Value check in the style of the imager test helpers: exact, or within a
    /// fractional epsilon.
    pub fn check_val(&self, actual: &Value, expected: &Value, label: &str, how: Match) -> Comparison {
        let (passed, diff) = match (how, actual.as_floats(), expected.as_floats()) {
            (Match::Epsilon(eps), Some(a), Some(e)) => match pair_up(&a, &e, label) {
                Ok(pairs) => {
                    let diffs: Vec<f64> = pairs.into_iter().map(|(x, y)| eps_diff(x, y)).collect();
                    let d = reduce_max(&diffs);
                    (d < eps, d)
                }
                Err(_) => (false, f64::NAN),
            },
            (_, Some(a), Some(e)) => {
                let equal = a.len() == e.len() && a.iter().zip(&e).all(|(x, y)| x == y);
                (equal, if equal { 0.0 } else { 1.0 })
            }
            _ => {
                let equal = actual == expected;
                (equal, if equal { 0.0 } else { 1.0 })
            }
        };

        let line = format!(
            "[ {} ] {} is {} ( {} : should be {})\n",
            self.test_name,
            label,
            actual,
            verdict(passed),
            expected
        );
        Comparison { passed, diff, line }
    }

    /// Check every fiducial entry against a statistics record.
    ///
    /// Each entry carries its own exact flag; inexact entries use `epsilon`.
    /// Keys missing from `actual` are reported as failures.
    pub fn check_dict_vals(
        &self,
        expected: &ExpDict,
        actual: &BTreeMap<String, Value>,
        suffix: &str,
        epsilon: f64,
    ) -> Report {
        let mut report = Report::new();
        for (key, Expected(exact, exp_val)) in expected {
            let label = format!("{suffix} {key}");
            match actual.get(key) {
                Some(act_val) => {
                    let how = if *exact {
                        Match::Exact
                    } else {
                        Match::Epsilon(epsilon)
                    };
                    report.push(self.check_val(act_val, exp_val, &label, how));
                }
                None => {
                    let line = format!(
                        "[ {} ] {} is missing ( {} : should be {})\n",
                        self.test_name,
                        label,
                        verdict(false),
                        exp_val
                    );
                    report.push_line(line, false);
                }
            }
        }
        report
    }

    /// Per-channel beam comparison collapsed into a single summary line.
    ///
    /// Channels are checked in channel order (`*0`, `*1`, ..., `*10`) and the
    /// walk stops at the first mismatch; the summary names the channel count
    /// reached.
    pub fn check_dict_vals_beam(
        &self,
        expected: &BTreeMap<String, f64>,
        actual: &BTreeMap<String, f64>,
        suffix: &str,
        epsilon: f64,
    ) -> Comparison {
        let mut channels: Vec<(&String, f64)> = expected.iter().map(|(k, &v)| (k, v)).collect();
        channels.sort_by(|a, b| (channel_index(a.0), a.0).cmp(&(channel_index(b.0), b.0)));

        let mut passed = true;
        let mut chans = 0usize;
        for (key, exp) in channels {
            let label = format!("{suffix} chan{chans}");
            chans += 1;
            let ok = match actual.get(key) {
                Some(&act) => {
                    self.check_val(
                        &Value::Float(act),
                        &Value::Float(exp),
                        &label,
                        Match::Epsilon(epsilon),
                    )
                    .passed
                }
                None => false,
            };
            if !ok {
                passed = false;
                break;
            }
        }
        self.check_val(
            &Value::Bool(passed),
            &Value::Bool(true),
            &format!("{suffix} chan{chans}"),
            Match::Exact,
        )
    }
}

/// Channel number of a `*N` beam key. Other keys sort first.
fn channel_index(key: &str) -> Option<u64> {
    key.strip_prefix('*')?.parse().ok()
}

/// Pair actual and expected elements, broadcasting a single-element side.
fn pair_up(
    actual: &[f64],
    expected: &[f64],
    label: &str,
) -> Result<Vec<(f64, f64)>, ComparisonError> {
    if actual.is_empty() || expected.is_empty() {
        return Err(ComparisonError::Empty(label.to_string()));
    }
    match (actual.len(), expected.len()) {
        (a, e) if a == e => Ok(actual.iter().copied().zip(expected.iter().copied()).collect()),
        (_, 1) => Ok(actual.iter().map(|&a| (a, expected[0])).collect()),
        (1, _) => Ok(expected.iter().map(|&e| (actual[0], e)).collect()),
        (a, e) => Err(ComparisonError::ShapeMismatch {
            label: label.to_string(),
            actual: a,
            expected: e,
        }),
    }
}

fn eps_diff(actual: f64, expected: f64) -> f64 {
    if expected == 0.0 {
        actual.abs()
    } else {
        (actual - expected).abs() / expected.abs()
    }
}
