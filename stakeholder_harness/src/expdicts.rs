//! Fiducial metric dictionaries stored as JSON.
//!
//! The file holds a `casa_version` entry plus one object per test:
//!
//! ```json
//! {
//!   "casa_version": "6.3.0.22",
//!   "test_standard_cube_briggsbwtaper": {
//!     "exp_im_stats": {"npts": [true, 6400], "max_val": [false, 1.25]},
//!     "exp_bmin_dict": {"*0": 8.5, "*1": 8.5}
//!   }
//! }
//! ```

use crate::error::{HarnessError, HarnessResult};
use log::warn;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tolerance::ExpDict;

#[derive(Debug, Clone, PartialEq)]
pub struct ExpDicts {
    pub casa_version: Option<String>,
    dicts: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct ExpDictFile {
    #[serde(default)]
    casa_version: Option<String>,
    #[serde(flatten)]
    tests: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl ExpDicts {
    /// Fiducials in `exp_*_stats` form.
    pub fn stats(&self, key: &str) -> HarnessResult<ExpDict> {
        self.decode(key)
    }

    /// Per-channel beam fiducials in `exp_*_dict` form.
    pub fn beam(&self, key: &str) -> HarnessResult<BTreeMap<String, f64>> {
        self.decode(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.dicts.contains_key(key)
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, key: &str) -> HarnessResult<T> {
        let value = self
            .dicts
            .get(key)
            .ok_or_else(|| HarnessError::Reference(format!("no fiducial dictionary {key}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| HarnessError::Reference(format!("{key}: {e}")))
    }
}

/// Load the fiducial dictionaries of `testname`.
///
/// A `casa_version` that differs from `refversion` is logged but not fatal.
pub fn read_testcase_expdicts(path: &Path, testname: &str, refversion: &str) -> HarnessResult<ExpDicts> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| HarnessError::Reference(format!("{}: {e}", path.display())))?;
    let file: ExpDictFile = serde_json::from_str(&text)
        .map_err(|e| HarnessError::Reference(format!("{}: {e}", path.display())))?;

    if file.casa_version.as_deref() != Some(refversion) {
        warn!(
            "fiducial file {} was recorded with casa_version {:?}, expected {refversion}",
            path.display(),
            file.casa_version
        );
    }

    let mut tests = file.tests;
    let dicts = tests.remove(testname).ok_or_else(|| {
        HarnessError::Reference(format!("{testname} not found in {}", path.display()))
    })?;
    Ok(ExpDicts {
        casa_version: file.casa_version,
        dicts,
    })
}
