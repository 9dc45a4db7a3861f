//! Saving and loading measured metric dictionaries.
//!
//! Files hold a single top-level key (the test name) mapping to the nested
//! dictionary. They are used to refresh reference values and to replay a
//! test's verification without rerunning the imaging task.

use crate::error::{HarnessError, HarnessResult};
use crate::toolkit::StatsRecord;
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Named statistics records of one test (`im_stats_dict`, `bmaj_dict`, ...).
pub type MetricDicts = BTreeMap<String, StatsRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum MetricFormat {
    #[default]
    Json,
    Pickle,
}

impl MetricFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            MetricFormat::Json => "json",
            MetricFormat::Pickle => "pickle",
        }
    }

    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(MetricFormat::Json),
            "pickle" | "pkl" => Some(MetricFormat::Pickle),
            _ => None,
        }
    }
}

impl fmt::Display for MetricFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for MetricFormat {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(MetricFormat::Json),
            "pickle" => Ok(MetricFormat::Pickle),
            other => Err(HarnessError::Config(format!(
                "unknown metric format {other:?}, expected json or pickle"
            ))),
        }
    }
}

fn persist_err(path: &Path, message: impl fmt::Display) -> HarnessError {
    HarnessError::Persist {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Write `{topkey: dict}` to `outfile` plus `_<version>` and the format's extension.
///
/// Returns the path written.
pub fn save_dict_to_file<T: Serialize>(
    topkey: &str,
    dict: &T,
    outfile: &Path,
    version: Option<&str>,
    format: MetricFormat,
) -> HarnessResult<PathBuf> {
    let mut name = outfile
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| persist_err(outfile, "output path has no file name"))?;
    if let Some(version) = version.filter(|v| !v.is_empty()) {
        name.push('_');
        name.push_str(version);
    }
    name.push('.');
    name.push_str(format.extension());
    let path = outfile.with_file_name(name);

    let mut nested = BTreeMap::new();
    nested.insert(topkey, dict);

    let bytes = match format {
        MetricFormat::Json => {
            serde_json::to_vec_pretty(&nested).map_err(|e| persist_err(&path, e))?
        }
        MetricFormat::Pickle => serde_pickle::to_vec(&nested, serde_pickle::SerOptions::new())
            .map_err(|e| persist_err(&path, e))?,
    };
    std::fs::write(&path, bytes).map_err(|e| persist_err(&path, e))?;
    info!("Saved metric dictionaries for {topkey} to {}", path.display());
    Ok(path)
}

/// Read a file written by [`save_dict_to_file`], returning its top key and dictionary.
pub fn load_dict_from_file<T: DeserializeOwned>(path: &Path) -> HarnessResult<(String, T)> {
    let format = MetricFormat::from_path(path)
        .ok_or_else(|| persist_err(path, "unrecognised file extension"))?;
    let bytes = std::fs::read(path).map_err(|e| persist_err(path, e))?;
    let nested: BTreeMap<String, T> = match format {
        MetricFormat::Json => serde_json::from_slice(&bytes).map_err(|e| persist_err(path, e))?,
        MetricFormat::Pickle => serde_pickle::from_slice(&bytes, serde_pickle::DeOptions::new())
            .map_err(|e| persist_err(path, e))?,
    };
    let mut entries = nested.into_iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        (None, _) => Err(persist_err(path, "file holds no dictionary")),
        (Some(_), Some(_)) => Err(persist_err(path, "file holds more than one top key")),
    }
}

/// Most recently modified metrics file in `dir` whose name starts with `stem`.
pub fn latest_metrics_file(dir: &Path, stem: &str) -> HarnessResult<Option<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(persist_err(dir, e)),
    };
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| persist_err(dir, e))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(stem))
            && MetricFormat::from_path(&path).is_some();
        if !matches {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_err(|e| persist_err(&path, e))?;
        if best.as_ref().map_or(true, |(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, path)| path))
}
