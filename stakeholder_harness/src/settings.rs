//! Run configuration: environment switches and the dispatcher's test table.

use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment switches, parsed once per run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvSettings {
    /// `QUICK_IMSIZE`: image size replacing the scenario's own
    pub quick_imsize: Option<i64>,
    /// `QUICK_SPWSEL`: single spectral window to image in cube tests
    pub quick_spwsel: Option<String>,
    /// `SPW_SEL`: comma separated spectral windows
    pub spw_sel: Option<Vec<String>>,
    /// `USE_CACHED_TCLEAN_VALS`: verify against the last saved metrics instead of imaging
    pub use_cached_tclean_vals: bool,
    /// `FULL_TEST`: ignore the quick reductions
    pub full_test: bool,
    /// `CFCACHE`: convolution function cache for awproject
    pub cfcache: Option<PathBuf>,
}

fn parse_flag(name: &str, value: &str) -> HarnessResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(HarnessError::Config(format!("{name}={other} is not a boolean"))),
    }
}

impl EnvSettings {
    pub fn from_env() -> HarnessResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> HarnessResult<Self> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let quick_imsize = match non_empty("QUICK_IMSIZE") {
            Some(v) => Some(v.trim().parse::<i64>().map_err(|e| {
                HarnessError::Config(format!("QUICK_IMSIZE={v} is not an integer: {e}"))
            })?),
            None => None,
        };
        let spw_sel = non_empty("SPW_SEL").map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });
        let flag = |name: &str| match lookup(name) {
            Some(v) => parse_flag(name, &v),
            None => Ok(false),
        };

        Ok(Self {
            quick_imsize,
            quick_spwsel: non_empty("QUICK_SPWSEL").map(|v| v.trim().to_string()),
            spw_sel,
            use_cached_tclean_vals: flag("USE_CACHED_TCLEAN_VALS")?,
            full_test: flag("FULL_TEST")?,
            cfcache: non_empty("CFCACHE").map(PathBuf::from),
        })
    }

    /// Image size override in effect, if any.
    pub fn imsize(&self) -> Option<i64> {
        if self.full_test {
            None
        } else {
            self.quick_imsize
        }
    }

    /// Spectral windows to image, given the scenario's full list.
    pub fn spws(&self, all: &[&str]) -> Vec<String> {
        if !self.full_test {
            if let Some(spw) = &self.quick_spwsel {
                return vec![spw.clone()];
            }
        }
        match &self.spw_sel {
            Some(list) => list.clone(),
            None => all.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Dispatcher table of short test names to scenario module paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub tests: BTreeMap<String, String>,
}

impl DispatchConfig {
    pub fn from_yaml_str(yaml: &str) -> HarnessResult<Self> {
        serde_yml::from_str(yaml).map_err(|e| HarnessError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> HarnessResult<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn module_path(&self, name: &str) -> Option<&str> {
        self.tests.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tests.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_empty_environment() {
        let env = EnvSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(env, EnvSettings::default());
        assert_eq!(env.spws(&["2", "8", "14"]), vec!["2", "8", "14"]);
        assert_eq!(env.imsize(), None);
    }

    #[test]
    fn test_quick_settings() {
        let env = EnvSettings::from_lookup(lookup(&[
            ("QUICK_IMSIZE", "512"),
            ("QUICK_SPWSEL", "8"),
            ("SPW_SEL", "2, 14"),
            ("USE_CACHED_TCLEAN_VALS", "yes"),
        ]))
        .unwrap();
        assert_eq!(env.imsize(), Some(512));
        assert_eq!(env.spws(&["2", "8", "14"]), vec!["8"]);
        assert!(env.use_cached_tclean_vals);
    }

    #[test]
    fn test_full_test_ignores_quick_reductions() {
        let env = EnvSettings::from_lookup(lookup(&[
            ("QUICK_IMSIZE", "512"),
            ("QUICK_SPWSEL", "8"),
            ("SPW_SEL", "2,14"),
            ("FULL_TEST", "1"),
        ]))
        .unwrap();
        assert_eq!(env.imsize(), None);
        assert_eq!(env.spws(&["2", "8", "14"]), vec!["2", "14"]);
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        assert!(matches!(
            EnvSettings::from_lookup(lookup(&[("QUICK_IMSIZE", "big")])),
            Err(HarnessError::Config(_))
        ));
        assert!(matches!(
            EnvSettings::from_lookup(lookup(&[("FULL_TEST", "maybe")])),
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn test_dispatch_config_yaml() {
        let config = DispatchConfig::from_yaml_str(
            "tests:\n  j1302_ql: vlass::j1302_ql\n  standard_cube_briggsbwtaper: alma::standard_cube_briggsbwtaper\n",
        )
        .unwrap();
        assert_eq!(config.module_path("j1302_ql"), Some("vlass::j1302_ql"));
        assert_eq!(config.module_path("nope"), None);
        assert_eq!(config.names().count(), 2);
    }
}
