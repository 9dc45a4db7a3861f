//! Per-test context: working directory, staged inputs, produced images,
//! image existence bookkeeping and the runtime check.

use crate::error::{HarnessError, HarnessResult};
use crate::toolkit::{ImageToolkit, StatsRecord};
use log::{error, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tolerance::{Comparator, Comparison, Match, Report, Value};

/// Fractional tolerance of the runtime check.
pub const RUNTIME_EPSILON: f64 = 0.1;

/// Recorded wall time of a test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeBaseline {
    pub label: &'static str,
    pub serial_secs: f64,
    /// Used for parallel runs when recorded
    pub parallel_secs: Option<f64>,
}

impl RuntimeBaseline {
    pub fn seconds(&self, parallel: bool) -> f64 {
        match (parallel, self.parallel_secs) {
            (true, Some(secs)) => secs,
            _ => self.serial_secs,
        }
    }
}

/// Whether a runtime outside tolerance fails the test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuntimePolicy {
    /// Log the comparison only
    #[default]
    Advisory,
    /// Fold the comparison into the report
    Enforced,
}

/// Strip `prefix` from the start of `s` when present.
pub fn remove_prefix<'a>(s: &'a str, prefix: &str) -> &'a str {
    s.strip_prefix(prefix).unwrap_or(s)
}

/// Recursive copy of a file or directory tree.
pub fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst).map(|_| ())
    }
}

/// Report entry for an image existence check.
pub fn image_exists_check(comparator: &Comparator, image: &str, exists: bool) -> Comparison {
    comparator.check_val(
        &Value::Bool(exists),
        &Value::Bool(true),
        &format!("image_exists('{image}')"),
        Match::Exact,
    )
}

/// Report entry for a column count; exactly one column must match.
pub fn column_count_check(comparator: &Comparator, column: &str, count: i64) -> Comparison {
    comparator.check_val(
        &Value::Int(count),
        &Value::Int(1),
        &format!("count('{column}')"),
        Match::Exact,
    )
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        Ok(())
    }
}

fn entry_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

pub struct TestContext {
    test_name: String,
    workdir: PathBuf,
    data_path: PathBuf,
    parallel: bool,
    comparator: Comparator,
    staged: Vec<PathBuf>,
    produced: Vec<String>,
    exists: Report,
    existence: StatsRecord,
    started: Instant,
    keep_products: bool,
    torn_down: bool,
}

impl TestContext {
    /// Create the working directory and an empty bookkeeping state.
    pub fn setup(
        test_name: impl Into<String>,
        workdir: &Path,
        data_path: &Path,
        parallel: bool,
    ) -> HarnessResult<Self> {
        let test_name = test_name.into();
        fs::create_dir_all(workdir).map_err(|source| HarnessError::Staging {
            path: workdir.to_path_buf(),
            source,
        })?;
        info!(
            "{test_name}: working directory {}, data path {}, parallel={parallel}",
            workdir.display(),
            data_path.display()
        );
        Ok(Self {
            comparator: Comparator::new(test_name.clone()),
            test_name,
            workdir: workdir.to_path_buf(),
            data_path: data_path.to_path_buf(),
            parallel,
            staged: Vec::new(),
            produced: Vec::new(),
            exists: Report::new(),
            existence: StatsRecord::new(),
            started: Instant::now(),
            keep_products: false,
            torn_down: false,
        })
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    /// Path of `name` inside the working directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.workdir.join(name)
    }

    /// Switch the input data directory. A missing directory is logged and ignored.
    pub fn set_data_path(&mut self, path: &Path) {
        if path.exists() {
            info!("Setting data_path: {}", path.display());
            self.data_path = path.to_path_buf();
        } else {
            warn!(
                "File path: {} does not exist, keeping {}",
                path.display(),
                self.data_path.display()
            );
        }
    }

    /// Leave produced images in place at teardown.
    pub fn keep_products(&mut self, keep: bool) {
        self.keep_products = keep;
    }

    /// Copy an input (measurement set, mask, ...) from the data path into the working directory.
    pub fn stage(&mut self, name: &str) -> HarnessResult<PathBuf> {
        let src = self.data_path.join(name);
        if !src.exists() {
            return Err(HarnessError::Setup(format!(
                "input {} not found",
                src.display()
            )));
        }
        let dst = self.path(name);
        remove_path(&dst).map_err(|source| HarnessError::Staging {
            path: dst.clone(),
            source,
        })?;
        copy_recursive(&src, &dst).map_err(|source| HarnessError::Staging {
            path: dst.clone(),
            source,
        })?;
        info!("{}: staged {name}", self.test_name);
        self.staged.push(dst.clone());
        Ok(dst)
    }

    /// Stage a prebuilt mask, replacing any previous copy.
    pub fn prep_input_mask(&mut self, maskname: &str) -> HarnessResult<PathBuf> {
        self.stage(maskname)
    }

    /// Register a name prefix of images this test produces, for teardown.
    pub fn track(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if !self.produced.contains(&prefix) {
            self.produced.push(prefix);
        }
    }

    /// Reset the runtime clock, normally right after staging.
    pub fn restart_timer(&mut self) {
        self.started = Instant::now();
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Remove `name` from the working directory if it exists.
    pub fn remove(&self, name: &str) -> HarnessResult<()> {
        let path = self.path(name);
        remove_path(&path).map_err(|source| HarnessError::Staging { path, source })
    }

    /// Remove every entry whose name contains `needle` and ends with `suffix`.
    pub fn remove_matching(&self, needle: &str, suffix: &str) -> HarnessResult<()> {
        let names = entry_names(&self.workdir).map_err(|source| HarnessError::Staging {
            path: self.workdir.clone(),
            source,
        })?;
        for name in names
            .iter()
            .filter(|n| n.contains(needle) && n.ends_with(suffix))
        {
            self.remove(name)?;
        }
        Ok(())
    }

    /// Copy every `old.*` product to the matching `new.*` name.
    ///
    /// A parallel `.workdirectory` is recreated and its per-process products
    /// copied the same way. Names containing `ignore` are skipped.
    pub fn copy_products(&self, old: &str, new: &str, ignore: Option<&str>) -> HarnessResult<()> {
        copy_products_in(&self.workdir, old, new, ignore).map_err(|source| {
            HarnessError::Staging {
                path: self.path(new),
                source,
            }
        })
    }

    /// Replace the Taylor-term PSFs of `old` with those of `new`.
    pub fn replace_psf(&self, old: &str, new: &str) -> HarnessResult<()> {
        for tt in ["tt0", "tt1", "tt2"] {
            let dst = self.path(&format!("{old}.psf.{tt}"));
            let src = self.path(&format!("{new}.psf.{tt}"));
            let staging = |source| HarnessError::Staging {
                path: dst.clone(),
                source,
            };
            remove_path(&dst).map_err(staging)?;
            copy_recursive(&src, &dst).map_err(staging)?;
        }
        Ok(())
    }

    /// Sum two masks and threshold the sum at 0.5 into `combined`.
    pub fn combine_masks(
        &self,
        toolkit: &dyn ImageToolkit,
        first: &str,
        second: &str,
        sum: &str,
        combined: &str,
    ) -> HarnessResult<()> {
        toolkit.sum_masks(&self.path(first), &self.path(second), &self.path(sum))?;
        toolkit.threshold_mask(&self.path(sum), &self.path(combined), 0.5)?;
        Ok(())
    }

    /// Record whether `image` exists. Missing images are logged immediately.
    pub fn check_img_exists(&mut self, toolkit: &dyn ImageToolkit, image: &str) -> bool {
        let exists = toolkit.image_exists(&self.path(image));
        let cmp = image_exists_check(&self.comparator, image, exists);
        if !exists {
            error!("{}", cmp.line.trim_end());
        }
        self.existence.insert(image.to_string(), Value::Bool(exists));
        self.exists.push(cmp)
    }

    /// Image name to existence flag of every `check_img_exists` call, for persisting.
    pub fn existence_record(&self) -> StatsRecord {
        self.existence.clone()
    }

    /// Collected results of every `check_img_exists` call.
    pub fn imgs_exist_results(&self) -> Report {
        self.exists.clone()
    }

    /// Number of columns of `table` named `column`.
    pub fn column_count(
        &self,
        toolkit: &dyn ImageToolkit,
        table: &str,
        column: &str,
    ) -> HarnessResult<i64> {
        let count = toolkit
            .column_names(&self.path(table))?
            .iter()
            .filter(|c| c.as_str() == column)
            .count();
        Ok(count as i64)
    }

    /// Check that `table` has exactly one column named `column`.
    pub fn check_column_exists(
        &self,
        toolkit: &dyn ImageToolkit,
        table: &str,
        column: &str,
    ) -> HarnessResult<Comparison> {
        let count = self.column_count(toolkit, table, column)?;
        Ok(column_count_check(&self.comparator, column, count))
    }

    /// Compare elapsed time against `baseline`.
    ///
    /// Under `Enforced` the result is pushed to `report`; under `Advisory` it is
    /// only logged. Returns the comparison either way.
    pub fn check_runtime(
        &self,
        baseline: &RuntimeBaseline,
        policy: RuntimePolicy,
        report: &mut Report,
    ) -> Comparison {
        let runtime = self.elapsed_secs();
        let expected = baseline.seconds(self.parallel);
        let cmp = self.comparator.check_val(
            &Value::Float(runtime),
            &Value::Float(expected),
            baseline.label,
            Match::Epsilon(RUNTIME_EPSILON),
        );
        match policy {
            RuntimePolicy::Enforced => {
                report.push(cmp.clone());
            }
            RuntimePolicy::Advisory if cmp.passed => info!("{}", cmp.line.trim_end()),
            RuntimePolicy::Advisory => warn!("{} (advisory)", cmp.line.trim_end()),
        }
        cmp
    }

    /// Remove staged inputs and produced images.
    pub fn teardown(&mut self) -> HarnessResult<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;
        for path in &self.staged {
            remove_path(path).map_err(|source| HarnessError::Staging {
                path: path.clone(),
                source,
            })?;
        }
        if self.keep_products || !self.workdir.exists() {
            return Ok(());
        }
        let names = entry_names(&self.workdir).map_err(|source| HarnessError::Staging {
            path: self.workdir.clone(),
            source,
        })?;
        for name in names
            .iter()
            .filter(|n| self.produced.iter().any(|p| n.starts_with(p.as_str())))
        {
            self.remove(name)?;
        }
        info!("{}: teardown complete", self.test_name);
        Ok(())
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!("{}: teardown failed: {e}", self.test_name);
        }
    }
}

fn copy_products_in(dir: &Path, old: &str, new: &str, ignore: Option<&str>) -> io::Result<()> {
    let prefix = format!("{old}.");
    let workdirectory = format!("{old}.workdirectory");
    for name in entry_names(dir)? {
        if !name.starts_with(&prefix) || ignore.is_some_and(|i| name.contains(i)) {
            continue;
        }
        let new_name = format!("{new}{}", &name[old.len()..]);
        if name == workdirectory {
            let new_dir = dir.join(&new_name);
            fs::create_dir_all(&new_dir)?;
            let src_dir = dir.join(&name);
            for inner in entry_names(&src_dir)? {
                if let Some(rest) = inner.strip_prefix(old) {
                    copy_recursive(&src_dir.join(&inner), &new_dir.join(format!("{new}{rest}")))?;
                }
            }
        } else {
            copy_recursive(&dir.join(&name), &dir.join(new_name))?;
        }
    }
    Ok(())
}
