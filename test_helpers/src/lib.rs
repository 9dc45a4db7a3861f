//! Test helpers for the stakeholder harness
//!
//! Locates the workspace root and hands out scratch directories under
//! `test_output/` so that each test images into its own working directory.

use once_cell::sync::Lazy;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error type for test helper operations
#[derive(thiserror::Error, Debug)]
pub enum TestHelperError {
    #[error("Failed to find project root: {0}")]
    ProjectRootNotFound(String),
    #[error("Failed to prepare scratch directory {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Returns the path to the workspace root.
///
/// Walks up from the current directory until a `Cargo.toml` declaring
/// `[workspace]` is found.
pub fn find_project_root() -> Result<PathBuf, TestHelperError> {
    let mut current_dir = env::current_dir().map_err(|e| {
        TestHelperError::ProjectRootNotFound(format!("Failed to get current directory: {e}"))
    })?;

    loop {
        let cargo_toml = current_dir.join("Cargo.toml");
        if cargo_toml.exists() {
            let content = fs::read_to_string(&cargo_toml).map_err(|e| {
                TestHelperError::ProjectRootNotFound(format!("Failed to read Cargo.toml: {e}"))
            })?;

            if content.contains("[workspace]") {
                return Ok(current_dir);
            }
        }

        if !current_dir.pop() {
            break;
        }
    }

    Err(TestHelperError::ProjectRootNotFound(
        "Workspace root not found".to_string(),
    ))
}

static PROJECT_ROOT: Lazy<PathBuf> =
    Lazy::new(|| find_project_root().expect("Failed to find project root directory"));

/// Returns `<workspace>/test_output`, creating it if needed.
pub fn get_output_dir() -> PathBuf {
    let output_dir = PROJECT_ROOT.join("test_output");

    if !output_dir.exists() {
        fs::create_dir_all(&output_dir).expect("Failed to create output directory");
    }

    output_dir
}

/// Returns a path within the output directory.
pub fn output_path<P: AsRef<Path>>(path: P) -> PathBuf {
    get_output_dir().join(path)
}

/// Returns an empty working directory `test_output/<name>`.
///
/// Anything left behind by a previous run of the same test is removed first.
pub fn scratch_dir(name: &str) -> Result<PathBuf, TestHelperError> {
    let dir = output_path(name);
    let wrap = |source| TestHelperError::Scratch {
        path: dir.clone(),
        source,
    };
    if dir.exists() {
        fs::remove_dir_all(&dir).map_err(wrap)?;
    }
    fs::create_dir_all(&dir).map_err(wrap)?;
    Ok(dir)
}

/// Creates a stand-in for an on-disk image or measurement set.
///
/// Images and measurement sets are directories; the stand-in holds a single
/// `table.info` file so that recursive copies have something to copy.
pub fn make_fake_table(dir: &Path, name: &str) -> io::Result<PathBuf> {
    let path = dir.join(name);
    fs::create_dir_all(&path)?;
    fs::write(path.join("table.info"), format!("Type = Image\n{name}\n"))?;
    Ok(path)
}
