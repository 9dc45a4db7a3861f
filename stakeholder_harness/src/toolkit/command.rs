//! Backend that drives an external helper program.
//!
//! Each operation spawns the helper once, writes a single JSON request to its
//! stdin and reads a single JSON response from its stdout:
//!
//! ```text
//! -> {"op": "statistics", "image": "/work/a.image.tt0", "selection": {"box": "10,10,10,10"}}
//! <- {"ok": true, "result": {"max": 0.33, "rms": 0.0006}}
//! ```
//!
//! A response with `"ok": false` carries an `"error"` message.

use super::{
    ImageToolkit, ImagingTask, RestoringBeam, RmsImageSpec, Selection, StatsRecord, ToolkitResult,
};
use crate::error::ToolkitError;
use crate::params::TcleanParams;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Tclean {
        workdir: &'a Path,
        params: &'a TcleanParams,
    },
    Statistics {
        image: &'a Path,
        selection: &'a Selection,
    },
    RestoringBeam {
        image: &'a Path,
    },
    PerPlaneBeams {
        image: &'a Path,
    },
    PixelMask {
        image: &'a Path,
        pixel: [i64; 4],
    },
    Pbcor {
        image: &'a Path,
        pbimage: &'a Path,
        outfile: &'a Path,
        cutoff: f64,
    },
    RmsImage {
        image: &'a Path,
        outfile: &'a Path,
        spec: &'a RmsImageSpec,
    },
    Subimage {
        image: &'a Path,
        outfile: &'a Path,
        #[serde(rename = "box")]
        region_box: &'a str,
    },
    SumMasks {
        images: [&'a Path; 2],
        outfile: &'a Path,
    },
    ThresholdMask {
        image: &'a Path,
        outfile: &'a Path,
        threshold: f64,
    },
    ColumnNames {
        table: &'a Path,
    },
    Version,
}

impl Request<'_> {
    fn name(&self) -> &'static str {
        match self {
            Request::Tclean { .. } => "tclean",
            Request::Statistics { .. } => "statistics",
            Request::RestoringBeam { .. } => "restoring_beam",
            Request::PerPlaneBeams { .. } => "per_plane_beams",
            Request::PixelMask { .. } => "pixel_mask",
            Request::Pbcor { .. } => "pbcor",
            Request::RmsImage { .. } => "rms_image",
            Request::Subimage { .. } => "subimage",
            Request::SumMasks { .. } => "sum_masks",
            Request::ThresholdMask { .. } => "threshold_mask",
            Request::ColumnNames { .. } => "column_names",
            Request::Version => "version",
        }
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Toolkit backed by a helper program speaking JSON over stdin/stdout.
#[derive(Debug, Clone)]
pub struct CommandToolkit {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandToolkit {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments passed before the request is written.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn call<T: DeserializeOwned>(&self, request: &Request) -> ToolkitResult<T> {
        let op = request.name();
        let payload = serde_json::to_vec(request)?;
        debug!("{} <- {op}", self.program.display());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolkitError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .map_err(|source| ToolkitError::Launch {
                    program: self.program.display().to_string(),
                    source,
                })?;
        }

        let output = child
            .wait_with_output()
            .map_err(|source| ToolkitError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(ToolkitError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_response(op, &output.stdout)
    }
}

fn parse_response<T: DeserializeOwned>(op: &str, stdout: &[u8]) -> ToolkitResult<T> {
    let response: Response = serde_json::from_slice(stdout)?;
    if !response.ok {
        return Err(ToolkitError::Operation {
            op: op.to_string(),
            message: response
                .error
                .unwrap_or_else(|| "no error message".to_string()),
        });
    }
    Ok(serde_json::from_value(response.result)?)
}

impl ImagingTask for CommandToolkit {
    fn tclean(&self, workdir: &Path, params: &TcleanParams) -> ToolkitResult<()> {
        self.call::<serde_json::Value>(&Request::Tclean { workdir, params })
            .map(|_| ())
    }
}

impl ImageToolkit for CommandToolkit {
    fn statistics(&self, image: &Path, selection: &Selection) -> ToolkitResult<StatsRecord> {
        self.call(&Request::Statistics { image, selection })
    }

    fn restoring_beam(&self, image: &Path) -> ToolkitResult<RestoringBeam> {
        self.call(&Request::RestoringBeam { image })
    }

    fn per_plane_beams(&self, image: &Path) -> ToolkitResult<Vec<RestoringBeam>> {
        self.call(&Request::PerPlaneBeams { image })
    }

    fn pixel_mask(&self, image: &Path, pixel: [i64; 4]) -> ToolkitResult<bool> {
        self.call(&Request::PixelMask { image, pixel })
    }

    fn pbcor(&self, image: &Path, pb: &Path, outfile: &Path, cutoff: f64) -> ToolkitResult<()> {
        self.call::<serde_json::Value>(&Request::Pbcor {
            image,
            pbimage: pb,
            outfile,
            cutoff,
        })
        .map(|_| ())
    }

    fn rms_image(&self, image: &Path, outfile: &Path, spec: &RmsImageSpec) -> ToolkitResult<()> {
        self.call::<serde_json::Value>(&Request::RmsImage {
            image,
            outfile,
            spec,
        })
        .map(|_| ())
    }

    fn subimage(&self, image: &Path, outfile: &Path, region_box: &str) -> ToolkitResult<()> {
        self.call::<serde_json::Value>(&Request::Subimage {
            image,
            outfile,
            region_box,
        })
        .map(|_| ())
    }

    fn sum_masks(&self, first: &Path, second: &Path, outfile: &Path) -> ToolkitResult<()> {
        self.call::<serde_json::Value>(&Request::SumMasks {
            images: [first, second],
            outfile,
        })
        .map(|_| ())
    }

    fn threshold_mask(&self, image: &Path, outfile: &Path, threshold: f64) -> ToolkitResult<()> {
        self.call::<serde_json::Value>(&Request::ThresholdMask {
            image,
            outfile,
            threshold,
        })
        .map(|_| ())
    }

    fn column_names(&self, table: &Path) -> ToolkitResult<Vec<String>> {
        self.call(&Request::ColumnNames { table })
    }

    fn version(&self) -> Option<String> {
        match self.call::<String>(&Request::Version) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("toolkit version unavailable: {e}");
                None
            }
        }
    }
}
