//! Task invocation wrapper.

use crate::error::{HarnessError, HarnessResult};
use crate::params::{dev_task_call, ParamDiff, TcleanOverrides, TcleanParams};
use crate::toolkit::ImagingTask;
use log::{error, info};
use std::path::{Path, PathBuf};

/// Runs task calls for one test on top of that test's default parameters.
pub struct TaskRunner<'a> {
    task: &'a dyn ImagingTask,
    workdir: PathBuf,
    defaults: TcleanParams,
    calls: Vec<TcleanParams>,
}

impl<'a> TaskRunner<'a> {
    /// `scenario_defaults` are layered on the task defaults. When they leave
    /// `parallel` unset, the context's mode applies.
    pub fn new(
        task: &'a dyn ImagingTask,
        workdir: &Path,
        scenario_defaults: &TcleanOverrides,
        parallel: bool,
    ) -> Self {
        let mut defaults = TcleanParams::default().merged(scenario_defaults);
        if scenario_defaults.parallel.is_none() {
            defaults.parallel = parallel;
        }
        Self {
            task,
            workdir: workdir.to_path_buf(),
            defaults,
            calls: Vec::new(),
        }
    }

    pub fn defaults(&self) -> &TcleanParams {
        &self.defaults
    }

    /// Merge `overrides` on the defaults and run the task.
    ///
    /// With a `compare` record every parameter is logged as unchanged,
    /// changed or new relative to it. Failures are logged with the full call
    /// and returned without retry.
    pub fn run_tclean(
        &mut self,
        overrides: &TcleanOverrides,
        compare: Option<&TcleanParams>,
    ) -> HarnessResult<TcleanParams> {
        let params = self.defaults.merged(overrides);
        let record = params.to_record();
        let call = dev_task_call("tclean", &record, &TcleanParams::default().to_record());

        if let Some(expected) = compare {
            let diff = ParamDiff::between(&record, &expected.to_record());
            diff.log("run_tclean");
            info!("Differing parameters only call: {}", diff.call_string("tclean"));
        }
        info!("{call}");

        self.calls.push(params.clone());
        match self.task.tclean(&self.workdir, &params) {
            Ok(()) => Ok(params),
            Err(source) => {
                error!("task call failed: {call}: {source}");
                Err(HarnessError::Task {
                    imagename: params.imagename.clone(),
                    source,
                })
            }
        }
    }

    /// Every call issued so far, including a failed last one.
    pub fn calls(&self) -> &[TcleanParams] {
        &self.calls
    }

    pub fn into_calls(self) -> Vec<TcleanParams> {
        self.calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::MockToolkit;
    use tempfile::TempDir;

    #[test]
    fn test_overrides_layer_on_scenario_defaults() {
        let dir = TempDir::new().unwrap();
        let mock = MockToolkit::new();
        let scenario = TcleanOverrides::default()
            .imagename("img")
            .deconvolver("mtmfs")
            .gridder("mosaic");
        let mut runner = TaskRunner::new(&mock, dir.path(), &scenario, true);

        let params = runner
            .run_tclean(&TcleanOverrides::default().niter(0), None)
            .unwrap();
        assert_eq!(params.gridder, "mosaic");
        assert_eq!(params.niter, 0);
        assert!(params.parallel);

        let params = runner
            .run_tclean(&TcleanOverrides::default().parallel(false), None)
            .unwrap();
        assert!(!params.parallel);
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(mock.tclean_calls().len(), 2);
    }

    #[test]
    fn test_scenario_can_pin_serial_mode() {
        let dir = TempDir::new().unwrap();
        let mock = MockToolkit::new();
        let scenario = TcleanOverrides::default().imagename("img").parallel(false);
        let runner = TaskRunner::new(&mock, dir.path(), &scenario, true);
        assert!(!runner.defaults().parallel);
    }

    #[test]
    fn test_failure_propagates_unchanged() {
        let dir = TempDir::new().unwrap();
        let mock = MockToolkit::new().fail_on_call(0);
        let scenario = TcleanOverrides::default().imagename("img");
        let mut runner = TaskRunner::new(&mock, dir.path(), &scenario, false);

        let compare = TcleanParams::default();
        let err = runner
            .run_tclean(&TcleanOverrides::default(), Some(&compare))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Task { ref imagename, .. } if imagename == "img"));
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(mock.tclean_calls().len(), 1);
    }
}
