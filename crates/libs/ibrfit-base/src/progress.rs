//! Progress reporting for long running operations.
use crate::FitError;

/// Receives progress notifications from a running fit.
///
/// Progress is monotonic between `0` and the value passed to
/// [`ProgressMonitor::set_maximum`].
pub trait ProgressMonitor {
    /// Sets the upper bound of the progress.
    fn set_maximum(&mut self, maximum: f64);

    /// Reports the current progress.
    fn set_progress(&mut self, progress: f64);

    /// Describes the stage currently running.
    fn set_stage(&mut self, _stage: &str) {}

    /// Called once when the operation finished successfully.
    fn loading_complete(&mut self);

    /// Called once when the operation failed and will not produce a result.
    fn loading_failed(&mut self, err: &FitError);
}

/// Progress monitor that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressMonitor for NoProgress {
    fn set_maximum(&mut self, _maximum: f64) {}

    fn set_progress(&mut self, _progress: f64) {}

    fn loading_complete(&mut self) {}

    fn loading_failed(&mut self, _err: &FitError) {}
}

/// Progress monitor forwarding the notifications to the logger.
#[derive(Debug, Default, Clone)]
pub struct LogProgress {
    maximum: f64,
    progress: f64,
}

impl LogProgress {
    /// Returns the last reported progress.
    pub fn progress(&self) -> f64 { self.progress }
}

impl ProgressMonitor for LogProgress {
    fn set_maximum(&mut self, maximum: f64) { self.maximum = maximum; }

    fn set_progress(&mut self, progress: f64) {
        self.progress = progress;
        log::info!("Progress: {:.1} / {:.1}", progress, self.maximum);
    }

    fn set_stage(&mut self, stage: &str) { log::info!("{}", stage); }

    fn loading_complete(&mut self) { log::info!("Fitting complete."); }

    fn loading_failed(&mut self, err: &FitError) { log::error!("Fitting failed: {}", err); }
}
