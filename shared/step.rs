use std::time::Instant;

/// Logs the start, duration and outcome of a named pipeline step.
///
/// Call `finish` on success. A timer dropped without `finish` (an early `?`
/// return, a panic) is logged as failed.
pub struct StepTimer {
    name: String,
    started: Instant,
    finished: bool,
}

impl StepTimer {
    pub fn start(name: impl Into<String>) -> Self {
        let name = name.into();
        log::info!("Starting step: {name}");
        Self {
            name,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn finish(mut self) {
        self.finished = true;
        log::info!(
            "Completed step: {} in {:.2} seconds",
            self.name,
            self.started.elapsed().as_secs_f64()
        );
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        if !self.finished {
            log::error!(
                "Step '{}' failed after {:.2} seconds",
                self.name,
                self.started.elapsed().as_secs_f64()
            );
        }
    }
}
