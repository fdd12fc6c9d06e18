use std::time::Instant;

/// Logs how long a named phase (parsing, building, ...) took.
pub struct TaskTimer {
    start_time: Instant,
    task_name: String,
}

impl TaskTimer {
    pub fn new(task_name: impl AsRef<str>) -> Self {
        let start_time = Instant::now();
        tracing::trace!(task = task_name.as_ref(), "Task started");
        Self {
            start_time,
            task_name: task_name.as_ref().to_string(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    pub fn stop(&self) {
        tracing::debug!(
            task = %self.task_name,
            elapsed_ms = self.elapsed_ms(),
            "Task finished"
        );
    }
}
