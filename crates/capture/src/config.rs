//! Capture loop configuration

use std::time::Duration;

/// Capture loop configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Wait between the end of one tick and the start of the next
    pub interval: Duration,
    /// Wait after a tick that panicked
    pub error_backoff: Duration,
    /// Name of the background thread
    pub thread_name: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(40),
            error_backoff: Duration::from_secs(1),
            thread_name: "pipview-capture".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Approximate frame rate implied by the interval
    pub fn target_fps(&self) -> f64 {
        let secs = self.interval.as_secs_f64();
        if secs > 0.0 {
            1.0 / secs
        } else {
            f64::INFINITY
        }
    }
}
