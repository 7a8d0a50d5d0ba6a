use std::time::Duration;

/// Tuning for a [`Monitor`](super::Monitor) worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Pause between two polls of the working set change log.
    pub poll_interval: Duration,
    /// Number of change records requested per poll before the first growth.
    pub initial_capacity: usize,
    /// Name given to the worker thread.
    pub thread_name: String,
}

impl MonitorConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
    pub const DEFAULT_INITIAL_CAPACITY: usize = 100;

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity.max(1);
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            initial_capacity: Self::DEFAULT_INITIAL_CAPACITY,
            thread_name: String::from("ws-monitor"),
        }
    }
}
