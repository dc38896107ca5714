//! Ambient configuration surface.
//!
//! Every tunable the core needs is a field here, constructed once at process
//! start and threaded through component constructors — no global statics.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Overall deadline for a search job, from creation to terminal event.
    pub search_overall_timeout: Duration,
    /// Deadline for a single external source within a search job.
    pub search_per_source_timeout: Duration,
    /// Overall deadline for a deep-search / AI job.
    pub deep_overall_timeout: Duration,
    /// Deadline for a single sub-task within a deep-search job.
    pub deep_per_subtask_timeout: Duration,
    /// Number of events retained per job's Journal ring buffer.
    pub event_buffer_size: usize,
    /// How long terminal jobs/sub-tasks/evidence are kept before the sweeper purges them.
    pub retention_window: Duration,
    /// How often the sweeper loop runs.
    pub sweeper_interval: Duration,
    /// Maximum redispatch attempts for a sub-task failing with a retryable reason.
    pub max_subtask_retries: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            search_overall_timeout: Duration::from_secs(30),
            search_per_source_timeout: Duration::from_secs(10),
            deep_overall_timeout: Duration::from_secs(15 * 60),
            deep_per_subtask_timeout: Duration::from_secs(120),
            event_buffer_size: 256,
            retention_window: Duration::from_secs(24 * 60 * 60),
            sweeper_interval: Duration::from_secs(30),
            max_subtask_retries: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.event_buffer_size, 256);
        assert_eq!(cfg.sweeper_interval, Duration::from_secs(30));
    }
}
