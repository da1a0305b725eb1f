//! Engine configuration.
//!
//! Built once at startup and shared read-only (`Arc<EngineConfig>`) by every
//! component. Durations are given in milliseconds when loaded from JSON:
//!
//! ```json
//! {
//!   "default_queue": { "max_queue_length": 1000, "retry_count": 3, "retry_delay_ms": 5000 },
//!   "activities": {
//!     "mail": { "max_workers": 4, "max_queue_length": 100, "retry_count": 5, "retry_delay_ms": 1000 }
//!   },
//!   "retry_timer_interval_ms": 1000
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, JobType};

/// Tunables of one queue (one activity type, or the default queue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfiguration {
    /// In-flight dispatches per pump. `None` means unbounded.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Jobs buffered in memory before new writes are suspended to the store.
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,

    /// Failed attempts retried before the job is poisoned.
    #[serde(default)]
    pub retry_count: u32,

    #[serde(rename = "retry_delay_ms", with = "duration_ms", default = "default_retry_delay")]
    pub retry_delay: Duration,
}

fn default_max_queue_length() -> usize {
    1000
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}

impl Default for QueueConfiguration {
    fn default() -> Self {
        Self {
            max_workers: None,
            max_queue_length: default_max_queue_length(),
            retry_count: 0,
            retry_delay: default_retry_delay(),
        }
    }
}

impl QueueConfiguration {
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    pub fn with_max_queue_length(mut self, max_queue_length: usize) -> Self {
        self.max_queue_length = max_queue_length;
        self
    }

    pub fn with_retry(mut self, retry_count: u32, retry_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_delay = retry_delay;
        self
    }

    fn validate(&self, name: &str) -> Result<(), EngineError> {
        if self.max_queue_length == 0 {
            return Err(EngineError::InvalidConfiguration(format!(
                "{name}: max_queue_length must be at least 1"
            )));
        }
        if self.max_workers == Some(0) {
            return Err(EngineError::InvalidConfiguration(format!(
                "{name}: max_workers must be at least 1 when set"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub default_queue: QueueConfiguration,

    /// Activity types with a dedicated queue and pump.
    #[serde(default)]
    pub activities: HashMap<JobType, QueueConfiguration>,

    /// Tick of the recoverable-action and failed-job timers.
    #[serde(
        rename = "retry_timer_interval_ms",
        with = "duration_ms",
        default = "default_retry_timer_interval"
    )]
    pub retry_timer_interval: Duration,
}

fn default_retry_timer_interval() -> Duration {
    Duration::from_secs(1)
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_queue: QueueConfiguration::default(),
            activities: HashMap::new(),
            retry_timer_interval: default_retry_timer_interval(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_default_queue(mut self, queue: QueueConfiguration) -> Self {
        self.default_queue = queue;
        self
    }

    pub fn with_activity(mut self, job_type: impl Into<JobType>, queue: QueueConfiguration) -> Self {
        self.activities.insert(job_type.into(), queue);
        self
    }

    pub fn with_retry_timer_interval(mut self, interval: Duration) -> Self {
        self.retry_timer_interval = interval;
        self
    }

    /// Settings governing jobs of `job_type` (dedicated queue, or the default).
    pub fn queue_for(&self, job_type: &JobType) -> &QueueConfiguration {
        self.activities.get(job_type).unwrap_or(&self.default_queue)
    }

    /// Activity types with a dedicated queue, sorted for stable startup order.
    pub fn activity_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.activities.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.default_queue.validate("default_queue")?;
        for (job_type, queue) in &self.activities {
            queue.validate(job_type.as_str())?;
        }
        if self.retry_timer_interval.is_zero() {
            return Err(EngineError::InvalidConfiguration(
                "retry_timer_interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
