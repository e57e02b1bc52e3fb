//! Configuration type definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::LogicalType;

/// Largest bounded-channel capacity, in rows.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 24;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Expand and order transfers by foreign keys (default: false).
    #[serde(default)]
    pub dependency_resolution: bool,

    /// Properties shared by every registered transfer.
    #[serde(default)]
    pub properties: TransferProperties,
}

/// Transfer behavior configuration.
///
/// All fields use `Option<T>` to distinguish "not set" (use the default, or
/// the shared value when merged over a base) from "explicitly set". The
/// engine reads them through the `get_*` accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferProperties {
    /// Bounded channel capacity in rows. Default: 2 × workers × fetch size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    /// Consumer (target writer) count. Default: 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Source cursor fetch hint in rows. Default: 1000.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_size: Option<usize>,

    /// Rows per insert batch. Default: 1000.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Batches per commit. Default: 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_frequency: Option<usize>,

    /// Bound on every blocking wait, in seconds. Default: 300.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,

    /// Progress sampling interval, in seconds. Default: 5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_interval_secs: Option<f64>,

    /// Progress sink file. Standard output when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<PathBuf>,

    /// Structural policy applied to the target. Default: create_if_absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_policy: Option<TargetPolicy>,

    /// Policy applied to the source after a successful transfer. Default: none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_policy: Option<SourcePolicy>,

    /// Source column types rejected at mapping time. Default: none rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_types: Option<Vec<LogicalType>>,
}

impl TransferProperties {
    /// Create properties with every value at its default.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.fetch_size = Some(size);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn with_commit_frequency(mut self, batches: usize) -> Self {
        self.commit_frequency = Some(batches);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval_secs = Some(interval.as_secs_f64());
        self
    }

    pub fn with_metrics_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.metrics_path = Some(path.into());
        self
    }

    pub fn with_target_policy(mut self, policy: TargetPolicy) -> Self {
        self.target_policy = Some(policy);
        self
    }

    pub fn with_source_policy(mut self, policy: SourcePolicy) -> Self {
        self.source_policy = Some(policy);
        self
    }

    pub fn with_unsupported_types(mut self, types: Vec<LogicalType>) -> Self {
        self.unsupported_types = Some(types);
        self
    }

    /// Overlay these (per-unit) properties on a shared base: values set
    /// here win, everything else comes from `base`.
    pub fn merged_over(&self, base: &TransferProperties) -> TransferProperties {
        TransferProperties {
            queue_capacity: self.queue_capacity.or(base.queue_capacity),
            workers: self.workers.or(base.workers),
            fetch_size: self.fetch_size.or(base.fetch_size),
            batch_size: self.batch_size.or(base.batch_size),
            commit_frequency: self.commit_frequency.or(base.commit_frequency),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
            sample_interval_secs: self.sample_interval_secs.or(base.sample_interval_secs),
            metrics_path: self
                .metrics_path
                .clone()
                .or_else(|| base.metrics_path.clone()),
            target_policy: self.target_policy.or(base.target_policy),
            source_policy: self.source_policy.or(base.source_policy),
            unsupported_types: self
                .unsupported_types
                .clone()
                .or_else(|| base.unsupported_types.clone()),
        }
    }

    // Accessor methods that return the effective value (with fallback defaults)

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(1)
    }

    pub fn get_fetch_size(&self) -> usize {
        self.fetch_size.unwrap_or(1_000)
    }

    pub fn get_queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or_else(|| {
            self.get_workers()
                .saturating_mul(self.get_fetch_size())
                .saturating_mul(2)
        })
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(1_000)
    }

    pub fn get_commit_frequency(&self) -> usize {
        self.commit_frequency.unwrap_or(1)
    }

    pub fn get_timeout(&self) -> Duration {
        secs_to_duration(self.timeout_secs, 300.0)
    }

    pub fn get_sample_interval(&self) -> Duration {
        secs_to_duration(self.sample_interval_secs, 5.0)
    }

    pub fn get_target_policy(&self) -> TargetPolicy {
        self.target_policy.unwrap_or_default()
    }

    pub fn get_source_policy(&self) -> SourcePolicy {
        self.source_policy.unwrap_or_default()
    }

    pub fn get_unsupported_types(&self) -> &[LogicalType] {
        self.unsupported_types.as_deref().unwrap_or(&[])
    }
}

fn secs_to_duration(secs: Option<f64>, default: f64) -> Duration {
    secs.filter(|s| *s > 0.0)
        .and_then(|s| Duration::try_from_secs_f64(s).ok())
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

/// Structural policy for the target before the first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPolicy {
    /// Create the target; it must not exist yet.
    Create,

    /// Create the target when missing, otherwise append to it.
    #[default]
    CreateIfAbsent,

    /// Truncate the target; it must exist.
    Truncate,

    /// Truncate when present, create when missing.
    TruncateIfExists,

    /// Drop the target (if present) and recreate it from the source.
    DropRecreate,
}

/// Policy applied to the source once its transfer succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePolicy {
    /// Leave the source untouched.
    #[default]
    None,

    /// Remove the rows that were copied.
    Truncate,

    /// Remove the source entirely.
    Drop,
}
