//! Configuration validation.

use std::time::Duration;

use super::{EngineConfig, TransferProperties, MAX_QUEUE_CAPACITY};
use crate::error::{Result, TransferError};

/// Validate the configuration.
pub fn validate(config: &EngineConfig) -> Result<()> {
    validate_properties(&config.properties)
}

/// Validate transfer properties - only values that were explicitly set.
pub fn validate_properties(props: &TransferProperties) -> Result<()> {
    let counts = [
        ("workers", props.workers),
        ("queue_capacity", props.queue_capacity),
        ("fetch_size", props.fetch_size),
        ("batch_size", props.batch_size),
        ("commit_frequency", props.commit_frequency),
    ];
    for (name, value) in counts {
        if let Some(0) = value {
            return Err(TransferError::Config(format!("{} must be at least 1", name)));
        }
    }

    let durations = [
        ("timeout_secs", props.timeout_secs),
        ("sample_interval_secs", props.sample_interval_secs),
    ];
    for (name, value) in durations {
        if let Some(secs) = value {
            if secs <= 0.0 || Duration::try_from_secs_f64(secs).is_err() {
                return Err(TransferError::Config(format!(
                    "{} must be a positive number of seconds, got {}",
                    name, secs
                )));
            }
        }
    }

    // The channel is only allocated for pooled units.
    if props.queue_capacity.is_some() || props.get_workers() > 1 {
        let capacity = match props.queue_capacity {
            Some(capacity) => Some(capacity),
            None => props
                .get_workers()
                .checked_mul(props.get_fetch_size())
                .and_then(|n| n.checked_mul(2)),
        };
        match capacity {
            Some(c) if c <= MAX_QUEUE_CAPACITY => {}
            _ => {
                return Err(TransferError::Config(format!(
                    "queue capacity must not exceed {} rows (set queue_capacity or lower workers/fetch_size)",
                    MAX_QUEUE_CAPACITY
                )))
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = EngineConfig::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_workers() {
        let mut config = EngineConfig::default();
        config.properties.workers = Some(0);
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_zero_queue_capacity() {
        let props = TransferProperties::new().with_queue_capacity(0);
        assert!(validate_properties(&props).is_err());
    }

    #[test]
    fn test_negative_timeout() {
        let mut props = TransferProperties::new();
        props.timeout_secs = Some(-1.0);
        assert!(validate_properties(&props).is_err());
    }

    #[test]
    fn test_nan_sample_interval() {
        let mut props = TransferProperties::new();
        props.sample_interval_secs = Some(f64::NAN);
        assert!(validate_properties(&props).is_err());
    }

    #[test]
    fn test_unrepresentable_timeout() {
        let mut props = TransferProperties::new();
        props.timeout_secs = Some(1e20);
        let err = validate_properties(&props).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));

        props.timeout_secs = Some(f64::INFINITY);
        assert!(validate_properties(&props).is_err());
    }

    #[test]
    fn test_oversized_queue_capacity() {
        let props = TransferProperties::new().with_queue_capacity(MAX_QUEUE_CAPACITY + 1);
        assert!(validate_properties(&props).is_err());

        let props = TransferProperties::new()
            .with_workers(usize::MAX / 2)
            .with_fetch_size(4);
        let err = validate_properties(&props).unwrap_err();
        assert!(err.to_string().contains("queue capacity"));

        // A single worker never allocates a channel.
        let props = TransferProperties::new().with_fetch_size(usize::MAX);
        assert!(validate_properties(&props).is_ok());
    }
}
