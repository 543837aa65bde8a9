//! Unit tests for configuration defaults, validation and overrides.

use std::time::Duration;

use crate::config::AggregatorConfig;
use crate::config::AllWatcherConfig;
use crate::config::DeltamuxConfig;
use crate::errors::Error;

#[test]
fn defaults_are_valid() {
    let config = DeltamuxConfig::default();
    config.validate().expect("defaults must validate");

    assert_eq!(config.watcher.change_buffer_size, 1024);
    assert_eq!(config.aggregator.gather_interval_ms, 3000);
    assert_eq!(config.aggregator.max_batch_size, 100);
    assert_eq!(config.aggregator.request_buffer_size, 64);
    assert_eq!(config.aggregator.gather_interval(), Duration::from_secs(3));
}

#[test]
fn zero_change_buffer_is_rejected() {
    let config = AllWatcherConfig {
        change_buffer_size: 0,
    };
    let err = config.validate().expect_err("zero buffer must be rejected");
    assert!(matches!(err, Error::Config(_)), "got {err:?}");
}

#[test]
fn zero_gather_interval_is_rejected() {
    let config = AggregatorConfig {
        gather_interval_ms: 0,
        ..Default::default()
    };
    let err = config.validate().expect_err("zero interval must be rejected");
    assert!(matches!(err, Error::Config(_)), "got {err:?}");
}

#[test]
fn zero_max_batch_size_is_rejected() {
    let config = AggregatorConfig {
        max_batch_size: 0,
        ..Default::default()
    };
    let err = config.validate().expect_err("zero batch size must be rejected");
    assert!(matches!(err, Error::Config(_)), "got {err:?}");
}

#[test]
fn container_validation_covers_components() {
    let config = DeltamuxConfig {
        aggregator: AggregatorConfig {
            request_buffer_size: 0,
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn environment_overrides_defaults() {
    std::env::set_var("DELTAMUX__AGGREGATOR__MAX_BATCH_SIZE", "7");
    let config = DeltamuxConfig::new().expect("load must succeed");
    std::env::remove_var("DELTAMUX__AGGREGATOR__MAX_BATCH_SIZE");

    assert_eq!(config.aggregator.max_batch_size, 7);
    // Untouched fields keep their defaults.
    assert_eq!(config.watcher.change_buffer_size, 1024);
}
