// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_histogram, histogram};

use std::time::Duration;

/// Registers descriptions for every metric emitted by the SDK.
/// Call once at startup, after installing a recorder.
pub fn describe_metrics() {
    describe_counter!("lens_abi_fetch_total", "Explorer ABI requests by outcome.");
    describe_counter!("lens_chain_read_total", "Chain reader requests by method.");
    describe_counter!("lens_abi_cache_total", "ABI cache lookups by result (hit/miss).");
    describe_counter!("lens_proxy_resolution_total", "Proxy resolutions by matched convention.");
    describe_histogram!(
        "lens_rate_limit_wait_ms",
        Unit::Milliseconds,
        "Time spent waiting on the explorer rate limiter."
    );
    describe_histogram!("lens_batch_size", "Number of elements per aggregate batch.");
}

pub fn increment_abi_fetch(outcome: &str) {
    counter!("lens_abi_fetch_total", 1, "outcome" => outcome.to_string());
}

pub fn increment_chain_read(method: &str) {
    counter!("lens_chain_read_total", 1, "method" => method.to_string());
}

pub fn increment_cache_hit(cache_name: &str) {
    counter!("lens_abi_cache_total", 1, "cache" => cache_name.to_string(), "result" => "hit");
}

pub fn increment_cache_miss(cache_name: &str) {
    counter!("lens_abi_cache_total", 1, "cache" => cache_name.to_string(), "result" => "miss");
}

pub fn increment_proxy_resolution(convention: &str) {
    counter!("lens_proxy_resolution_total", 1, "convention" => convention.to_string());
}

pub fn record_rate_limit_wait(waited: Duration) {
    histogram!("lens_rate_limit_wait_ms", waited.as_millis() as f64);
}

pub fn record_batch_size(operation: &str, size: usize) {
    histogram!("lens_batch_size", size as f64, "operation" => operation.to_string());
}
