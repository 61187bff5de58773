//! Stream-level properties: worker pool mode and delivery retry policy.

use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::outputs::DeliveryPolicy;
use crate::parsers::{parse_bool, prop_is};
use crate::runtime::executor::ExecutorConfig;

/// Stream property names.
pub mod props {
    pub const USE_EXECUTOR_SERVICE: &str = "UseExecutorService";
    pub const EXECUTOR_THREADS_QUANTITY: &str = "ExecutorThreadsQuantity";
    pub const EXECUTORS_BOUNDED_MODEL: &str = "ExecutorsBoundedModel";
    pub const EXECUTOR_REJECTED_TASK_OFFER_TIMEOUT: &str = "ExecutorRejectedTaskOfferTimeout";
    pub const EXECUTORS_TERMINATION_TIMEOUT: &str = "ExecutorsTerminationTimeout";
    pub const RETRY_INTERVAL: &str = "RetryInterval";
    pub const MAX_DELIVERY_RETRIES: &str = "MaxDeliveryRetries";
}

pub const DEFAULT_EXECUTOR_THREADS: usize = 4;
pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub use_executor: bool,
    pub executor_threads: usize,
    pub bounded: bool,
    pub offer_timeout: Duration,
    pub termination_timeout: Duration,
    pub retry_interval: Duration,
    /// `None` retries until delivery succeeds or the stream halts.
    pub max_delivery_retries: Option<u32>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            use_executor: false,
            executor_threads: DEFAULT_EXECUTOR_THREADS,
            bounded: false,
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
            termination_timeout: DEFAULT_TERMINATION_TIMEOUT,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_delivery_retries: None,
        }
    }
}

impl StreamSettings {
    /// Apply the properties this type knows. Others are left for the
    /// source.
    pub fn apply(&mut self, properties: &[(String, String)]) -> Result<(), ConfigError> {
        for (name, value) in properties {
            if prop_is(name, props::USE_EXECUTOR_SERVICE) {
                self.use_executor = parse_bool(name, value)?;
            } else if prop_is(name, props::EXECUTOR_THREADS_QUANTITY) {
                let threads = parse_number::<usize>(name, value)?;
                if threads == 0 {
                    return Err(invalid(name, value, "at least one thread is required"));
                }
                self.executor_threads = threads;
            } else if prop_is(name, props::EXECUTORS_BOUNDED_MODEL) {
                self.bounded = parse_bool(name, value)?;
            } else if prop_is(name, props::EXECUTOR_REJECTED_TASK_OFFER_TIMEOUT) {
                self.offer_timeout = Duration::from_secs(parse_number(name, value)?);
            } else if prop_is(name, props::EXECUTORS_TERMINATION_TIMEOUT) {
                self.termination_timeout = Duration::from_secs(parse_number(name, value)?);
            } else if prop_is(name, props::RETRY_INTERVAL) {
                self.retry_interval = Duration::from_secs(parse_number(name, value)?);
            } else if prop_is(name, props::MAX_DELIVERY_RETRIES) {
                self.max_delivery_retries = if value.trim().is_empty() {
                    None
                } else {
                    Some(parse_number(name, value)?)
                };
            } else {
                continue;
            }
            debug!("Set stream property {} = {}", name, value);
        }
        Ok(())
    }

    /// Worker pool configuration, or `None` for synchronous processing.
    pub fn executor_config(&self) -> Option<ExecutorConfig> {
        self.use_executor.then(|| ExecutorConfig {
            threads: self.executor_threads,
            bounded: self.bounded,
            offer_timeout: self.offer_timeout,
            termination_timeout: self.termination_timeout,
        })
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        DeliveryPolicy {
            retry_interval: self.retry_interval,
            max_retries: self.max_delivery_retries,
        }
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(name, value, "expected a non-negative integer"))
}

fn invalid(name: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidProperty {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
