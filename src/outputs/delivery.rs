//! Delivery wrapper: finalizes an activity, sends its record and retries
//! failed sends at a fixed interval.
//!
//! Retries only happen inside a cancellable stream context. Without a
//! [`CancellationToken`] the first failure is returned to the caller.
//! Inside one, delivery keeps retrying until it succeeds, the token is
//! cancelled, or the optional retry cap is reached.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, trace, warn};

use crate::activity::{ActivityInfo, ActivityRecord, HostCache};
use crate::error::DeliveryError;
use crate::outputs::ActivitySink;
use crate::runtime::settings::DEFAULT_RETRY_INTERVAL;
use crate::runtime::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPolicy {
    pub retry_interval: Duration,
    /// `None` retries without limit.
    pub max_retries: Option<u32>,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retries: None,
        }
    }
}

/// Waits between delivery attempts.
pub trait RetrySleeper: Send + Sync {
    /// Wait for `interval` or until `token` is cancelled.
    ///
    /// # Returns
    /// `true` if the wait ended because of cancellation
    fn sleep(&self, interval: Duration, token: &CancellationToken) -> bool;
}

/// Sleeps on the cancellation token, waking early on halt.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenSleeper;

impl RetrySleeper for TokenSleeper {
    fn sleep(&self, interval: Duration, token: &CancellationToken) -> bool {
        token.wait_timeout(interval)
    }
}

pub struct ActivityDelivery {
    sink: Arc<dyn ActivitySink>,
    hosts: Arc<HostCache>,
    policy: DeliveryPolicy,
    sleeper: Box<dyn RetrySleeper>,
}

impl ActivityDelivery {
    pub fn new(sink: Arc<dyn ActivitySink>, hosts: Arc<HostCache>) -> Self {
        Self {
            sink,
            hosts,
            policy: DeliveryPolicy::default(),
            sleeper: Box::new(TokenSleeper),
        }
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn RetrySleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn sink(&self) -> &Arc<dyn ActivitySink> {
        &self.sink
    }

    /// Finalize `ai` and deliver its record.
    ///
    /// # Arguments
    /// * `ai` - Activity to deliver
    /// * `token` - Cancellation token of the calling stream; `None` disables
    ///   retries
    ///
    /// # Returns
    /// The delivered record
    pub fn deliver(
        &self,
        mut ai: ActivityInfo,
        token: Option<&CancellationToken>,
    ) -> Result<ActivityRecord, DeliveryError> {
        ai.finalize(&self.hosts);
        let record = ai.to_record();
        let signature = record.signature().unwrap_or_default().to_string();

        let mut retries: u32 = 0;
        loop {
            let err = match self.sink.send(&record) {
                Ok(()) => {
                    if retries > 0 {
                        info!("Activity recording retry successful: signature={}", signature);
                    } else {
                        trace!("Recorded activity {} to {}", signature, self.sink.name());
                    }
                    return Ok(record);
                }
                Err(err) => err,
            };

            error!("Failed to record activity {} to {}: {}", signature, self.sink.name(), err);
            if let Err(reset_err) = self.sink.reset() {
                warn!("Failed to reset sink {}: {}", self.sink.name(), reset_err);
            }

            let Some(token) = token else {
                return Err(DeliveryError::Sink(err));
            };
            let attempts = retries + 1;
            if self.policy.max_retries.is_some_and(|max| retries >= max) {
                return Err(DeliveryError::RetriesExhausted { attempts, last: err });
            }
            if token.is_cancelled() {
                return Err(DeliveryError::Halted { attempts });
            }

            info!(
                "Will retry recording in {} seconds",
                self.policy.retry_interval.as_secs()
            );
            if self.sleeper.sleep(self.policy.retry_interval, token) {
                return Err(DeliveryError::Halted { attempts });
            }
            retries += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::host_cache::tests::CountingLookup;
    use crate::error::SinkError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySink {
        failures: AtomicUsize,
        sent: AtomicUsize,
        resets: AtomicUsize,
    }

    impl FlakySink {
        fn failing(times: usize) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicUsize::new(times),
                sent: AtomicUsize::new(0),
                resets: AtomicUsize::new(0),
            })
        }
    }

    impl ActivitySink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        fn send(&self, _record: &ActivityRecord) -> Result<(), SinkError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(SinkError::Transport("connection refused".to_string()));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn reset(&self) -> Result<(), SinkError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSleeper {
        sleeps: Arc<AtomicUsize>,
    }

    impl RetrySleeper for CountingSleeper {
        fn sleep(&self, _interval: Duration, token: &CancellationToken) -> bool {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
            token.is_cancelled()
        }
    }

    fn hosts() -> Arc<HostCache> {
        Arc::new(HostCache::new(Box::new(CountingLookup::default())))
    }

    #[test]
    fn test_no_token_propagates_first_failure() {
        let sink = FlakySink::failing(1);
        let delivery = ActivityDelivery::new(sink.clone(), hosts());

        let err = delivery.deliver(ActivityInfo::new(), None).unwrap_err();
        assert!(matches!(err, DeliveryError::Sink(SinkError::Transport(_))));
        assert_eq!(sink.resets.load(Ordering::SeqCst), 1);
        assert_eq!(sink.sent.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_retries_until_success() {
        let sink = FlakySink::failing(2);
        let sleeper = CountingSleeper::default();
        let sleeps = sleeper.sleeps.clone();
        let delivery = ActivityDelivery::new(sink.clone(), hosts()).with_sleeper(Box::new(sleeper));

        let token = CancellationToken::new();
        let record = delivery.deliver(ActivityInfo::new(), Some(&token)).unwrap();

        assert_eq!(sleeps.load(Ordering::SeqCst), 2);
        assert_eq!(sink.sent.load(Ordering::SeqCst), 1);
        assert!(record.signature().is_some());
    }

    #[test]
    fn test_halt_stops_retrying() {
        let sink = FlakySink::failing(usize::MAX);
        let token = CancellationToken::new();
        token.cancel();
        let delivery = ActivityDelivery::new(sink, hosts()).with_sleeper(Box::new(CountingSleeper::default()));

        let err = delivery.deliver(ActivityInfo::new(), Some(&token)).unwrap_err();
        assert_eq!(err, DeliveryError::Halted { attempts: 1 });
    }

    #[test]
    fn test_retry_cap() {
        let sink = FlakySink::failing(usize::MAX);
        let delivery = ActivityDelivery::new(sink, hosts())
            .with_policy(DeliveryPolicy {
                retry_interval: Duration::ZERO,
                max_retries: Some(2),
            })
            .with_sleeper(Box::new(CountingSleeper::default()));

        let err = delivery
            .deliver(ActivityInfo::new(), Some(&CancellationToken::new()))
            .unwrap_err();
        assert!(matches!(err, DeliveryError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_token_sleeper_wakes_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(TokenSleeper.sleep(Duration::from_secs(30), &token));
    }
}
