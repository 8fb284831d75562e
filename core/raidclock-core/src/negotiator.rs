//! Telemetry feature negotiation.
//!
//! The host must be asked to enable telemetry features before it delivers
//! events for them, and the request commonly fails while the game is still
//! loading. Negotiation retries with a fixed delay until the host answers
//! successfully or the attempt budget runs out. A successful answer with no
//! supported features is still a success.

use crate::error::{CoreError, Result};
use crate::host::TelemetryHost;
use serde::Serialize;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3_000);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureSubscription {
    pub requested: Vec<String>,
    pub enabled: Vec<String>,
}

impl FeatureSubscription {
    /// Subscription for a title that needs no telemetry features.
    pub fn empty(requested: &[String]) -> Self {
        Self {
            requested: requested.to_vec(),
            enabled: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeatureNegotiator {
    retry_delay: Duration,
}

impl Default for FeatureNegotiator {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl FeatureNegotiator {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    pub fn negotiate(
        &self,
        host: &dyn TelemetryHost,
        features: &[String],
        max_attempts: u32,
    ) -> Result<FeatureSubscription> {
        self.negotiate_while(host, features, max_attempts, || true)
    }

    /// Like [`negotiate`](Self::negotiate), but stops early once `keep_going` returns false.
    pub fn negotiate_while(
        &self,
        host: &dyn TelemetryHost,
        features: &[String],
        max_attempts: u32,
        keep_going: impl Fn() -> bool,
    ) -> Result<FeatureSubscription> {
        let max_attempts = max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if !keep_going() {
                return Err(CoreError::host_call(
                    "subscribe_features",
                    "negotiation cancelled",
                ));
            }

            match host.subscribe_features(features) {
                Ok(reply) if reply.success => {
                    info!(
                        attempt,
                        requested = features.len(),
                        enabled = reply.supported_features.len(),
                        "Telemetry features negotiated"
                    );
                    return Ok(FeatureSubscription {
                        requested: features.to_vec(),
                        enabled: reply.supported_features,
                    });
                }
                Ok(reply) => {
                    last_error = reply
                        .error
                        .unwrap_or_else(|| "host reported failure".to_string());
                }
                Err(err) => {
                    last_error = err.to_string();
                }
            }

            warn!(
                attempt,
                max_attempts,
                error = %last_error,
                "Feature subscription attempt failed"
            );

            if attempt < max_attempts {
                debug!(delay_ms = self.retry_delay.as_millis() as u64, "Retrying feature subscription");
                thread::sleep(self.retry_delay);
            }
        }

        Err(CoreError::NegotiationExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raidclock_protocol::FeatureReply;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHost {
        failures_before_success: u32,
        attempts: AtomicU32,
        supported: Vec<String>,
    }

    impl FlakyHost {
        fn new(failures_before_success: u32, supported: &[&str]) -> Self {
            Self {
                failures_before_success,
                attempts: AtomicU32::new(0),
                supported: supported.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl TelemetryHost for FlakyHost {
        fn subscribe_features(&self, _features: &[String]) -> Result<FeatureReply> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures_before_success {
                if attempt % 2 == 0 {
                    return Err(CoreError::host_call("subscribe_features", "not ready"));
                }
                return Ok(FeatureReply {
                    success: false,
                    supported_features: Vec::new(),
                    error: Some(format!("attempt {} failed", attempt)),
                });
            }
            Ok(FeatureReply {
                success: true,
                supported_features: self.supported.clone(),
                error: None,
            })
        }

        fn current_info_snapshot(&self) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    fn features() -> Vec<String> {
        vec!["game_info".to_string(), "match_info".to_string()]
    }

    #[test]
    fn succeeds_on_third_attempt() {
        let host = FlakyHost::new(2, &["game_info"]);
        let negotiator = FeatureNegotiator::new(Duration::ZERO);

        let subscription = negotiator.negotiate(&host, &features(), 5).expect("negotiated");
        assert_eq!(subscription.enabled, vec!["game_info".to_string()]);
        assert_eq!(subscription.requested, features());
        assert_eq!(host.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn fails_after_exactly_max_attempts() {
        let host = FlakyHost::new(u32::MAX, &[]);
        let negotiator = FeatureNegotiator::new(Duration::ZERO);

        let result = negotiator.negotiate(&host, &features(), 4);
        assert!(matches!(
            result,
            Err(CoreError::NegotiationExhausted { attempts: 4, .. })
        ));
        assert_eq!(host.attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn empty_supported_set_is_success() {
        let host = FlakyHost::new(0, &[]);
        let negotiator = FeatureNegotiator::new(Duration::ZERO);

        let subscription = negotiator.negotiate(&host, &features(), 3).expect("negotiated");
        assert!(subscription.enabled.is_empty());
        assert_eq!(host.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stops_when_cancelled() {
        let host = FlakyHost::new(u32::MAX, &[]);
        let negotiator = FeatureNegotiator::new(Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result = negotiator.negotiate_while(&host, &features(), 10, || {
            calls.fetch_add(1, Ordering::SeqCst) < 2
        });
        assert!(result.is_err());
        assert_eq!(host.attempts.load(Ordering::SeqCst), 2);
    }
}
