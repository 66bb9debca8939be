use crate::config::RetryConfig;
use crate::error::{DbError, IsRetryable};
use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

/// How a failed database call should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transience {
    /// Driver-level connection failure; retry.
    Connection,
    /// Matched only by message text; retry, but worth reviewing in the logs.
    Marker(String),
    /// Surface immediately.
    Permanent,
}

impl Transience {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Transience::Permanent)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_times: usize,
    min_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    markers: Vec<String>,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_times: cfg.max_times,
            min_delay: Duration::from_millis(cfg.min_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms.max(cfg.min_delay_ms)),
            jitter: cfg.jitter,
            markers: cfg
                .transient_markers
                .iter()
                .map(|m| m.to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// No sleeping between attempts. Used by tests and one-shot tools.
    pub fn immediate(max_times: usize) -> Self {
        Self {
            max_times,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
            ..Self::from_config(&RetryConfig::default())
        }
    }

    pub fn max_times(&self) -> usize {
        self.max_times
    }

    /// Fresh delay sequence for one logical operation; yields at most
    /// `max_times` delays.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> + Send + use<> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_times);
        if self.jitter {
            builder.with_jitter().build()
        } else {
            builder.build()
        }
    }

    pub fn classify(&self, err: &DbError) -> Transience {
        if err.is_retryable() {
            return Transience::Connection;
        }
        if err.is_permanent() {
            return Transience::Permanent;
        }
        let message = err.to_string().to_lowercase();
        self.markers
            .iter()
            .find(|marker| message.contains(marker.as_str()))
            .map_or(Transience::Permanent, |marker| {
                Transience::Marker(marker.clone())
            })
    }
}
