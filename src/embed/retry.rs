use anyhow::Result;
use std::time::Duration;
use tracing::debug;

use super::{Embedder, Embedding};
use crate::config::RetryConfig;

/// Bounded exponential backoff for calls to an external provider.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    /// Upper bound on any single wait.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.multiplier,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Sleep durations between consecutive attempts, each capped at `max_backoff`.
    pub fn backoffs(&self) -> impl Iterator<Item = Duration> + '_ {
        let factor = self.multiplier.max(1.0);
        (0..self.max_retries).map(move |i| {
            let secs = self.initial_backoff.as_secs_f64() * factor.powi(i.min(i32::MAX as u32) as i32);
            Duration::try_from_secs_f64(secs)
                .unwrap_or(self.max_backoff)
                .min(self.max_backoff)
        })
    }

    /// Run `op` up to `max_retries + 1` times, returning the last error.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut backoffs = self.backoffs();
        let mut attempt = 1;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(e) => match backoffs.next() {
                    Some(wait) => {
                        debug!(%what, attempt, ?wait, error = %e, "retrying");
                        std::thread::sleep(wait);
                        attempt += 1;
                    }
                    None => {
                        return Err(e.context(format!("{what} failed after {attempt} attempt(s)")));
                    }
                },
            }
        }
    }
}

/// Wraps any provider so each `embed` call is retried per `policy`.
pub struct RetryingEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    fn embed(&self, text: &str) -> Result<Embedding> {
        self.policy.run("embedding request", || self.inner.embed(text))
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
