use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use valuation_core::ProviderError;

use crate::config::GatewayConfig;
use crate::rate_limit::RateLimiter;
use crate::registry::{ProviderRegistry, ProviderStatus};
use crate::transport::{HttpTransport, ProviderRequest, ProviderResponse, Transport};

/// Backoff sleep seam.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Single choke point for every outbound provider request.
///
/// Applies the provider's timeout budget, retries transient failures with
/// exponential backoff plus jitter, and fast-fails while a provider's circuit is
/// open. No other component retries.
pub struct ResilientGateway {
    config: GatewayConfig,
    registry: Arc<ProviderRegistry>,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    limiters: HashMap<String, RateLimiter>,
}

impl ResilientGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(ProviderRegistry::new()),
            Arc::new(HttpTransport::new()),
            Arc::new(TokioSleeper),
        )
    }

    pub fn with_parts(
        config: GatewayConfig,
        registry: Arc<ProviderRegistry>,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let limiters = config
            .rate_limits
            .iter()
            .map(|(provider, per_minute)| {
                (provider.clone(), RateLimiter::per_minute(provider, *per_minute))
            })
            .collect();
        Self {
            config,
            registry,
            transport,
            sleeper,
            limiters,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn timeout_for(&self, provider: &str) -> Duration {
        self.config.timeout_for(provider)
    }

    pub fn status(&self, provider: &str) -> ProviderStatus {
        self.registry.status(provider, Instant::now())
    }

    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.registry.statuses(Instant::now())
    }

    /// Issue `request` against `provider`.
    ///
    /// Breaker accounting happens once per call: a success resets the provider,
    /// an exhausted or terminal failure counts once. Circuit-open fast-fails and
    /// cancellations leave the state untouched.
    pub async fn call(
        &self,
        provider: &str,
        request: &ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if let Some(retry_after) = self.registry.open_for(provider, Instant::now()) {
            tracing::debug!(
                "{} circuit open, skipping request ({:.1}s left)",
                provider,
                retry_after.as_secs_f64()
            );
            return Err(ProviderError::CircuitOpen { retry_after });
        }

        let retries = request.max_retries.unwrap_or(self.config.max_retries);
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.timeout_for(provider));

        let mut last_err = ProviderError::Transport("no attempt made".to_string());
        for attempt in 0..=retries {
            if let Some(limiter) = self.limiters.get(provider) {
                limiter.acquire(cancel).await?;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                res = tokio::time::timeout(timeout, self.transport.send(request, timeout)) => {
                    res.unwrap_or(Err(ProviderError::Timeout))
                }
            };

            let err = match outcome {
                Ok(response) if response.is_success() => {
                    self.registry.record_success(provider);
                    return Ok(response);
                }
                Ok(response) => ProviderError::HttpStatus {
                    code: response.status,
                },
                Err(e) => e,
            };

            if !err.is_retryable() {
                self.record_failure(provider, &err);
                return Err(err);
            }

            tracing::debug!(
                "{} attempt {}/{} failed: {}",
                provider,
                attempt + 1,
                retries + 1,
                err
            );
            last_err = err;

            if attempt < retries {
                let delay = self.backoff_delay(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    _ = self.sleeper.sleep(delay) => {}
                }
            }
        }

        self.record_failure(provider, &last_err);
        Err(last_err)
    }

    fn record_failure(&self, provider: &str, err: &ProviderError) {
        let opened = self.registry.record_failure(
            provider,
            &err.to_string(),
            self.config.failure_threshold,
            self.config.circuit_open,
            Instant::now(),
        );
        if opened {
            tracing::warn!(
                "{} circuit opened for {:.0}s after repeated failures: {}",
                provider,
                self.config.circuit_open.as_secs_f64(),
                err
            );
        } else {
            tracing::warn!("{} request failed: {}", provider, err);
        }
    }

    /// `base * 2^attempt + U(0, jitter)`, capped at `max_backoff`
    pub(crate) fn backoff_delay(&self, attempt: u32) -> Duration {
        let max = self.config.max_backoff;
        let base = self.config.backoff_base.as_secs_f64() * 2f64.powi(attempt.min(64) as i32);
        let jitter_max = self.config.backoff_jitter.as_secs_f64();
        let jitter = if jitter_max > 0.0 {
            rand::thread_rng().gen_range(0.0..jitter_max)
        } else {
            0.0
        };
        Duration::try_from_secs_f64(base + jitter).map_or(max, |d| d.min(max))
    }
}
