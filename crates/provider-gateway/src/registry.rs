use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

const MAX_LAST_ERROR_CHARS: usize = 500;

/// Mutable breaker state for one provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderState {
    pub consecutive_failures: u32,
    pub circuit_open_until: Option<Instant>,
    pub last_error: Option<String>,
}

/// Read-only view of a provider's breaker, safe to serialize into health artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub open: bool,
    pub retry_after_secs: f64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// Process-wide map of provider name to [`ProviderState`].
///
/// Entries are created lazily on the first recorded outcome. The lock is only
/// held to read or update counters, never across I/O.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    states: Mutex<HashMap<String, ProviderState>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProviderState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remaining cooldown if the provider's circuit is open at `now`.
    pub fn open_for(&self, provider: &str, now: Instant) -> Option<Duration> {
        let states = self.lock();
        let until = states.get(provider)?.circuit_open_until?;
        if until > now {
            Some(until - now)
        } else {
            None
        }
    }

    pub fn record_success(&self, provider: &str) {
        let mut states = self.lock();
        let state = states.entry(provider.to_string()).or_default();
        state.consecutive_failures = 0;
        state.circuit_open_until = None;
        state.last_error = None;
    }

    /// Count one exhausted call. Returns true when this failure (re)opened the circuit.
    pub fn record_failure(
        &self,
        provider: &str,
        error: &str,
        threshold: u32,
        cooldown: Duration,
        now: Instant,
    ) -> bool {
        let mut states = self.lock();
        let state = states.entry(provider.to_string()).or_default();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_error = Some(error.chars().take(MAX_LAST_ERROR_CHARS).collect());
        if state.consecutive_failures >= threshold {
            state.circuit_open_until = Some(now + cooldown);
            true
        } else {
            false
        }
    }

    /// Snapshot of one provider. Never inserts; unseen providers report a closed circuit.
    pub fn status(&self, provider: &str, now: Instant) -> ProviderStatus {
        let states = self.lock();
        match states.get(provider) {
            Some(state) => to_status(provider, state, now),
            None => to_status(provider, &ProviderState::default(), now),
        }
    }

    /// Snapshots of every provider seen so far, sorted by name.
    pub fn statuses(&self, now: Instant) -> Vec<ProviderStatus> {
        let states = self.lock();
        let mut out: Vec<ProviderStatus> = states
            .iter()
            .map(|(name, state)| to_status(name, state, now))
            .collect();
        out.sort_by(|a, b| a.provider.cmp(&b.provider));
        out
    }
}

fn to_status(provider: &str, state: &ProviderState, now: Instant) -> ProviderStatus {
    let retry_after = state
        .circuit_open_until
        .filter(|until| *until > now)
        .map(|until| until - now);
    ProviderStatus {
        provider: provider.to_string(),
        open: retry_after.is_some(),
        retry_after_secs: retry_after.map(|d| d.as_secs_f64()).unwrap_or(0.0),
        consecutive_failures: state.consecutive_failures,
        last_error: state.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold_and_closes_after_cooldown() {
        let registry = ProviderRegistry::new();
        let now = Instant::now();
        let cooldown = Duration::from_secs(45);

        for _ in 0..3 {
            assert!(!registry.record_failure("fmp", "HTTP 503", 4, cooldown, now));
        }
        assert!(registry.open_for("fmp", now).is_none());
        assert!(registry.record_failure("fmp", "HTTP 503", 4, cooldown, now));

        assert_eq!(registry.open_for("fmp", now), Some(cooldown));
        assert!(registry.open_for("fmp", now + Duration::from_secs(46)).is_none());

        let status = registry.status("fmp", now + Duration::from_secs(40));
        assert!(status.open);
        assert_eq!(status.consecutive_failures, 4);
        assert!((status.retry_after_secs - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_resets() {
        let registry = ProviderRegistry::new();
        let now = Instant::now();
        for _ in 0..4 {
            registry.record_failure("yahoo", "timeout", 4, Duration::from_secs(45), now);
        }
        registry.record_success("yahoo");
        let status = registry.status("yahoo", now);
        assert!(!status.open);
        assert_eq!(status.consecutive_failures, 0);
        assert_eq!(status.last_error, None);
    }

    #[test]
    fn test_status_is_a_pure_read() {
        let registry = ProviderRegistry::new();
        let status = registry.status("finnhub", Instant::now());
        assert!(!status.open);
        assert!(registry.statuses(Instant::now()).is_empty());
    }

    #[test]
    fn test_last_error_is_truncated() {
        let registry = ProviderRegistry::new();
        let long = "x".repeat(2_000);
        registry.record_failure("fmp", &long, 4, Duration::from_secs(45), Instant::now());
        let status = registry.status("fmp", Instant::now());
        assert_eq!(status.last_error.map(|e| e.len()), Some(500));
    }
}
