//! Provider health tracking and the deterministic health scorer (C4).
//!
//! `ProviderHealth` mirrors the shape of the teacher's `ApiStats`/
//! `EndpointHealth` (`apis/stats.rs`, `connectivity/types.rs`): average response
//! time, error rate, consecutive failures, last error. `score()` is the pure
//! function from spec §4.3 — deterministic so the provider manager's ordering is
//! reproducible and testable without mocking a clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::circuit::{CircuitState, CircuitStateKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub average_response_time_ms: f64,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub is_healthy: bool,
    pub last_checked: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ProviderHealth {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            average_response_time_ms: 0.0,
            error_rate: 0.0,
            consecutive_failures: 0,
            is_healthy: true,
            last_checked: now,
            last_error: None,
        }
    }

    pub fn record_success(&mut self, response_time_ms: f64, now: DateTime<Utc>) {
        self.average_response_time_ms =
            exponential_moving_average(self.average_response_time_ms, response_time_ms);
        self.error_rate = (self.error_rate * 0.9).max(0.0);
        self.consecutive_failures = 0;
        self.is_healthy = true;
        self.last_checked = now;
    }

    pub fn record_failure(&mut self, error: String, now: DateTime<Utc>) {
        self.error_rate = (self.error_rate * 0.9 + 0.1).min(1.0);
        self.consecutive_failures += 1;
        self.is_healthy = self.consecutive_failures < 3;
        self.last_checked = now;
        self.last_error = Some(error);
    }

    /// Approximate current throughput capacity used by the scorer's rate-limit
    /// bonus band — derived from the configured provider rate limit rather than
    /// measured, since "requests achieved per second" isn't itself tracked here.
    pub fn effective_requests_per_second(&self, configured_rps: f64) -> f64 {
        if self.is_healthy {
            configured_rps
        } else {
            configured_rps * 0.1
        }
    }
}

fn exponential_moving_average(previous: f64, sample: f64) -> f64 {
    if previous == 0.0 {
        sample
    } else {
        previous * 0.8 + sample * 0.2
    }
}

/// Deterministic scoring function (spec §4.3). Pure given its inputs so the
/// provider manager's ordering is reproducible in tests.
pub fn score(
    health: &ProviderHealth,
    circuit: &CircuitState,
    configured_rps: f64,
    now: DateTime<Utc>,
) -> i32 {
    let mut s: i32 = 100;

    if !health.is_healthy {
        s -= 50;
    }

    match circuit.state(now) {
        CircuitStateKind::Open => s -= 100,
        CircuitStateKind::HalfOpen => s -= 25,
        CircuitStateKind::Closed => {}
    }

    let rps = health.effective_requests_per_second(configured_rps);
    if rps >= 5.0 {
        s += 10;
    } else if rps >= 1.0 {
        s += 5;
    } else if rps < 0.5 {
        s -= 40;
    }

    if health.average_response_time_ms < 1000.0 {
        s += 20;
    } else if health.average_response_time_ms > 5000.0 {
        s -= 30;
    }

    s -= (50.0 * health.error_rate).round() as i32;
    s -= 10 * health.consecutive_failures as i32;

    s.max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scorer_example_from_spec() {
        // spec.md scenario 8: healthy, 0ms avg latency, 5 req/s, closed circuit
        // -> 100 + 10 + 20 = 130.
        let mut health = ProviderHealth::initial(Utc::now());
        health.average_response_time_ms = 0.0;
        health.is_healthy = true;
        let circuit = CircuitState::new(3, 300_000);
        let now = Utc::now();
        let s = score(&health, &circuit, 5.0, now);
        assert_eq!(s, 130);

        health.is_healthy = false;
        let s2 = score(&health, &circuit, 5.0, now);
        assert_eq!(s2, 80);
    }

    #[test]
    fn score_never_goes_negative() {
        let mut health = ProviderHealth::initial(Utc::now());
        health.is_healthy = false;
        health.average_response_time_ms = 10_000.0;
        health.error_rate = 1.0;
        health.consecutive_failures = 20;
        let mut circuit = CircuitState::new(1, 300_000);
        let now = Utc::now();
        circuit.record_failure(now);
        assert_eq!(score(&health, &circuit, 0.1, now), 0);
    }

    #[test]
    fn open_circuit_dominates_score() {
        let health = ProviderHealth::initial(Utc::now());
        let mut circuit = CircuitState::new(1, 300_000);
        let now = Utc::now();
        circuit.record_failure(now);
        assert_eq!(circuit.state(now), CircuitStateKind::Open);
        let s = score(&health, &circuit, 5.0, now);
        assert!(s <= 10);
    }
}
