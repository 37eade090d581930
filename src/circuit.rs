//! Per-provider circuit breaker (C3).
//!
//! Grounded on the teacher's `connectivity::state::ConnectivityState` (failure/
//! success counters keyed by endpoint name, threshold-gated transitions), recast
//! as the closed-form breaker the spec describes: failure count + two
//! timestamps, with `state(now)` a pure function rather than a stored enum, so
//! `HALF-OPEN` never needs to be written back until a probe actually happens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitState {
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub max_failures: u32,
    pub recovery_timeout_ms: i64,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            failure_count: 0,
            last_failure_time: None,
            last_success_time: None,
            max_failures: 3,
            recovery_timeout_ms: 300_000,
        }
    }
}

impl CircuitState {
    pub fn new(max_failures: u32, recovery_timeout_ms: i64) -> Self {
        Self {
            max_failures,
            recovery_timeout_ms,
            ..Default::default()
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.failure_count = 0;
        self.last_success_time = Some(now);
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.failure_count += 1;
        self.last_failure_time = Some(now);
    }

    /// Pure transition function (spec §4.2 / invariant 4): OPEN while within the
    /// recovery window, HALF-OPEN for exactly the first `now` sampled once the
    /// window has elapsed, CLOSED otherwise. Callers probing in HALF-OPEN should
    /// call `record_success`/`record_failure` immediately after the probe so the
    /// next `state()` call reflects the outcome rather than re-probing forever.
    pub fn state(&self, now: DateTime<Utc>) -> CircuitStateKind {
        if self.failure_count < self.max_failures {
            return CircuitStateKind::Closed;
        }
        match self.last_failure_time {
            None => CircuitStateKind::Closed,
            Some(last_failure) => {
                let elapsed_ms = (now - last_failure).num_milliseconds();
                if elapsed_ms < self.recovery_timeout_ms {
                    CircuitStateKind::Open
                } else {
                    CircuitStateKind::HalfOpen
                }
            }
        }
    }

    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        !matches!(self.state(now), CircuitStateKind::Open)
    }
}
