//! Per-service circuit breaker.
//!
//! Closed: calls pass through, consecutive failures counted.
//! Open: calls are rejected immediately; the fallback runs with no network
//! attempt until the cool-down elapses.
//! HalfOpen: exactly one probe call is allowed through; success closes the
//! circuit, failure reopens it with a longer cool-down.
//!
//! Transitions are total functions of (state, outcome, elapsed time) applied
//! under a per-service mutex, so racing callers converge without further
//! coordination.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use embed_types::{
    CircuitSettings, CircuitTransition, DegradationError, FailureKind, TelemetrySink,
};

/// Circuit state visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Mutable per-service circuit data. Only touched through the transition
/// methods below, always under the service mutex.
#[derive(Debug)]
struct CircuitData {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    next_probe_at: Option<Instant>,
    /// Consecutive opens without an intervening close; scales the cool-down
    open_streak: u32,
}

impl CircuitData {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            next_probe_at: None,
            open_streak: 0,
        }
    }
}

/// What `admit` decided for one call.
enum Admission {
    /// Circuit closed - run the primary
    Pass,
    /// This caller won the half-open probe slot
    Probe,
    /// Short-circuit to the fallback
    Reject,
}

/// Registry of independent named circuits.
pub struct CircuitBreaker {
    circuits: DashMap<String, Mutex<CircuitData>>,
    config: CircuitSettings,
    telemetry: Arc<dyn TelemetrySink>,
}

impl CircuitBreaker {
    /// Create a breaker registry with the given settings.
    pub fn new(config: CircuitSettings, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            circuits: DashMap::new(),
            config,
            telemetry,
        }
    }

    /// Execute `primary` under the named circuit.
    ///
    /// If the circuit is open, `fallback` runs with a `CircuitOpen` error and
    /// `primary` is never invoked. Otherwise `primary` runs; success resets
    /// the circuit, failure counts toward the threshold and the error is
    /// routed through `fallback` to produce a result or re-raise.
    pub async fn execute<T, P, PFut, F, FFut>(
        &self,
        service: &str,
        primary: P,
        fallback: F,
    ) -> Result<T, DegradationError>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, DegradationError>>,
        F: FnOnce(DegradationError) -> FFut,
        FFut: Future<Output = Result<T, DegradationError>>,
    {
        let admission = self.admit(service);

        let probing = match admission {
            Admission::Reject => {
                debug!(service = service, "Circuit open, short-circuiting");
                let err = DegradationError::new(FailureKind::CircuitOpen)
                    .with_context("service", service);
                return fallback(err).await;
            }
            Admission::Probe => true,
            Admission::Pass => false,
        };

        match primary().await {
            Ok(value) => {
                self.on_success(service);
                Ok(value)
            }
            Err(err) => {
                self.on_failure(service, probing);
                fallback(err).await
            }
        }
    }

    /// Decide whether a call may proceed, transitioning Open -> HalfOpen
    /// when the cool-down has elapsed. Exactly one caller wins the probe.
    fn admit(&self, service: &str) -> Admission {
        let circuit = self
            .circuits
            .entry(service.to_string())
            .or_insert_with(|| Mutex::new(CircuitData::new()));
        let mut data = circuit.lock().expect("circuit mutex poisoned");

        match data.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::HalfOpen => Admission::Reject,
            CircuitState::Open => {
                let due = data
                    .next_probe_at
                    .map(|at| Instant::now() >= at)
                    .unwrap_or(true);
                if due {
                    if let Some(opened) = data.opened_at {
                        debug!(
                            service = service,
                            open_for_ms = opened.elapsed().as_millis() as u64,
                            "Cool-down elapsed, allowing probe"
                        );
                    }
                    self.transition(service, &mut data, CircuitState::HalfOpen);
                    Admission::Probe
                } else {
                    Admission::Reject
                }
            }
        }
    }

    /// Success: reset the failure counter and close the circuit.
    fn on_success(&self, service: &str) {
        if let Some(circuit) = self.circuits.get(service) {
            let mut data = circuit.lock().expect("circuit mutex poisoned");
            data.consecutive_failures = 0;
            if data.state != CircuitState::Closed {
                data.open_streak = 0;
                data.opened_at = None;
                data.next_probe_at = None;
                self.transition(service, &mut data, CircuitState::Closed);
            }
        }
    }

    /// Failure: count toward the threshold; a failed probe reopens with a
    /// longer cool-down.
    fn on_failure(&self, service: &str, probing: bool) {
        if let Some(circuit) = self.circuits.get(service) {
            let mut data = circuit.lock().expect("circuit mutex poisoned");
            data.consecutive_failures += 1;

            let should_open = probing
                || (data.state == CircuitState::Closed
                    && data.consecutive_failures >= self.config.failure_threshold);

            if should_open {
                self.open_circuit(service, &mut data);
            }
        }
    }

    fn open_circuit(&self, service: &str, data: &mut CircuitData) {
        data.open_streak = data.open_streak.saturating_add(1);
        let cooldown = self.cooldown_for_streak(data.open_streak);
        let now = Instant::now();
        data.opened_at = Some(now);
        data.next_probe_at = Some(now + cooldown);
        warn!(
            service = service,
            failures = data.consecutive_failures,
            cooldown_ms = cooldown.as_millis() as u64,
            "Circuit opened"
        );
        self.transition(service, data, CircuitState::Open);
    }

    /// Cool-down window for the nth consecutive open, bounded by the
    /// configured maximum.
    fn cooldown_for_streak(&self, streak: u32) -> Duration {
        let base = self.config.cooldown_secs as f64;
        let factor = self
            .config
            .cooldown_multiplier
            .powi(streak.saturating_sub(1) as i32);
        let secs = (base * factor).min(self.config.max_cooldown_secs as f64);
        Duration::from_secs_f64(secs)
    }

    fn transition(&self, service: &str, data: &mut CircuitData, to: CircuitState) {
        let from = data.state;
        if from == to {
            return;
        }
        data.state = to;
        info!(service = service, from = from.as_str(), to = to.as_str(), "Circuit transition");
        self.telemetry.circuit_transition(CircuitTransition {
            service: service.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        });
    }

    /// Current state of a named circuit (Closed if never used).
    pub fn state(&self, service: &str) -> CircuitState {
        self.circuits
            .get(service)
            .map(|c| c.lock().expect("circuit mutex poisoned").state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Force a circuit open (recovery action).
    pub fn force_open(&self, service: &str) {
        let circuit = self
            .circuits
            .entry(service.to_string())
            .or_insert_with(|| Mutex::new(CircuitData::new()));
        let mut data = circuit.lock().expect("circuit mutex poisoned");
        self.open_circuit(service, &mut data);
    }

    /// Reset a circuit to Closed with clean counters.
    pub fn reset(&self, service: &str) {
        if let Some(circuit) = self.circuits.get(service) {
            let mut data = circuit.lock().expect("circuit mutex poisoned");
            data.consecutive_failures = 0;
            data.open_streak = 0;
            data.opened_at = None;
            data.next_probe_at = None;
            self.transition(service, &mut data, CircuitState::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embed_types::NullSink;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitSettings {
                failure_threshold: threshold,
                cooldown_secs,
                cooldown_multiplier: 2.0,
                max_cooldown_secs: 300,
            },
            Arc::new(NullSink),
        )
    }

    async fn fail_once(breaker: &CircuitBreaker, service: &str) {
        let result: Result<(), _> = breaker
            .execute(
                service,
                || async { Err(DegradationError::new(FailureKind::ConnectionLost)) },
                |e| async move { Err(e) },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_closed_passes_through() {
        let breaker = breaker(3, 60);
        let result = breaker
            .execute(
                "svc",
                || async { Ok::<_, DegradationError>(42) },
                |e| async move { Err(e) },
            )
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(breaker.state("svc"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = breaker(3, 60);
        for _ in 0..3 {
            fail_once(&breaker, "svc").await;
        }
        assert_eq!(breaker.state("svc"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_short_circuits_without_calling_primary() {
        let breaker = breaker(2, 60);
        for _ in 0..2 {
            fail_once(&breaker, "svc").await;
        }

        let result = breaker
            .execute(
                "svc",
                || async { panic!("primary must not run while open") },
                |err| async move {
                    assert_eq!(err.kind, FailureKind::CircuitOpen);
                    Ok(-1)
                },
            )
            .await;
        assert_eq!(result.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_zero_cooldown_allows_single_probe() {
        let breaker = breaker(1, 0);
        fail_once(&breaker, "svc").await;
        assert_eq!(breaker.state("svc"), CircuitState::Open);

        // Cool-down of zero: the next call becomes the half-open probe and
        // its success closes the circuit.
        let result = breaker
            .execute(
                "svc",
                || async { Ok::<_, DegradationError>(7) },
                |e| async move { Err(e) },
            )
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(breaker.state("svc"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let breaker = breaker(1, 0);
        fail_once(&breaker, "svc").await;

        // Probe fails -> circuit reopens
        fail_once(&breaker, "svc").await;
        assert_eq!(breaker.state("svc"), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_admits_exactly_one_probe() {
        let breaker = Arc::new(breaker(1, 0));
        fail_once(&breaker, "svc").await;

        // First admit wins the probe slot...
        assert!(matches!(breaker.admit("svc"), Admission::Probe));
        // ...every other concurrent caller is rejected
        assert!(matches!(breaker.admit("svc"), Admission::Reject));
        assert!(matches!(breaker.admit("svc"), Admission::Reject));
    }

    #[tokio::test]
    async fn test_named_circuits_are_independent() {
        let breaker = breaker(1, 60);
        fail_once(&breaker, "embedding_generation").await;

        assert_eq!(breaker.state("embedding_generation"), CircuitState::Open);
        assert_eq!(
            breaker.state("embedding_batch_generation"),
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(3, 60);
        fail_once(&breaker, "svc").await;
        fail_once(&breaker, "svc").await;

        let _ = breaker
            .execute(
                "svc",
                || async { Ok::<_, DegradationError>(()) },
                |e| async move { Err(e) },
            )
            .await;

        // Two more failures should not reach the threshold of three
        fail_once(&breaker, "svc").await;
        fail_once(&breaker, "svc").await;
        assert_eq!(breaker.state("svc"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_open_and_reset() {
        let breaker = breaker(5, 60);
        breaker.force_open("svc");
        assert_eq!(breaker.state("svc"), CircuitState::Open);

        breaker.reset("svc");
        assert_eq!(breaker.state("svc"), CircuitState::Closed);
    }

    #[test]
    fn test_cooldown_scales_with_streak_and_caps() {
        let breaker = breaker(1, 30);
        assert_eq!(breaker.cooldown_for_streak(1), Duration::from_secs(30));
        assert_eq!(breaker.cooldown_for_streak(2), Duration::from_secs(60));
        assert_eq!(breaker.cooldown_for_streak(3), Duration::from_secs(120));
        // 30 * 2^4 = 480 caps at 300
        assert_eq!(breaker.cooldown_for_streak(5), Duration::from_secs(300));
    }
}
