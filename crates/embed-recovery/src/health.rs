//! Proactive health checks.
//!
//! A small battery of checks (provider configuration, cache round-trip,
//! deferred queue depth, in-flight set size, memory headroom) aggregated
//! into one report. The report is memoized for a short window so callers
//! can poll freely, and [`HealthMonitor`] runs the battery periodically
//! with cancellation-token shutdown.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use embed_cache::{CacheMeta, EmbeddingCache};
use embed_orchestrator::{DeferredQueue, InFlightSet};
use embed_providers::EmbeddingProvider;
use embed_types::{Embedding, RecoverySettings};

/// Queue depth above which the report turns Warning.
const QUEUE_DEPTH_WARN: usize = 10_000;
/// In-flight set size above which the report turns Warning.
const IN_FLIGHT_WARN: usize = 1_000;
/// Resident set size above which the report turns Warning.
const MEMORY_WARN_RSS_BYTES: u64 = 4 * 1024 * 1024 * 1024;
/// Model tag for the cache round-trip probe entry.
const PROBE_MODEL: &str = "__health_probe__";

/// Aggregate health verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// One check in the battery.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: HealthStatus,
    pub latency: Duration,
    pub detail: String,
}

/// Aggregated health report.
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
    pub recommendations: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Runs the health battery against the gateway's collaborators.
pub struct HealthChecker {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    queue: Option<Arc<dyn DeferredQueue>>,
    inflight: InFlightSet,
    config: RecoverySettings,
    cached: Mutex<Option<(Instant, HealthReport)>>,
}

impl HealthChecker {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        queue: Option<Arc<dyn DeferredQueue>>,
        inflight: InFlightSet,
        config: RecoverySettings,
    ) -> Self {
        Self {
            provider,
            cache,
            queue,
            inflight,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Run the battery, serving a memoized report inside the cache window.
    pub async fn check(&self) -> HealthReport {
        {
            let cached = self.cached.lock().expect("health cache mutex poisoned");
            if let Some((at, report)) = cached.as_ref() {
                if at.elapsed() < Duration::from_secs(self.config.health_cache_secs) {
                    debug!("Serving cached health report");
                    return report.clone();
                }
            }
        }

        let mut checks = vec![self.check_provider(), self.check_cache_roundtrip()];
        checks.push(self.check_queue_depth().await);
        checks.push(self.check_in_flight());
        checks.push(check_memory());

        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let recommendations = checks
            .iter()
            .filter(|c| c.status != HealthStatus::Healthy)
            .map(|c| recommendation_for(c.name))
            .collect();

        let report = HealthReport {
            status,
            checks,
            recommendations,
            checked_at: Utc::now(),
        };

        let mut cached = self.cached.lock().expect("health cache mutex poisoned");
        *cached = Some((Instant::now(), report.clone()));
        report
    }

    fn check_provider(&self) -> CheckResult {
        let started = Instant::now();
        let configured = self.provider.is_configured();
        CheckResult {
            name: "provider",
            status: if configured {
                HealthStatus::Healthy
            } else {
                HealthStatus::Critical
            },
            latency: started.elapsed(),
            detail: format!(
                "{}/{} dim={} configured={}",
                self.provider.id(),
                self.provider.model(),
                self.provider.dimension(),
                configured
            ),
        }
    }

    /// Write, read back, and remove a probe entry.
    fn check_cache_roundtrip(&self) -> CheckResult {
        let started = Instant::now();
        let meta = CacheMeta::new(self.provider.id(), PROBE_MODEL, 2);
        let probe = Embedding::from_normalized(vec![1.0, 0.0]);

        let stored = self.cache.put("health probe", &probe, &meta);
        let read = self.cache.get("health probe", &meta).is_some();
        self.cache.invalidate(|e| e.meta.model == PROBE_MODEL);

        let ok = stored && read;
        CheckResult {
            name: "cache",
            status: if ok {
                HealthStatus::Healthy
            } else {
                HealthStatus::Warning
            },
            latency: started.elapsed(),
            detail: if ok {
                format!("round-trip {}us", started.elapsed().as_micros())
            } else {
                "cache round-trip failed; serving uncached".to_string()
            },
        }
    }

    async fn check_queue_depth(&self) -> CheckResult {
        let started = Instant::now();
        match &self.queue {
            None => CheckResult {
                name: "queue",
                status: HealthStatus::Healthy,
                latency: started.elapsed(),
                detail: "deferred queue not configured".to_string(),
            },
            Some(queue) => match queue.depth().await {
                Ok(depth) => CheckResult {
                    name: "queue",
                    status: if depth > QUEUE_DEPTH_WARN {
                        HealthStatus::Warning
                    } else {
                        HealthStatus::Healthy
                    },
                    latency: started.elapsed(),
                    detail: format!("depth={}", depth),
                },
                Err(e) => CheckResult {
                    name: "queue",
                    status: HealthStatus::Warning,
                    latency: started.elapsed(),
                    detail: format!("depth unavailable: {}", e),
                },
            },
        }
    }

    fn check_in_flight(&self) -> CheckResult {
        let started = Instant::now();
        let len = self.inflight.len();
        CheckResult {
            name: "in_flight",
            status: if len > IN_FLIGHT_WARN {
                HealthStatus::Warning
            } else {
                HealthStatus::Healthy
            },
            latency: started.elapsed(),
            detail: format!("claims={}", len),
        }
    }
}

fn recommendation_for(check: &'static str) -> String {
    match check {
        "provider" => "configure the embedding provider API key".to_string(),
        "cache" => "inspect the cache backend; generation continues uncached".to_string(),
        "queue" => "drain the deferred queue or scale workers".to_string(),
        "in_flight" => "investigate stuck embedding requests".to_string(),
        "memory" => "reduce batch sizes or restart the process".to_string(),
        other => format!("inspect the {} check", other),
    }
}

/// Resident set size probe (Linux), healthy-by-default elsewhere.
fn check_memory() -> CheckResult {
    let started = Instant::now();

    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(rss_pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|f| f.parse::<u64>().ok())
            {
                let rss_bytes = rss_pages * 4096;
                return CheckResult {
                    name: "memory",
                    status: if rss_bytes > MEMORY_WARN_RSS_BYTES {
                        HealthStatus::Warning
                    } else {
                        HealthStatus::Healthy
                    },
                    latency: started.elapsed(),
                    detail: format!("rss={}MiB", rss_bytes / (1024 * 1024)),
                };
            }
        }
    }

    CheckResult {
        name: "memory",
        status: HealthStatus::Healthy,
        latency: started.elapsed(),
        detail: "memory probe unavailable".to_string(),
    }
}

/// Periodic health check loop with graceful shutdown.
pub struct HealthMonitor;

impl HealthMonitor {
    /// Spawn the loop; cancel the token to stop it.
    pub fn spawn(checker: Arc<HealthChecker>, token: CancellationToken) -> JoinHandle<()> {
        let interval = Duration::from_secs(checker.config.health_interval_secs);

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Health monitor started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("Health monitor stopped");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        let report = checker.check().await;
                        match report.status {
                            HealthStatus::Healthy => {
                                debug!("Health check passed");
                            }
                            status => {
                                warn!(
                                    status = ?status,
                                    recommendations = ?report.recommendations,
                                    "Health check degraded"
                                );
                            }
                        }
                    }
                }
            }
        })
    }
}
