use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Monotonic counter shared across request tasks.
#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Process-wide counters reported by `GET /health`.
///
/// Rejections and upstream failures are also broken down by label (route class and
/// provider capability) so an operator can tell which limiter or endpoint is hot.
#[derive(Debug, Default)]
pub struct AppMetrics {
    requests: Counter,
    validation_rejected: Counter,
    upstream_calls: Counter,
    upstream_retries: Counter,
    latency_micros: Counter,
    max_latency_micros: AtomicU64,
    rate_limited: Mutex<BTreeMap<&'static str, u64>>,
    upstream_failures: Mutex<BTreeMap<&'static str, u64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub rate_limited_total: u64,
    pub rate_limited_by_class: BTreeMap<&'static str, u64>,
    pub validation_rejected_total: u64,
    pub upstream_calls_total: u64,
    pub upstream_retries_total: u64,
    pub upstream_failures_total: u64,
    pub upstream_failures_by_capability: BTreeMap<&'static str, u64>,
    pub avg_latency_millis: f64,
    pub max_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self) {
        self.requests.add(1);
    }

    pub fn inc_rate_limited(&self, route_class: &'static str) {
        *self.rate_limited.lock().entry(route_class).or_default() += 1;
    }

    pub fn inc_validation_rejected(&self) {
        self.validation_rejected.add(1);
    }

    pub fn inc_upstream_call(&self) {
        self.upstream_calls.add(1);
    }

    pub fn inc_upstream_retry(&self) {
        self.upstream_retries.add(1);
    }

    pub fn inc_upstream_failure(&self, capability: &'static str) {
        *self.upstream_failures.lock().entry(capability).or_default() += 1;
    }

    pub fn observe_latency(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.add(micros);
        self.max_latency_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.get();
        let rate_limited_by_class = self.rate_limited.lock().clone();
        let upstream_failures_by_capability = self.upstream_failures.lock().clone();

        let avg_latency_millis = match requests {
            0 => 0.0,
            n => self.latency_micros.get() as f64 / n as f64 / 1_000.0,
        };

        MetricsSnapshot {
            requests_total: requests,
            rate_limited_total: rate_limited_by_class.values().sum(),
            rate_limited_by_class,
            validation_rejected_total: self.validation_rejected.get(),
            upstream_calls_total: self.upstream_calls.get(),
            upstream_retries_total: self.upstream_retries.get(),
            upstream_failures_total: upstream_failures_by_capability.values().sum(),
            upstream_failures_by_capability,
            avg_latency_millis,
            max_latency_millis: self.max_latency_micros.load(Ordering::Relaxed) as f64 / 1_000.0,
        }
    }
}

/// Output shape for log lines, chosen with `FLEET_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

impl LogFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" | "text" | "plain" => Some(Self::Compact),
            _ => None,
        }
    }

    fn from_env() -> Self {
        std::env::var("FLEET_LOG_FORMAT")
            .ok()
            .and_then(|value| Self::parse(&value))
            .unwrap_or_default()
    }
}

/// Installs the global subscriber once. `RUST_LOG` overrides the default filter.
pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,fleetline_api=info,fleetline_mapping=info,tower_http=info",
                service_name
            ))
        });

        match LogFormat::from_env() {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(true)
                .with_span_list(false)
                .init(),
            LogFormat::Compact => tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter)
                .with_target(true)
                .init(),
        }
    });
}
