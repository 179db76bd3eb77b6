use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use fleetline_observability::AppMetrics;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ApiError;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_KEYS: usize = 100_000;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Bucket shared by every client that sends no forwarding headers.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// A named group of endpoints sharing one limiter instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteClass {
    Analytics,
    Isochrone,
    Matrix,
    Geocode,
    ReverseGeocode,
    Routing,
    Nearby,
    Auth,
    Notifications,
}

impl RouteClass {
    pub const ALL: [RouteClass; 9] = [
        RouteClass::Analytics,
        RouteClass::Isochrone,
        RouteClass::Matrix,
        RouteClass::Geocode,
        RouteClass::ReverseGeocode,
        RouteClass::Routing,
        RouteClass::Nearby,
        RouteClass::Auth,
        RouteClass::Notifications,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Isochrone => "isochrone",
            Self::Matrix => "matrix",
            Self::Geocode => "geocode",
            Self::ReverseGeocode => "reverse_geocode",
            Self::Routing => "routing",
            Self::Nearby => "nearby",
            Self::Auth => "auth",
            Self::Notifications => "notifications",
        }
    }

    /// Requests per window when nothing is configured.
    pub fn default_limit(self) -> u32 {
        match self {
            Self::Analytics => 30,
            Self::Isochrone => 40,
            Self::Matrix => 50,
            Self::Geocode | Self::ReverseGeocode | Self::Routing | Self::Nearby => 100,
            Self::Auth => 12,
            Self::Notifications => 60,
        }
    }

    /// Environment variable overriding this class's limit, e.g. `FLEET_RATE_LIMIT_ANALYTICS`.
    pub fn env_key(self) -> String {
        format!("FLEET_RATE_LIMIT_{}", self.as_str().to_ascii_uppercase())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSettings {
    pub window: Duration,
    pub max_keys: usize,
    pub sweep_interval: Duration,
    pub limits: BTreeMap<RouteClass, u32>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_keys: DEFAULT_MAX_KEYS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            limits: RouteClass::ALL
                .iter()
                .map(|class| (*class, class.default_limit()))
                .collect(),
        }
    }
}

impl RateLimitSettings {
    pub fn limit_for(&self, class: RouteClass) -> u32 {
        self.limits
            .get(&class)
            .copied()
            .unwrap_or_else(|| class.default_limit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining: u32 },
    Rejected { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct RateLimitRecord {
    count: u32,
    window_reset_at: Instant,
}

#[derive(Debug, Default)]
struct Records {
    by_identity: HashMap<String, RateLimitRecord>,
    /// Lower bound on every record's `window_reset_at`; `None` when empty.
    earliest_reset: Option<Instant>,
}

impl Records {
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.by_identity.len();
        self.by_identity
            .retain(|_, record| now <= record.window_reset_at);
        self.earliest_reset = self
            .by_identity
            .values()
            .map(|record| record.window_reset_at)
            .min();
        before - self.by_identity.len()
    }
}

/// Fixed-window request counter keyed by client identity.
///
/// A key's window starts with its first admitted request and resets entirely once it has
/// elapsed. The check and the increment happen under one lock, so `count` never exceeds
/// `limit` inside a window.
///
/// The key map holds at most `max_keys` live windows and a live window is never evicted,
/// so a throttled client cannot regain budget by flooding the limiter with new keys. The
/// cost is that once the map is full of live windows, clients without a window are
/// rejected until the earliest window expires. While that is the case a rejection is
/// O(1); the O(n) sweep only runs once the earliest tracked window has actually ended.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    limit: u32,
    window: Duration,
    max_keys: usize,
    records: Mutex<Records>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            limit,
            window,
            max_keys: max_keys.max(1),
            records: Mutex::new(Records::default()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn admit(&self, identity: &str) -> bool {
        self.admit_at(identity, Instant::now())
    }

    pub fn admit_at(&self, identity: &str, now: Instant) -> bool {
        self.check_at(identity, now).is_admitted()
    }

    pub fn check(&self, identity: &str) -> Admission {
        self.check_at(identity, Instant::now())
    }

    pub fn check_at(&self, identity: &str, now: Instant) -> Admission {
        if self.limit == 0 {
            return Admission::Rejected {
                retry_after: self.window,
            };
        }
        let mut records = self.records.lock();

        if let Some(record) = records.by_identity.get_mut(identity) {
            if now <= record.window_reset_at {
                if record.count >= self.limit {
                    return Admission::Rejected {
                        retry_after: record.window_reset_at.saturating_duration_since(now),
                    };
                }
                record.count += 1;
                return Admission::Admitted {
                    remaining: self.limit - record.count,
                };
            }
        } else if records.by_identity.len() >= self.max_keys {
            if records.earliest_reset.map_or(true, |earliest| now > earliest) {
                records.sweep(now);
            }
            if records.by_identity.len() >= self.max_keys {
                let retry_after = records
                    .earliest_reset
                    .map_or(self.window, |earliest| earliest.saturating_duration_since(now));
                return Admission::Rejected { retry_after };
            }
        }

        let window_reset_at = now + self.window;
        records.by_identity.insert(
            identity.to_string(),
            RateLimitRecord {
                count: 1,
                window_reset_at,
            },
        );
        records.earliest_reset = Some(
            records
                .earliest_reset
                .map_or(window_reset_at, |earliest| earliest.min(window_reset_at)),
        );
        Admission::Admitted {
            remaining: self.limit - 1,
        }
    }

    /// Drops every record whose window has ended. Returns how many were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        self.records.lock().sweep(now)
    }

    pub fn len(&self) -> usize {
        self.records.lock().by_identity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().by_identity.is_empty()
    }
}

/// One limiter per route class, shared through router state.
#[derive(Debug, Clone)]
pub struct RateLimitRegistry {
    limiters: Arc<BTreeMap<RouteClass, Arc<FixedWindowLimiter>>>,
    sweep_interval: Duration,
}

impl RateLimitRegistry {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        let limiters = RouteClass::ALL
            .iter()
            .map(|class| {
                let limiter = FixedWindowLimiter::new(
                    settings.limit_for(*class),
                    settings.window,
                    settings.max_keys,
                );
                (*class, Arc::new(limiter))
            })
            .collect();

        Self {
            limiters: Arc::new(limiters),
            sweep_interval: settings.sweep_interval,
        }
    }

    pub fn limiter(&self, class: RouteClass) -> Arc<FixedWindowLimiter> {
        match self.limiters.get(&class) {
            Some(limiter) => limiter.clone(),
            // every class is inserted in from_settings
            None => Arc::new(FixedWindowLimiter::new(
                class.default_limit(),
                DEFAULT_WINDOW,
                DEFAULT_MAX_KEYS,
            )),
        }
    }

    pub fn sweep_all(&self, now: Instant) -> usize {
        self.limiters
            .values()
            .map(|limiter| limiter.sweep_expired(now))
            .sum()
    }

    pub fn key_counts(&self) -> BTreeMap<&'static str, usize> {
        self.limiters
            .iter()
            .map(|(class, limiter)| (class.as_str(), limiter.len()))
            .collect()
    }

    pub fn limits(&self) -> BTreeMap<&'static str, u32> {
        self.limiters
            .iter()
            .map(|(class, limiter)| (class.as_str(), limiter.limit()))
            .collect()
    }

    /// Periodically drops expired records from every limiter.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let registry = self.clone();
        let period = self.sweep_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = registry.sweep_all(Instant::now());
                if removed > 0 {
                    debug!(removed, "swept expired rate limit records");
                }
            }
        })
    }
}

/// Client identity: first `X-Forwarded-For` entry, then `X-Real-IP`, else the shared bucket.
pub fn client_identity(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_IDENTITY)
        .to_string()
}

/// Per-route middleware state.
#[derive(Clone)]
pub struct RouteLimit {
    pub class: RouteClass,
    pub limiter: Arc<FixedWindowLimiter>,
    pub metrics: Arc<AppMetrics>,
}

pub async fn rate_limit_middleware(
    State(route): State<RouteLimit>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let identity = client_identity(request.headers());
    match route.limiter.check(&identity) {
        Admission::Admitted { .. } => next.run(request).await,
        Admission::Rejected { retry_after } => {
            route.metrics.inc_rate_limited(route.class.as_str());
            warn!(
                class = route.class.as_str(),
                identity = %identity,
                path = request.uri().path(),
                "rate limit exceeded"
            );
            ApiError::RateLimited {
                retry_after_secs: retry_after_secs(retry_after),
            }
            .into_response()
        }
    }
}

fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    let secs = if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}
