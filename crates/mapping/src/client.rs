use std::sync::Arc;

use fleetline_core::{Capability, Coordinates, ProxyRequestSpec};
use fleetline_observability::AppMetrics;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::MapProviderConfig;
use crate::transport::{MapTransport, TransportError, UpstreamReply};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    #[error("{} failed: {status}", .capability.label())]
    Status {
        capability: Capability,
        status: u16,
        body: Value,
    },
    #[error("{} timed out after {attempts} attempt(s)", .capability.label())]
    Timeout { capability: Capability, attempts: u32 },
    #[error("{} request failed: {message}", .capability.label())]
    Transport {
        capability: Capability,
        message: String,
    },
}

/// Mapping provider client: url construction, bounded retries, error classification.
#[derive(Clone)]
pub struct MapClient {
    transport: Arc<dyn MapTransport>,
    config: Arc<MapProviderConfig>,
    metrics: Arc<AppMetrics>,
}

impl MapClient {
    pub fn new(
        config: MapProviderConfig,
        transport: Arc<dyn MapTransport>,
        metrics: Arc<AppMetrics>,
    ) -> Self {
        Self {
            transport,
            config: Arc::new(config),
            metrics,
        }
    }

    pub fn config(&self) -> &MapProviderConfig {
        &self.config
    }

    #[instrument(skip(self, spec), fields(capability = spec.capability().as_str()))]
    pub async fn fetch(&self, spec: &ProxyRequestSpec) -> Result<Value, UpstreamError> {
        let capability = spec.capability();
        let url = self.build_url(spec);
        let max_attempts = self.config.retry.max_attempts.max(1);

        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            self.metrics.inc_upstream_call();
            debug!(attempt, path = url.path(), "calling mapping provider");

            let outcome = self.transport.get(&url).await;
            if attempt >= max_attempts || !is_transient(&outcome) {
                return self.settle(capability, outcome, attempt);
            }

            let delay = self.config.retry.backoff_for(attempt);
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                outcome = %describe(&outcome),
                "transient mapping provider failure, retrying"
            );
            self.metrics.inc_upstream_retry();
            tokio::time::sleep(delay).await;
        }
    }

    pub fn build_url(&self, spec: &ProxyRequestSpec) -> Url {
        let config = self.config.as_ref();
        let mut url = config.base_url.clone();
        let segments: &[&str] = match spec {
            ProxyRequestSpec::Geocode(_) => &["search", "v3"],
            ProxyRequestSpec::Autocomplete(_) => &["autocomplete", "v3"],
            ProxyRequestSpec::Place(_) => &["place", "v3"],
            ProxyRequestSpec::ReverseGeocode(_) => &["reverse", "v3"],
            ProxyRequestSpec::Route(_) => &["route"],
            ProxyRequestSpec::Isochrone(_) => &["isochrone"],
            ProxyRequestSpec::Matrix(_) => &["matrix"],
            ProxyRequestSpec::Nearby(_) => &["nearby", "v3"],
        };
        // checked at config time: http(s) urls always have path segments
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }

        {
            let mut query = url.query_pairs_mut();
            match spec {
                ProxyRequestSpec::Route(_)
                | ProxyRequestSpec::Isochrone(_)
                | ProxyRequestSpec::Matrix(_) => {
                    query.append_pair("api-version", config.api_version.as_str());
                }
                _ => {}
            }
            query.append_pair("apikey", config.api_key.as_str());

            match spec {
                ProxyRequestSpec::Geocode(q) | ProxyRequestSpec::Autocomplete(q) => {
                    query.append_pair("text", q.text.as_str());
                    if let Some(focus) = q.focus {
                        query.append_pair("focus", focus.as_point_param().as_str());
                    }
                }
                ProxyRequestSpec::Place(q) => {
                    query.append_pair("refid", q.ref_id.as_str());
                }
                ProxyRequestSpec::ReverseGeocode(q) => {
                    append_lat_lng(&mut query, q.point);
                }
                ProxyRequestSpec::Route(q) => {
                    query.append_pair("point", q.origin.as_point_param().as_str());
                    query.append_pair("point", q.destination.as_point_param().as_str());
                    query.append_pair("vehicle", q.vehicle.as_str());
                    query.append_pair("points_encoded", "false");
                }
                ProxyRequestSpec::Isochrone(q) => {
                    query.append_pair("point", q.point.as_point_param().as_str());
                    query.append_pair("time", q.time_seconds.to_string().as_str());
                    query.append_pair("vehicle", q.vehicle.as_str());
                }
                ProxyRequestSpec::Matrix(q) => {
                    for point in &q.points {
                        query.append_pair("point", point.as_point_param().as_str());
                    }
                    query.append_pair("vehicle", q.vehicle.as_str());
                    if let Some(sources) = q.sources.as_ref() {
                        query.append_pair("sources", join_indices(sources).as_str());
                    }
                    if let Some(destinations) = q.destinations.as_ref() {
                        query.append_pair("destinations", join_indices(destinations).as_str());
                    }
                }
                ProxyRequestSpec::Nearby(q) => {
                    append_lat_lng(&mut query, q.point);
                    query.append_pair("radius", q.radius_m.to_string().as_str());
                    if let Some(category) = q.category.as_deref() {
                        query.append_pair("cats", category);
                    }
                }
            }
        }

        url
    }

    fn settle(
        &self,
        capability: Capability,
        outcome: Result<UpstreamReply, TransportError>,
        attempts: u32,
    ) -> Result<Value, UpstreamError> {
        let error = match outcome {
            Ok(reply) if reply.is_success() => return Ok(reply.body),
            Ok(reply) => UpstreamError::Status {
                capability,
                status: reply.status,
                body: reply.body,
            },
            Err(TransportError::Timeout) => UpstreamError::Timeout {
                capability,
                attempts,
            },
            Err(err) => UpstreamError::Transport {
                capability,
                message: err.to_string(),
            },
        };

        self.metrics.inc_upstream_failure(capability.as_str());
        warn!(attempts, error = %error, "mapping provider call failed");
        Err(error)
    }
}

fn append_lat_lng(
    query: &mut url::form_urlencoded::Serializer<'_, url::UrlQuery<'_>>,
    point: Coordinates,
) {
    query.append_pair("lat", point.lat.to_string().as_str());
    query.append_pair("lng", point.lng.to_string().as_str());
}

fn join_indices(indices: &[usize]) -> String {
    indices
        .iter()
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// Timeouts, dropped connections and throttling/gateway statuses are worth another attempt.
fn is_transient(outcome: &Result<UpstreamReply, TransportError>) -> bool {
    match outcome {
        Ok(reply) => matches!(reply.status, 429 | 502 | 503 | 504),
        Err(TransportError::Timeout) | Err(TransportError::Connect(_)) => true,
        Err(TransportError::Decode(_)) => false,
    }
}

fn describe(outcome: &Result<UpstreamReply, TransportError>) -> String {
    match outcome {
        Ok(reply) => format!("status {}", reply.status),
        Err(err) => err.to_string(),
    }
}
