use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: Value,
}

impl UpstreamReply {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream connection failed: {0}")]
    Connect(String),
    #[error("upstream response could not be decoded: {0}")]
    Decode(String),
}

/// Outbound GET seam for the mapping provider.
pub trait MapTransport: Send + Sync {
    fn get<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<UpstreamReply, TransportError>>;
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl MapTransport for ReqwestTransport {
    fn get<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<UpstreamReply, TransportError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(classify_reqwest_error)?;

            let status = response.status().as_u16();
            let text = response.text().await.map_err(classify_reqwest_error)?;

            let body = match serde_json::from_str::<Value>(&text) {
                Ok(body) => body,
                Err(err) if (200..300).contains(&status) => {
                    return Err(TransportError::Decode(err.to_string()));
                }
                Err(_) => Value::String(text),
            };

            Ok(UpstreamReply { status, body })
        })
    }
}

// the request url carries the api key, so it is stripped from every error
fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    let err = err.without_url();
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_decode() || err.is_body() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Connect(err.to_string())
    }
}

/// In-process transport that replays queued replies and records every url it was asked for.
/// Once the queue is empty it answers with the default reply.
#[derive(Debug)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<UpstreamReply, TransportError>>>,
    default_reply: UpstreamReply,
    calls: Mutex<Vec<Url>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new(UpstreamReply::ok(Value::Object(Default::default())))
    }
}

impl ScriptedTransport {
    pub fn new(default_reply: UpstreamReply) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default_reply,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Result<UpstreamReply, TransportError>) {
        self.queue.lock().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Url> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl MapTransport for ScriptedTransport {
    fn get<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<UpstreamReply, TransportError>> {
        self.calls.lock().push(url.clone());
        let next = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_reply.clone()));
        Box::pin(async move { next })
    }
}
