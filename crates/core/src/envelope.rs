use serde::Serialize;

pub const UPSTREAM_SOURCE: &str = "VietMap API";

/// Success body shared by every route: `{success:true, data, source?, timestamp}`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<&'static str>,
    pub timestamp: String,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            source: None,
            timestamp: now_rfc3339(),
        }
    }

    /// Wraps a provider response body without touching its fields.
    pub fn upstream(data: T) -> Self {
        Self {
            success: true,
            data,
            source: Some(UPSTREAM_SOURCE),
            timestamp: now_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
