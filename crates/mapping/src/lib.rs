pub mod client;
pub mod config;
pub mod transport;

pub use client::{MapClient, UpstreamError};
pub use config::{ConfigError, MapProviderConfig, RetryPolicy};
pub use transport::{MapTransport, ReqwestTransport, ScriptedTransport, TransportError, UpstreamReply};
