pub mod envelope;
pub mod models;
pub mod validation;

pub use envelope::{now_rfc3339, Envelope, ErrorEnvelope, UPSTREAM_SOURCE};
pub use models::*;
pub use validation::{QueryParams, ValidationError};
