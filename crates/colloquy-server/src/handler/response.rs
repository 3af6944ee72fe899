//! Chat response types.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// JSON body returned for handler errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Stable machine-readable error name.
    pub error: Cow<'static, str>,
    /// User-facing message.
    pub message: String,
    /// Debugging context, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Liveness probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Always `"ok"` while the process serves requests.
    pub status: Cow<'static, str>,
    /// Crate version.
    pub version: Cow<'static, str>,
}

impl HealthStatus {
    /// Reports a healthy service.
    pub fn ok() -> Self {
        Self {
            status: Cow::Borrowed("ok"),
            version: Cow::Borrowed(env!("CARGO_PKG_VERSION")),
        }
    }
}
