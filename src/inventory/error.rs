//! Error taxonomy
//!
//! Provider HTTP layers return [`ApiError`] wrapped in `anyhow::Error`; the
//! classifier recovers it by downcasting. Only [`SetupError`] is fatal to a
//! run.

use thiserror::Error;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// A structured failure returned by a provider API
#[derive(Debug, Clone, Error)]
#[error("{provider} API error [{code}] (HTTP {status}): {message}")]
pub struct ApiError {
    pub provider: &'static str,
    pub status: u16,
    /// Provider error code or reason, e.g. `AccessDenied`, `SERVICE_DISABLED`
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(
        provider: &'static str,
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Unrecoverable problems that stop the run before any scope is scanned
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("no usable {provider} credentials: {reason}")]
    NoCredentials {
        provider: &'static str,
        reason: String,
    },

    #[error("required tool `{0}` is not available")]
    ToolUnavailable(String),

    #[error("invalid scope selection: {0}")]
    InvalidScope(String),
}

/// Data errors found while walking the hierarchy
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("hierarchy under {scope_id} is deeper than {limit} levels")]
    DepthExceeded { scope_id: String, limit: usize },

    #[error("scope {0} appears among its own ancestors")]
    Cycle(String),
}

/// Returned instead of issuing a provider call once the scan is cancelled
#[derive(Debug, Clone, Copy, Error)]
#[error("scan cancelled")]
pub struct Cancelled;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(500);
        let sanitized = sanitize_for_log(&long);
        assert!(sanitized.starts_with(&"x".repeat(200)));
        assert!(sanitized.contains("500 bytes total"));
        assert_eq!(sanitize_for_log("a\nb"), "ab");
    }
}
