//! Failure Classifier
//!
//! Maps a failed provider call onto a [`FailureKind`] by matching known
//! error signatures. Typed [`ApiError`]s are matched on status and code;
//! anything else falls back to matching the rendered message.

use super::error::{ApiError, Cancelled, DiscoveryError};
use super::model::FailureKind;

/// Codes and reasons meaning the service is not enabled for the scope
const DISABLED_SIGNATURES: &[&str] = &[
    "SERVICE_DISABLED",
    "accessNotConfigured",
    "has not been used in project",
    "it is disabled",
    "MissingSubscriptionRegistration",
    "SubscriptionNotRegistered",
    "OptInRequired",
    "SubscriptionRequiredException",
];

/// Codes meaning the caller lacks permission
const DENIED_SIGNATURES: &[&str] = &[
    "PERMISSION_DENIED",
    "forbidden",
    "AuthorizationFailed",
    "AccessDenied",
    "UnauthorizedOperation",
    "AuthFailure",
    "InvalidClientTokenId",
    "UnrecognizedClientException",
    "AWSOrganizationsNotInUseException",
];

/// Codes meaning the call may succeed if repeated
const TRANSIENT_SIGNATURES: &[&str] = &[
    "Throttling",
    "RequestLimitExceeded",
    "TooManyRequests",
    "RATE_LIMIT_EXCEEDED",
    "rateLimitExceeded",
    "RESOURCE_EXHAUSTED",
    "ServiceUnavailable",
    "InternalError",
    "RequestTimeout",
];

/// Classify an error raised anywhere below a scope boundary
pub fn classify(error: &anyhow::Error) -> FailureKind {
    for cause in error.chain() {
        if cause.downcast_ref::<Cancelled>().is_some() {
            return FailureKind::Cancelled;
        }
        if let Some(api) = cause.downcast_ref::<ApiError>() {
            return classify_api(api);
        }
        if cause.downcast_ref::<DiscoveryError>().is_some() {
            return FailureKind::Unknown;
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() || http.is_connect() {
                return FailureKind::Transient;
            }
        }
    }
    classify_message(&format!("{:#}", error))
}

/// Classify a structured provider error
pub fn classify_api(error: &ApiError) -> FailureKind {
    // GCP reports disabled services as 403, so this must run first
    if matches_any(&error.code, DISABLED_SIGNATURES) || matches_any(&error.message, DISABLED_SIGNATURES) {
        return FailureKind::ApiDisabled;
    }
    if error.status == 429 || error.status >= 500 || matches_any(&error.code, TRANSIENT_SIGNATURES) {
        return FailureKind::Transient;
    }
    if error.status == 401 || error.status == 403 || matches_any(&error.code, DENIED_SIGNATURES) {
        return FailureKind::PermissionDenied;
    }
    classify_message(&error.message)
}

/// Classify free-form error text
pub fn classify_message(message: &str) -> FailureKind {
    if matches_any(message, DISABLED_SIGNATURES) {
        FailureKind::ApiDisabled
    } else if matches_any(message, DENIED_SIGNATURES) {
        FailureKind::PermissionDenied
    } else if matches_any(message, TRANSIENT_SIGNATURES) {
        FailureKind::Transient
    } else {
        FailureKind::Unknown
    }
}

fn matches_any(text: &str, signatures: &[&str]) -> bool {
    signatures.iter().any(|s| text.contains(s))
}
