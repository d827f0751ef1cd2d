//! Error types surfaced by the client layer.

/// Failure reported by a remote source for a read or a live subscription.
///
/// `Clone` so the same error can be forwarded to a subscription callback and
/// kept in aggregate state for display.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("remote source unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not authenticated")]
    Unauthenticated,
    #[error("unknown collection: {0}")]
    NotFound(String),
    #[error("remote source error: {0}")]
    Internal(String),
}

impl SourceError {
    /// Message suitable for showing next to a retry affordance.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "Could not reach the server. Check your connection and retry.",
            Self::PermissionDenied(_) | Self::Unauthenticated => {
                "You do not have access to this information. Sign in again and retry."
            }
            Self::NotFound(_) | Self::Internal(_) => "Something went wrong loading this. Retry.",
        }
    }
}

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{feed}: collection name must not be empty")]
    EmptyCollection { feed: &'static str },
    #[error("{feed}: owner field must not be empty")]
    EmptyOwnerField { feed: &'static str },
    #[error("{first} and {second} must not use the same collection and owner field")]
    DuplicateFeed {
        first: &'static str,
        second: &'static str,
    },
    #[error("log filter must not be empty")]
    EmptyLogFilter,
    #[error("invalid log filter `{filter}`: {reason}")]
    InvalidLogFilter { filter: String, reason: String },
}
