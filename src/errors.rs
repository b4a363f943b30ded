//! Standardized error types following the `error-oidp-<domain>-<number>` format.

use http::StatusCode;
use thiserror::Error;

/// Configuration errors that occur during application startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error when a required environment variable is not set
    #[error("error-oidp-config-1 {0} must be set")]
    EnvVarRequired(String),

    /// Error when duration string cannot be parsed
    #[error("error-oidp-config-2 Failed to parse duration '{0}': {1}")]
    DurationParsingFailed(String, String),

    /// Error when boolean string cannot be parsed
    #[error(
        "error-oidp-config-3 Failed to parse boolean '{0}': expected true/false/1/0/yes/no/on/off"
    )]
    BoolParsingFailed(String),

    /// Error when a URL setting cannot be parsed
    #[error("error-oidp-config-4 Unable to parse URL '{0}': {1}")]
    UrlParsingFailed(String, String),

    /// Error when server signing key material cannot be loaded or generated
    #[error("error-oidp-config-5 Signing key setup failed: {0}")]
    SigningKeySetupFailed(String),
}

/// Storage errors raised by repository implementations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Error when the backing store rejects an operation
    #[error("error-oidp-storage-1 Store operation failed: {0}")]
    OperationFailed(String),

    /// Error when data serialization fails
    #[error("error-oidp-storage-2 Data serialization failed: {0}")]
    SerializationFailed(String),

    /// Error when the requested record does not exist
    #[error("error-oidp-storage-3 Not found: {0}")]
    NotFound(String),

    /// Error when the record exists but has been invalidated
    ///
    /// Distinct from [`StorageError::NotFound`] so a replayed
    /// authorization code can be told apart from an unknown one.
    #[error("error-oidp-storage-4 Inactive: {0}")]
    Inactive(String),
}

/// Token strategy errors
///
/// Malformed values and bad signatures are separate kinds because callers
/// report them differently: a wrong part count never reached the HMAC.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    /// Token value does not have the expected structure
    #[error("error-oidp-token-1 Malformed token: {0}")]
    Malformed(String),

    /// Token structure is valid but the signature does not verify
    #[error("error-oidp-token-2 Bad token signature")]
    BadSignature,

    /// Token verified but is past its expiration
    #[error("error-oidp-token-3 Token expired")]
    Expired,

    /// Token failed verification for another reason
    #[error("error-oidp-token-4 Invalid token: {0}")]
    Invalid(String),
}

/// OAuth 2.0 / OpenID Connect protocol errors (RFC 6749 §5.2, OIDC Core §3.1.2.6)
///
/// A closed taxonomy: every failure surfaced to a client maps to exactly one
/// of these codes. Lower-level errors (JOSE, storage) are translated to the
/// narrowest matching variant before leaving the core.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("error-oidp-protocol-1 Invalid request: {0}")]
    InvalidRequest(String),

    #[error("error-oidp-protocol-2 Invalid client: {0}")]
    InvalidClient(String),

    #[error("error-oidp-protocol-3 Invalid grant: {0}")]
    InvalidGrant(String),

    #[error("error-oidp-protocol-4 Unauthorized client: {0}")]
    UnauthorizedClient(String),

    #[error("error-oidp-protocol-5 Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("error-oidp-protocol-6 Unsupported response type: {0}")]
    UnsupportedResponseType(String),

    #[error("error-oidp-protocol-7 Invalid scope: {0}")]
    InvalidScope(String),

    #[error("error-oidp-protocol-8 Access denied: {0}")]
    AccessDenied(String),

    #[error("error-oidp-protocol-9 Server error: {0}")]
    ServerError(String),

    #[error("error-oidp-protocol-10 Login required: {0}")]
    LoginRequired(String),

    #[error("error-oidp-protocol-11 Interaction required: {0}")]
    InteractionRequired(String),

    #[error("error-oidp-protocol-12 Consent required: {0}")]
    ConsentRequired(String),

    #[error("error-oidp-protocol-13 Account selection required: {0}")]
    AccountSelectionRequired(String),

    #[error("error-oidp-protocol-14 Invalid request object: {0}")]
    InvalidRequestObject(String),

    #[error("error-oidp-protocol-15 Invalid request URI: {0}")]
    InvalidRequestUri(String),
}

impl ProtocolError {
    /// Machine-readable error code for the `error` response parameter
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::AccessDenied(_) => "access_denied",
            Self::ServerError(_) => "server_error",
            Self::LoginRequired(_) => "login_required",
            Self::InteractionRequired(_) => "interaction_required",
            Self::ConsentRequired(_) => "consent_required",
            Self::AccountSelectionRequired(_) => "account_selection_required",
            Self::InvalidRequestObject(_) => "invalid_request_object",
            Self::InvalidRequestUri(_) => "invalid_request_uri",
        }
    }

    /// HTTP status code for direct (non-redirect) error responses
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Human-readable description for the `error_description` response parameter
    pub fn description(&self) -> String {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::InvalidScope(d)
            | Self::AccessDenied(d)
            | Self::ServerError(d)
            | Self::LoginRequired(d)
            | Self::InteractionRequired(d)
            | Self::ConsentRequired(d)
            | Self::AccountSelectionRequired(d)
            | Self::InvalidRequestObject(d)
            | Self::InvalidRequestUri(d) => d.clone(),
        }
    }
}

impl From<StorageError> for ProtocolError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(d) => ProtocolError::InvalidGrant(d),
            StorageError::Inactive(d) => ProtocolError::InvalidGrant(format!("inactive: {}", d)),
            other => ProtocolError::ServerError(other.to_string()),
        }
    }
}

impl From<TokenError> for ProtocolError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Malformed(d) => ProtocolError::InvalidGrant(format!("malformed: {}", d)),
            TokenError::BadSignature => ProtocolError::InvalidGrant("bad signature".to_string()),
            TokenError::Expired => ProtocolError::InvalidGrant("token expired".to_string()),
            TokenError::Invalid(d) => ProtocolError::InvalidGrant(d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_codes_and_statuses() {
        let err = ProtocolError::InvalidClient("bad secret".to_string());
        assert_eq!(err.code(), "invalid_client");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);

        let err = ProtocolError::AccessDenied("fresh auth".to_string());
        assert_eq!(err.code(), "access_denied");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = ProtocolError::LoginRequired("no subject".to_string());
        assert_eq!(err.code(), "login_required");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ProtocolError::ServerError("handler misconfigured".to_string());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn token_errors_narrow_to_invalid_grant() {
        let err: ProtocolError = TokenError::BadSignature.into();
        assert_eq!(err.code(), "invalid_grant");

        let err: ProtocolError = TokenError::Expired.into();
        assert_eq!(err.code(), "invalid_grant");
    }

    #[test]
    fn inactive_storage_is_not_server_error() {
        let err: ProtocolError = StorageError::Inactive("code abc".to_string()).into();
        assert_eq!(err.code(), "invalid_grant");

        let err: ProtocolError = StorageError::OperationFailed("io".to_string()).into();
        assert_eq!(err.code(), "server_error");
    }
}
