use axum::{
    response::{IntoResponse, Response},
    Json,
};
use http::StatusCode;
use serde_json::json;
use tower::BoxError;

/// Reasons a request is refused before reaching a protected handler.
///
/// Messages are safe to return to callers: they never include token contents or key material.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("authorization header is expected")]
    MissingAuthorizationHeader,
    #[error("authorization header must be of the form `Bearer <token>`")]
    MalformedAuthorizationHeader,
    #[error("unable to parse authentication token")]
    MalformedToken,
    #[error("token is signed with an unsupported algorithm")]
    UnsupportedAlgorithm,
    #[error("unable to find the appropriate signing key")]
    KeyNotFound,
    #[error("signing keys are currently unavailable")]
    KeyStoreUnavailable(#[source] FetchError),
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token expired")]
    TokenExpired,
    #[error("incorrect issuer claim")]
    InvalidIssuer,
    #[error("incorrect audience claim")]
    InvalidAudience,
    #[error("permissions not included in token")]
    MissingPermissionsClaim,
    #[error("missing required permission `{required}`")]
    MissingPermission { required: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::MissingPermission { .. } => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable identifier of the error kind, suitable for log fields and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            Error::MissingAuthorizationHeader => "missing_authorization_header",
            Error::MalformedAuthorizationHeader => "malformed_authorization_header",
            Error::MalformedToken => "malformed_token",
            Error::UnsupportedAlgorithm => "unsupported_algorithm",
            Error::KeyNotFound => "key_not_found",
            Error::KeyStoreUnavailable(_) => "key_store_unavailable",
            Error::InvalidSignature => "invalid_signature",
            Error::TokenExpired => "token_expired",
            Error::InvalidIssuer => "invalid_issuer",
            Error::InvalidAudience => "invalid_audience",
            Error::MissingPermissionsClaim => "missing_permissions_claim",
            Error::MissingPermission { .. } => "missing_permission",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let body = Json(json!({
            "success": false,
            "error": status_code.as_u16(),
            "message": self.to_string(),
        }));
        (status_code, body).into_response()
    }
}

/// Failures while retrieving the JWK set from the identity provider.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("failed to fetch JWK set")]
    Request(#[from] reqwest::Error),
    #[error("received error response when fetching JWK set: {status_code}")]
    ErrorResponse { status_code: StatusCode },
    #[error("timed out fetching JWK set")]
    Timeout,
    #[error("concurrent JWK set refresh failed")]
    ConcurrentRefreshFailed,
    #[error("JWK set fetch service failed")]
    Service(#[source] BoxError),
}

impl FetchError {
    /// Recovers a `FetchError` from the boxed errors produced by `tower` middleware.
    pub(crate) fn from_boxed(err: BoxError) -> Self {
        if err.is::<tower::timeout::error::Elapsed>() {
            return FetchError::Timeout;
        }
        match err.downcast::<FetchError>() {
            Ok(fetch_error) => *fetch_error,
            Err(other) => FetchError::Service(other),
        }
    }
}

#[cfg(test)]
mod test {
    use axum::response::IntoResponse;
    use http::StatusCode;
    use tower::BoxError;

    use super::{Error, FetchError};

    #[test]
    fn test_only_missing_permission_is_forbidden() {
        let unauthorized = [
            Error::MissingAuthorizationHeader,
            Error::MalformedAuthorizationHeader,
            Error::MalformedToken,
            Error::UnsupportedAlgorithm,
            Error::KeyNotFound,
            Error::KeyStoreUnavailable(FetchError::Timeout),
            Error::InvalidSignature,
            Error::TokenExpired,
            Error::InvalidIssuer,
            Error::InvalidAudience,
            Error::MissingPermissionsClaim,
        ];
        for error in unauthorized {
            assert_eq!(error.status_code(), StatusCode::UNAUTHORIZED, "{}", error.code());
        }

        let forbidden = Error::MissingPermission {
            required: "get:actors".to_string(),
        };
        assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = Error::MissingPermission {
            required: "delete:movies".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&body).unwrap(),
            serde_json::json!({
                "success": false,
                "error": 403,
                "message": "missing required permission `delete:movies`",
            })
        );
    }

    #[test]
    fn test_fetch_error_from_boxed() {
        let elapsed: BoxError = tower::timeout::error::Elapsed::new().into();
        assert!(matches!(FetchError::from_boxed(elapsed), FetchError::Timeout));

        let inner: BoxError = FetchError::ErrorResponse {
            status_code: StatusCode::BAD_GATEWAY,
        }
        .into();
        assert!(matches!(
            FetchError::from_boxed(inner),
            FetchError::ErrorResponse { status_code } if status_code == StatusCode::BAD_GATEWAY
        ));

        let other: BoxError = "worker gone".into();
        assert!(matches!(FetchError::from_boxed(other), FetchError::Service(_)));
    }
}
