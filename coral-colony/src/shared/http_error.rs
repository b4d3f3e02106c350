//! Server error

use axum::{http::StatusCode, response::IntoResponse};

use crate::error::{Error, ErrorKind};

pub(crate) type HttpResult<T, E = HttpError> = core::result::Result<T, E>;

#[derive(Debug, Clone)]
pub(crate) struct HttpError {
    status: StatusCode,
    detail: Option<String>,
    retry_after_secs: Option<u64>,
}

impl Default for HttpError {
    fn default() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: None,
            retry_after_secs: None,
        }
    }
}

impl HttpError {
    /// Create a new [`HttpError`].
    pub fn new(status_code: StatusCode, message: Option<impl ToString>) -> HttpError {
        Self {
            status: status_code,
            detail: message.map(|m| m.to_string()),
            retry_after_secs: None,
        }
    }

    /// An `Unauthorized` response carrying a `Retry-After` hint, used for
    /// rate-limited public-endpoint calls.
    pub fn rate_limited(retry_after_secs: u64) -> HttpError {
        Self {
            status: StatusCode::UNAUTHORIZED,
            detail: Some("rate limit exceeded".to_string()),
            retry_after_secs: Some(retry_after_secs),
        }
    }

    /// Prefix the detail text, keeping the status.
    pub fn with_detail_prefix(mut self, prefix: &str) -> HttpError {
        self.detail = Some(match self.detail.take() {
            Some(detail) => format!("{prefix}{detail}"),
            None => prefix.trim_end().trim_end_matches(':').to_string(),
        });
        self
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let mut response = match self.detail {
            Some(detail) => (self.status, detail).into_response(),
            _ => (self.status,).into_response(),
        };
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<Error> for HttpError {
    fn from(error: Error) -> Self {
        let status = match error.kind() {
            ErrorKind::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidReferral => StatusCode::FORBIDDEN,
            ErrorKind::MalformedRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Cancelled => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Invariant violations are logged in full but surfaced opaquely.
        if error.kind() == ErrorKind::Internal {
            tracing::error!(%error, "internal colony error");
            return Self::new(status, Some("internal error"));
        }

        Self::new(status, Some(error))
    }
}

// === INTERNAL_SERVER_ERROR ===
// Very common errors that we can just convert to a Internal Server Error.
// This way, we can use `?` to propagate errors without having to handle them.

impl From<std::io::Error> for HttpError {
    fn from(error: std::io::Error) -> Self {
        tracing::debug!(?error);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, Some(error))
    }
}

impl From<anyhow::Error> for HttpError {
    fn from(error: anyhow::Error) -> Self {
        tracing::debug!(?error);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, Some(error))
    }
}

impl From<axum::Error> for HttpError {
    fn from(error: axum::Error) -> Self {
        tracing::debug!(?error);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, Some(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_detail_is_hidden() {
        let err = Error::internal("psk table corrupted at row 3");
        let http: HttpError = err.into();

        assert_eq!(http.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(http.detail.as_deref(), Some("internal error"));
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let response = HttpError::rate_limited(42).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get("retry-after").unwrap(), "42");
    }

    #[test]
    fn kind_to_status_mapping() {
        let cases = [
            (ErrorKind::NotInitialized, StatusCode::SERVICE_UNAVAILABLE),
            (ErrorKind::Unauthorized, StatusCode::UNAUTHORIZED),
            (ErrorKind::InvalidReferral, StatusCode::FORBIDDEN),
            (ErrorKind::MalformedRequest, StatusCode::BAD_REQUEST),
            (ErrorKind::NotFound, StatusCode::NOT_FOUND),
            (ErrorKind::Conflict, StatusCode::CONFLICT),
            (ErrorKind::Cancelled, StatusCode::REQUEST_TIMEOUT),
        ];

        for (kind, status) in cases {
            let http: HttpError = Error::new(kind).into();
            assert_eq!(http.status, status, "{kind}");
        }
    }
}
