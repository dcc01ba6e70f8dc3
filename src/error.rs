use thiserror::Error;

/// Failures surfaced by [`crate::api::client::ApiClient`].
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection refused, DNS failure or the transport dropped mid-request.
    #[error("Service unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),

    #[error("Request timeout, please check your internet connection")]
    Timeout,

    #[error("Unauthorized")]
    Unauthorized,

    /// Non-success HTTP status. `title`/`message` come from the server body when it sends them.
    #[error("{title}: {message} (HTTP {status})")]
    Http {
        status: u16,
        title: String,
        message: String,
    },

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("{0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Http {
                status: err.status().map(|s| s.as_u16()).unwrap_or_default(),
                title: "Oops, something went wrong!".into(),
                message: err.to_string(),
            }
        } else {
            ApiError::Unavailable(err)
        }
    }
}

impl ApiError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
            || matches!(self, ApiError::Http { status: 401, .. })
    }
}

/// Failures of the on-disk stores (sender cache, preferences, config).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("No data directory available")]
    NoDataDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode settings: {0}")]
    Toml(#[from] toml::ser::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_detection_covers_plain_401() {
        assert!(ApiError::Unauthorized.is_unauthorized());
        let err = ApiError::Http {
            status: 401,
            title: "Unauthorized".into(),
            message: "You are not authorized".into(),
        };
        assert!(err.is_unauthorized());
        assert!(!ApiError::Timeout.is_unauthorized());
    }

    #[test]
    fn http_error_message_includes_title_and_status() {
        let err = ApiError::Http {
            status: 500,
            title: "Oops".into(),
            message: "failed to get user".into(),
        };
        assert_eq!(err.to_string(), "Oops: failed to get user (HTTP 500)");
    }
}
