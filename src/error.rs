use axum::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the indexer core.
///
/// Handlers map each variant to an HTTP status via [`Error::status`];
/// everything else propagates with `?`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown crate, version, item path, or fragment. Carries the missing
    /// identifier so the caller can report it.
    #[error("{0} not found")]
    NotFound(String),

    /// Malformed request, path, or URI.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Embedding, rerank, or upstream registry failure. Not retried
    /// internally; rerank callers degrade to vector-only ordering.
    #[error("provider error: {0}")]
    Provider(String),

    /// Refused input: wrong-dimension or non-finite vector, bad file magic.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// HTTP status for the error kind, used by the RPC layer.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Provider(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(Error::NotFound("serde@9.9.9".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::InvalidInput("empty path".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::Provider("embed 500".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            Error::DataCorruption("bad magic".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
