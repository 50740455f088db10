use thiserror::Error;

use crate::api::ApiError;

/// Failure recorded on a cache entry.
///
/// Entries are read by many consumers at once, so this is a cloneable
/// summary of whatever the transport returned rather than the transport
/// error itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Request failed{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    Transport { status: Option<u16>, message: String },

    #[error("Unauthorized - session may be expired")]
    Unauthorized,

    #[error("Unrecognized response shape: {0}")]
    Shape(String),
}

impl QueryError {
    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        QueryError::Transport {
            status,
            message: message.into(),
        }
    }

    /// Classify an error coming out of the API client.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<ApiError>() {
            Some(api) => Self::from(api),
            None => QueryError::transport(None, format!("{:#}", err)),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            QueryError::Transport { status, .. } => *status,
            QueryError::Unauthorized => Some(401),
            QueryError::Shape(_) => None,
        }
    }

    /// Outcomes that are a normal consequence of an expired session.
    /// These surface as a failed status but are kept out of the error log.
    pub fn is_expected(&self) -> bool {
        matches!(self, QueryError::Unauthorized)
    }
}

impl From<&ApiError> for QueryError {
    fn from(err: &ApiError) -> Self {
        match err {
            ApiError::Unauthorized => QueryError::Unauthorized,
            other => QueryError::transport(other.status(), other.to_string()),
        }
    }
}

impl From<ApiError> for QueryError {
    fn from(err: ApiError) -> Self {
        QueryError::from(&err)
    }
}

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        QueryError::from_anyhow(&err)
    }
}
