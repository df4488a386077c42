use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse failure class of a request that produced no response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum HttpTransportErrorKind {
    /// Rejected before sending: bad URL, scheme or header.
    InvalidRequest,
    /// The target refused or never accepted the connection.
    Connect,
    Request,
    Timeout,
    Body,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("unsupported url scheme (http/https only): {0}")]
    UnsupportedScheme(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("could not build request: {0}")]
    Build(#[from] http::Error),

    #[error("request failed: {0}")]
    Send(#[from] hyper_util::client::legacy::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("response body: {0}")]
    Body(#[from] hyper::Error),
}

impl From<http::header::InvalidHeaderName> for Error {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for Error {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl Error {
    #[must_use]
    pub fn transport_error_kind(&self) -> HttpTransportErrorKind {
        match self {
            Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::InvalidHeader(_)
            | Self::Build(_) => HttpTransportErrorKind::InvalidRequest,
            Self::Send(err) if err.is_connect() => HttpTransportErrorKind::Connect,
            Self::Send(_) => HttpTransportErrorKind::Request,
            Self::Timeout(_) => HttpTransportErrorKind::Timeout,
            Self::Body(_) => HttpTransportErrorKind::Body,
        }
    }
}
