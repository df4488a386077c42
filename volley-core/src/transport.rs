use std::future::Future;
use std::time::{Duration, Instant};

use volley_http::{HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind};

/// A request that produced no HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: HttpTransportErrorKind,
    pub message: String,
    /// Time spent before the failure surfaced.
    pub elapsed: Duration,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

pub type Exchange = std::result::Result<HttpResponse, TransportError>;

/// Sends one request and waits for the full response body.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, req: HttpRequest) -> impl Future<Output = Exchange> + Send;
}

impl Transport for HttpClient {
    async fn send(&self, req: HttpRequest) -> Exchange {
        let started = Instant::now();
        self.request(req).await.map_err(|err| TransportError {
            kind: err.transport_error_kind(),
            message: err.to_string(),
            elapsed: started.elapsed(),
        })
    }
}
