use thiserror::Error as ThisError;

/// Errors produced while building or driving a single HTTP client connection.
#[derive(ThisError, Debug)]
pub enum ConnError {
    #[error("configuration error {0}")]
    Config(#[from] ConfigError),
    #[error("io error {0}")]
    Io(#[from] std::io::Error),
    #[cfg(not(feature = "native-tls"))]
    #[error("rustls error {0}")]
    Rustls(#[from] monoio_rustls::TlsError),
    #[cfg(feature = "native-tls")]
    #[error("native-tls error {0}")]
    NativeTls(#[from] monoio_native_tls::TlsError),
    #[error("decode error {0}")]
    H1Decode(#[from] monoio_http::h1::codec::decoder::DecodeError),
    #[error("http error {0}")]
    Http(#[from] monoio_http::common::error::HttpError),
    /// Admission gate is at capacity. Local and synchronous, safe to retry
    /// after backoff.
    #[error("too many concurrent requests (limit {0})")]
    TooManyRequests(usize),
    #[error("connection closed")]
    Closed,
    /// The stream produced a response with no outstanding request to match.
    /// Order-based correlation cannot resynchronize, so this closes the
    /// connection.
    #[error("response without outstanding request")]
    Correlation,
    #[error("request rejected by filter {0}")]
    Validation(String),
    #[error("connection task dropped the request {0}")]
    DispatchRecv(#[from] local_sync::oneshot::error::RecvError),
}

impl ConnError {
    /// Whether the caller may retry the same request on the same connection.
    /// Only admission rejections qualify; everything else is either a
    /// configuration problem or terminal for the connection.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnError::TooManyRequests(_))
    }
}

/// Build-time configuration errors. Surfaced before any I/O happens.
#[derive(ThisError, Debug)]
pub enum ConfigError {
    #[error("max pipelined requests must be at least 1, got {0}")]
    InvalidPipeliningDegree(usize),
    #[error("cannot derive a host header from a non ip:port address, provide an override")]
    UnsupportedHostAddress,
}

pub type Result<T> = std::result::Result<T, ConnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_admission_rejections_are_retryable() {
        assert!(ConnError::TooManyRequests(4).is_retryable());
        assert!(!ConnError::Closed.is_retryable());
        assert!(!ConnError::Correlation.is_retryable());
        assert!(!ConnError::Config(ConfigError::InvalidPipeliningDegree(0)).is_retryable());
    }
}
