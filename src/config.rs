use std::rc::Rc;

use http::HeaderValue;
use smol_str::SmolStr;

use crate::error::{ConfigError, ConnError};

/// How the `Host` header is filled in for requests that lack one.
#[derive(Default, Clone, Debug)]
pub enum HostHeaderPolicy {
    /// Derive `ip:port` from the resolved address. Requires a TCP address;
    /// any other address shape fails the build with a configuration error.
    #[default]
    Auto,
    /// Leave requests untouched.
    Disabled,
    /// Inject the given value into requests without a `Host` header.
    Override(HeaderValue),
}

/// Mutable builder-side connection settings.
///
/// A read-only snapshot is taken once per build call; the snapshot is what
/// every component of the resulting connection sees.
#[derive(Clone, Debug)]
pub struct ConnConfig {
    pub max_pipelined_requests: usize,
    pub max_initial_line_length: usize,
    pub max_header_size: usize,
    pub headers_encoded_size_estimate: usize,
    pub trailers_encoded_size_estimate: usize,
    pub no_delay: bool,
    pub wire_logger: Option<SmolStr>,
    pub host_header: HostHeaderPolicy,
}

impl Default for ConnConfig {
    fn default() -> Self {
        Self {
            max_pipelined_requests: 1,
            max_initial_line_length: 4096,
            max_header_size: 8192,
            headers_encoded_size_estimate: 256,
            trailers_encoded_size_estimate: 256,
            no_delay: false,
            wire_logger: None,
            host_header: HostHeaderPolicy::default(),
        }
    }
}

impl ConnConfig {
    /// Snapshot into an immutable config, validating invariants that must
    /// hold before any I/O is attempted.
    pub fn freeze(&self) -> Result<Rc<ReadOnlyConnConfig>, ConnError> {
        if self.max_pipelined_requests < 1 {
            return Err(ConfigError::InvalidPipeliningDegree(self.max_pipelined_requests).into());
        }
        Ok(Rc::new(ReadOnlyConnConfig {
            max_pipelined_requests: self.max_pipelined_requests,
            max_initial_line_length: self.max_initial_line_length,
            max_header_size: self.max_header_size,
            headers_encoded_size_estimate: self.headers_encoded_size_estimate,
            trailers_encoded_size_estimate: self.trailers_encoded_size_estimate,
            no_delay: self.no_delay,
            wire_logger: self.wire_logger.clone(),
            host_header: self.host_header.clone(),
        }))
    }
}

/// Read-only snapshot of [`ConnConfig`], shared by reference across all
/// components of one connection. Never mutated after the build call.
#[derive(Debug)]
pub struct ReadOnlyConnConfig {
    pub max_pipelined_requests: usize,
    pub max_initial_line_length: usize,
    pub max_header_size: usize,
    pub headers_encoded_size_estimate: usize,
    pub trailers_encoded_size_estimate: usize,
    pub no_delay: bool,
    pub wire_logger: Option<SmolStr>,
    pub host_header: HostHeaderPolicy,
}

impl ReadOnlyConnConfig {
    #[inline]
    pub fn is_pipelined(&self) -> bool {
        self.max_pipelined_requests > 1
    }
}
