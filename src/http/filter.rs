//! Request decorators and the admission gate.
//!
//! Composition order is a contract: user filters in registration order,
//! then host-header defaulting, then the gate, then the transport adapter.
//! The gate sits innermost so nothing can reach the wire without passing
//! admission, and a request rejected by any filter never touches the
//! in-flight counter.

use std::{cell::Cell, rc::Rc};

use http::{header, HeaderValue, Request};
use monoio_http::common::body::HttpBody;

use crate::{
    config::HostHeaderPolicy,
    connectors::ResolvedAddr,
    error::{ConfigError, ConnError},
};

/// A pure, fallible request transformation. Filters compose by ordered
/// application; an error aborts the send before admission.
pub type ConnectionFilter =
    Rc<dyn Fn(Request<HttpBody>) -> Result<Request<HttpBody>, ConnError>>;

/// The ordered decorator stack in front of the admission gate.
pub(crate) struct FilterChain {
    filters: Vec<ConnectionFilter>,
}

impl std::fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl FilterChain {
    /// First-registered user filter is outermost; host-header defaulting
    /// runs after every user filter so their mutations are visible to it.
    pub(crate) fn assemble(user: &[ConnectionFilter], host: Option<ConnectionFilter>) -> Self {
        let mut filters = user.to_vec();
        if let Some(host) = host {
            filters.push(host);
        }
        Self { filters }
    }

    pub(crate) fn apply(&self, mut request: Request<HttpBody>) -> Result<Request<HttpBody>, ConnError> {
        for filter in &self.filters {
            request = filter(request)?;
        }
        Ok(request)
    }
}

/// Resolve the host-header policy against the address at build time. `Auto`
/// needs an `ip:port`-shaped address; anything else is a configuration
/// error surfaced by the build, not per request.
pub(crate) fn host_header_filter(
    policy: &HostHeaderPolicy,
    addr: &ResolvedAddr,
) -> Result<Option<ConnectionFilter>, ConnError> {
    let value = match policy {
        HostHeaderPolicy::Disabled => return Ok(None),
        HostHeaderPolicy::Override(value) => value.clone(),
        HostHeaderPolicy::Auto => {
            let host = addr
                .host_and_port()
                .ok_or(ConfigError::UnsupportedHostAddress)?;
            HeaderValue::from_str(&host).map_err(|_| ConfigError::UnsupportedHostAddress)?
        }
    };
    Ok(Some(Rc::new(move |mut request: Request<HttpBody>| {
        if !request.headers().contains_key(header::HOST) {
            request.headers_mut().insert(header::HOST, value.clone());
        }
        Ok(request)
    })))
}

/// Bounds the number of in-flight requests to the pipelining degree. The
/// single source of truth for "how many requests may be outstanding",
/// independent of the adapter's own bookkeeping. Rejects instead of
/// queueing; backpressure is signaled to the caller.
#[derive(Debug)]
pub(crate) struct AdmissionGate {
    limit: usize,
    in_flight: Rc<Cell<usize>>,
}

impl AdmissionGate {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            in_flight: Rc::new(Cell::new(0)),
        }
    }

    /// Admit or reject synchronously. The permit decrements the counter
    /// when the response has completed or the request failed.
    pub(crate) fn try_admit(&self) -> Result<AdmissionPermit, ConnError> {
        let current = self.in_flight.get();
        if current >= self.limit {
            return Err(ConnError::TooManyRequests(self.limit));
        }
        self.in_flight.set(current + 1);
        Ok(AdmissionPermit {
            in_flight: self.in_flight.clone(),
        })
    }

    #[inline]
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.get()
    }
}

#[derive(Debug)]
pub(crate) struct AdmissionPermit {
    in_flight: Rc<Cell<usize>>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.in_flight.set(self.in_flight.get() - 1);
    }
}
