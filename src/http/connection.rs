//! The two request/response correlation strategies over one message stream.
//!
//! Each connection runs a dispatcher task that exclusively owns the framed
//! stream; user handles push requests into a same-thread queue and park on a
//! oneshot completion. The non-pipelined dispatcher handles one exchange at
//! a time; the pipelined dispatcher writes every queued request in
//! submission order before reading the next response and completing the
//! oldest waiter. HTTP/1.1 pipelining has no request ids, so arrival order
//! is the only correlation key.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use http::{Request, Response};
use local_sync::{oneshot, semaphore::Semaphore};
use monoio::io::{sink::Sink, AsyncReadRent, AsyncWriteRent};
use monoio_http::{
    common::{body::HttpBody, error::HttpError},
    h1::codec::{decoder::DecodeError, ClientCodec},
};

use super::boundary::MessageFramer;
use crate::{config::ReadOnlyConnConfig, error::ConnError};

/// Connection lifecycle. `Closing` drains responses for requests already on
/// the wire but accepts nothing new; `Closed` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closing,
    Closed,
}

type Completer = oneshot::Sender<Result<Response<HttpBody>, ConnError>>;

struct Dispatch {
    request: Request<HttpBody>,
    completer: Completer,
}

struct ConnShared {
    config: Rc<ReadOnlyConnConfig>,
    queue: RefCell<VecDeque<Dispatch>>,
    doorbell: Semaphore,
    state: Cell<ConnState>,
    // dispatched but not yet completed; the adapters' own defensive limit,
    // distinct from the admission gate's counter
    outstanding: Cell<usize>,
}

impl ConnShared {
    fn new(config: Rc<ReadOnlyConnConfig>) -> Rc<Self> {
        Rc::new(Self {
            config,
            queue: RefCell::new(VecDeque::new()),
            doorbell: Semaphore::new(0),
            state: Cell::new(ConnState::Open),
            outstanding: Cell::new(0),
        })
    }

    fn complete(&self, completer: Completer, result: Result<Response<HttpBody>, ConnError>) {
        self.outstanding.set(self.outstanding.get() - 1);
        // the receiver may have been dropped by a cancelled caller; the
        // response was still consumed to keep correlation order intact
        let _ = completer.send(result);
    }

    fn request_close(&self) {
        if self.state.get() == ConnState::Open {
            self.state.set(ConnState::Closing);
            self.doorbell.close();
        }
    }
}

/// Handle half shared by both adapter variants.
struct ConnCore {
    shared: Rc<ConnShared>,
}

impl ConnCore {
    async fn dispatch(&self, request: Request<HttpBody>) -> Result<Response<HttpBody>, ConnError> {
        if self.shared.state.get() != ConnState::Open {
            return Err(ConnError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.shared.queue.borrow_mut().push_back(Dispatch {
            request,
            completer: tx,
        });
        self.shared.outstanding.set(self.shared.outstanding.get() + 1);
        self.shared.doorbell.add_permits(1);
        rx.await?
    }

    #[inline]
    fn state(&self) -> ConnState {
        self.shared.state.get()
    }
}

impl Drop for ConnCore {
    fn drop(&mut self) {
        self.shared.request_close();
    }
}

/// Strictly serial adapter: at most one request is ever outstanding.
///
/// Selected when the pipelining degree is exactly 1. The admission gate
/// already enforces the same bound; the local check keeps the invariant even
/// if the adapter is driven directly.
pub struct NonPipelinedConnection {
    core: ConnCore,
}

impl NonPipelinedConnection {
    pub(crate) fn spawn<IO>(config: Rc<ReadOnlyConnConfig>, framer: MessageFramer<IO>) -> Self
    where
        IO: AsyncReadRent + AsyncWriteRent + 'static,
        ClientCodec<IO>: Sink<Request<HttpBody>>,
        <ClientCodec<IO> as Sink<Request<HttpBody>>>::Error: Into<HttpError>,
    {
        let shared = ConnShared::new(config);
        monoio::spawn(run_non_pipelined(shared.clone(), framer));
        Self {
            core: ConnCore { shared },
        }
    }

    pub async fn send(&self, request: Request<HttpBody>) -> Result<Response<HttpBody>, ConnError> {
        let limit = self.core.shared.config.max_pipelined_requests;
        if self.core.shared.outstanding.get() >= limit {
            return Err(ConnError::TooManyRequests(limit));
        }
        self.core.dispatch(request).await
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.core.state()
    }

    pub fn close(&self) {
        self.core.shared.request_close();
    }
}

/// FIFO-correlated adapter: requests are written in submission order and
/// response N is matched to request N. Always sits behind the admission
/// gate, which bounds how far writes may run ahead of responses.
pub struct PipelinedConnection {
    core: ConnCore,
}

impl PipelinedConnection {
    pub(crate) fn spawn<IO>(config: Rc<ReadOnlyConnConfig>, framer: MessageFramer<IO>) -> Self
    where
        IO: AsyncReadRent + AsyncWriteRent + 'static,
        ClientCodec<IO>: Sink<Request<HttpBody>>,
        <ClientCodec<IO> as Sink<Request<HttpBody>>>::Error: Into<HttpError>,
    {
        let shared = ConnShared::new(config);
        monoio::spawn(run_pipelined(shared.clone(), framer));
        Self {
            core: ConnCore { shared },
        }
    }

    pub async fn send(&self, request: Request<HttpBody>) -> Result<Response<HttpBody>, ConnError> {
        self.core.dispatch(request).await
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.core.state()
    }

    pub fn close(&self) {
        self.core.shared.request_close();
    }
}

/// The closed set of correlation strategies, chosen once at build time.
pub enum ConnectionVariant {
    NonPipelined(NonPipelinedConnection),
    Pipelined(PipelinedConnection),
}

impl std::fmt::Debug for ConnectionVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (name, state) = match self {
            ConnectionVariant::NonPipelined(conn) => ("NonPipelined", conn.state()),
            ConnectionVariant::Pipelined(conn) => ("Pipelined", conn.state()),
        };
        f.debug_struct(name).field("state", &state).finish()
    }
}

impl ConnectionVariant {
    #[inline]
    pub async fn send(&self, request: Request<HttpBody>) -> Result<Response<HttpBody>, ConnError> {
        match self {
            ConnectionVariant::NonPipelined(conn) => conn.send(request).await,
            ConnectionVariant::Pipelined(conn) => conn.send(request).await,
        }
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        match self {
            ConnectionVariant::NonPipelined(conn) => conn.state(),
            ConnectionVariant::Pipelined(conn) => conn.state(),
        }
    }

    #[inline]
    pub fn close(&self) {
        match self {
            ConnectionVariant::NonPipelined(conn) => conn.close(),
            ConnectionVariant::Pipelined(conn) => conn.close(),
        }
    }
}

async fn run_non_pipelined<IO>(shared: Rc<ConnShared>, mut framer: MessageFramer<IO>)
where
    IO: AsyncReadRent + AsyncWriteRent + 'static,
    ClientCodec<IO>: Sink<Request<HttpBody>>,
    <ClientCodec<IO> as Sink<Request<HttpBody>>>::Error: Into<HttpError>,
{
    loop {
        match shared.doorbell.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => break,
        }
        let dispatch = shared.queue.borrow_mut().pop_front();
        let Some(dispatch) = dispatch else { continue };
        if shared.state.get() != ConnState::Open {
            shared.complete(dispatch.completer, Err(ConnError::Closed));
            continue;
        }
        #[cfg(feature = "logging")]
        if let Some(logger) = shared.config.wire_logger.as_ref() {
            tracing::trace!(logger = %logger, uri = %dispatch.request.uri(), "writing request");
        }
        let written = match framer.write_request(dispatch.request).await {
            Ok(()) => framer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            #[cfg(feature = "logging")]
            tracing::error!("send request error {:?}", e);
            shared.complete(dispatch.completer, Err(e));
            break;
        }
        match framer.next_message().await {
            Some(Ok(response)) => {
                #[cfg(feature = "logging")]
                if let Some(logger) = shared.config.wire_logger.as_ref() {
                    tracing::trace!(logger = %logger, status = %response.status(), "read response");
                }
                shared.complete(dispatch.completer, Ok(response));
            }
            Some(Err(e)) => {
                #[cfg(feature = "logging")]
                tracing::error!("decode response error {:?}", e);
                shared.complete(dispatch.completer, Err(e));
                break;
            }
            None => {
                #[cfg(feature = "logging")]
                tracing::error!("peer closed with a request outstanding");
                shared.complete(
                    dispatch.completer,
                    Err(DecodeError::UnexpectedEof.into()),
                );
                break;
            }
        }
    }
    finalize(&shared, &mut framer, &mut VecDeque::new()).await;
}

async fn run_pipelined<IO>(shared: Rc<ConnShared>, mut framer: MessageFramer<IO>)
where
    IO: AsyncReadRent + AsyncWriteRent + 'static,
    ClientCodec<IO>: Sink<Request<HttpBody>>,
    <ClientCodec<IO> as Sink<Request<HttpBody>>>::Error: Into<HttpError>,
{
    // oldest-first waiters for requests already written to the wire
    let mut pending: VecDeque<Completer> = VecDeque::new();
    'conn: loop {
        if pending.is_empty() {
            match shared.doorbell.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => break 'conn,
            }
        }
        // write every queued request before blocking on a response, so a
        // burst of sends hits the wire back to back
        let mut wrote = false;
        loop {
            let dispatch = shared.queue.borrow_mut().pop_front();
            let Some(dispatch) = dispatch else { break };
            if shared.state.get() != ConnState::Open {
                shared.complete(dispatch.completer, Err(ConnError::Closed));
                continue;
            }
            #[cfg(feature = "logging")]
            if let Some(logger) = shared.config.wire_logger.as_ref() {
                tracing::trace!(logger = %logger, uri = %dispatch.request.uri(), "writing request");
            }
            match framer.write_request(dispatch.request).await {
                Ok(()) => {
                    pending.push_back(dispatch.completer);
                    wrote = true;
                }
                Err(e) => {
                    #[cfg(feature = "logging")]
                    tracing::error!("send request error {:?}", e);
                    shared.complete(dispatch.completer, Err(e));
                    break 'conn;
                }
            }
        }
        if wrote {
            if let Err(e) = framer.flush().await {
                #[cfg(feature = "logging")]
                tracing::error!("flush error {:?}", e);
                if let Some(completer) = pending.pop_front() {
                    shared.complete(completer, Err(e));
                }
                break 'conn;
            }
        }
        // one message off the stream completes the oldest waiter; there is
        // no other way to attribute it
        if let Some(completer) = pending.pop_front() {
            match framer.next_message().await {
                Some(Ok(response)) => {
                    #[cfg(feature = "logging")]
                    if let Some(logger) = shared.config.wire_logger.as_ref() {
                        tracing::trace!(logger = %logger, status = %response.status(), "read response");
                    }
                    shared.complete(completer, Ok(response));
                }
                Some(Err(e)) => {
                    #[cfg(feature = "logging")]
                    tracing::error!("decode response error {:?}", e);
                    shared.complete(completer, Err(e));
                    break 'conn;
                }
                None => {
                    #[cfg(feature = "logging")]
                    tracing::error!("peer closed with {} requests outstanding", pending.len() + 1);
                    shared.complete(completer, Err(DecodeError::UnexpectedEof.into()));
                    break 'conn;
                }
            }
        } else if shared.state.get() != ConnState::Open {
            break 'conn;
        }
    }
    finalize(&shared, &mut framer, &mut pending).await;
}

/// Terminal transition: fail whatever is still queued or outstanding,
/// exactly once each, and shut the stream down. Idempotent against repeated
/// close requests.
async fn finalize<IO>(
    shared: &ConnShared,
    framer: &mut MessageFramer<IO>,
    pending: &mut VecDeque<Completer>,
) where
    IO: AsyncReadRent + AsyncWriteRent + 'static,
    ClientCodec<IO>: Sink<Request<HttpBody>>,
    <ClientCodec<IO> as Sink<Request<HttpBody>>>::Error: Into<HttpError>,
{
    shared.state.set(ConnState::Closed);
    shared.doorbell.close();
    while let Some(completer) = pending.pop_front() {
        shared.complete(completer, Err(ConnError::Closed));
    }
    loop {
        let dispatch = shared.queue.borrow_mut().pop_front();
        let Some(dispatch) = dispatch else { break };
        shared.complete(dispatch.completer, Err(ConnError::Closed));
    }
    let _ = framer.close().await;
    #[cfg(feature = "logging")]
    tracing::debug!("connection closed");
}
