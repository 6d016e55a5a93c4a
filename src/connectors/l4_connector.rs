use std::{
    fmt::Display,
    io,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
};

use monoio::{
    io::{AsyncReadRent, AsyncWriteRent, Split},
    net::{TcpStream, UnixStream},
};

use super::Connector;

#[derive(Default, Clone, Copy, Debug)]
pub struct TcpConnector {
    pub no_delay: bool,
}

impl<T: ToSocketAddrs> Connector<T> for TcpConnector {
    type Connection = TcpStream;
    type Error = io::Error;

    #[inline]
    async fn connect(&self, key: T) -> Result<Self::Connection, Self::Error> {
        TcpStream::connect(key).await.map(|io| {
            if self.no_delay {
                // we will ignore the set nodelay error
                let _ = io.set_nodelay(true);
            }
            io
        })
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct UnixConnector;

impl<P: AsRef<Path>> Connector<P> for UnixConnector {
    type Connection = UnixStream;
    type Error = io::Error;

    #[inline]
    async fn connect(&self, key: P) -> Result<Self::Connection, Self::Error> {
        UnixStream::connect(key).await
    }
}

/// An already-resolved transport address. This crate never does name
/// resolution; callers hand in the concrete endpoint.
///
/// Automatic host-header derivation is a capability of the `Tcp` variant
/// only, which is why the shape is an explicit sum type instead of an opaque
/// socket address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResolvedAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ResolvedAddr {
    /// The `ip:port` form usable as a default `Host` header value, when the
    /// address has one.
    #[inline]
    pub fn host_and_port(&self) -> Option<String> {
        match self {
            ResolvedAddr::Tcp(addr) => Some(addr.to_string()),
            ResolvedAddr::Unix(_) => None,
        }
    }
}

impl AsRef<ResolvedAddr> for ResolvedAddr {
    #[inline]
    fn as_ref(&self) -> &ResolvedAddr {
        self
    }
}

impl ToSocketAddrs for ResolvedAddr {
    type Iter = std::option::IntoIter<SocketAddr>;

    #[inline]
    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        match self {
            ResolvedAddr::Tcp(addr) => Ok(Some(*addr).into_iter()),
            ResolvedAddr::Unix(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unix addresses have no socket address",
            )),
        }
    }
}

impl From<SocketAddr> for ResolvedAddr {
    #[inline]
    fn from(addr: SocketAddr) -> Self {
        ResolvedAddr::Tcp(addr)
    }
}

impl Display for ResolvedAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolvedAddr::Tcp(addr) => write!(f, "{addr}"),
            ResolvedAddr::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct UnifiedL4Connector {
    tcp: TcpConnector,
    unix: UnixConnector,
}

impl UnifiedL4Connector {
    #[inline]
    pub const fn new(no_delay: bool) -> Self {
        Self {
            tcp: TcpConnector { no_delay },
            unix: UnixConnector,
        }
    }
}

#[derive(Debug)]
pub enum UnifiedL4Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl<T: AsRef<ResolvedAddr>> Connector<T> for UnifiedL4Connector {
    type Connection = UnifiedL4Stream;
    type Error = io::Error;

    #[inline]
    async fn connect(&self, key: T) -> Result<Self::Connection, Self::Error> {
        match key.as_ref() {
            ResolvedAddr::Tcp(addr) => self.tcp.connect(addr).await.map(UnifiedL4Stream::Tcp),
            ResolvedAddr::Unix(path) => self.unix.connect(path).await.map(UnifiedL4Stream::Unix),
        }
    }
}

impl AsyncReadRent for UnifiedL4Stream {
    #[inline]
    async fn read<T: monoio::buf::IoBufMut>(&mut self, buf: T) -> monoio::BufResult<usize, T> {
        match self {
            UnifiedL4Stream::Tcp(inner) => inner.read(buf).await,
            UnifiedL4Stream::Unix(inner) => inner.read(buf).await,
        }
    }

    #[inline]
    async fn readv<T: monoio::buf::IoVecBufMut>(&mut self, buf: T) -> monoio::BufResult<usize, T> {
        match self {
            UnifiedL4Stream::Tcp(inner) => inner.readv(buf).await,
            UnifiedL4Stream::Unix(inner) => inner.readv(buf).await,
        }
    }
}

impl AsyncWriteRent for UnifiedL4Stream {
    #[inline]
    async fn write<T: monoio::buf::IoBuf>(&mut self, buf: T) -> monoio::BufResult<usize, T> {
        match self {
            UnifiedL4Stream::Tcp(inner) => inner.write(buf).await,
            UnifiedL4Stream::Unix(inner) => inner.write(buf).await,
        }
    }

    #[inline]
    async fn writev<T: monoio::buf::IoVecBuf>(
        &mut self,
        buf_vec: T,
    ) -> monoio::BufResult<usize, T> {
        match self {
            UnifiedL4Stream::Tcp(inner) => inner.writev(buf_vec).await,
            UnifiedL4Stream::Unix(inner) => inner.writev(buf_vec).await,
        }
    }

    #[inline]
    async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            UnifiedL4Stream::Tcp(inner) => inner.flush().await,
            UnifiedL4Stream::Unix(inner) => inner.flush().await,
        }
    }

    #[inline]
    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            UnifiedL4Stream::Tcp(inner) => inner.shutdown().await,
            UnifiedL4Stream::Unix(inner) => inner.shutdown().await,
        }
    }
}

unsafe impl Split for UnifiedL4Stream {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_addr_has_host_and_port() {
        let addr: ResolvedAddr = "127.0.0.1:8080".parse::<SocketAddr>().unwrap().into();
        assert_eq!(addr.host_and_port().as_deref(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn unix_addr_has_no_host_and_port() {
        let addr = ResolvedAddr::Unix(PathBuf::from("/tmp/echo.sock"));
        assert_eq!(addr.host_and_port(), None);
    }
}
