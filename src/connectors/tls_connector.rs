use std::{fmt::Debug, net::ToSocketAddrs};

use monoio::io::{AsyncReadRent, AsyncWriteRent};

use super::{Connector, ResolvedAddr};

#[cfg(not(feature = "native-tls"))]
pub type TlsStream<C> = monoio_rustls::ClientTlsStream<C>;

#[cfg(feature = "native-tls")]
pub type TlsStream<C> = monoio_native_tls::TlsStream<C>;

#[cfg(feature = "native-tls")]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TlsServerName(pub smol_str::SmolStr);
#[cfg(feature = "native-tls")]
pub use monoio_native_tls::TlsConnector as InnerTlsConnector;
#[cfg(feature = "native-tls")]
pub use monoio_native_tls::TlsError;
#[cfg(not(feature = "native-tls"))]
pub use monoio_rustls::TlsConnector as InnerTlsConnector;
#[cfg(not(feature = "native-tls"))]
pub use monoio_rustls::TlsError;

#[cfg(feature = "native-tls")]
pub type ServerName<'a> = TlsServerName;

#[cfg(not(feature = "native-tls"))]
pub type ServerName<'a> = rustls::pki_types::ServerName<'a>;

#[cfg(feature = "native-tls")]
impl<T: Into<smol_str::SmolStr>> From<T> for ServerName<'static> {
    #[inline]
    fn from(value: T) -> Self {
        Self(value.into())
    }
}

/// A connector that layers TLS over an inner connector.
///
/// The underlying TLS implementation is `rustls` unless the `native-tls`
/// feature is enabled.
#[derive(Clone)]
pub struct TlsConnector<C> {
    inner_connector: C,
    tls_connector: InnerTlsConnector,
}

impl<C: Debug> std::fmt::Debug for TlsConnector<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TlsConnector, inner: {:?}", self.inner_connector)
    }
}

impl<C> TlsConnector<C> {
    pub const fn new(inner_connector: C, tls_connector: InnerTlsConnector) -> Self {
        Self {
            inner_connector,
            tls_connector,
        }
    }

    #[cfg(not(feature = "native-tls"))]
    #[inline]
    pub fn new_with_tls_default(inner_connector: C) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let mut cfg = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        // Single-connection h1 client; never offer h2.
        cfg.alpn_protocols = vec![b"http/1.1".to_vec()];

        TlsConnector::new(inner_connector, cfg.into())
    }

    #[cfg(feature = "native-tls")]
    #[inline]
    pub fn new_with_tls_default(inner_connector: C) -> Self {
        let mut tls_connector = native_tls::TlsConnector::builder();
        tls_connector.request_alpns(&["http/1.1"]);
        TlsConnector::new(inner_connector, tls_connector.build().unwrap().into())
    }

    #[inline]
    pub fn inner_connector(&self) -> &C {
        &self.inner_connector
    }

    #[inline]
    pub fn tls_connector(&self) -> &InnerTlsConnector {
        &self.tls_connector
    }
}

impl<C: Default> Default for TlsConnector<C> {
    #[inline]
    fn default() -> Self {
        TlsConnector::new_with_tls_default(Default::default())
    }
}

impl<C, T, CN> Connector<T> for TlsConnector<C>
where
    T: AsRef<ServerName<'static>>,
    for<'a> C: Connector<&'a T, Error = std::io::Error, Connection = CN>,
    CN: AsyncReadRent + AsyncWriteRent,
{
    type Connection = TlsStream<CN>;
    type Error = TlsError;

    #[inline]
    async fn connect(&self, key: T) -> Result<Self::Connection, Self::Error> {
        let stream = self.inner_connector.connect(&key).await?;
        let server_name = key.as_ref();
        #[cfg(not(feature = "native-tls"))]
        let tls_stream = self
            .tls_connector
            .connect(server_name.clone(), stream)
            .await?;
        #[cfg(feature = "native-tls")]
        let tls_stream = self.tls_connector.connect(&server_name.0, stream).await?;
        Ok(tls_stream)
    }
}

/// A resolved address paired with the TLS server name to present during the
/// handshake. `AsRef` exposes each half to the connector layer that needs it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsAddr {
    pub addr: ResolvedAddr,
    pub server_name: ServerName<'static>,
}

impl AsRef<ServerName<'static>> for TlsAddr {
    #[inline]
    fn as_ref(&self) -> &ServerName<'static> {
        &self.server_name
    }
}

impl AsRef<ResolvedAddr> for TlsAddr {
    #[inline]
    fn as_ref(&self) -> &ResolvedAddr {
        &self.addr
    }
}

impl ToSocketAddrs for TlsAddr {
    type Iter = <ResolvedAddr as ToSocketAddrs>::Iter;

    #[inline]
    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        self.addr.to_socket_addrs()
    }
}
