use crate::errors::{new_io_error, Result};
use crate::socket::{MaybeTlsStream, Socket};
#[cfg(feature = "tls")]
use crate::tls::TlsConfigs;
#[cfg(feature = "tls")]
use rustls_pki_types::ServerName;
use socket2::Socket as RawSocket;
use socket2::{Domain, Protocol, Type};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpSocket;
#[cfg(feature = "tls")]
use tokio_rustls::TlsConnector;

/// Opens connections for [`HttpTransport`](crate::HttpTransport).
#[derive(Clone, Debug)]
pub(crate) struct Connector {
  connect_timeout: Option<Duration>,
  write_timeout: Option<Duration>,
  nodelay: bool,
  #[cfg(feature = "tls")]
  tls: TlsConfigs,
}

impl Connector {
  pub(crate) fn new(
    connect_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    nodelay: bool,
  ) -> Result<Connector> {
    Ok(Connector {
      connect_timeout,
      write_timeout,
      nodelay,
      #[cfg(feature = "tls")]
      tls: TlsConfigs::new()?,
    })
  }
  /// Connect to a remote endpoint with addr
  pub(crate) async fn connect_with_addr(&self, addr: SocketAddr) -> Result<Socket> {
    let raw_socket = RawSocket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    raw_socket.set_nonblocking(true)?;
    let socket = TcpSocket::from_std_stream(raw_socket.into());
    if self.nodelay {
      socket.set_nodelay(self.nodelay)?;
    }
    let s = match self.connect_timeout {
      None => socket.connect(addr).await?,
      Some(timeout) => tokio::time::timeout(timeout, socket.connect(addr))
        .await
        .map_err(|x| new_io_error(ErrorKind::TimedOut, &x.to_string()))??,
    };
    Ok(Socket::new(MaybeTlsStream::Tcp(s), self.write_timeout))
  }
  /// Resolve the uri's host and connect to the first address that answers.
  pub(crate) async fn connect_with_uri(&self, target: &http::Uri) -> Result<Socket> {
    let host = target
      .host()
      .ok_or_else(|| new_io_error(ErrorKind::InvalidInput, "uri has no host"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = target.port_u16().unwrap_or(default_port(target));
    let mut last_err = new_io_error(ErrorKind::NotFound, "host resolved to no address");
    for addr in tokio::net::lookup_host((host, port)).await? {
      match self.connect_with_addr(addr).await {
        Ok(socket) => return Ok(socket),
        Err(err) => {
          tracing::debug!("connect to {} failed: {}", addr, err);
          last_err = err;
        }
      }
    }
    Err(last_err)
  }
  #[cfg(feature = "tls")]
  /// Run the TLS handshake, trusting the server outright when `trust` is set.
  pub(crate) async fn upgrade_to_tls(&self, stream: Socket, domain: &str, trust: bool) -> Result<Socket> {
    let domain = ServerName::try_from(domain.to_owned())
      .map_err(|e| crate::errors::Error::Other(e.to_string()))?;
    let connector = TlsConnector::from(self.tls.select(trust));
    let tls = stream
      .tls(move |t| async move { connector.connect(domain, t).await })
      .await?;
    Ok(tls)
  }
}

pub(crate) fn default_port(uri: &http::Uri) -> u16 {
  if uri.scheme() == Some(&http::uri::Scheme::HTTPS) {
    443
  } else {
    80
  }
}
