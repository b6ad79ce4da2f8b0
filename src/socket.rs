use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
#[cfg(feature = "tls")]
use tokio_rustls::client::TlsStream;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// A connected socket, plain or encrypted.
#[derive(Debug)]
pub(crate) struct Socket {
  inner: MaybeTlsStream,
  write_timeout: Option<Duration>,
}

#[derive(Debug)]
pub(crate) enum MaybeTlsStream {
  Tcp(TcpStream),
  #[cfg(feature = "tls")]
  Tls(Box<TlsStream<TcpStream>>),
}

impl Socket {
  pub(crate) fn new(inner: MaybeTlsStream, write_timeout: Option<Duration>) -> Self {
    Socket {
      inner,
      write_timeout,
    }
  }
  /// Run the handshake `func` over the plain stream; already encrypted
  /// sockets are returned as they are.
  #[cfg(feature = "tls")]
  pub(crate) async fn tls<F, Fut>(self, func: F) -> io::Result<Self>
  where
    F: FnOnce(TcpStream) -> Fut,
    Fut: std::future::Future<Output = io::Result<TlsStream<TcpStream>>>,
  {
    let inner = match self.inner {
      MaybeTlsStream::Tcp(tcp) => MaybeTlsStream::Tls(Box::new(func(tcp).await?)),
      tls => tls,
    };
    Ok(Socket {
      inner,
      write_timeout: self.write_timeout,
    })
  }
  /// Write the whole buffer, giving up after the write timeout.
  pub(crate) async fn send(&mut self, buf: &[u8]) -> io::Result<()> {
    let timeout = self.write_timeout;
    let write = async {
      self.write_all(buf).await?;
      self.flush().await
    };
    match timeout {
      Some(t) => tokio::time::timeout(t, write).await?,
      None => write.await,
    }
  }
  fn stream(&mut self) -> Pin<&mut dyn Stream> {
    match &mut self.inner {
      MaybeTlsStream::Tcp(tcp) => Pin::new(tcp),
      #[cfg(feature = "tls")]
      MaybeTlsStream::Tls(tls) => Pin::new(tls.as_mut()),
    }
  }
}

impl AsyncRead for Socket {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    self.get_mut().stream().poll_read(cx, buf)
  }
}

impl AsyncWrite for Socket {
  fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
    self.get_mut().stream().poll_write(cx, buf)
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    self.get_mut().stream().poll_flush(cx)
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    self.get_mut().stream().poll_shutdown(cx)
  }
}
