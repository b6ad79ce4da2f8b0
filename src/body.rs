use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the buffer used when draining a body stream.
pub(crate) const READ_CHUNK: usize = 1024;

/// A body.
#[derive(Clone, PartialEq)]
pub struct Body {
  inner: Bytes,
}

impl Deref for Body {
  type Target = Bytes;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}

impl DerefMut for Body {
  fn deref_mut(&mut self) -> &mut Self::Target {
    &mut self.inner
  }
}

impl Default for Body {
  fn default() -> Self {
    Self {
      inner: Bytes::new(),
    }
  }
}

impl Body {
  pub(crate) fn inner_bytes(&self) -> Bytes {
    self.inner.clone()
  }
}

impl From<Bytes> for Body {
  #[inline]
  fn from(b: Bytes) -> Body {
    Body { inner: b }
  }
}

impl From<String> for Body {
  #[inline]
  fn from(s: String) -> Body {
    s.into_bytes().into()
  }
}

impl From<&'static str> for Body {
  #[inline]
  fn from(s: &'static str) -> Body {
    s.as_bytes().into()
  }
}

impl From<&'static [u8]> for Body {
  #[inline]
  fn from(s: &'static [u8]) -> Body {
    Body {
      inner: Bytes::from_static(s),
    }
  }
}

impl From<Vec<u8>> for Body {
  #[inline]
  fn from(v: Vec<u8>) -> Body {
    Body { inner: v.into() }
  }
}

impl From<()> for Body {
  #[inline]
  fn from(_: ()) -> Body {
    Body::default()
  }
}

impl fmt::Debug for Body {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match std::str::from_utf8(&self.inner) {
      Ok(s) => fmt::Display::fmt(s, f),
      Err(_err) => fmt::Debug::fmt(&self.inner, f),
    }
  }
}

impl fmt::Display for Body {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match std::str::from_utf8(&self.inner) {
      Ok(s) => fmt::Display::fmt(s, f),
      Err(_err) => fmt::Debug::fmt(&self.inner, f),
    }
  }
}
#[cfg(feature = "serde")]
impl serde::Serialize for Body {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_bytes(&self.inner)
  }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Body {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let s = Vec::deserialize(deserializer)?;
    Ok(Body::from(s))
  }
}

/// A readable stream opened by [`BodyStream::open`].
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

type Opener = dyn Fn() -> io::Result<BoxedReader> + Send + Sync;

/// A request body that is only available as a stream.
///
/// Every call to [`open`](BodyStream::open) hands out an independent reader,
/// so the capture path and the transmission path never share a consumed
/// stream.
#[derive(Clone)]
pub struct BodyStream {
  opener: Arc<Opener>,
}

impl BodyStream {
  /// Create a stream body from a function that opens a fresh reader.
  pub fn new<F>(opener: F) -> Self
  where
    F: Fn() -> io::Result<BoxedReader> + Send + Sync + 'static,
  {
    BodyStream {
      opener: Arc::new(opener),
    }
  }
  /// A stream body that replays the given bytes on every open.
  pub fn from_bytes<B: Into<Bytes>>(bytes: B) -> Self {
    let bytes = bytes.into();
    BodyStream::new(move || Ok(Box::new(io::Cursor::new(bytes.clone())) as BoxedReader))
  }
  /// Open a new reader over the body.
  pub fn open(&self) -> io::Result<BoxedReader> {
    (self.opener)()
  }
  /// Open the stream and read it to exhaustion.
  pub(crate) async fn read_all(&self) -> io::Result<Bytes> {
    let mut reader = self.open()?;
    drain(&mut reader).await
  }
}

impl fmt::Debug for BodyStream {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("BodyStream(..)")
  }
}

async fn drain<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> io::Result<Bytes> {
  let mut buffer = [0u8; READ_CHUNK];
  let mut data = BytesMut::new();
  loop {
    let n = reader.read(&mut buffer).await?;
    if n == 0 {
      break;
    }
    data.extend_from_slice(&buffer[..n]);
  }
  Ok(data.freeze())
}

/// Snapshot a request body stream without touching the transmission path.
///
/// The stream is opened, read in 1KB chunks until exhausted and dropped on
/// every exit path. Returns `None` when there is no stream, when it yields no
/// bytes, or when opening or reading it fails.
pub async fn read_body_stream(stream: Option<&BodyStream>) -> Option<Bytes> {
  let stream = stream?;
  match stream.read_all().await {
    Ok(data) if data.is_empty() => None,
    Ok(data) => Some(data),
    Err(err) => {
      tracing::warn!("request body could not be captured: {}", err);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::pin::Pin;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::task::{Context, Poll};
  use tokio::io::ReadBuf;

  struct Flaky {
    remaining: usize,
    fail: bool,
    closed: Arc<AtomicBool>,
  }

  impl AsyncRead for Flaky {
    fn poll_read(
      mut self: Pin<&mut Self>,
      _cx: &mut Context<'_>,
      buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
      if self.remaining == 0 {
        if self.fail {
          return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
        }
        return Poll::Ready(Ok(()));
      }
      let n = self.remaining.min(buf.remaining()).min(700);
      buf.put_slice(&vec![b'x'; n]);
      self.remaining -= n;
      Poll::Ready(Ok(()))
    }
  }

  impl Drop for Flaky {
    fn drop(&mut self) {
      self.closed.store(true, Ordering::SeqCst);
    }
  }

  fn flaky(len: usize, fail: bool, closed: Arc<AtomicBool>) -> BodyStream {
    BodyStream::new(move || {
      Ok(Box::new(Flaky {
        remaining: len,
        fail,
        closed: closed.clone(),
      }) as BoxedReader)
    })
  }

  #[tokio::test]
  async fn reads_multi_chunk_body() {
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let stream = BodyStream::from_bytes(payload.clone());
    let data = read_body_stream(Some(&stream)).await.unwrap();
    assert_eq!(data.as_ref(), payload.as_slice());
  }

  #[tokio::test]
  async fn absent_or_empty_is_none() {
    assert!(read_body_stream(None).await.is_none());
    let empty = BodyStream::from_bytes(Bytes::new());
    assert!(read_body_stream(Some(&empty)).await.is_none());
  }

  #[tokio::test]
  async fn read_failure_is_none_and_closes() {
    let closed = Arc::new(AtomicBool::new(false));
    let stream = flaky(2048, true, closed.clone());
    assert!(read_body_stream(Some(&stream)).await.is_none());
    assert!(closed.load(Ordering::SeqCst));
  }

  #[tokio::test]
  async fn open_failure_is_none() {
    let stream = BodyStream::new(|| Err(io::Error::new(io::ErrorKind::NotFound, "missing")));
    assert!(read_body_stream(Some(&stream)).await.is_none());
  }

  #[tokio::test]
  async fn each_open_is_independent() {
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = opens.clone();
    let stream = BodyStream::new(move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(Box::new(io::Cursor::new(b"abc".to_vec())) as BoxedReader)
    });
    let first = read_body_stream(Some(&stream)).await.unwrap();
    let second = stream.read_all().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(opens.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn successful_read_closes_stream() {
    let closed = Arc::new(AtomicBool::new(false));
    let stream = flaky(10, false, closed.clone());
    assert_eq!(read_body_stream(Some(&stream)).await.unwrap().len(), 10);
    assert!(closed.load(Ordering::SeqCst));
  }
}
