use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::body::Body;
use crate::errors::{new_io_error, Error, Result};
use crate::{CR_LF, SPACE};

const BODY_CHUNK: usize = 8 * 1024;

/// A Response to a submitted `Request`.
///
/// Transports deliver it without a body (headers received); the body
/// arrives afterwards as separate chunks. [`DataTask::collect`](crate::DataTask::collect)
/// returns it with the accumulated body attached.
#[derive(Debug, Default, Clone)]
pub struct Response {
  version: http::Version,
  uri: http::Uri,
  status_code: StatusCode,
  headers: HeaderMap<http::HeaderValue>,
  body: Option<Body>,
}

impl PartialEq for Response {
  fn eq(&self, other: &Self) -> bool {
    self.version == other.version
      && self.status_code == other.status_code
      && self.headers == other.headers
      && self.body == other.body
  }
}

impl<T> From<http::Response<T>> for Response
where
  T: Into<Body>,
{
  fn from(value: http::Response<T>) -> Self {
    let (parts, body) = value.into_parts();
    let body = body.into();
    Self {
      version: parts.version,
      uri: Default::default(),
      status_code: parts.status,
      headers: parts.headers,
      body: if body.is_empty() { None } else { Some(body) },
    }
  }
}

impl Response {
  /// An HTTP response builder
  ///
  /// This type can be used to construct an instance of `Response` through a
  /// builder-like pattern.
  pub fn builder() -> http::response::Builder {
    http::response::Builder::new()
  }
  /// Get the `StatusCode` of this `Response`.
  pub fn status_code(&self) -> StatusCode {
    self.status_code
  }
  /// Get the HTTP `Version` of this `Response`.
  pub fn version(&self) -> http::Version {
    self.version
  }
  /// Get the `Headers` of this `Response`.
  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }
  /// Get a mutable reference to the `Headers` of this `Response`.
  pub fn headers_mut(&mut self) -> &mut HeaderMap {
    &mut self.headers
  }
  /// Get the content-length of the response, if it is known.
  pub fn content_length(&self) -> Option<u64> {
    self
      .headers
      .get(http::header::CONTENT_LENGTH)
      .and_then(|x| x.to_str().ok()?.parse().ok())
  }
  /// Get the final `http::Uri` of this `Response`.
  pub fn uri(&self) -> &http::Uri {
    &self.uri
  }
  pub(crate) fn uri_mut(&mut self) -> &mut http::Uri {
    &mut self.uri
  }
  /// Get the body of this `Response`.
  pub fn body(&self) -> &Option<Body> {
    &self.body
  }
  /// Get a mutable reference to the body of this `Response`.
  pub fn body_mut(&mut self) -> &mut Option<Body> {
    &mut self.body
  }
  /// Get the response text, lossily decoded as UTF-8.
  pub fn text(&self) -> String {
    self
      .body
      .as_ref()
      .map(|b| String::from_utf8_lossy(b).into_owned())
      .unwrap_or_default()
  }
  /// Get the response text decoded with the charset of `Content-Type`.
  ///
  /// # Optional
  ///
  /// This requires the optional `charset` feature to be enabled.
  #[cfg(feature = "charset")]
  pub fn text_with_charset(&self, default_encoding: &str) -> String {
    match &self.body {
      Some(body) => decode_with_charset(body, &self.headers, default_encoding),
      None => String::new(),
    }
  }
}

/// Decode a body using the charset announced in `Content-Type`, falling back to
/// `default_encoding`.
#[cfg(feature = "charset")]
pub(crate) fn decode_with_charset(body: &[u8], headers: &HeaderMap, default_encoding: &str) -> String {
  use encoding_rs::{Encoding, UTF_8};
  use mime::Mime;
  let content_type = headers
    .get(http::header::CONTENT_TYPE)
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.parse::<Mime>().ok());
  let header_encoding = content_type
    .as_ref()
    .and_then(|mime| mime.get_param("charset").map(|charset| charset.as_str()))
    .unwrap_or(default_encoding);
  for encoding_name in &[header_encoding, default_encoding] {
    let encoding = Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8);
    let (text, _, is_errors) = encoding.decode(body);
    if !is_errors {
      return text.into_owned();
    }
  }
  String::from_utf8_lossy(body).into_owned()
}

/// How the end of a response body is found on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
  Empty,
  Length(u64),
  Chunked,
  UntilClose,
}

/// Reads a response from a connection: the head first, then the body one
/// chunk at a time.
#[derive(Debug)]
pub(crate) struct ResponseBuilder<T: AsyncRead + Unpin> {
  reader: BufReader<T>,
  config: ResponseConfig,
  framing: Framing,
  chunk_remaining: u64,
  done: bool,
}

/// response config
#[derive(Debug, Default, Clone)]
pub(crate) struct ResponseConfig {
  method: Method,
  timeout: Option<Duration>,
}

impl ResponseConfig {
  pub(crate) fn new(method: &Method, timeout: Option<Duration>) -> Self {
    ResponseConfig {
      method: method.clone(),
      timeout,
    }
  }
}

impl<T: AsyncRead + Unpin> ResponseBuilder<T> {
  /// Constructs a new response reader.
  pub(crate) fn new(reader: BufReader<T>, config: ResponseConfig) -> ResponseBuilder<T> {
    ResponseBuilder {
      reader,
      config,
      framing: Framing::Empty,
      chunk_remaining: 0,
      done: false,
    }
  }
  async fn read_line(&mut self, line: &mut Vec<u8>) -> Result<usize> {
    let read = self.reader.read_until(b'\n', line);
    let n = match self.config.timeout {
      Some(to) => tokio::time::timeout(to, read)
        .await
        .map_err(|_| new_io_error(std::io::ErrorKind::TimedOut, "read timed out"))??,
      None => read.await?,
    };
    Ok(n)
  }
  async fn parser_version(&mut self) -> Result<(http::Version, StatusCode)> {
    let mut line = Vec::new();
    if self.read_line(&mut line).await? == 0 {
      return Err(new_io_error(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed before response",
      ));
    }
    let line = line.strip_suffix(CR_LF).unwrap_or(&line);
    let mut parts = line.splitn(3, |b| b == &SPACE[0]);
    let version = match parts.next() {
      Some(b"HTTP/0.9") => http::Version::HTTP_09,
      Some(b"HTTP/1.0") => http::Version::HTTP_10,
      Some(b"HTTP/1.1") => http::Version::HTTP_11,
      Some(b"HTTP/2.0") | Some(b"HTTP/2") => http::Version::HTTP_2,
      _ => {
        return Err(new_io_error(
          std::io::ErrorKind::InvalidData,
          "invalid http version",
        ));
      }
    };
    let status = match parts.next() {
      Some(code) if !code.is_empty() => {
        StatusCode::from_bytes(code).map_err(|x| Error::Http(http::Error::from(x)))?
      }
      _ => {
        return Err(new_io_error(
          std::io::ErrorKind::InvalidData,
          "invalid http version and status_code data",
        ));
      }
    };
    Ok((version, status))
  }
  async fn read_headers(&mut self) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut header_line = Vec::new();
    loop {
      let length = self.read_line(&mut header_line).await?;
      if length == 0 || header_line == CR_LF || header_line == b"\n" {
        break;
      }
      if let Ok((Some(k), Some(v))) = parser_headers(&header_line) {
        headers.append(k, v);
      };
      header_line.clear();
    }
    Ok(headers)
  }
  /// Read the status line and headers; informational (1xx) heads are skipped.
  pub(crate) async fn read_head(&mut self) -> Result<Response> {
    loop {
      let (version, status_code) = self.parser_version().await?;
      let headers = self.read_headers().await?;
      if status_code.is_informational() && status_code != StatusCode::SWITCHING_PROTOCOLS {
        continue;
      }
      self.framing = framing_for(&self.config.method, status_code, &headers);
      self.done = self.framing == Framing::Empty;
      return Ok(Response {
        version,
        status_code,
        headers,
        ..Response::default()
      });
    }
  }
  async fn read_some(&mut self, limit: usize) -> Result<Bytes> {
    let mut buffer = vec![0; limit.min(BODY_CHUNK)];
    let read = self.reader.read(&mut buffer);
    let n = match self.config.timeout {
      Some(to) => tokio::time::timeout(to, read)
        .await
        .map_err(|_| new_io_error(std::io::ErrorKind::TimedOut, "read timed out"))??,
      None => read.await?,
    };
    buffer.truncate(n);
    Ok(Bytes::from(buffer))
  }
  /// Next piece of the body in arrival order, `None` once the body is complete.
  pub(crate) async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
    if self.done {
      return Ok(None);
    }
    match self.framing {
      Framing::Empty => {
        self.done = true;
        Ok(None)
      }
      Framing::Length(remaining) => {
        let chunk = self.read_some(remaining.min(usize::MAX as u64) as usize).await?;
        if chunk.is_empty() {
          return Err(new_io_error(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before end of body",
          ));
        }
        let remaining = remaining - chunk.len() as u64;
        self.framing = Framing::Length(remaining);
        self.done = remaining == 0;
        Ok(Some(chunk))
      }
      Framing::UntilClose => {
        let chunk = self.read_some(BODY_CHUNK).await?;
        if chunk.is_empty() {
          self.done = true;
          return Ok(None);
        }
        Ok(Some(chunk))
      }
      Framing::Chunked => self.next_chunked().await,
    }
  }
  async fn next_chunked(&mut self) -> Result<Option<Bytes>> {
    if self.chunk_remaining == 0 {
      let mut line = Vec::new();
      if self.read_line(&mut line).await? == 0 {
        return Err(new_io_error(
          std::io::ErrorKind::UnexpectedEof,
          "connection closed inside chunked body",
        ));
      }
      let size = chunk_size(&line)?;
      if size == 0 {
        // trailers end with an empty line
        loop {
          line.clear();
          let n = self.read_line(&mut line).await?;
          if n == 0 || line == CR_LF || line == b"\n" {
            break;
          }
        }
        self.done = true;
        return Ok(None);
      }
      self.chunk_remaining = size;
    }
    let mut data = BytesMut::new();
    while self.chunk_remaining > 0 {
      let piece = self
        .read_some(self.chunk_remaining.min(BODY_CHUNK as u64) as usize)
        .await?;
      if piece.is_empty() {
        return Err(new_io_error(
          std::io::ErrorKind::UnexpectedEof,
          "connection closed inside chunk",
        ));
      }
      self.chunk_remaining -= piece.len() as u64;
      data.extend_from_slice(&piece);
    }
    let mut crlf = Vec::new();
    self.read_line(&mut crlf).await?;
    Ok(Some(data.freeze()))
  }
}

fn chunk_size(line: &[u8]) -> Result<u64> {
  let line = std::str::from_utf8(line)
    .map_err(|_| new_io_error(std::io::ErrorKind::InvalidData, "invalid chunk size"))?;
  let size = line.split(';').next().unwrap_or_default().trim();
  Ok(u64::from_str_radix(size, 16)?)
}

fn framing_for(method: &Method, status: StatusCode, headers: &HeaderMap) -> Framing {
  if *method == Method::HEAD
    || status.is_informational()
    || status == StatusCode::NO_CONTENT
    || status == StatusCode::NOT_MODIFIED
  {
    return Framing::Empty;
  }
  let chunked = headers
    .get_all(http::header::TRANSFER_ENCODING)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .any(|v| v.to_ascii_lowercase().contains("chunked"));
  if chunked {
    return Framing::Chunked;
  }
  match headers
    .get(http::header::CONTENT_LENGTH)
    .and_then(|x| x.to_str().ok()?.trim().parse::<u64>().ok())
  {
    Some(0) => Framing::Empty,
    Some(length) => Framing::Length(length),
    None => Framing::UntilClose,
  }
}

pub(crate) fn parser_headers(
  buffer: &[u8],
) -> Result<(Option<http::HeaderName>, Option<http::HeaderValue>)> {
  let mut k = None;
  let mut v = None;
  let buffer = buffer.strip_suffix(CR_LF).unwrap_or(buffer);
  let buffer = buffer.strip_suffix(b"\n").unwrap_or(buffer);
  for (index, h) in buffer.splitn(2, |s| s == &58).enumerate() {
    let h = h.strip_prefix(SPACE).unwrap_or(h);
    match index {
      0 => match http::HeaderName::from_bytes(h) {
        Ok(hk) => k = Some(hk),
        Err(err) => {
          return Err(Error::Http(http::Error::from(err)));
        }
      },
      1 => match http::HeaderValue::from_bytes(h) {
        Ok(hv) => v = Some(hv),
        Err(err) => {
          return Err(Error::Http(http::Error::from(err)));
        }
      },
      _ => {}
    }
  }
  Ok((k, v))
}
