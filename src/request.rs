use std::fmt::{Debug, Formatter};

use bytes::Bytes;
use http::Request as HttpRequest;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};

use crate::body::{Body, BodyStream};
use crate::errors::Result;
use crate::{COLON_SPACE, CR_LF, SPACE};

/// An outbound request as the application issued it.
///
/// The body is either held in memory or exposed as a [`BodyStream`]; a
/// streamed body is opened independently by every reader.
#[derive(Default, Clone)]
pub struct Request {
  uri: http::Uri,
  version: Version,
  method: Method,
  headers: HeaderMap<HeaderValue>,
  body: Option<Body>,
  body_stream: Option<BodyStream>,
}
impl Debug for Request {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Request")
      .field("uri", &self.uri)
      .field("version", &self.version)
      .field("method", &self.method)
      .field("headers", &self.headers)
      .field("body", &self.body)
      .field("body_stream", &self.body_stream)
      .finish()
  }
}
impl<T> From<HttpRequest<T>> for Request
where
  T: Into<Body>,
{
  fn from(value: HttpRequest<T>) -> Self {
    let (parts, body) = value.into_parts();
    let body = body.into();
    Self {
      uri: parts.uri,
      version: parts.version,
      method: parts.method,
      headers: parts.headers,
      body: if body.is_empty() { None } else { Some(body) },
      body_stream: None,
    }
  }
}

impl Request {
  /// Create a request with the given method and uri.
  ///
  /// # Errors
  ///
  /// This method fails whenever supplied `Uri` cannot be parsed.
  pub fn new<U>(method: Method, uri: U) -> Result<Request>
  where
    http::Uri: TryFrom<U>,
    <http::Uri as TryFrom<U>>::Error: Into<http::Error>,
  {
    let uri = http::Uri::try_from(uri).map_err(Into::<http::Error>::into)?;
    Ok(Request {
      uri,
      method,
      ..Request::default()
    })
  }
  /// Creates a new builder-style object to manufacture a `Request`
  ///
  /// ```
  /// # use eavesdrop::Request;
  /// let request: Request = Request::builder()
  ///     .method("POST")
  ///     .uri("https://www.rust-lang.org/")
  ///     .header("X-Custom-Foo", "Bar")
  ///     .body("payload")
  ///     .unwrap()
  ///     .into();
  /// assert_eq!(request.method(), "POST");
  /// ```
  pub fn builder() -> http::request::Builder {
    http::request::Builder::new()
  }
  /// Add a header, replacing any previous value with the same name.
  pub fn with_header<K, V>(mut self, key: K, value: V) -> Result<Request>
  where
    HeaderName: TryFrom<K>,
    <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    HeaderValue: TryFrom<V>,
    <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
  {
    let key = HeaderName::try_from(key).map_err(Into::<http::Error>::into)?;
    let value = HeaderValue::try_from(value).map_err(Into::<http::Error>::into)?;
    self.headers.insert(key, value);
    Ok(self)
  }
  /// Set an in-memory body.
  pub fn with_body<B: Into<Body>>(mut self, body: B) -> Request {
    let body = body.into();
    self.body = if body.is_empty() { None } else { Some(body) };
    self
  }
  /// Set a streamed body.
  pub fn with_body_stream(mut self, stream: BodyStream) -> Request {
    self.body_stream = Some(stream);
    self
  }
}

impl Request {
  /// The HTTP method of this request.
  #[inline]
  pub fn method(&self) -> &Method {
    &self.method
  }
  /// Mutable access to the HTTP method.
  #[inline]
  pub fn method_mut(&mut self) -> &mut Method {
    &mut self.method
  }
  /// The target uri of this request.
  #[inline]
  pub fn uri(&self) -> &http::Uri {
    &self.uri
  }
  /// Mutable access to the target uri.
  #[inline]
  pub fn uri_mut(&mut self) -> &mut http::Uri {
    &mut self.uri
  }
  /// The HTTP version of this request.
  #[inline]
  pub fn version(&self) -> Version {
    self.version
  }
  /// The headers of this request.
  #[inline]
  pub fn headers(&self) -> &HeaderMap<HeaderValue> {
    &self.headers
  }
  /// Mutable access to the headers.
  #[inline]
  pub fn headers_mut(&mut self) -> &mut HeaderMap<HeaderValue> {
    &mut self.headers
  }
  /// The in-memory body, if any.
  #[inline]
  pub fn body(&self) -> Option<&Body> {
    self.body.as_ref()
  }
  /// Mutable access to the in-memory body.
  #[inline]
  pub fn body_mut(&mut self) -> &mut Option<Body> {
    &mut self.body
  }
  /// The streamed body, if any.
  #[inline]
  pub fn body_stream(&self) -> Option<&BodyStream> {
    self.body_stream.as_ref()
  }
  /// Mutable access to the streamed body.
  #[inline]
  pub fn body_stream_mut(&mut self) -> &mut Option<BodyStream> {
    &mut self.body_stream
  }
  /// The bytes to transmit: the in-memory body, or a fresh read of the stream.
  pub(crate) async fn transmit_body(&self) -> Result<Option<Bytes>> {
    if let Some(body) = &self.body {
      return Ok(Some(body.inner_bytes()));
    }
    match &self.body_stream {
      Some(stream) => {
        let data = stream.read_all().await?;
        Ok(if data.is_empty() { None } else { Some(data) })
      }
      None => Ok(None),
    }
  }
  pub(crate) fn to_raw(&self, body: Option<&[u8]>) -> Bytes {
    let mut http_requests = Vec::new();
    // request line
    http_requests.extend(self.method.as_str().as_bytes());
    http_requests.extend(SPACE);
    let path = self.uri.path();
    let path = if path.is_empty() { "/" } else { path };
    http_requests.extend(path.as_bytes());
    if let Some(q) = self.uri.query() {
      http_requests.extend([63]);
      http_requests.extend(q.as_bytes());
    }
    http_requests.extend(SPACE);
    http_requests.extend(b"HTTP/1.1");
    http_requests.extend(CR_LF);
    if self.headers.get(http::header::HOST).is_none() {
      http_requests.extend(http::header::HOST.as_str().as_bytes());
      http_requests.extend(COLON_SPACE);
      http_requests.extend(if let Some(s) = self.uri.authority() {
        s.as_str().as_bytes()
      } else {
        &[]
      });
      http_requests.extend(CR_LF);
    }
    let mut headers = self.headers.clone();
    if let Some(b) = body {
      headers
        .entry(http::header::CONTENT_LENGTH)
        .or_insert(HeaderValue::from(b.len()));
    }
    // one exchange per connection
    headers
      .entry(http::header::CONNECTION)
      .or_insert(HeaderValue::from_static("close"));
    for (k, v) in headers.iter() {
      http_requests.extend(k.as_str().as_bytes());
      http_requests.extend(COLON_SPACE);
      http_requests.extend(v.as_bytes());
      http_requests.extend(CR_LF);
    }
    http_requests.extend(CR_LF);
    if let Some(b) = body {
      http_requests.extend(b);
    }
    Bytes::from(http_requests)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raw_request_line_and_headers() {
    let request = Request::new(Method::POST, "http://example.com/a?b=1")
      .unwrap()
      .with_header("X-Trace", "1")
      .unwrap();
    let raw = request.to_raw(Some(b"hello"));
    let text = String::from_utf8(raw.to_vec()).unwrap();
    assert!(text.starts_with("POST /a?b=1 HTTP/1.1\r\n"));
    assert!(text.contains("host: example.com\r\n"));
    assert!(text.contains("x-trace: 1\r\n"));
    assert!(text.contains("content-length: 5\r\n"));
    assert!(text.contains("connection: close\r\n"));
    assert!(text.ends_with("\r\n\r\nhello"));
  }

  #[test]
  fn empty_path_becomes_root() {
    let request = Request::new(Method::GET, "http://example.com").unwrap();
    let raw = request.to_raw(None);
    assert!(raw.starts_with(b"GET / HTTP/1.1\r\n"));
  }

  #[tokio::test]
  async fn transmit_body_prefers_memory_then_stream() {
    let request = Request::new(Method::PUT, "http://example.com/")
      .unwrap()
      .with_body_stream(BodyStream::from_bytes("streamed"));
    assert_eq!(
      request.transmit_body().await.unwrap().unwrap().as_ref(),
      b"streamed"
    );
    let request = request.with_body("memory");
    assert_eq!(
      request.transmit_body().await.unwrap().unwrap().as_ref(),
      b"memory"
    );
  }

  #[test]
  fn from_http_request() {
    let request: Request = Request::builder()
      .method("DELETE")
      .uri("https://example.com/x")
      .body(())
      .unwrap()
      .into();
    assert_eq!(request.method(), Method::DELETE);
    assert!(request.body().is_none());
  }
}
