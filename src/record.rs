use std::time::SystemTime;

use bytes::Bytes;
use http::{HeaderMap, Method};
use uuid::Uuid;

use crate::body::Body;
use crate::json::JsonViewer;
use crate::{Request, Response};

/// One captured exchange: the request as it was sent and what came back.
///
/// Records are immutable once finished; build them with [`ExchangeDraft`].
/// Two records are equal when they share an identity.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExchangeRecord {
  identity: Uuid,
  #[cfg_attr(feature = "serde", serde(with = "http_serde::method"))]
  method: Method,
  #[cfg_attr(feature = "serde", serde(with = "http_serde::uri"))]
  url: http::Uri,
  #[cfg_attr(feature = "serde", serde(with = "http_serde::header_map"))]
  request_headers: HeaderMap,
  request_body: Option<Body>,
  response_status: u16,
  #[cfg_attr(feature = "serde", serde(with = "http_serde::header_map"))]
  response_headers: HeaderMap,
  response_body: Option<Body>,
  timestamp: SystemTime,
  error: Option<String>,
}

impl PartialEq for ExchangeRecord {
  fn eq(&self, other: &Self) -> bool {
    self.identity == other.identity
  }
}

impl Eq for ExchangeRecord {}

/// Coarse classification of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
  /// 2xx
  Success,
  /// 3xx
  Redirect,
  /// 4xx
  ClientError,
  /// 5xx
  ServerError,
  /// anything else, including the `0` sentinel for "no response"
  Unknown,
}

impl From<u16> for StatusClass {
  fn from(status: u16) -> Self {
    match status {
      200..=299 => StatusClass::Success,
      300..=399 => StatusClass::Redirect,
      400..=499 => StatusClass::ClientError,
      500..=599 => StatusClass::ServerError,
      _ => StatusClass::Unknown,
    }
  }
}

impl ExchangeRecord {
  /// Unique identity of this exchange.
  pub fn identity(&self) -> Uuid {
    self.identity
  }
  /// Request method.
  pub fn method(&self) -> &Method {
    &self.method
  }
  /// Request url.
  pub fn url(&self) -> &http::Uri {
    &self.url
  }
  /// Request headers.
  ///
  /// Names are normalised to lowercase, so `Content-Type` as sent by the
  /// application reads back as `content-type` here and in [`curl`](Self::curl).
  /// Lookups ignore case; values are kept byte for byte.
  pub fn request_headers(&self) -> &HeaderMap {
    &self.request_headers
  }
  /// Request body, if one was sent and could be read.
  pub fn request_body(&self) -> Option<&Body> {
    self.request_body.as_ref()
  }
  /// Response status, `0` if no response arrived.
  pub fn response_status(&self) -> u16 {
    self.response_status
  }
  /// Response headers; empty if no response arrived.
  pub fn response_headers(&self) -> &HeaderMap {
    &self.response_headers
  }
  /// Response body accumulated in arrival order.
  pub fn response_body(&self) -> Option<&Body> {
    self.response_body.as_ref()
  }
  /// When the exchange was finalized.
  pub fn timestamp(&self) -> SystemTime {
    self.timestamp
  }
  /// Description of the transport failure, if the exchange failed.
  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }
  /// Classification of the response status.
  pub fn status_class(&self) -> StatusClass {
    StatusClass::from(self.response_status)
  }
  /// Request body as text, lossily decoded as UTF-8.
  pub fn request_text(&self) -> String {
    lossy(self.request_body.as_ref())
  }
  /// Response body as text, lossily decoded as UTF-8.
  pub fn response_text(&self) -> String {
    lossy(self.response_body.as_ref())
  }
  /// Response body decoded with the charset of its `Content-Type`.
  ///
  /// # Optional
  ///
  /// This requires the optional `charset` feature to be enabled.
  #[cfg(feature = "charset")]
  pub fn response_text_with_charset(&self, default_encoding: &str) -> String {
    match &self.response_body {
      Some(body) => {
        crate::response::decode_with_charset(body, &self.response_headers, default_encoding)
      }
      None => String::new(),
    }
  }
  /// The response body as a navigable JSON tree.
  pub fn response_json(&self) -> JsonViewer {
    let body = self.response_body.as_ref().map(|b| &b[..]).unwrap_or_default();
    JsonViewer::parse(body)
  }
  /// A `curl` command line that repeats the request.
  pub fn curl(&self) -> String {
    CommandRecord::from(self).command
  }
}

fn lossy(body: Option<&Body>) -> String {
  body
    .map(|b| String::from_utf8_lossy(b).into_owned())
    .unwrap_or_default()
}

/// The mutable record of an exchange that is still in flight.
#[derive(Debug)]
pub struct ExchangeDraft {
  identity: Uuid,
  method: Method,
  url: http::Uri,
  request_headers: HeaderMap,
  request_body: Option<Bytes>,
  response_status: u16,
  response_headers: HeaderMap,
  response_body: Option<Bytes>,
  error: Option<String>,
}

impl Default for ExchangeDraft {
  fn default() -> Self {
    ExchangeDraft {
      identity: Uuid::new_v4(),
      method: Method::default(),
      url: http::Uri::default(),
      request_headers: HeaderMap::new(),
      request_body: None,
      response_status: 0,
      response_headers: HeaderMap::new(),
      response_body: None,
      error: None,
    }
  }
}

impl ExchangeDraft {
  /// A draft with a fresh identity and the "no response" sentinel.
  pub fn new() -> Self {
    Self::default()
  }
  /// Identity the finished record will carry.
  pub fn identity(&self) -> Uuid {
    self.identity
  }
  /// Record the response status, headers and accumulated body.
  pub fn record_response(&mut self, response: &Response, body: Option<Bytes>) {
    self.response_status = response.status_code().as_u16();
    self.response_headers = response.headers().clone();
    self.response_body = body.filter(|b| !b.is_empty());
  }
  /// Record the request metadata and its body snapshot.
  pub fn record_request(&mut self, request: &Request, body: Option<Bytes>) {
    self.method = request.method().clone();
    self.url = request.uri().clone();
    self.request_headers = request.headers().clone();
    self.request_body = body.filter(|b| !b.is_empty());
  }
  /// Record the failure the exchange ended with.
  pub fn record_error<E: std::fmt::Display>(&mut self, error: E) {
    self.error = Some(error.to_string());
  }
  /// Stamp the capture instant and freeze the record.
  pub fn finish(self) -> ExchangeRecord {
    ExchangeRecord {
      identity: self.identity,
      method: self.method,
      url: self.url,
      request_headers: self.request_headers,
      request_body: self.request_body.map(Body::from),
      response_status: self.response_status,
      response_headers: self.response_headers,
      response_body: self.response_body.map(Body::from),
      timestamp: SystemTime::now(),
      error: self.error,
    }
  }
}

/// curl command
#[derive(Clone, Debug)]
pub struct CommandRecord {
  /// the command line
  pub command: String,
}

impl From<&ExchangeRecord> for CommandRecord {
  fn from(value: &ExchangeRecord) -> Self {
    let mut command = String::from("curl -X ");
    command.push_str(value.method.as_str());
    for (k, v) in value.request_headers.iter() {
      command.push_str(" -H ");
      let header = format!("{}: {}", k.as_str(), String::from_utf8_lossy(v.as_bytes()));
      command.push_str(&bash_escape(&header));
    }
    let sends_body = !matches!(value.method, Method::GET | Method::HEAD);
    if sends_body {
      let text = value
        .request_body
        .as_ref()
        .and_then(|body| std::str::from_utf8(body).ok());
      if let Some(text) = text {
        command.push_str(" -d ");
        command.push_str(&bash_escape(text));
      }
    }
    command.push(' ');
    command.push_str(&bash_escape(&value.url.to_string()));
    CommandRecord { command }
  }
}

fn bash_escape(s: &str) -> String {
  format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::errors::Error;
  use http::StatusCode;

  fn post_json() -> ExchangeRecord {
    let request = Request::new(Method::POST, "https://x/y")
      .unwrap()
      .with_header("Content-Type", "application/json")
      .unwrap();
    let mut draft = ExchangeDraft::new();
    draft.record_request(&request, Some(Bytes::from_static(br#"{"k":"v"}"#)));
    draft.finish()
  }

  #[test]
  fn curl_carries_method_url_header_and_body() {
    let curl = post_json().curl();
    assert!(curl.starts_with("curl "));
    assert!(curl.contains("-X POST"));
    assert!(curl.contains("'https://x/y'"));
    assert_eq!(curl.matches(" -H ").count(), 1);
    assert!(curl.contains("-H 'content-type: application/json'"));
    assert!(curl.contains(r#"-d '{"k":"v"}'"#));
  }

  #[test]
  fn curl_omits_body_for_get() {
    let request = Request::new(Method::GET, "http://x/").unwrap();
    let mut draft = ExchangeDraft::new();
    draft.record_request(&request, Some(Bytes::from_static(b"ignored")));
    let curl = draft.finish().curl();
    assert!(!curl.contains(" -d "));
    assert!(curl.ends_with(" 'http://x/'"));
  }

  #[test]
  fn header_names_read_back_lowercase() {
    let record = post_json();
    let names: Vec<_> = record.request_headers().keys().map(|k| k.as_str()).collect();
    assert_eq!(names, ["content-type"]);
    assert_eq!(record.request_headers()["Content-Type"], "application/json");
    assert!(!record.curl().contains("Content-Type"));
  }

  #[test]
  fn curl_quotes_single_quotes() {
    let request = Request::new(Method::PUT, "http://x/").unwrap();
    let mut draft = ExchangeDraft::new();
    draft.record_request(&request, Some(Bytes::from_static(b"it's")));
    assert!(draft.finish().curl().contains(r#"-d 'it'\''s'"#));
  }

  #[test]
  fn draft_without_response_keeps_sentinel() {
    let request = Request::new(Method::GET, "http://x/").unwrap();
    let mut draft = ExchangeDraft::new();
    draft.record_request(&request, None);
    draft.record_error(&Error::Other("connection reset".into()));
    let record = draft.finish();
    assert_eq!(record.response_status(), 0);
    assert_eq!(record.status_class(), StatusClass::Unknown);
    assert!(record.response_body().is_none());
    assert!(record.request_body().is_none());
    assert_eq!(record.error(), Some("connection reset"));
  }

  #[test]
  fn records_response_and_classifies() {
    let response: Response = Response::builder()
      .status(StatusCode::NOT_FOUND)
      .header("x-a", "1")
      .body(())
      .unwrap()
      .into();
    let mut draft = ExchangeDraft::new();
    let identity = draft.identity();
    draft.record_response(&response, Some(Bytes::from_static(b"missing")));
    let record = draft.finish();
    assert_eq!(record.identity(), identity);
    assert_eq!(record.response_status(), 404);
    assert_eq!(record.status_class(), StatusClass::ClientError);
    assert_eq!(record.response_text(), "missing");
    assert_eq!(record.response_headers()["x-a"], "1");
  }

  #[test]
  fn empty_bodies_are_absent() {
    let mut draft = ExchangeDraft::new();
    draft.record_response(&Response::default(), Some(Bytes::new()));
    assert!(draft.finish().response_body().is_none());
  }

  #[test]
  fn identities_are_unique() {
    assert_ne!(ExchangeDraft::new().identity(), ExchangeDraft::new().identity());
    let record = post_json();
    assert_eq!(record.clone(), record);
  }
}
