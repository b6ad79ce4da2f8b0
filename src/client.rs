use crate::connector::Connector;
use crate::errors::{Error, Result};
use crate::redirect::{self, remove_sensitive_headers, Action, Policy};
use crate::response::{ResponseBuilder, ResponseConfig};
use crate::socket::Socket;
use crate::transport::{
  AuthChallenge, ChallengeKind, Credential, DataTask, Disposition, EventSink, RedirectProposal,
  Transport, TransportEvent,
};
use crate::Request;
use http::header::{
  AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING,
  WWW_AUTHENTICATE,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

/// The real transport: HTTP/1.1 over TCP, HTTPS with the `tls` feature.
///
/// Every exchange runs on its own tokio task and uses a fresh connection.
/// Before a TLS handshake the transport raises a
/// [`ServerTrust`](ChallengeKind::ServerTrust) challenge, and a `401` with a
/// `WWW-Authenticate` header raises an [`HttpAuth`](ChallengeKind::HttpAuth)
/// challenge. Redirects allowed by the [`Policy`] are proposed before they
/// are followed.
///
/// # Examples
///
/// ```rust,no_run
/// use eavesdrop::{HttpTransport, Request, Transport};
/// # async fn run() -> Result<(), eavesdrop::Error> {
/// let transport = HttpTransport::builder()
///   .connect_timeout(std::time::Duration::from_secs(5))
///   .build()?;
/// let request = Request::new(http::Method::GET, "http://httpbin.org/get")?;
/// let response = transport.issue(request).collect().await?;
/// println!("{}", response.text());
/// #   Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct HttpTransport {
  inner: Arc<ClientRef>,
}

impl HttpTransport {
  /// Creates an `HttpTransportBuilder` to configure an `HttpTransport`.
  pub fn builder() -> HttpTransportBuilder {
    HttpTransportBuilder::new()
  }
  /// The configuration this transport was built with.
  pub fn config(&self) -> &TransportConfig {
    &self.inner.config
  }
}

impl Transport for HttpTransport {
  fn issue(&self, request: Request) -> DataTask {
    let inner = self.inner.clone();
    DataTask::spawn(move |sink| async move {
      let result = inner.execute(request, &sink).await;
      if let Err(err) = &result {
        tracing::error!("exchange failed: {}", err);
      }
      sink.complete(result).await;
    })
  }
}

/// Settings of an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct TransportConfig {
  connect_timeout: Option<Duration>,
  read_timeout: Option<Duration>,
  write_timeout: Option<Duration>,
  redirect_policy: Policy,
  nodelay: bool,
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      connect_timeout: Some(Duration::from_secs(10)),
      read_timeout: Some(Duration::from_secs(30)),
      write_timeout: Some(Duration::from_secs(30)),
      redirect_policy: Policy::default(),
      nodelay: false,
    }
  }
}

impl TransportConfig {
  /// Timeout of the connect phase.
  pub fn connect_timeout(&self) -> Option<Duration> {
    self.connect_timeout
  }
  /// Timeout of each read.
  pub fn read_timeout(&self) -> Option<Duration> {
    self.read_timeout
  }
  /// Timeout of writing the request.
  pub fn write_timeout(&self) -> Option<Duration> {
    self.write_timeout
  }
  /// The redirect policy.
  pub fn redirect_policy(&self) -> &Policy {
    &self.redirect_policy
  }
  /// Whether `TCP_NODELAY` is set on new sockets.
  pub fn tcp_nodelay(&self) -> bool {
    self.nodelay
  }
}

/// A `HttpTransportBuilder` can be used to create an `HttpTransport` with
/// custom configuration.
///
/// # Example
///
/// ```
/// # fn run() -> Result<(), eavesdrop::Error> {
/// use std::time::Duration;
///
/// let transport = eavesdrop::HttpTransport::builder()
///   .read_timeout(Some(Duration::from_secs(10)))
///   .redirect(eavesdrop::redirect::Policy::none())
///   .build()?;
/// # drop(transport);
/// # Ok(())
/// # }
/// ```
#[must_use]
#[derive(Debug, Default)]
pub struct HttpTransportBuilder {
  config: TransportConfig,
}

impl HttpTransportBuilder {
  /// Constructs a new `HttpTransportBuilder`.
  pub fn new() -> HttpTransportBuilder {
    HttpTransportBuilder::default()
  }
  /// Returns an `HttpTransport` that uses this configuration.
  ///
  /// # Errors
  ///
  /// This method fails if the TLS backend cannot be initialized.
  pub fn build(self) -> Result<HttpTransport> {
    let config = self.config;
    let connector = Connector::new(config.connect_timeout, config.write_timeout, config.nodelay)?;
    Ok(HttpTransport {
      inner: Arc::new(ClientRef { config, connector }),
    })
  }
  /// Set a `RedirectPolicy` for this transport.
  ///
  /// Default will follow redirects up to a maximum of 10.
  pub fn redirect(mut self, policy: Policy) -> HttpTransportBuilder {
    self.config.redirect_policy = policy;
    self
  }
  // Timeout options

  /// Set a timeout for only the connect phase.
  ///
  /// Default is 10 seconds. Pass `None` to disable it.
  pub fn connect_timeout<T: Into<Option<Duration>>>(mut self, timeout: T) -> HttpTransportBuilder {
    self.config.connect_timeout = timeout.into();
    self
  }
  /// Enables a read timeout.
  ///
  /// The timeout applies to each read operation, and resets after a
  /// successful read.
  ///
  /// Default is 30 seconds.
  pub fn read_timeout(mut self, timeout: Option<Duration>) -> HttpTransportBuilder {
    self.config.read_timeout = timeout;
    self
  }
  /// Enables a write timeout for sending the request.
  ///
  /// Default is 30 seconds.
  pub fn write_timeout(mut self, timeout: Option<Duration>) -> HttpTransportBuilder {
    self.config.write_timeout = timeout;
    self
  }
  // TCP options

  /// Set whether sockets have `TCP_NODELAY` enabled.
  ///
  /// Default is `false`.
  pub fn tcp_nodelay(mut self, enabled: bool) -> HttpTransportBuilder {
    self.config.nodelay = enabled;
    self
  }
}

#[derive(Debug)]
struct ClientRef {
  config: TransportConfig,
  connector: Connector,
}

impl ClientRef {
  async fn execute(&self, request: Request, sink: &EventSink) -> Result<()> {
    let mut request = request;
    let mut uris: Vec<http::Uri> = vec![];
    let mut authenticated = false;
    loop {
      let body = request.transmit_body().await?;
      let mut socket = self.open(request.uri(), sink).await?;
      socket.send(&request.to_raw(body.as_deref())).await?;
      let mut reader = ResponseBuilder::new(
        BufReader::new(socket),
        ResponseConfig::new(request.method(), self.config.read_timeout),
      );
      let mut response = reader.read_head().await?;
      *response.uri_mut() = request.uri().clone();
      let status = response.status_code();
      if status == StatusCode::UNAUTHORIZED && !authenticated {
        if let Some(kind) = auth_challenge(response.headers()) {
          let (challenge, reply) = AuthChallenge::new(kind);
          sink.send(TransportEvent::Challenge(challenge)).await;
          match reply.await.unwrap_or(Disposition::PerformDefaultHandling) {
            Disposition::UseCredential(Credential::Basic { user, password }) => {
              authenticated = true;
              request
                .headers_mut()
                .insert(AUTHORIZATION, encode_basic_auth(&user, &password));
              continue;
            }
            Disposition::Cancel => return Err(Error::Cancelled),
            _ => {}
          }
        }
      }
      if redirect::is_redirect(status) {
        if let Some(next_uri) = redirect::location(request.uri(), response.headers()) {
          uris.push(request.uri().clone());
          if self.config.redirect_policy.check(status, &next_uri, &uris) == Action::Follow {
            let next = redirect_request(&request, status, next_uri, &uris);
            tracing::debug!("redirect {} -> {}", request.uri(), next.uri());
            let (proposal, decision) = RedirectProposal::new(response.clone(), next);
            let next = proposal.next().clone();
            sink.send(TransportEvent::Redirect(proposal)).await;
            if decision.await.unwrap_or(Action::Follow) == Action::Follow {
              request = next;
              authenticated = false;
              continue;
            }
          }
        }
      }
      if !sink.send(TransportEvent::Response(response)).await {
        return Ok(());
      }
      while let Some(chunk) = reader.next_chunk().await? {
        if !sink.send(TransportEvent::Data(chunk)).await {
          break;
        }
      }
      return Ok(());
    }
  }

  async fn open(&self, uri: &http::Uri, sink: &EventSink) -> Result<Socket> {
    let socket = self.connector.connect_with_uri(uri).await?;
    if uri.scheme() != Some(&http::uri::Scheme::HTTPS) {
      return Ok(socket);
    }
    #[cfg(feature = "tls")]
    {
      let host = uri
        .host()
        .unwrap_or_default()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
      let (challenge, reply) = AuthChallenge::new(ChallengeKind::ServerTrust { host: host.clone() });
      sink.send(TransportEvent::Challenge(challenge)).await;
      let trust = match reply.await.unwrap_or(Disposition::PerformDefaultHandling) {
        Disposition::UseCredential(Credential::Trust) => true,
        Disposition::Cancel => return Err(Error::Cancelled),
        _ => false,
      };
      self.connector.upgrade_to_tls(socket, &host, trust).await
    }
    #[cfg(not(feature = "tls"))]
    {
      let _ = (socket, sink);
      Err(crate::errors::new_io_error(
        std::io::ErrorKind::Unsupported,
        "https requires the `tls` feature",
      ))
    }
  }
}

/// The request to issue for a redirect the policy allows.
fn redirect_request(
  current: &Request,
  status: StatusCode,
  next_uri: http::Uri,
  previous: &[http::Uri],
) -> Request {
  let mut next = current.clone();
  *next.uri_mut() = next_uri;
  let to_get = match status {
    StatusCode::SEE_OTHER => *current.method() != Method::HEAD,
    StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
      !matches!(*current.method(), Method::GET | Method::HEAD)
    }
    _ => false,
  };
  if to_get {
    *next.method_mut() = Method::GET;
    *next.body_mut() = None;
    *next.body_stream_mut() = None;
    for header in &[TRANSFER_ENCODING, CONTENT_ENCODING, CONTENT_TYPE, CONTENT_LENGTH] {
      next.headers_mut().remove(header);
    }
  }
  next.headers_mut().remove(HOST);
  let uri = next.uri().clone();
  remove_sensitive_headers(next.headers_mut(), &uri, previous);
  next
}

/// Parse the first `WWW-Authenticate` challenge.
fn auth_challenge(headers: &HeaderMap) -> Option<ChallengeKind> {
  let value = headers.get(WWW_AUTHENTICATE)?.to_str().ok()?.trim();
  let (scheme, params) = match value.split_once(' ') {
    Some((scheme, params)) => (scheme, params),
    None => (value, ""),
  };
  if scheme.is_empty() {
    return None;
  }
  let realm = params.split(',').find_map(|param| {
    let (k, v) = param.trim().split_once('=')?;
    if k.trim().eq_ignore_ascii_case("realm") {
      Some(v.trim().trim_matches('"').to_string())
    } else {
      None
    }
  });
  Some(ChallengeKind::HttpAuth {
    scheme: scheme.to_string(),
    realm,
  })
}

pub(crate) fn encode_basic_auth(username: &str, password: &str) -> HeaderValue {
  use base64::prelude::BASE64_STANDARD;
  use base64::write::EncoderWriter;

  let mut buf = b"Basic ".to_vec();
  {
    let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
    let _ = write!(encoder, "{}:{}", username, password);
  }
  let mut header = HeaderValue::from_bytes(&buf).unwrap_or_else(|_| HeaderValue::from_static("Basic"));
  header.set_sensitive(true);
  header
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn basic_auth_header() {
    let value = encode_basic_auth("Aladdin", "open sesame");
    assert_eq!(value, "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    assert!(value.is_sensitive());
  }

  #[test]
  fn challenge_realm() {
    let mut headers = HeaderMap::new();
    headers.insert(
      WWW_AUTHENTICATE,
      HeaderValue::from_static("Basic realm=\"staff\", charset=\"UTF-8\""),
    );
    assert_eq!(
      auth_challenge(&headers),
      Some(ChallengeKind::HttpAuth {
        scheme: "Basic".into(),
        realm: Some("staff".into()),
      })
    );
    headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    assert_eq!(
      auth_challenge(&headers),
      Some(ChallengeKind::HttpAuth {
        scheme: "Bearer".into(),
        realm: None,
      })
    );
  }

  #[test]
  fn see_other_switches_to_get() {
    let request = Request::new(Method::POST, "http://a/form")
      .unwrap()
      .with_header(CONTENT_TYPE, "text/plain")
      .unwrap()
      .with_header(AUTHORIZATION, "Basic x")
      .unwrap()
      .with_body("data");
    let previous = [http::Uri::from_static("http://a/form")];
    let next = redirect_request(
      &request,
      StatusCode::SEE_OTHER,
      http::Uri::from_static("http://b/done"),
      &previous,
    );
    assert_eq!(next.method(), Method::GET);
    assert!(next.body().is_none());
    assert!(next.headers().get(CONTENT_TYPE).is_none());
    assert!(next.headers().get(AUTHORIZATION).is_none());
    let kept = redirect_request(
      &request,
      StatusCode::TEMPORARY_REDIRECT,
      http::Uri::from_static("http://a/again"),
      &previous,
    );
    assert_eq!(kept.method(), Method::POST);
    assert!(kept.body().is_some());
  }
}
