//! The protocol that observes exchanges on their way through a session.
//!
//! A claimed request is re-issued on the real transport by a per-exchange
//! [`Loader`]. Every event coming back is mirrored to the caller while the
//! interceptor keeps its own copy of the response body; when the exchange
//! ends an [`ExchangeRecord`](crate::ExchangeRecord) is published.
use std::sync::Arc;

use bytes::BytesMut;

use crate::body::read_body_stream;
use crate::errors::{Error, Result};
use crate::protocol::Protocol;
use crate::publisher::Publisher;
use crate::record::ExchangeDraft;
use crate::transport::{
  ChallengeKind, Credential, DataTask, Disposition, EventSink, TaskHandle, Transport,
  TransportEvent,
};
use crate::{Request, Response};

/// Whether `request` is plain or secure HTTP with a host to talk to.
pub fn is_interceptable(request: &Request) -> bool {
  let uri = request.uri();
  let http = uri
    .scheme_str()
    .is_some_and(|s| s.eq_ignore_ascii_case("http") || s.eq_ignore_ascii_case("https"));
  http && uri.host().is_some_and(|h| !h.is_empty())
}

/// Captures every HTTP(S) exchange it loads.
pub struct Interceptor {
  transport: Arc<dyn Transport>,
  publisher: Publisher,
}

impl std::fmt::Debug for Interceptor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Interceptor")
      .field("publisher", &self.publisher)
      .finish()
  }
}

impl Interceptor {
  /// An interceptor that loads through `transport` and publishes records to
  /// `publisher`.
  pub fn new(transport: Arc<dyn Transport>, publisher: Publisher) -> Self {
    Interceptor {
      transport,
      publisher,
    }
  }
}

impl Protocol for Interceptor {
  fn can_intercept(&self, request: &Request) -> bool {
    is_interceptable(request)
  }

  fn start_loading(&self, request: Request) -> DataTask {
    let loader = Loader::new(self.transport.clone());
    let publisher = self.publisher.clone();
    DataTask::spawn(move |sink| relay(loader, request, sink, publisher))
  }
}

/// The real-transport work behind one intercepted exchange.
///
/// Dropping the loader invalidates it and cancels whatever it still runs.
pub(crate) struct Loader {
  transport: Arc<dyn Transport>,
  tasks: Vec<TaskHandle>,
  invalidated: bool,
}

impl Loader {
  pub(crate) fn new(transport: Arc<dyn Transport>) -> Self {
    Loader {
      transport,
      tasks: Vec::new(),
      invalidated: false,
    }
  }
  pub(crate) fn issue(&mut self, request: Request) -> Result<DataTask> {
    if self.invalidated {
      return Err(Error::SessionInvalidated);
    }
    let task = self.transport.issue(request);
    self.tasks.push(task.handle());
    Ok(task)
  }
  pub(crate) fn invalidate_and_cancel(&mut self) {
    self.invalidated = true;
    for task in self.tasks.drain(..) {
      if task.cancel() {
        tracing::debug!("outstanding transport task cancelled");
      }
    }
  }
}

impl Drop for Loader {
  fn drop(&mut self) {
    self.invalidate_and_cancel();
  }
}

/// What the interceptor has seen of an exchange so far.
struct Capture {
  response: Option<Response>,
  body: BytesMut,
}

async fn relay(mut loader: Loader, request: Request, sink: EventSink, publisher: Publisher) {
  let mut capture = Capture {
    response: None,
    body: BytesMut::new(),
  };
  let mut upstream = match loader.issue(request.clone()) {
    Ok(task) => task,
    Err(err) => {
      finalize(&request, capture, Err(err), &sink, &publisher).await;
      return;
    }
  };
  while let Some(event) = upstream.next_event().await {
    match event {
      TransportEvent::Response(response) => {
        capture.body.clear();
        capture.response = Some(response.clone());
        sink.send(TransportEvent::Response(response)).await;
      }
      TransportEvent::Data(chunk) => {
        capture.body.extend_from_slice(&chunk);
        sink.send(TransportEvent::Data(chunk)).await;
      }
      TransportEvent::Redirect(proposal) => {
        sink.send(TransportEvent::Redirect(proposal.notice())).await;
        proposal.follow();
      }
      TransportEvent::Challenge(challenge) => {
        let disposition = match challenge.kind() {
          ChallengeKind::ServerTrust { .. } => Disposition::UseCredential(Credential::Trust),
          _ => Disposition::PerformDefaultHandling,
        };
        challenge.respond(disposition);
      }
      TransportEvent::Completed(result) => {
        finalize(&request, capture, result, &sink, &publisher).await;
        return;
      }
    }
  }
  finalize(&request, capture, Err(Error::Cancelled), &sink, &publisher).await;
}

/// End the exchange exactly once: report the result to the caller, then
/// capture and publish its record.
///
/// Once the terminal is completed the relay can no longer be cancelled, so
/// the capture read never holds back the caller.
async fn finalize(
  request: &Request,
  capture: Capture,
  result: Result<()>,
  sink: &EventSink,
  publisher: &Publisher,
) {
  if !sink.terminal().complete() {
    tracing::debug!("{} {} cancelled, nothing captured", request.method(), request.uri());
    return;
  }
  let error = result.as_ref().err().map(ToString::to_string);
  sink.send(TransportEvent::Completed(result)).await;

  let mut draft = ExchangeDraft::new();
  if let Some(response) = &capture.response {
    draft.record_response(response, Some(capture.body.freeze()));
  }
  let request_body = match request.body() {
    Some(body) => Some(body.inner_bytes()),
    None => read_body_stream(request.body_stream()).await,
  };
  draft.record_request(request, request_body);
  if let Some(error) = error {
    draft.record_error(error);
  }
  publisher.publish(draft.finish());
}

#[cfg(test)]
mod tests {
  use super::*;
  use http::Method;

  #[test]
  fn only_http_with_host_is_interceptable() {
    let ok = |uri: &str| is_interceptable(&Request::new(Method::GET, uri).unwrap());
    assert!(ok("http://example.com/"));
    assert!(ok("HTTPS://example.com:8443/x"));
    assert!(!ok("ftp://example.com/"));
    assert!(!ok("ws://example.com/"));
    assert!(!ok("/relative/path"));
  }

  struct Idle;

  impl Transport for Idle {
    fn issue(&self, _request: Request) -> DataTask {
      DataTask::spawn(|sink| async move {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        sink.complete(Ok(())).await;
      })
    }
  }

  #[tokio::test]
  async fn dropped_loader_cancels_and_refuses_work() {
    let mut loader = Loader::new(Arc::new(Idle));
    let request = Request::new(Method::GET, "http://example.com/").unwrap();
    let task = loader.issue(request.clone()).unwrap();
    let handle = task.handle();
    loader.invalidate_and_cancel();
    assert!(handle.is_cancelled());
    assert!(matches!(loader.issue(request), Err(Error::SessionInvalidated)));
    drop(loader);
  }
}
