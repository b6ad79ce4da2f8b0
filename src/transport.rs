//! The request/response transport abstraction.
//!
//! A [`Transport`] issues a [`Request`] and reports the exchange as an ordered
//! stream of [`TransportEvent`]s through a [`DataTask`]. Redirects and
//! authentication challenges are questions the transport asks the reader of
//! the stream; leaving them unanswered picks the default.
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use crate::errors::{Error, Result};
use crate::redirect::Action;
use crate::{Request, Response};

const EVENT_BUFFER: usize = 64;

/// Something that can carry requests to a server.
pub trait Transport: Send + Sync {
  /// Start an exchange for `request`.
  ///
  /// Must be called from within a tokio runtime.
  fn issue(&self, request: Request) -> DataTask;
}

/// One step of an exchange, in the order the transport observed it.
#[derive(Debug)]
pub enum TransportEvent {
  /// Response metadata arrived.
  Response(Response),
  /// A piece of the response body arrived.
  Data(Bytes),
  /// The server answered with a redirect the transport is about to follow.
  Redirect(RedirectProposal),
  /// The transport needs a decision about an authentication challenge.
  Challenge(AuthChallenge),
  /// The exchange finished. Always the last event.
  Completed(Result<()>),
}

/// A redirect proposed by the transport.
///
/// Dropping the proposal without answering follows it.
#[derive(Debug)]
pub struct RedirectProposal {
  response: Response,
  next: Request,
  decision: Option<oneshot::Sender<Action>>,
}

impl RedirectProposal {
  /// Create a proposal and the receiver that observes the answer.
  pub fn new(response: Response, next: Request) -> (Self, oneshot::Receiver<Action>) {
    let (tx, rx) = oneshot::channel();
    (
      RedirectProposal {
        response,
        next,
        decision: Some(tx),
      },
      rx,
    )
  }
  /// A copy of this proposal that only informs; its answer goes nowhere.
  pub fn notice(&self) -> RedirectProposal {
    RedirectProposal {
      response: self.response.clone(),
      next: self.next.clone(),
      decision: None,
    }
  }
  /// The redirect response.
  pub fn response(&self) -> &Response {
    &self.response
  }
  /// The request the transport will issue next.
  pub fn next(&self) -> &Request {
    &self.next
  }
  /// Follow the redirect.
  pub fn follow(self) {
    self.answer(Action::Follow)
  }
  /// Stop here; the redirect response becomes the final response.
  pub fn stop(self) {
    self.answer(Action::Stop)
  }
  fn answer(mut self, action: Action) {
    if let Some(tx) = self.decision.take() {
      let _ = tx.send(action);
    }
  }
}

/// The kind of authentication a server asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
  /// The server presented trust materials (a TLS certificate chain) that
  /// must be evaluated before the connection is used.
  ServerTrust {
    /// host being connected to
    host: String,
  },
  /// The server answered `401` with a `WWW-Authenticate` challenge.
  HttpAuth {
    /// authentication scheme, e.g. `Basic`
    scheme: String,
    /// realm parameter, if any
    realm: Option<String>,
  },
}

/// Credentials offered in reply to a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
  /// Trust whatever the server presented.
  Trust,
  /// Username and password for `Basic` authentication.
  Basic {
    /// user
    user: String,
    /// password
    password: String,
  },
}

/// How to handle an authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
  /// Answer with the given credential.
  UseCredential(Credential),
  /// Do what the transport would do without being asked.
  PerformDefaultHandling,
  /// Fail the exchange.
  Cancel,
}

/// An authentication challenge raised by the transport.
///
/// Dropping it without answering means default handling.
#[derive(Debug)]
pub struct AuthChallenge {
  kind: ChallengeKind,
  reply: Option<oneshot::Sender<Disposition>>,
}

impl AuthChallenge {
  /// Create a challenge and the receiver that observes the answer.
  pub fn new(kind: ChallengeKind) -> (Self, oneshot::Receiver<Disposition>) {
    let (tx, rx) = oneshot::channel();
    (
      AuthChallenge {
        kind,
        reply: Some(tx),
      },
      rx,
    )
  }
  /// What the server asks for.
  pub fn kind(&self) -> &ChallengeKind {
    &self.kind
  }
  /// Answer the challenge.
  pub fn respond(mut self, disposition: Disposition) {
    if let Some(tx) = self.reply.take() {
      let _ = tx.send(disposition);
    }
  }
}

const ACTIVE: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

/// Finalize-once guard of an exchange: exactly one of completion or
/// cancellation wins.
#[derive(Debug, Default)]
pub struct Terminal {
  state: AtomicU8,
}

impl Terminal {
  /// Claim the completed outcome. `false` if the exchange already ended.
  pub fn complete(&self) -> bool {
    self
      .state
      .compare_exchange(ACTIVE, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
  /// Claim the cancelled outcome. `false` if the exchange already ended.
  pub fn cancel(&self) -> bool {
    self
      .state
      .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
  }
  /// Whether cancellation won.
  pub fn is_cancelled(&self) -> bool {
    self.state.load(Ordering::Acquire) == CANCELLED
  }
  /// Whether completion won.
  pub fn is_completed(&self) -> bool {
    self.state.load(Ordering::Acquire) == COMPLETED
  }
}

/// The producing side of a [`DataTask`], handed to the task driving it.
#[derive(Debug, Clone)]
pub struct EventSink {
  tx: mpsc::Sender<TransportEvent>,
  terminal: Arc<Terminal>,
}

impl EventSink {
  /// Deliver an event. Returns `false` when nobody listens any more.
  pub async fn send(&self, event: TransportEvent) -> bool {
    self.tx.send(event).await.is_ok()
  }
  /// Finish the exchange with `result`, unless it was cancelled first.
  ///
  /// Returns whether the completion was delivered.
  pub async fn complete(&self, result: Result<()>) -> bool {
    if !self.terminal.complete() {
      return false;
    }
    self.send(TransportEvent::Completed(result)).await
  }
  /// The finalize-once guard shared with the [`DataTask`].
  pub fn terminal(&self) -> &Arc<Terminal> {
    &self.terminal
  }
}

/// Cancels the exchange behind a [`DataTask`]; cheap to clone.
#[derive(Debug, Clone)]
pub struct TaskHandle {
  terminal: Arc<Terminal>,
  abort: Arc<Mutex<Option<AbortHandle>>>,
}

impl TaskHandle {
  /// Cancel the exchange. Returns `false` if it had already completed.
  ///
  /// A cancelled exchange delivers no further events.
  pub fn cancel(&self) -> bool {
    if !self.terminal.cancel() {
      return false;
    }
    if let Some(abort) = self
      .abort
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
    {
      abort.abort();
    }
    true
  }
  /// Whether the exchange was cancelled.
  pub fn is_cancelled(&self) -> bool {
    self.terminal.is_cancelled()
  }
}

/// A running exchange: its event stream and the means to cancel it.
#[derive(Debug)]
pub struct DataTask {
  events: mpsc::Receiver<TransportEvent>,
  handle: TaskHandle,
}

impl DataTask {
  /// Run `drive` on the tokio runtime, feeding events into a new task.
  pub fn spawn<F, Fut>(drive: F) -> DataTask
  where
    F: FnOnce(EventSink) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let (tx, events) = mpsc::channel(EVENT_BUFFER);
    let terminal = Arc::new(Terminal::default());
    let sink = EventSink {
      tx,
      terminal: terminal.clone(),
    };
    let join = tokio::spawn(drive(sink));
    DataTask {
      events,
      handle: TaskHandle {
        terminal,
        abort: Arc::new(Mutex::new(Some(join.abort_handle()))),
      },
    }
  }
  /// A task that fails immediately with `error`.
  pub fn failed(error: Error) -> DataTask {
    DataTask::spawn(move |sink| async move {
      sink.complete(Err(error)).await;
    })
  }
  /// Wait for the next event; `None` once the stream ended or was cancelled.
  pub async fn next_event(&mut self) -> Option<TransportEvent> {
    if self.handle.is_cancelled() {
      return None;
    }
    self.events.recv().await
  }
  /// Cancel the exchange. Returns `false` if it had already completed.
  pub fn cancel(&self) -> bool {
    self.handle.cancel()
  }
  /// A handle that can cancel this exchange from elsewhere.
  pub fn handle(&self) -> TaskHandle {
    self.handle.clone()
  }
  /// Drive the exchange to the end with default answers and return the final
  /// response with its body.
  pub async fn collect(mut self) -> Result<Response> {
    let mut response: Option<Response> = None;
    let mut body = BytesMut::new();
    while let Some(event) = self.next_event().await {
      match event {
        TransportEvent::Response(r) => {
          body.clear();
          response = Some(r);
        }
        TransportEvent::Data(chunk) => body.extend_from_slice(&chunk),
        TransportEvent::Redirect(proposal) => proposal.follow(),
        TransportEvent::Challenge(challenge) => {
          challenge.respond(Disposition::PerformDefaultHandling)
        }
        TransportEvent::Completed(result) => {
          result?;
          let mut response = response.unwrap_or_default();
          if !body.is_empty() {
            *response.body_mut() = Some(body.freeze().into());
          }
          return Ok(response);
        }
      }
    }
    Err(Error::Cancelled)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_is_exclusive() {
    let t = Terminal::default();
    assert!(t.complete());
    assert!(!t.cancel());
    assert!(t.is_completed());
    let t = Terminal::default();
    assert!(t.cancel());
    assert!(!t.complete());
    assert!(t.is_cancelled());
  }

  #[tokio::test]
  async fn collect_accumulates_in_order() {
    let task = DataTask::spawn(|sink| async move {
      sink
        .send(TransportEvent::Response(
          Response::builder().status(200).body(()).unwrap().into(),
        ))
        .await;
      for chunk in ["a", "b", "c"] {
        sink.send(TransportEvent::Data(Bytes::from(chunk))).await;
      }
      sink.complete(Ok(())).await;
    });
    let response = task.collect().await.unwrap();
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text(), "abc");
  }

  #[tokio::test]
  async fn cancel_ends_stream_without_completion() {
    let mut task = DataTask::spawn(|sink| async move {
      tokio::time::sleep(std::time::Duration::from_secs(30)).await;
      sink.complete(Ok(())).await;
    });
    assert!(task.cancel());
    assert!(task.next_event().await.is_none());
    assert!(!task.cancel());
  }

  #[tokio::test]
  async fn cancel_after_completion_is_refused() {
    let mut task = DataTask::spawn(|sink| async move {
      sink.complete(Ok(())).await;
    });
    assert!(matches!(
      task.next_event().await,
      Some(TransportEvent::Completed(Ok(())))
    ));
    assert!(!task.cancel());
  }

  #[tokio::test]
  async fn unanswered_questions_fall_back_to_defaults() {
    let (proposal, decision) =
      RedirectProposal::new(Response::default(), Request::default());
    drop(proposal);
    assert!(decision.await.is_err());
    let (challenge, reply) = AuthChallenge::new(ChallengeKind::ServerTrust {
      host: "h".into(),
    });
    challenge.respond(Disposition::UseCredential(Credential::Trust));
    assert_eq!(
      reply.await.unwrap(),
      Disposition::UseCredential(Credential::Trust)
    );
  }
}
