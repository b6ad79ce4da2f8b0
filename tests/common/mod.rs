//! Shared helpers for the integration tests: a scripted transport, a protocol
//! that counts how often it is asked, and a tiny HTTP server.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use eavesdrop::redirect::Action;
use eavesdrop::transport::{
  AuthChallenge, ChallengeKind, Disposition, RedirectProposal, TaskHandle,
};
use eavesdrop::{
  CaptureStore, DataTask, Protocol, Request, Response, SharedProtocol, StoreEvent, Transport,
  TransportEvent,
};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// One thing the scripted transport does.
#[derive(Clone)]
pub enum Step {
  /// Deliver response headers.
  Head(u16, Vec<(&'static str, &'static str)>),
  /// Deliver a body chunk.
  Chunk(&'static [u8]),
  /// Propose a redirect to this url and wait for the answer.
  Redirect(&'static str),
  /// Raise a challenge and wait for the answer.
  Challenge(ChallengeKind),
  /// Block until notified.
  Wait(Arc<Notify>),
  /// Complete successfully.
  Complete,
  /// Complete with an error.
  Fail(&'static str),
}

/// A transport that replays the same script for every request.
pub struct ScriptedTransport {
  script: Vec<Step>,
  issued: AtomicUsize,
  requests: Mutex<Vec<Request>>,
  tasks: Mutex<Vec<TaskHandle>>,
  redirects: Arc<Mutex<Vec<Action>>>,
  dispositions: Arc<Mutex<Vec<Disposition>>>,
}

impl ScriptedTransport {
  pub fn new(script: Vec<Step>) -> Arc<Self> {
    Arc::new(ScriptedTransport {
      script,
      issued: AtomicUsize::new(0),
      requests: Mutex::new(Vec::new()),
      tasks: Mutex::new(Vec::new()),
      redirects: Arc::new(Mutex::new(Vec::new())),
      dispositions: Arc::new(Mutex::new(Vec::new())),
    })
  }
  pub fn issued(&self) -> usize {
    self.issued.load(Ordering::SeqCst)
  }
  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }
  pub fn tasks(&self) -> Vec<TaskHandle> {
    self.tasks.lock().unwrap().clone()
  }
  pub fn redirect_answers(&self) -> Vec<Action> {
    self.redirects.lock().unwrap().clone()
  }
  pub fn dispositions(&self) -> Vec<Disposition> {
    self.dispositions.lock().unwrap().clone()
  }
}

impl Transport for ScriptedTransport {
  fn issue(&self, request: Request) -> DataTask {
    self.issued.fetch_add(1, Ordering::SeqCst);
    self.requests.lock().unwrap().push(request.clone());
    let script = self.script.clone();
    let redirects = self.redirects.clone();
    let dispositions = self.dispositions.clone();
    let task = DataTask::spawn(move |sink| async move {
      for step in script {
        match step {
          Step::Head(status, headers) => {
            let mut builder = Response::builder().status(status);
            for (k, v) in headers {
              builder = builder.header(k, v);
            }
            let response: Response = builder.body(()).unwrap().into();
            sink.send(TransportEvent::Response(response)).await;
          }
          Step::Chunk(chunk) => {
            sink.send(TransportEvent::Data(Bytes::from_static(chunk))).await;
          }
          Step::Redirect(to) => {
            let response: Response = Response::builder()
              .status(302)
              .header("location", to)
              .body(())
              .unwrap()
              .into();
            let next = Request::new(request.method().clone(), to).unwrap();
            let (proposal, decision) = RedirectProposal::new(response, next);
            sink.send(TransportEvent::Redirect(proposal)).await;
            let action = decision.await.unwrap_or(Action::Follow);
            redirects.lock().unwrap().push(action);
          }
          Step::Challenge(kind) => {
            let (challenge, reply) = AuthChallenge::new(kind);
            sink.send(TransportEvent::Challenge(challenge)).await;
            let disposition = reply.await.unwrap_or(Disposition::PerformDefaultHandling);
            dispositions.lock().unwrap().push(disposition);
          }
          Step::Wait(gate) => gate.notified().await,
          Step::Complete => {
            sink.complete(Ok(())).await;
          }
          Step::Fail(message) => {
            sink
              .complete(Err(eavesdrop::Error::Other(message.to_string())))
              .await;
          }
        }
      }
    });
    self.tasks.lock().unwrap().push(task.handle());
    task
  }
}

/// Wraps a protocol and counts its eligibility checks.
pub struct CountingProtocol {
  inner: SharedProtocol,
  checks: AtomicUsize,
}

impl CountingProtocol {
  pub fn new(inner: SharedProtocol) -> Arc<Self> {
    Arc::new(CountingProtocol {
      inner,
      checks: AtomicUsize::new(0),
    })
  }
  pub fn checks(&self) -> usize {
    self.checks.load(Ordering::SeqCst)
  }
}

impl Protocol for CountingProtocol {
  fn can_intercept(&self, request: &Request) -> bool {
    self.checks.fetch_add(1, Ordering::SeqCst);
    self.inner.can_intercept(request)
  }
  fn start_loading(&self, request: Request) -> DataTask {
    self.inner.start_loading(request)
  }
}

/// Wait until the store announces `count` additions.
pub async fn wait_for_records(events: &mut tokio::sync::broadcast::Receiver<StoreEvent>, count: usize) {
  let mut seen = 0;
  while seen < count {
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
      .await
      .expect("store notification timed out")
      .expect("store channel closed");
    if matches!(event, StoreEvent::Added(_)) {
      seen += 1;
    }
  }
}

/// Give background tasks a chance to run, then return the store size.
pub async fn settled_len(store: &CaptureStore) -> usize {
  tokio::time::sleep(Duration::from_millis(100)).await;
  store.len()
}

/// A request the test server received.
#[derive(Debug, Clone)]
pub struct Received {
  pub head: String,
  pub body: Vec<u8>,
}

impl Received {
  pub fn request_line(&self) -> &str {
    self.head.lines().next().unwrap_or_default()
  }
  pub fn header(&self, name: &str) -> Option<String> {
    self.head.lines().skip(1).find_map(|line| {
      let (k, v) = line.split_once(':')?;
      if k.trim().eq_ignore_ascii_case(name) {
        Some(v.trim().to_string())
      } else {
        None
      }
    })
  }
}

/// A server answer: the pieces are written with a flush and a short pause in
/// between, so the client sees them as separate reads.
pub type Handler = Arc<dyn Fn(&Received) -> Vec<Vec<u8>> + Send + Sync>;

/// Serve `handler` on a local port; returns the base url and the requests
/// seen so far.
pub async fn serve(handler: Handler) -> (String, Arc<Mutex<Vec<Received>>>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let seen = Arc::new(Mutex::new(Vec::new()));
  let log = seen.clone();
  tokio::spawn(async move {
    loop {
      let (stream, _) = match listener.accept().await {
        Ok(conn) => conn,
        Err(_) => return,
      };
      let handler = handler.clone();
      let log = log.clone();
      tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut head = String::new();
        loop {
          let mut line = String::new();
          if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
          }
          if line == "\r\n" {
            break;
          }
          head.push_str(&line);
        }
        let mut received = Received {
          head,
          body: Vec::new(),
        };
        if let Some(len) = received.header("content-length") {
          let mut body = vec![0; len.parse().unwrap_or(0)];
          reader.read_exact(&mut body).await.unwrap();
          received.body = body;
        }
        log.lock().unwrap().push(received.clone());
        let mut stream = reader.into_inner();
        for piece in handler(&received) {
          if stream.write_all(&piece).await.is_err() {
            return;
          }
          let _ = stream.flush().await;
          tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = stream.shutdown().await;
      });
    }
  });
  (format!("http://{}", addr), seen)
}

/// A complete `Content-Length` response.
pub fn plain(status: u16, headers: &[(&str, &str)], body: &str) -> Vec<u8> {
  let mut response = format!("HTTP/1.1 {} X\r\n", status);
  for (name, value) in headers {
    response.push_str(&format!("{}: {}\r\n", name, value));
  }
  response.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
  response.push_str(body);
  response.into_bytes()
}
