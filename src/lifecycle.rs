use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::interceptor::Interceptor;
use crate::protocol::SharedProtocol;
use crate::publisher::Publisher;
use crate::session::SessionFactory;
use crate::store::CaptureStore;

/// Turns capturing on and off for every session a [`SessionFactory`] builds.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use eavesdrop::{Eavesdrop, Request, SessionFactory};
/// # async fn run() -> Result<(), eavesdrop::Error> {
/// let factory = Arc::new(SessionFactory::http()?);
/// let eavesdrop = Eavesdrop::new(factory.clone());
/// eavesdrop.start();
/// let mut changes = eavesdrop.store().subscribe();
/// let request = Request::new(http::Method::GET, "http://httpbin.org/get")?;
/// factory.default_session().send(request).await?;
/// changes.recv().await.ok();
/// for record in eavesdrop.store().snapshot() {
///   println!("{} {} -> {}", record.method(), record.url(), record.response_status());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Eavesdrop {
  factory: Arc<SessionFactory>,
  store: Arc<CaptureStore>,
  interceptor: SharedProtocol,
  running: AtomicBool,
}

impl std::fmt::Debug for Eavesdrop {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Eavesdrop")
      .field("store", &self.store)
      .field("running", &self.is_running())
      .finish()
  }
}

impl Eavesdrop {
  /// Prepare capturing into a new store. Must be called within a tokio
  /// runtime; nothing is intercepted before [`start`](Eavesdrop::start).
  pub fn new(factory: Arc<SessionFactory>) -> Self {
    Eavesdrop::with_store(factory, Arc::new(CaptureStore::new()))
  }
  /// Prepare capturing into `store`.
  pub fn with_store(factory: Arc<SessionFactory>, store: Arc<CaptureStore>) -> Self {
    let publisher = Publisher::spawn(store.clone());
    let interceptor: SharedProtocol = Arc::new(Interceptor::new(factory.transport(), publisher));
    Eavesdrop {
      factory,
      store,
      interceptor,
      running: AtomicBool::new(false),
    }
  }
  /// Register the interceptor and put it first in the default and ephemeral
  /// configurations. Calling it again changes nothing.
  pub fn start(&self) {
    let registered = self.factory.registry().register(self.interceptor.clone());
    let installed = self.factory.install(&self.interceptor);
    self.running.store(true, Ordering::Release);
    if registered || installed {
      tracing::debug!("interception started");
    }
  }
  /// Remove the interceptor from the registry and both configurations.
  ///
  /// Sessions built while running keep their configuration copy.
  pub fn stop(&self) {
    self.factory.registry().unregister(&self.interceptor);
    self.factory.uninstall(&self.interceptor);
    if self.running.swap(false, Ordering::AcqRel) {
      tracing::debug!("interception stopped");
    }
  }
  /// Whether [`start`](Eavesdrop::start) is in effect.
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }
  /// The store records are captured into.
  pub fn store(&self) -> &Arc<CaptureStore> {
    &self.store
  }
  /// The interceptor as installed in sessions.
  pub fn interceptor(&self) -> &SharedProtocol {
    &self.interceptor
  }
}
