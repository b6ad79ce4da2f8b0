use std::sync::{Arc, PoisonError, RwLock};

use crate::client::HttpTransport;
use crate::errors::Result;
use crate::protocol::{same_protocol, ProtocolRegistry, SharedProtocol};
use crate::transport::{DataTask, Transport};
use crate::{Request, Response};

/// Which of the two shared configurations a session is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigurationKind {
  /// The default configuration.
  Default,
  /// The ephemeral (non-persistent) configuration.
  Ephemeral,
}

/// The protocols a session tries, in order, before the real transport.
#[derive(Clone)]
pub struct SessionConfiguration {
  kind: ConfigurationKind,
  protocols: Vec<SharedProtocol>,
}

impl std::fmt::Debug for SessionConfiguration {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionConfiguration")
      .field("kind", &self.kind)
      .field("protocols", &self.protocols.len())
      .finish()
  }
}

impl SessionConfiguration {
  /// An empty configuration of the given kind.
  pub fn new(kind: ConfigurationKind) -> Self {
    SessionConfiguration {
      kind,
      protocols: Vec::new(),
    }
  }
  /// The kind of this configuration.
  pub fn kind(&self) -> ConfigurationKind {
    self.kind
  }
  /// The protocol chain, first tried first.
  pub fn protocols(&self) -> &[SharedProtocol] {
    &self.protocols
  }
  /// Whether `protocol` is in the chain.
  pub fn contains(&self, protocol: &SharedProtocol) -> bool {
    self.protocols.iter().any(|p| same_protocol(p, protocol))
  }
  /// Put `protocol` at the front of the chain unless it is already there.
  pub fn insert_first(&mut self, protocol: SharedProtocol) -> bool {
    if self.contains(&protocol) {
      return false;
    }
    self.protocols.insert(0, protocol);
    true
  }
  /// Take `protocol` out of the chain.
  pub fn remove(&mut self, protocol: &SharedProtocol) -> bool {
    let before = self.protocols.len();
    self.protocols.retain(|p| !same_protocol(p, protocol));
    self.protocols.len() != before
  }
}

/// Builds every [`Session`], so a protocol installed here sees every request
/// made through the default and ephemeral configurations.
pub struct SessionFactory {
  registry: Arc<ProtocolRegistry>,
  default_configuration: RwLock<SessionConfiguration>,
  ephemeral_configuration: RwLock<SessionConfiguration>,
  transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for SessionFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionFactory")
      .field("registry", &self.registry)
      .field("default", &self.configuration(ConfigurationKind::Default))
      .field("ephemeral", &self.configuration(ConfigurationKind::Ephemeral))
      .finish()
  }
}

impl SessionFactory {
  /// A factory whose sessions fall back to `transport`.
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    SessionFactory {
      registry: Arc::new(ProtocolRegistry::default()),
      default_configuration: RwLock::new(SessionConfiguration::new(ConfigurationKind::Default)),
      ephemeral_configuration: RwLock::new(SessionConfiguration::new(ConfigurationKind::Ephemeral)),
      transport,
    }
  }
  /// A factory over an [`HttpTransport`] with default settings.
  ///
  /// # Errors
  ///
  /// This method fails if the TLS backend cannot be initialized.
  pub fn http() -> Result<Self> {
    let transport = HttpTransport::builder().build()?;
    Ok(SessionFactory::new(Arc::new(transport)))
  }
  /// The process-wide protocol registry.
  pub fn registry(&self) -> &Arc<ProtocolRegistry> {
    &self.registry
  }
  /// The real transport.
  pub fn transport(&self) -> Arc<dyn Transport> {
    self.transport.clone()
  }
  /// A copy of the configuration of `kind`.
  pub fn configuration(&self, kind: ConfigurationKind) -> SessionConfiguration {
    self
      .slot(kind)
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
  /// Put `protocol` first in both configurations, where absent.
  ///
  /// Returns whether either configuration changed.
  pub fn install(&self, protocol: &SharedProtocol) -> bool {
    let mut changed = false;
    for kind in [ConfigurationKind::Default, ConfigurationKind::Ephemeral] {
      let mut configuration = self.slot(kind).write().unwrap_or_else(PoisonError::into_inner);
      changed |= configuration.insert_first(protocol.clone());
    }
    changed
  }
  /// Remove `protocol` from both configurations.
  pub fn uninstall(&self, protocol: &SharedProtocol) -> bool {
    let mut changed = false;
    for kind in [ConfigurationKind::Default, ConfigurationKind::Ephemeral] {
      let mut configuration = self.slot(kind).write().unwrap_or_else(PoisonError::into_inner);
      changed |= configuration.remove(protocol);
    }
    changed
  }
  /// A session built from the configuration of `kind` as it is now.
  pub fn session(&self, kind: ConfigurationKind) -> Session {
    Session {
      configuration: self.configuration(kind),
      registry: self.registry.clone(),
      transport: self.transport.clone(),
    }
  }
  /// A session over the default configuration.
  pub fn default_session(&self) -> Session {
    self.session(ConfigurationKind::Default)
  }
  /// A session over the ephemeral configuration.
  pub fn ephemeral_session(&self) -> Session {
    self.session(ConfigurationKind::Ephemeral)
  }
  fn slot(&self, kind: ConfigurationKind) -> &RwLock<SessionConfiguration> {
    match kind {
      ConfigurationKind::Default => &self.default_configuration,
      ConfigurationKind::Ephemeral => &self.ephemeral_configuration,
    }
  }
}

/// Issues requests through a protocol chain, falling back to the transport.
#[derive(Clone)]
pub struct Session {
  configuration: SessionConfiguration,
  registry: Arc<ProtocolRegistry>,
  transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("configuration", &self.configuration)
      .finish()
  }
}

impl Session {
  /// The configuration this session was built from.
  pub fn configuration(&self) -> &SessionConfiguration {
    &self.configuration
  }
  /// Start an exchange.
  ///
  /// The configuration's protocols are asked first, then registered protocols
  /// not already asked; each at most once. The first that claims the request
  /// loads it, otherwise the real transport does.
  pub fn data_task(&self, request: Request) -> DataTask {
    let mut chain: Vec<SharedProtocol> = self.configuration.protocols().to_vec();
    for protocol in self.registry.protocols() {
      if !chain.iter().any(|p| same_protocol(p, &protocol)) {
        chain.push(protocol);
      }
    }
    for protocol in chain {
      if protocol.can_intercept(&request) {
        tracing::debug!("{} {} claimed by protocol", request.method(), request.uri());
        return protocol.start_loading(request);
      }
    }
    tracing::debug!("{} {} goes to the transport", request.method(), request.uri());
    self.transport.issue(request)
  }
  /// Run an exchange to the end and return the response with its body.
  pub async fn send(&self, request: Request) -> Result<Response> {
    self.data_task(request).collect().await
  }
}
