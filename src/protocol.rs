use std::sync::{Arc, PoisonError, RwLock};

use crate::transport::DataTask;
use crate::Request;

/// A handler that can take over requests before they reach the transport.
pub trait Protocol: Send + Sync {
  /// Whether this protocol wants `request`.
  ///
  /// Called before every claim decision; must not have side effects.
  fn can_intercept(&self, request: &Request) -> bool;
  /// Load a request this protocol claimed.
  fn start_loading(&self, request: Request) -> DataTask;
}

/// A protocol shared between the registry, configurations and sessions.
pub type SharedProtocol = Arc<dyn Protocol>;

/// Whether `a` and `b` are the same protocol instance.
pub fn same_protocol(a: &SharedProtocol, b: &SharedProtocol) -> bool {
  std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Protocols consulted by every session, after its configuration's own.
#[derive(Default)]
pub struct ProtocolRegistry {
  protocols: RwLock<Vec<SharedProtocol>>,
}

impl std::fmt::Debug for ProtocolRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProtocolRegistry")
      .field("len", &self.protocols().len())
      .finish()
  }
}

impl ProtocolRegistry {
  /// Register `protocol`. Registering the same instance twice is a no-op.
  ///
  /// Returns whether the protocol was added.
  pub fn register(&self, protocol: SharedProtocol) -> bool {
    let mut protocols = self.protocols.write().unwrap_or_else(PoisonError::into_inner);
    if protocols.iter().any(|p| same_protocol(p, &protocol)) {
      return false;
    }
    protocols.push(protocol);
    true
  }
  /// Remove `protocol`. Returns whether it was registered.
  pub fn unregister(&self, protocol: &SharedProtocol) -> bool {
    let mut protocols = self.protocols.write().unwrap_or_else(PoisonError::into_inner);
    let before = protocols.len();
    protocols.retain(|p| !same_protocol(p, protocol));
    protocols.len() != before
  }
  /// Whether `protocol` is registered.
  pub fn contains(&self, protocol: &SharedProtocol) -> bool {
    self.protocols().iter().any(|p| same_protocol(p, protocol))
  }
  /// The registered protocols, in registration order.
  pub fn protocols(&self) -> Vec<SharedProtocol> {
    self
      .protocols
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}
