use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::record::ExchangeRecord;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A change to a [`CaptureStore`].
///
/// Subscribers that lag behind may miss events; re-reading the
/// [`snapshot`](CaptureStore::snapshot) is always enough to catch up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
  /// A record with this identity was appended.
  Added(Uuid),
  /// The store was emptied.
  Cleared,
}

#[derive(Debug, Default)]
struct Inner {
  records: Vec<Arc<ExchangeRecord>>,
  identities: HashSet<Uuid>,
}

/// The in-memory collection of finished exchanges.
///
/// Records are kept in the order they were added and no two share an
/// identity. Every successful [`add`](CaptureStore::add) and every
/// [`clear`](CaptureStore::clear) is announced to subscribers once the change
/// is visible to readers.
#[derive(Debug)]
pub struct CaptureStore {
  inner: RwLock<Inner>,
  notify: broadcast::Sender<StoreEvent>,
}

impl Default for CaptureStore {
  fn default() -> Self {
    CaptureStore::with_capacity(DEFAULT_CHANNEL_CAPACITY)
  }
}

impl CaptureStore {
  /// An empty store.
  pub fn new() -> Self {
    Self::default()
  }
  /// An empty store whose change channel buffers `capacity` events per
  /// subscriber.
  pub fn with_capacity(capacity: usize) -> Self {
    let (notify, _) = broadcast::channel(capacity.max(1));
    CaptureStore {
      inner: RwLock::new(Inner::default()),
      notify,
    }
  }
  /// Append `record` unless one with the same identity is already stored.
  ///
  /// Returns whether the record was inserted.
  pub fn add(&self, record: ExchangeRecord) -> bool {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    let identity = record.identity();
    if !inner.identities.insert(identity) {
      tracing::debug!("record {} already stored", identity);
      return false;
    }
    inner.records.push(Arc::new(record));
    tracing::debug!("record {} stored, {} total", identity, inner.records.len());
    let _ = self.notify.send(StoreEvent::Added(identity));
    true
  }
  /// Remove every record and forget every identity.
  pub fn clear(&self) {
    let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
    inner.records.clear();
    inner.identities.clear();
    tracing::debug!("store cleared");
    let _ = self.notify.send(StoreEvent::Cleared);
  }
  /// The records in insertion order.
  pub fn snapshot(&self) -> Vec<Arc<ExchangeRecord>> {
    self.read(|inner| inner.records.clone())
  }
  /// Receive a [`StoreEvent`] for every later change.
  pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
    self.notify.subscribe()
  }
  /// Number of stored records.
  pub fn len(&self) -> usize {
    self.read(|inner| inner.records.len())
  }
  /// Whether the store holds no record.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
  /// The record with `identity`, if stored.
  pub fn get(&self, identity: Uuid) -> Option<Arc<ExchangeRecord>> {
    self.read(|inner| {
      inner
        .records
        .iter()
        .find(|r| r.identity() == identity)
        .cloned()
    })
  }
  /// The most recently added record.
  pub fn latest(&self) -> Option<Arc<ExchangeRecord>> {
    self.read(|inner| inner.records.last().cloned())
  }
  fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
    let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
    f(&inner)
  }
}
