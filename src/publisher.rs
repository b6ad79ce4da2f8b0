use std::sync::Arc;

use tokio::sync::mpsc;

use crate::record::ExchangeRecord;
use crate::store::CaptureStore;

/// Hands finished records to a [`CaptureStore`] off the transport path.
///
/// Records are queued without blocking and added by a single background task,
/// in the order they were published.
#[derive(Debug, Clone)]
pub struct Publisher {
  tx: mpsc::UnboundedSender<ExchangeRecord>,
}

impl Publisher {
  /// Start the task feeding `store`. Must be called within a tokio runtime.
  ///
  /// The task ends once every clone of the publisher is dropped.
  pub fn spawn(store: Arc<CaptureStore>) -> Publisher {
    let (tx, mut rx) = mpsc::unbounded_channel::<ExchangeRecord>();
    tokio::spawn(async move {
      while let Some(record) = rx.recv().await {
        store.add(record);
      }
      tracing::debug!("publisher stopped");
    });
    Publisher { tx }
  }
  /// Queue `record` for the store. Returns `false` if the task is gone.
  pub fn publish(&self, record: ExchangeRecord) -> bool {
    let identity = record.identity();
    if self.tx.send(record).is_err() {
      tracing::warn!("record {} dropped, publisher stopped", identity);
      return false;
    }
    true
  }
}
