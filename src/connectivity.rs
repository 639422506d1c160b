//! Online/offline signal shared by the transport, interceptor and retry queue.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Boolean connectivity flag with change notifications.
///
/// Subscribers are woken only on transitions, never when the same state is reported again.
#[derive(Clone, Debug)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Report the current state. Returns true if this was a transition.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      info!(online, "Connectivity changed");
    }
    changed
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

impl Default for Connectivity {
  fn default() -> Self {
    Self::new(true)
  }
}
