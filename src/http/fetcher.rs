//! Swappable handle that application code fetches through.

use color_eyre::Result;
use std::sync::{Arc, RwLock};

use super::request::Request;
use super::transport::Transport;
use crate::cache::ResponseSnapshot;

/// The application's fetch entry point.
///
/// Holds the transport currently in effect. An interceptor swaps itself in on install and
/// puts the previous transport back on uninstall.
pub struct Fetcher {
  current: RwLock<Arc<dyn Transport>>,
}

impl Fetcher {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self {
      current: RwLock::new(transport),
    }
  }

  /// Transport currently in effect.
  pub fn current(&self) -> Arc<dyn Transport> {
    Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
  }

  /// Swap in a new transport and return the previous one.
  pub fn replace(&self, transport: Arc<dyn Transport>) -> Arc<dyn Transport> {
    let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
    std::mem::replace(&mut *current, transport)
  }

  pub async fn fetch(&self, request: &Request) -> Result<ResponseSnapshot> {
    let transport = self.current();
    transport.send(request).await
  }
}
