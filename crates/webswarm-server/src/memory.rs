//! In-process connector that binds signal clients straight to a [`SignalHub`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use webswarm_core::{Result, WebswarmError};
use webswarm_signal::{Connector, Link};

use crate::hub::SignalHub;

/// Maps signaling URLs to hubs living in the same process.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    hubs: Arc<Mutex<HashMap<String, Arc<SignalHub>>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connector serving one hub under `url`.
    pub fn single(url: impl Into<String>, hub: Arc<SignalHub>) -> Self {
        let connector = Self::new();
        connector.register(url, hub);
        connector
    }

    pub fn register(&self, url: impl Into<String>, hub: Arc<SignalHub>) {
        self.hubs.lock().insert(url.into(), hub);
    }

    /// Stop serving `url`. Existing links stay up.
    pub fn unregister(&self, url: &str) -> Option<Arc<SignalHub>> {
        self.hubs.lock().remove(url)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link> {
        let hub = self
            .hubs
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| WebswarmError::Transport(format!("no signal hub at {url}")))?;
        let (client, service) = Link::pair();
        hub.attach(service);
        Ok(client)
    }
}
