// Registry of active tunnels, keyed by UUID.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GuacError, Result};
use crate::tunnel::GuacamoleTunnel;

/// Shared map from tunnel UUID to live tunnel. Transport adapters register
/// a tunnel at connect time and resolve it on every subsequent read/write
/// request.
#[derive(Default)]
pub struct TunnelRegistry {
    tunnels: DashMap<Uuid, Arc<GuacamoleTunnel>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tunnel under its own UUID.
    pub fn register(&self, tunnel: Arc<GuacamoleTunnel>) {
        let uuid = tunnel.uuid();
        self.tunnels.insert(uuid, tunnel);
        debug!(tunnel = %uuid, active = self.tunnels.len(), "registered tunnel");
    }

    /// Looks a tunnel up by UUID, failing with `ResourceNotFound` for UUIDs
    /// that are unknown or already removed.
    pub fn get(&self, uuid: &Uuid) -> Result<Arc<GuacamoleTunnel>> {
        self.tunnels
            .get(uuid)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| GuacError::ResourceNotFound(uuid.to_string()))
    }

    /// Removes and returns a tunnel. Removing an absent UUID is a no-op.
    pub fn remove(&self, uuid: &Uuid) -> Option<Arc<GuacamoleTunnel>> {
        let removed = self.tunnels.remove(uuid).map(|(_, tunnel)| tunnel);
        if removed.is_some() {
            debug!(tunnel = %uuid, active = self.tunnels.len(), "removed tunnel");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::GuacamoleSocket;

    fn make_tunnel() -> Arc<GuacamoleTunnel> {
        let (stream, _peer) = tokio::io::duplex(64);
        Arc::new(GuacamoleTunnel::new(GuacamoleSocket::new(stream)))
    }

    #[tokio::test]
    async fn test_register_get_remove() {
        let registry = TunnelRegistry::new();
        let tunnel = make_tunnel();
        let uuid = tunnel.uuid();

        registry.register(Arc::clone(&tunnel));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&uuid).unwrap().uuid(), uuid);

        assert!(registry.remove(&uuid).is_some());
        assert!(registry.remove(&uuid).is_none());
        assert!(matches!(
            registry.get(&uuid),
            Err(GuacError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_uuid_is_not_found() {
        let registry = TunnelRegistry::new();
        assert!(matches!(
            registry.get(&Uuid::new_v4()),
            Err(GuacError::ResourceNotFound(_))
        ));
    }
}
