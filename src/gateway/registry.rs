use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::sync::Arc;

use super::{EntityService, NetworkGateway, TypedCollection};
use crate::http::Transport;
use crate::mirror::LocalMirrorStore;
use crate::model::{Entity, EntityKind};
use crate::monitor::Connectivity;
use crate::storage::CacheStorage;

/// Maps each collection to the service that handles it.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
  services: HashMap<EntityKind, Arc<dyn EntityService>>,
}

impl ServiceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A [`NetworkGateway`] for every collection, all sharing one transport and mirror.
  pub fn with_gateways(
    transport: Arc<dyn Transport>,
    mirror: LocalMirrorStore,
    connectivity: Connectivity,
    caches: Arc<dyn CacheStorage>,
    api_cache: &str,
  ) -> Self {
    let mut registry = Self::new();
    for kind in EntityKind::ALL {
      registry.register(Arc::new(NetworkGateway::new(
        kind,
        transport.clone(),
        mirror.clone(),
        connectivity.clone(),
        caches.clone(),
        api_cache,
      )));
    }
    registry
  }

  /// Register `service` for its kind, replacing any earlier one.
  pub fn register(&mut self, service: Arc<dyn EntityService>) {
    self.services.insert(service.kind(), service);
  }

  pub fn get(&self, kind: EntityKind) -> Result<Arc<dyn EntityService>> {
    self
      .services
      .get(&kind)
      .cloned()
      .ok_or_else(|| eyre!("No service registered for {}", kind))
  }

  pub fn collection<T: Entity>(&self) -> Result<TypedCollection<T>> {
    Ok(TypedCollection::new(self.get(T::KIND)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::{DataSource, SyncResult};
  use crate::model::{ListFilter, Record};
  use async_trait::async_trait;

  struct Fixed(EntityKind);

  #[async_trait]
  impl EntityService for Fixed {
    fn kind(&self) -> EntityKind {
      self.0
    }

    async fn list(&self, _filter: &ListFilter) -> Result<SyncResult<Vec<Record>>> {
      Ok(SyncResult::new(Vec::new(), DataSource::Network))
    }

    async fn create(&self, fields: Record) -> Result<SyncResult<Record>> {
      Ok(SyncResult::new(fields, DataSource::Network))
    }

    async fn update(&self, _id: &str, patch: Record) -> Result<SyncResult<Record>> {
      Ok(SyncResult::new(patch, DataSource::Network))
    }

    async fn delete(&self, _id: &str) -> Result<SyncResult<()>> {
      Ok(SyncResult::new((), DataSource::Network))
    }
  }

  #[test]
  fn test_lookup_by_kind() {
    let mut registry = ServiceRegistry::new();
    registry.register(Arc::new(Fixed(EntityKind::Goals)));

    assert_eq!(registry.get(EntityKind::Goals).unwrap().kind(), EntityKind::Goals);
    assert!(registry.get(EntityKind::Tasks).is_err());
  }

  #[test]
  fn test_with_gateways_covers_every_kind() {
    use crate::http::testing::FakeTransport;
    use crate::storage::{MemoryCacheStorage, MemoryKvStore};

    let registry = ServiceRegistry::with_gateways(
      Arc::new(FakeTransport::online()),
      LocalMirrorStore::new(Arc::new(MemoryKvStore::new()), "lifesync"),
      Connectivity::new(true),
      Arc::new(MemoryCacheStorage::new()),
      "lifesync-api-v1",
    );

    for kind in EntityKind::ALL {
      assert_eq!(registry.get(kind).unwrap().kind(), kind);
    }
  }
}
