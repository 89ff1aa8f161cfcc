use color_eyre::{eyre::eyre, Result};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::warn;

use super::{DataSource, EntityService, SyncResult};
use crate::model::{Entity, ListFilter, Record};

/// Typed access to one collection.
///
/// Creates answer `None` when the worker only queued them.
pub struct TypedCollection<T> {
  service: Arc<dyn EntityService>,
  _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> TypedCollection<T> {
  pub fn new(service: Arc<dyn EntityService>) -> Self {
    Self {
      service,
      _marker: PhantomData,
    }
  }

  /// Records that do not fit `T` are skipped.
  pub async fn list(&self, filter: &ListFilter) -> Result<SyncResult<Vec<T>>> {
    let kind = T::KIND;
    let result = self.service.list(filter).await?;
    Ok(result.map(|records| {
      records
        .into_iter()
        .filter_map(|record| match serde_json::from_value(record.into()) {
          Ok(entity) => Some(entity),
          Err(e) => {
            warn!(%kind, "skipping malformed record: {e}");
            None
          }
        })
        .collect()
    }))
  }

  pub async fn create(&self, entity: &T) -> Result<SyncResult<Option<T>>> {
    let result = self.service.create(to_record(entity)?).await?;
    from_write(result)
  }
}

fn to_record<T: Entity>(entity: &T) -> Result<Record> {
  match serde_json::to_value(entity)? {
    serde_json::Value::Object(record) => Ok(record),
    other => Err(eyre!("{} did not serialize to an object: {}", T::KIND, other)),
  }
}

fn from_write<T: Entity>(result: SyncResult<Record>) -> Result<SyncResult<Option<T>>> {
  if result.source == DataSource::Queued {
    return Ok(SyncResult::new(None, DataSource::Queued));
  }
  let source = result.source;
  let entity = serde_json::from_value(result.data.into())
    .map_err(|e| eyre!("Failed to parse {} record: {}", T::KIND, e))?;
  Ok(SyncResult::new(Some(entity), source))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gateway::NetworkGateway;
  use crate::http::testing::FakeTransport;
  use crate::http::{HttpResponse, Method, SERVED_BY_HEADER};
  use crate::mirror::LocalMirrorStore;
  use crate::model::{EntityKind, Task, WaterIntake};
  use crate::monitor::Connectivity;
  use crate::storage::{MemoryCacheStorage, MemoryKvStore};
  use serde_json::json;

  fn service(kind: EntityKind, network: Arc<FakeTransport>, online: bool) -> Arc<dyn EntityService> {
    Arc::new(NetworkGateway::new(
      kind,
      network,
      LocalMirrorStore::new(Arc::new(MemoryKvStore::new()), "lifesync"),
      Connectivity::new(online),
      Arc::new(MemoryCacheStorage::new()),
      "lifesync-api-v1",
    ))
  }

  #[tokio::test]
  async fn test_offline_water_intake_upserts_by_date() {
    let network = Arc::new(FakeTransport::offline());
    let water: TypedCollection<WaterIntake> =
      TypedCollection::new(service(EntityKind::WaterIntake, network, false));

    for amount in [250, 500] {
      water
        .create(&WaterIntake {
          id: String::new(),
          date: "2024-05-01".into(),
          amount,
          goal: Some(2000),
        })
        .await
        .unwrap();
    }

    let listed = water
      .list(&ListFilter::by_date("2024-05-01"))
      .await
      .unwrap();
    assert_eq!(listed.source, DataSource::LocalMirror);
    assert_eq!(listed.data.len(), 1);
    assert_eq!(listed.data[0].amount, 500);
    assert!(!listed.data[0].id.is_empty());
  }

  #[tokio::test]
  async fn test_list_skips_malformed_records() {
    let network = Arc::new(FakeTransport::online());
    network.route(
      Method::Get,
      "/api/tasks",
      HttpResponse::json(
        200,
        &json!([
          {"id": "a1", "title": "Stretch", "date": "2024-05-01"},
          {"id": "a2"}
        ]),
      ),
    );
    let tasks: TypedCollection<Task> =
      TypedCollection::new(service(EntityKind::Tasks, network, true));

    let listed = tasks.list(&ListFilter::default()).await.unwrap();
    assert_eq!(listed.data.len(), 1);
    assert_eq!(listed.data[0].title, "Stretch");
  }

  #[tokio::test]
  async fn test_queued_create_has_no_entity() {
    let network = Arc::new(FakeTransport::online());
    network.push_outcome(Ok(
      HttpResponse::json(202, &json!({"offline": true, "queued": true}))
        .with_header(SERVED_BY_HEADER, "queue"),
    ));
    let tasks: TypedCollection<Task> =
      TypedCollection::new(service(EntityKind::Tasks, network, true));

    let result = tasks
      .create(&Task {
        id: String::new(),
        title: "Walk".into(),
        completed: false,
        date: "2024-05-01".into(),
        priority: None,
        category: None,
      })
      .await
      .unwrap();

    assert_eq!(result, SyncResult::new(None, DataSource::Queued));
  }
}
