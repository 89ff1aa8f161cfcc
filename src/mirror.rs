//! Local mirror of the service's collections, used while offline.
//!
//! Each collection is one serialized JSON array under a namespaced key;
//! the Streak singleton is one JSON object under its own key. Every
//! operation reads the whole collection, changes it in memory and writes it
//! back. Nothing here is atomic and nothing is indexed.

use color_eyre::Result;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{EntityKind, ListFilter, Record, STREAK_ID};
use crate::storage::KeyValueStore;

/// Errors callers of the mirror are expected to handle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MirrorError {
  #[error("{kind} record '{id}' not found in local store")]
  NotFound { kind: EntityKind, id: String },
}

#[derive(Clone)]
pub struct LocalMirrorStore {
  store: Arc<dyn KeyValueStore>,
  namespace: String,
}

impl LocalMirrorStore {
  pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
    Self {
      store,
      namespace: namespace.into(),
    }
  }

  /// Key the collection of `kind` lives under.
  pub fn storage_key(&self, kind: EntityKind) -> String {
    format!("{}_{}", self.namespace, kind.storage_name())
  }

  /// Load a collection. Missing or unparsable data reads as empty.
  fn read(&self, kind: EntityKind) -> Result<Vec<Record>> {
    let key = self.storage_key(kind);
    let Some(raw) = self.store.get(&key)? else {
      return Ok(Vec::new());
    };

    let parsed = if kind.is_singleton() {
      serde_json::from_str::<Record>(&raw).map(|record| vec![record])
    } else {
      serde_json::from_str::<Vec<Record>>(&raw)
    };

    match parsed {
      Ok(records) => Ok(records),
      Err(e) => {
        warn!(%key, "discarding unreadable local collection: {e}");
        Ok(Vec::new())
      }
    }
  }

  fn write(&self, kind: EntityKind, records: &[Record]) -> Result<()> {
    let key = self.storage_key(kind);
    let raw = if kind.is_singleton() {
      match records.first() {
        Some(record) => serde_json::to_string(record)?,
        None => return self.store.remove(&key),
      }
    } else {
      serde_json::to_string(records)?
    };
    self.store.set(&key, &raw)
  }

  pub fn list(&self, kind: EntityKind, filter: &ListFilter) -> Result<Vec<Record>> {
    let mut records = self.read(kind)?;
    records.retain(|record| filter.matches(record));
    Ok(records)
  }

  pub fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Record>> {
    Ok(self.read(kind)?.into_iter().find(|r| record_id(r) == Some(id)))
  }

  /// Insert a record under a fresh local id.
  ///
  /// Date-keyed collections go through [`Self::upsert_by_date`] and the
  /// Streak replaces the singleton.
  pub fn create(&self, kind: EntityKind, fields: Record) -> Result<Record> {
    if kind.is_singleton() {
      return self.set_streak(fields);
    }
    if kind.is_date_keyed() && fields.get("date").is_some_and(Value::is_string) {
      return self.upsert_by_date(kind, fields);
    }

    let mut records = self.read(kind)?;
    let record = with_id(fields, generate_id(&records));
    records.push(record.clone());
    self.write(kind, &records)?;

    debug!(%kind, id = record_id(&record), "created local record");
    Ok(record)
  }

  /// Create-or-update keyed by the record's `date`.
  pub fn upsert_by_date(&self, kind: EntityKind, fields: Record) -> Result<Record> {
    let mut records = self.read(kind)?;
    let date = fields.get("date").cloned();

    let existing = date.as_ref().and_then(|date| {
      records
        .iter()
        .position(|record| record.get("date") == Some(date))
    });

    let record = match existing {
      Some(index) => {
        merge(&mut records[index], fields);
        records[index].clone()
      }
      None => {
        let record = with_id(fields, generate_id(&records));
        records.push(record.clone());
        record
      }
    };

    self.write(kind, &records)?;
    Ok(record)
  }

  /// Merge `patch` into the record with `id`.
  ///
  /// Fails with [`MirrorError::NotFound`] when there is no such record.
  pub fn update(&self, kind: EntityKind, id: &str, patch: Record) -> Result<Record> {
    if kind.is_singleton() {
      let mut streak = self.streak()?.unwrap_or_default();
      merge(&mut streak, patch);
      return self.set_streak(streak);
    }

    let mut records = self.read(kind)?;
    let Some(record) = records.iter_mut().find(|r| record_id(r) == Some(id)) else {
      return Err(
        MirrorError::NotFound {
          kind,
          id: id.to_string(),
        }
        .into(),
      );
    };

    merge(record, patch);
    let updated = record.clone();
    self.write(kind, &records)?;
    Ok(updated)
  }

  /// Remove the record with `id`. Returns whether anything was removed.
  pub fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
    let mut records = self.read(kind)?;
    let before = records.len();
    records.retain(|r| record_id(r) != Some(id));

    if records.len() == before {
      return Ok(false);
    }
    self.write(kind, &records)?;
    Ok(true)
  }

  pub fn streak(&self) -> Result<Option<Record>> {
    Ok(self.read(EntityKind::Streak)?.into_iter().next())
  }

  /// Replace the Streak singleton. Its id is always `"default"`.
  pub fn set_streak(&self, fields: Record) -> Result<Record> {
    let record = with_id(fields, STREAK_ID.to_string());
    self.write(EntityKind::Streak, std::slice::from_ref(&record))?;
    Ok(record)
  }

  /// Forget the local copy of one collection. Returns how many records it held.
  pub fn clear(&self, kind: EntityKind) -> Result<usize> {
    let dropped = self.read(kind)?.len();
    self.store.remove(&self.storage_key(kind))?;
    debug!(%kind, dropped, "cleared local collection");
    Ok(dropped)
  }

  /// Number of records per collection.
  pub fn counts(&self) -> Result<Vec<(EntityKind, usize)>> {
    EntityKind::ALL
      .into_iter()
      .map(|kind| Ok((kind, self.read(kind)?.len())))
      .collect()
  }
}

pub fn record_id(record: &Record) -> Option<&str> {
  record.get("id").and_then(Value::as_str)
}

fn with_id(mut fields: Record, id: String) -> Record {
  fields.insert("id".to_string(), Value::String(id));
  fields
}

/// Last write wins, field by field. The id never changes.
fn merge(target: &mut Record, patch: Record) {
  for (key, value) in patch {
    if key != "id" {
      target.insert(key, value);
    }
  }
}

/// Local id: unix millis plus a random suffix, unique within `existing`.
fn generate_id(existing: &[Record]) -> String {
  let mut rng = rand::thread_rng();
  loop {
    let suffix: String = (&mut rng)
      .sample_iter(&Alphanumeric)
      .take(9)
      .map(|c| char::from(c).to_ascii_lowercase())
      .collect();
    let id = format!("{}-{}", chrono::Utc::now().timestamp_millis(), suffix);
    if !existing.iter().any(|r| record_id(r) == Some(id.as_str())) {
      return id;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::storage::MemoryKvStore;
  use serde_json::json;
  use std::collections::HashSet;

  fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
  }

  fn mirror() -> (Arc<MemoryKvStore>, LocalMirrorStore) {
    let kv = Arc::new(MemoryKvStore::new());
    let mirror = LocalMirrorStore::new(kv.clone(), "lifesync");
    (kv, mirror)
  }

  #[test]
  fn test_created_records_get_fresh_ids() {
    let (_, mirror) = mirror();
    let mut ids = HashSet::new();

    for n in 0..50 {
      let created = mirror
        .create(
          EntityKind::Tasks,
          record(json!({"title": format!("task {n}"), "date": "2024-05-01"})),
        )
        .unwrap();
      let id = record_id(&created).unwrap().to_string();

      let listed = mirror
        .list(EntityKind::Tasks, &ListFilter::default())
        .unwrap();
      assert!(listed.iter().any(|r| record_id(r) == Some(id.as_str())));
      assert!(ids.insert(id));
    }
  }

  #[test]
  fn test_create_replaces_caller_id() {
    let (_, mirror) = mirror();
    let created = mirror
      .create(EntityKind::Goals, record(json!({"id": "server-id", "title": "Run"})))
      .unwrap();
    assert_ne!(record_id(&created), Some("server-id"));
  }

  #[test]
  fn test_list_filters_by_date() {
    let (_, mirror) = mirror();
    mirror
      .create(EntityKind::Tasks, record(json!({"title": "a", "date": "2024-05-01"})))
      .unwrap();
    mirror
      .create(EntityKind::Tasks, record(json!({"title": "b", "date": "2024-05-02"})))
      .unwrap();

    let listed = mirror
      .list(EntityKind::Tasks, &ListFilter::by_date("2024-05-02"))
      .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["title"], "b");
  }

  #[test]
  fn test_water_intake_is_one_record_per_date() {
    let (_, mirror) = mirror();
    let first = mirror
      .create(
        EntityKind::WaterIntake,
        record(json!({"date": "2024-05-01", "amount": 500, "goal": 2000})),
      )
      .unwrap();
    let second = mirror
      .create(
        EntityKind::WaterIntake,
        record(json!({"date": "2024-05-01", "amount": 750})),
      )
      .unwrap();

    assert_eq!(record_id(&first), record_id(&second));
    let listed = mirror
      .list(EntityKind::WaterIntake, &ListFilter::by_date("2024-05-01"))
      .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["amount"], 750);
    assert_eq!(listed[0]["goal"], 2000);
  }

  #[test]
  fn test_performance_upsert_inserts_new_dates() {
    let (_, mirror) = mirror();
    mirror
      .upsert_by_date(EntityKind::Performance, record(json!({"date": "2024-05-01", "score": 3})))
      .unwrap();
    mirror
      .upsert_by_date(EntityKind::Performance, record(json!({"date": "2024-05-02", "score": 4})))
      .unwrap();

    let all = mirror
      .list(EntityKind::Performance, &ListFilter::default())
      .unwrap();
    assert_eq!(all.len(), 2);
  }

  #[test]
  fn test_update_merges_fields() {
    let (_, mirror) = mirror();
    let created = mirror
      .create(
        EntityKind::Tasks,
        record(json!({"title": "Stretch", "completed": false, "date": "2024-05-01"})),
      )
      .unwrap();
    let id = record_id(&created).unwrap().to_string();

    let updated = mirror
      .update(EntityKind::Tasks, &id, record(json!({"completed": true, "id": "other"})))
      .unwrap();
    assert_eq!(updated["completed"], true);
    assert_eq!(updated["title"], "Stretch");
    assert_eq!(record_id(&updated), Some(id.as_str()));
    assert_eq!(mirror.get(EntityKind::Tasks, &id).unwrap(), Some(updated));
  }

  #[test]
  fn test_update_missing_record_is_not_found() {
    let (_, mirror) = mirror();
    let err = mirror
      .update(EntityKind::Tasks, "nope", record(json!({"completed": true})))
      .unwrap_err();

    assert_eq!(
      err.downcast_ref::<MirrorError>(),
      Some(&MirrorError::NotFound {
        kind: EntityKind::Tasks,
        id: "nope".to_string()
      })
    );
  }

  #[test]
  fn test_delete_is_idempotent() {
    let (_, mirror) = mirror();
    let created = mirror
      .create(EntityKind::Exercises, record(json!({"name": "Squat"})))
      .unwrap();
    let id = record_id(&created).unwrap().to_string();

    assert!(mirror.delete(EntityKind::Exercises, &id).unwrap());
    assert!(!mirror.delete(EntityKind::Exercises, &id).unwrap());
    assert!(mirror.get(EntityKind::Exercises, &id).unwrap().is_none());
  }

  #[test]
  fn test_clear_only_touches_one_collection() {
    let (kv, mirror) = mirror();
    mirror
      .create(EntityKind::Goals, record(json!({"title": "Read"})))
      .unwrap();
    mirror
      .create(EntityKind::Goals, record(json!({"title": "Run"})))
      .unwrap();
    mirror
      .create(EntityKind::Tasks, record(json!({"title": "Walk"})))
      .unwrap();

    assert_eq!(mirror.clear(EntityKind::Goals).unwrap(), 2);
    assert!(kv.get(&mirror.storage_key(EntityKind::Goals)).unwrap().is_none());
    assert_eq!(
      mirror.list(EntityKind::Tasks, &ListFilter::default()).unwrap().len(),
      1
    );
    assert_eq!(mirror.clear(EntityKind::Goals).unwrap(), 0);
  }

  #[test]
  fn test_corrupt_collection_reads_as_empty() {
    let (kv, mirror) = mirror();
    kv.set(&mirror.storage_key(EntityKind::Goals), "{not json").unwrap();

    assert!(mirror
      .list(EntityKind::Goals, &ListFilter::default())
      .unwrap()
      .is_empty());

    // The next write replaces the corrupt value.
    mirror
      .create(EntityKind::Goals, record(json!({"title": "Read"})))
      .unwrap();
    assert_eq!(
      mirror
        .list(EntityKind::Goals, &ListFilter::default())
        .unwrap()
        .len(),
      1
    );
  }

  #[test]
  fn test_streak_is_a_singleton() {
    let (kv, mirror) = mirror();
    assert!(mirror.streak().unwrap().is_none());

    mirror
      .create(EntityKind::Streak, record(json!({"currentStreak": 1})))
      .unwrap();
    mirror
      .create(EntityKind::Streak, record(json!({"currentStreak": 2})))
      .unwrap();
    let updated = mirror
      .update(EntityKind::Streak, STREAK_ID, record(json!({"longestStreak": 5})))
      .unwrap();

    assert_eq!(record_id(&updated), Some(STREAK_ID));
    assert_eq!(updated["currentStreak"], 2);
    assert_eq!(updated["longestStreak"], 5);
    assert_eq!(
      mirror
        .list(EntityKind::Streak, &ListFilter::default())
        .unwrap()
        .len(),
      1
    );
    assert!(kv.get("lifesync_streak").unwrap().unwrap().starts_with('{'));

    assert!(mirror.delete(EntityKind::Streak, STREAK_ID).unwrap());
    assert!(kv.get("lifesync_streak").unwrap().is_none());
  }

  #[test]
  fn test_collections_use_namespaced_keys() {
    let (kv, mirror) = mirror();
    mirror
      .create(EntityKind::RoutineItems, record(json!({"name": "Toner"})))
      .unwrap();

    assert_eq!(kv.keys().unwrap(), vec!["lifesync_routine_items"]);
    let counts = mirror.counts().unwrap();
    assert!(counts.contains(&(EntityKind::RoutineItems, 1)));
    assert!(counts.contains(&(EntityKind::Tasks, 0)));
  }
}
