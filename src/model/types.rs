//! Typed views of the mirrored records.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::kind::EntityKind;

/// A record type stored in exactly one collection.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned {
  const KIND: EntityKind;

  /// Empty until the record has been persisted somewhere.
  fn id(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub completed: bool,
  pub date: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub priority: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterIntake {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  pub date: String,
  /// Millilitres drunk on `date`
  pub amount: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub goal: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exercise {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub exercise_type: String,
  pub date: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sets: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reps: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub weight: Option<f64>,
  #[serde(default)]
  pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindActivity {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(rename = "type")]
  pub activity_type: String,
  pub date: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub duration: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
  #[serde(default)]
  pub completed: bool,
}

/// One step of a morning or evening skincare routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineItem {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  pub name: String,
  #[serde(rename = "type")]
  pub routine_type: String,
  pub date: String,
  #[serde(default)]
  pub completed: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub order: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub is_weekly: bool,
  #[serde(default)]
  pub completed: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub progress: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  pub date: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub score: Option<f64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tasks_completed: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub id: String,
  #[serde(default)]
  pub current_streak: u32,
  #[serde(default)]
  pub longest_streak: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_updated: Option<String>,
}

macro_rules! impl_entity {
  ($($ty:ty => $kind:expr),* $(,)?) => {
    $(
      impl Entity for $ty {
        const KIND: EntityKind = $kind;

        fn id(&self) -> &str {
          &self.id
        }
      }
    )*
  };
}

impl_entity! {
  Task => EntityKind::Tasks,
  WaterIntake => EntityKind::WaterIntake,
  Exercise => EntityKind::Exercises,
  MindActivity => EntityKind::MindActivities,
  RoutineItem => EntityKind::RoutineItems,
  Goal => EntityKind::Goals,
  Performance => EntityKind::Performance,
  Streak => EntityKind::Streak,
}
