//! Entity collections mirrored between the service and the local store.

use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A JSON object as exchanged with the service.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Id of the single Streak record.
pub const STREAK_ID: &str = "default";

/// Collection an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
  Tasks,
  WaterIntake,
  Exercises,
  MindActivities,
  RoutineItems,
  Goals,
  Performance,
  Streak,
}

impl EntityKind {
  pub const ALL: [EntityKind; 8] = [
    EntityKind::Tasks,
    EntityKind::WaterIntake,
    EntityKind::Exercises,
    EntityKind::MindActivities,
    EntityKind::RoutineItems,
    EntityKind::Goals,
    EntityKind::Performance,
    EntityKind::Streak,
  ];

  /// REST collection path on the service.
  pub fn api_path(self) -> &'static str {
    match self {
      Self::Tasks => "/api/tasks",
      Self::WaterIntake => "/api/water-intake",
      Self::Exercises => "/api/exercises",
      Self::MindActivities => "/api/mind-activities",
      Self::RoutineItems => "/api/routine-items",
      Self::Goals => "/api/goals",
      Self::Performance => "/api/performance",
      Self::Streak => "/api/streak",
    }
  }

  /// Path of a single record. The singleton Streak has no id segment.
  pub fn item_path(self, id: &str) -> String {
    if self.is_singleton() {
      self.api_path().to_string()
    } else {
      format!("{}/{}", self.api_path(), id)
    }
  }

  /// Name used for the collection's key in the local store.
  pub fn storage_name(self) -> &'static str {
    match self {
      Self::Tasks => "tasks",
      Self::WaterIntake => "water_intake",
      Self::Exercises => "exercises",
      Self::MindActivities => "mind_activities",
      Self::RoutineItems => "routine_items",
      Self::Goals => "goals",
      Self::Performance => "performance",
      Self::Streak => "streak",
    }
  }

  /// Collections holding at most one record per `date`.
  pub fn is_date_keyed(self) -> bool {
    matches!(self, Self::WaterIntake | Self::Performance)
  }

  pub fn is_singleton(self) -> bool {
    matches!(self, Self::Streak)
  }

  /// Short tag used on the command line.
  pub fn tag(self) -> &'static str {
    match self {
      Self::Tasks => "tasks",
      Self::WaterIntake => "water-intake",
      Self::Exercises => "exercises",
      Self::MindActivities => "mind-activities",
      Self::RoutineItems => "routine-items",
      Self::Goals => "goals",
      Self::Performance => "performance",
      Self::Streak => "streak",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.tag())
  }
}

impl FromStr for EntityKind {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized = s.trim().to_lowercase().replace('_', "-");
    Self::ALL
      .into_iter()
      .find(|kind| kind.tag() == normalized || kind.storage_name() == s.trim())
      .ok_or_else(|| eyre!("Unknown collection '{}'", s))
  }
}

/// Filters accepted by the list endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
  pub date: Option<String>,
  pub entity_type: Option<String>,
  pub is_weekly: Option<bool>,
}

impl ListFilter {
  pub fn by_date(date: impl Into<String>) -> Self {
    Self {
      date: Some(date.into()),
      ..Self::default()
    }
  }

  /// Query string (with leading `?`) for the network path.
  pub fn query_string(&self) -> String {
    let mut pairs = url::form_urlencoded::Serializer::new(String::new());
    if let Some(date) = &self.date {
      pairs.append_pair("date", date);
    }
    if let Some(entity_type) = &self.entity_type {
      pairs.append_pair("type", entity_type);
    }
    if let Some(is_weekly) = self.is_weekly {
      pairs.append_pair("isWeekly", if is_weekly { "true" } else { "false" });
    }
    let query = pairs.finish();
    if query.is_empty() {
      query
    } else {
      format!("?{}", query)
    }
  }

  /// Exact-match filtering applied by the local store.
  pub fn matches(&self, record: &Record) -> bool {
    let field_is = |name: &str, expected: &str| {
      record
        .get(name)
        .and_then(|v| v.as_str())
        .is_some_and(|v| v == expected)
    };

    if let Some(date) = &self.date {
      if !field_is("date", date) {
        return false;
      }
    }
    if let Some(entity_type) = &self.entity_type {
      if !field_is("type", entity_type) {
        return false;
      }
    }
    if let Some(is_weekly) = self.is_weekly {
      let weekly = record
        .get("isWeekly")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
      if weekly != is_weekly {
        return false;
      }
    }
    true
  }
}
