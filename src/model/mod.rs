//! Entity collections and record types.

mod kind;
mod types;

pub use kind::{EntityKind, ListFilter, Record, STREAK_ID};
pub use types::{
  Entity, Exercise, Goal, MindActivity, Performance, RoutineItem, Streak, Task, WaterIntake,
};
