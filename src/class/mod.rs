//! Persisted class records as seen by the live session engine.
//!
//! The engine never creates or deletes class records. It only reads the
//! scheduling fields and writes `status`, `actual_start_time` and
//! `actual_end_time`.

mod memory;
mod store;

pub use memory::{ClassSeed, InMemoryClassStore};
pub use store::ClassStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassStatus {
    Scheduled,
    Live,
    Ended,
    Cancelled,
}

impl ClassStatus {
    /// Transitions only move forward; CANCELLED is reachable from
    /// SCHEDULED or LIVE.
    pub fn can_transition_to(self, next: ClassStatus) -> bool {
        matches!(
            (self, next),
            (ClassStatus::Scheduled, ClassStatus::Live)
                | (ClassStatus::Live, ClassStatus::Ended)
                | (ClassStatus::Scheduled, ClassStatus::Cancelled)
                | (ClassStatus::Live, ClassStatus::Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClassStatus::Ended | ClassStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub id: String,
    pub room_id: String,
    pub scheduled_start_time: DateTime<Utc>,
    pub scheduled_end_time: DateTime<Utc>,
    #[serde(default)]
    pub actual_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_end_time: Option<DateTime<Utc>>,
    pub status: ClassStatus,
}

impl ClassRecord {
    pub fn scheduled(
        id: impl Into<String>,
        room_id: impl Into<String>,
        scheduled_start_time: DateTime<Utc>,
        scheduled_end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            room_id: room_id.into(),
            scheduled_start_time,
            scheduled_end_time,
            actual_start_time: None,
            actual_end_time: None,
            status: ClassStatus::Scheduled,
        }
    }

    /// Applies a status change in place, stamping the matching timestamp.
    pub(crate) fn apply_transition(&mut self, next: ClassStatus, at: DateTime<Utc>) {
        match next {
            ClassStatus::Live => self.actual_start_time = Some(at),
            ClassStatus::Ended => self.actual_end_time = Some(at),
            ClassStatus::Scheduled | ClassStatus::Cancelled => {}
        }
        self.status = next;
    }
}
