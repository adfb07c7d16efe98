use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ClassRecord, ClassStatus};
use crate::attendance::AttendanceSummary;
use crate::error::Result;

/// Reader/writer for persisted class records.
///
/// Implementations report persistence failures as
/// [`SessionError::StoreUnavailable`](crate::error::SessionError::StoreUnavailable).
#[async_trait]
pub trait ClassStore: Send + Sync {
    async fn list_by_status(&self, status: ClassStatus) -> Result<Vec<ClassRecord>>;

    async fn get(&self, class_id: &str) -> Result<Option<ClassRecord>>;

    async fn find_by_room(&self, room_id: &str) -> Result<Option<ClassRecord>>;

    /// Compare-and-set status change. Fails with `StaleTransition` when the
    /// stored status is not `expected`. Stamps `actual_start_time` on LIVE and
    /// `actual_end_time` on ENDED.
    async fn update_status(
        &self,
        class_id: &str,
        expected: ClassStatus,
        new_status: ClassStatus,
        at: DateTime<Utc>,
    ) -> Result<ClassRecord>;

    /// Enrolled user ids for the class.
    async fn get_roster(&self, class_id: &str) -> Result<Vec<String>>;

    /// Write-once: a second save for the same class keeps the first summary.
    async fn save_attendance(&self, summary: &AttendanceSummary) -> Result<()>;

    async fn get_attendance(&self, class_id: &str) -> Result<Option<AttendanceSummary>>;

    /// Most recently ended first.
    async fn list_recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceSummary>>;
}
