use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{compute_summary, AttendancePolicy, AttendanceSummary, ClassWindow, PresenceRecord, SummaryScope};
use crate::class::{ClassRecord, ClassStore};
use crate::error::{Result, SessionError};

/// Presence snapshot handed over when a room closes
#[derive(Debug, Clone)]
pub struct FinalizeRequest {
    pub class_id: String,
    pub room_id: String,
    pub records: Vec<PresenceRecord>,
    pub closed_at: DateTime<Utc>,
}

struct PendingFinalize {
    request: FinalizeRequest,
    attempts: u32,
}

/// Turns presence snapshots into persisted attendance summaries.
///
/// A summary is written at most once per class. When the write fails the
/// snapshot is kept and retried by [`retry_pending`](Self::retry_pending).
pub struct PresenceTracker {
    store: Arc<dyn ClassStore>,
    policy: AttendancePolicy,
    pending: Mutex<Vec<PendingFinalize>>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn ClassStore>, policy: AttendancePolicy) -> Self {
        Self {
            store,
            policy,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Computes and persists the final summary. On failure the request is
    /// queued for retry and the error is returned to the caller.
    pub async fn finalize(&self, request: FinalizeRequest) -> Result<AttendanceSummary> {
        match self.try_finalize(&request).await {
            Ok(summary) => Ok(summary),
            Err(e) if e.is_retryable() => {
                tracing::warn!(
                    class_id = %request.class_id,
                    room_id = %request.room_id,
                    error = %e,
                    "Attendance finalize failed, queued for retry"
                );
                self.enqueue(request, 1).await;
                Err(e)
            }
            Err(e) => {
                tracing::error!(
                    class_id = %request.class_id,
                    room_id = %request.room_id,
                    error = %e,
                    "Attendance finalize failed permanently, snapshot dropped"
                );
                Err(e)
            }
        }
    }

    /// Retries every queued finalize once. Returns how many remain queued.
    pub async fn retry_pending(&self) -> usize {
        let queued: Vec<PendingFinalize> = std::mem::take(&mut *self.pending.lock().await);
        if queued.is_empty() {
            return 0;
        }

        let mut still_failing = Vec::new();
        for entry in queued {
            match self.try_finalize(&entry.request).await {
                Ok(summary) => {
                    tracing::info!(
                        class_id = %summary.class_id,
                        attempts = entry.attempts + 1,
                        "Attendance finalized on retry"
                    );
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        class_id = %entry.request.class_id,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "Attendance finalize retry failed"
                    );
                    still_failing.push(PendingFinalize {
                        request: entry.request,
                        attempts: entry.attempts + 1,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        class_id = %entry.request.class_id,
                        attempts = entry.attempts + 1,
                        error = %e,
                        "Attendance finalize failed permanently, snapshot dropped"
                    );
                }
            }
        }

        let mut pending = self.pending.lock().await;
        pending.extend(still_failing);
        pending.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Summary of a class that is still running, measured up to `now`.
    pub async fn live_summary(
        &self,
        class: &ClassRecord,
        records: &[PresenceRecord],
        now: DateTime<Utc>,
    ) -> Result<AttendanceSummary> {
        let roster = self.store.get_roster(&class.id).await?;
        let start = class.actual_start_time.unwrap_or(now);
        let end = class.actual_end_time.unwrap_or(now);
        let scope = SummaryScope {
            class_id: &class.id,
            room_id: &class.room_id,
            window: ClassWindow::new(start, end),
            finalized: false,
        };
        Ok(compute_summary(scope, &roster, records, &self.policy))
    }

    /// Summary computed from a snapshot still waiting to be persisted.
    pub async fn pending_summary(&self, class_id: &str) -> Result<Option<AttendanceSummary>> {
        let request = {
            let pending = self.pending.lock().await;
            pending
                .iter()
                .find(|p| p.request.class_id == class_id)
                .map(|p| p.request.clone())
        };
        match request {
            Some(request) => self.compute_final(&request).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn stored_summary(&self, class_id: &str) -> Result<Option<AttendanceSummary>> {
        self.store.get_attendance(class_id).await
    }

    pub async fn recent_stats(&self, limit: usize) -> Result<Vec<AttendanceSummary>> {
        self.store.list_recent_attendance(limit).await
    }

    async fn try_finalize(&self, request: &FinalizeRequest) -> Result<AttendanceSummary> {
        if let Some(existing) = self.store.get_attendance(&request.class_id).await? {
            tracing::debug!(class_id = %request.class_id, "Attendance already finalized");
            return Ok(existing);
        }

        let summary = self.compute_final(request).await?;
        self.store.save_attendance(&summary).await?;

        tracing::info!(
            class_id = %summary.class_id,
            room_id = %summary.room_id,
            total_students = summary.total_students,
            present = summary.present_count,
            left_early = summary.left_early_count,
            absent = summary.absent_count,
            average = summary.average_attendance_percentage,
            "Attendance finalized"
        );
        Ok(summary)
    }

    async fn compute_final(&self, request: &FinalizeRequest) -> Result<AttendanceSummary> {
        let class = self
            .store
            .get(&request.class_id)
            .await?
            .ok_or_else(|| SessionError::ClassNotFound(request.class_id.clone()))?;
        let roster = self.store.get_roster(&request.class_id).await?;

        let start = class.actual_start_time.unwrap_or(request.closed_at);
        let end = class
            .actual_end_time
            .unwrap_or(request.closed_at)
            .min(request.closed_at.max(start));
        let scope = SummaryScope {
            class_id: &request.class_id,
            room_id: &request.room_id,
            window: ClassWindow::new(start, end),
            finalized: true,
        };
        Ok(compute_summary(scope, &roster, &request.records, &self.policy))
    }

    async fn enqueue(&self, request: FinalizeRequest, attempts: u32) {
        let mut pending = self.pending.lock().await;
        if pending.iter().any(|p| p.request.class_id == request.class_id) {
            return;
        }
        pending.push(PendingFinalize { request, attempts });
    }
}
