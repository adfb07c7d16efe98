//! Time-driven class lifecycle.
//!
//! ```text
//! SCHEDULED --(start <= now)--> LIVE --(end <= now | host absent)--> ENDED
//!     \                           \
//!      `------- cancel ------------`--> CANCELLED
//! ```
//!
//! The scheduler is the only writer of class status and the actual
//! start/end timestamps. Every transition is a compare-and-set against the
//! expected prior status, so re-running a sweep never repeats a transition.

mod jobs;
mod periodic;

pub use jobs::{FinalizeRetryJob, HeartbeatJob, RoomReaperJob};
pub use periodic::{spawn_periodic, PeriodicJob};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::class::{ClassRecord, ClassStatus, ClassStore};
use crate::clock::{to_chrono, Clock};
use crate::config::SchedulerConfig;
use crate::error::{Result, SessionError};
use crate::session::{CloseReason, RoomActivity, SessionRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ClassWentLive { class_id: String, room_id: String },
    ClassEnded { class_id: String, room_id: String },
    ClassCancelled { class_id: String, room_id: String },
}

/// What one sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub went_live: Vec<String>,
    pub ended: Vec<String>,
    /// Rooms closed because their class was no longer running
    pub reclaimed_rooms: Vec<String>,
    pub failures: usize,
}

pub struct LifecycleScheduler {
    store: Arc<dyn ClassStore>,
    registry: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    events: broadcast::Sender<LifecycleEvent>,
    sweep_lock: Mutex<()>,
}

impl LifecycleScheduler {
    pub fn new(
        store: Arc<dyn ClassStore>,
        registry: Arc<SessionRegistry>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            store,
            registry,
            clock,
            config,
            events,
            sweep_lock: Mutex::new(()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Runs one sweep, or returns `None` without doing anything if another
    /// sweep is still in progress.
    pub async fn sweep(&self) -> Option<SweepReport> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            tracing::warn!("Sweep already in progress, skipping");
            return None;
        };

        let now = self.clock.now();
        let mut report = SweepReport::default();

        self.start_due_classes(now, &mut report).await;
        self.end_due_classes(now, &mut report).await;
        self.reclaim_idle_rooms(now, &mut report).await;

        if !report.went_live.is_empty() || !report.ended.is_empty() || report.failures > 0 {
            tracing::info!(
                went_live = report.went_live.len(),
                ended = report.ended.len(),
                reclaimed = report.reclaimed_rooms.len(),
                failures = report.failures,
                "Lifecycle sweep completed"
            );
        }
        Some(report)
    }

    /// Host-initiated end of a LIVE class.
    pub async fn end_class(&self, class_id: &str, reason: CloseReason) -> Result<ClassRecord> {
        let class = self
            .store
            .get(class_id)
            .await?
            .ok_or_else(|| SessionError::ClassNotFound(class_id.to_string()))?;
        let now = self.clock.now();
        self.transition_to_ended(&class, now, reason).await
    }

    /// Cancels a SCHEDULED or LIVE class. No attendance is recorded.
    pub async fn cancel_class(&self, class_id: &str) -> Result<ClassRecord> {
        let class = self
            .store
            .get(class_id)
            .await?
            .ok_or_else(|| SessionError::ClassNotFound(class_id.to_string()))?;
        if !class.status.can_transition_to(ClassStatus::Cancelled) {
            return Err(SessionError::StaleTransition {
                class_id: class.id.clone(),
                expected: ClassStatus::Live,
                found: class.status,
            });
        }

        let now = self.clock.now();
        let updated = self
            .store
            .update_status(&class.id, class.status, ClassStatus::Cancelled, now)
            .await?;
        tracing::info!(class_id = %class.id, room_id = %class.room_id, "Class cancelled");

        self.emit(LifecycleEvent::ClassCancelled {
            class_id: class.id.clone(),
            room_id: class.room_id.clone(),
        });
        self.registry
            .finalize_class(&class.id, &class.room_id, CloseReason::Cancelled)
            .await;
        Ok(updated)
    }

    async fn start_due_classes(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let scheduled = match self.store.list_by_status(ClassStatus::Scheduled).await {
            Ok(classes) => classes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list scheduled classes");
                report.failures += 1;
                return;
            }
        };

        for class in scheduled.iter().filter(|c| c.scheduled_start_time <= now) {
            match self
                .store
                .update_status(&class.id, ClassStatus::Scheduled, ClassStatus::Live, now)
                .await
            {
                Ok(_) => {
                    tracing::info!(class_id = %class.id, room_id = %class.room_id, "Class went live");
                    self.registry.open_room(&class.id, &class.room_id).await;
                    self.emit(LifecycleEvent::ClassWentLive {
                        class_id: class.id.clone(),
                        room_id: class.room_id.clone(),
                    });
                    report.went_live.push(class.id.clone());
                }
                Err(e) => self.record_failure(&class.id, e, report),
            }
        }
    }

    async fn end_due_classes(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let live = match self.store.list_by_status(ClassStatus::Live).await {
            Ok(classes) => classes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list live classes");
                report.failures += 1;
                return;
            }
        };

        for class in &live {
            let (end_at, reason) = if class.scheduled_end_time <= now {
                // A class started late by a catch-up sweep never ends before it began
                let started = class.actual_start_time.unwrap_or(class.scheduled_end_time);
                (class.scheduled_end_time.max(started), CloseReason::ScheduleEnded)
            } else if self.host_absent_expired(&class.room_id, now).await {
                (now, CloseReason::HostAbsent)
            } else {
                continue;
            };

            match self.transition_to_ended(class, end_at, reason).await {
                Ok(_) => report.ended.push(class.id.clone()),
                Err(e) => self.record_failure(&class.id, e, report),
            }
        }
    }

    /// Closes empty rooms whose class is no longer running, covering rooms
    /// left behind by a crash between status write and room close.
    async fn reclaim_idle_rooms(&self, now: DateTime<Utc>, report: &mut SweepReport) {
        let idle_grace = to_chrono(self.config.idle_grace);

        for activity in self.registry.open_room_activity().await {
            if !is_idle(&activity, now, idle_grace) {
                continue;
            }

            let class = match self.store.find_by_room(&activity.room_id).await {
                Ok(class) => class,
                Err(e) => {
                    self.record_failure(&activity.class_id, e, report);
                    continue;
                }
            };

            let reason = match class.as_ref().map(|c| c.status) {
                None | Some(ClassStatus::Ended) => CloseReason::Idle,
                Some(ClassStatus::Cancelled) => CloseReason::Cancelled,
                Some(ClassStatus::Scheduled) | Some(ClassStatus::Live) => continue,
            };

            tracing::info!(room_id = %activity.room_id, class_id = %activity.class_id, "Reclaiming idle room");
            self.registry
                .finalize_class(&activity.class_id, &activity.room_id, reason)
                .await;
            report.reclaimed_rooms.push(activity.room_id.clone());
        }
    }

    async fn transition_to_ended(
        &self,
        class: &ClassRecord,
        end_at: DateTime<Utc>,
        reason: CloseReason,
    ) -> Result<ClassRecord> {
        let updated = self
            .store
            .update_status(&class.id, ClassStatus::Live, ClassStatus::Ended, end_at)
            .await?;
        tracing::info!(
            class_id = %class.id,
            room_id = %class.room_id,
            reason = ?reason,
            actual_end_time = %end_at,
            "Class ended"
        );

        self.emit(LifecycleEvent::ClassEnded {
            class_id: class.id.clone(),
            room_id: class.room_id.clone(),
        });
        self.registry
            .finalize_class(&class.id, &class.room_id, reason)
            .await;
        Ok(updated)
    }

    async fn host_absent_expired(&self, room_id: &str, now: DateTime<Utc>) -> bool {
        let Some(activity) = self.registry.activity(room_id).await else {
            return false;
        };
        let grace = to_chrono(self.config.host_absent_grace);
        activity.connected == 0
            && activity.host_departed_at.is_some()
            && activity.empty_since.is_some_and(|since| since + grace <= now)
    }

    fn record_failure(&self, class_id: &str, error: SessionError, report: &mut SweepReport) {
        match error {
            SessionError::StaleTransition { .. } => {
                tracing::warn!(class_id = %class_id, error = %error, "Stale transition skipped");
            }
            _ => {
                tracing::error!(class_id = %class_id, error = %error, "Transition failed, will retry next sweep");
                report.failures += 1;
            }
        }
    }

    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl PeriodicJob for LifecycleScheduler {
    fn name(&self) -> &'static str {
        "lifecycle-sweep"
    }

    async fn run(&self) {
        self.sweep().await;
    }
}

fn is_idle(activity: &RoomActivity, now: DateTime<Utc>, grace: Duration) -> bool {
    activity.connected == 0 && activity.empty_since.is_some_and(|since| since + grace <= now)
}
