use std::sync::Arc;

use async_trait::async_trait;

use super::periodic::PeriodicJob;
use crate::attendance::PresenceTracker;
use crate::session::SessionRegistry;

/// Retries attendance writes that failed at room close
pub struct FinalizeRetryJob {
    tracker: Arc<PresenceTracker>,
}

impl FinalizeRetryJob {
    pub fn new(tracker: Arc<PresenceTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl PeriodicJob for FinalizeRetryJob {
    fn name(&self) -> &'static str {
        "finalize-retry"
    }

    async fn run(&self) {
        let remaining = self.tracker.retry_pending().await;
        if remaining > 0 {
            tracing::warn!(remaining = remaining, "Attendance summaries still pending");
        }
    }
}

/// Removes closed rooms once their retention window has passed
pub struct RoomReaperJob {
    registry: Arc<SessionRegistry>,
}

impl RoomReaperJob {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PeriodicJob for RoomReaperJob {
    fn name(&self) -> &'static str {
        "room-reaper"
    }

    async fn run(&self) {
        let reaped = self.registry.reap_closed_rooms().await;
        if reaped > 0 {
            tracing::info!(reaped = reaped, "Reaped closed rooms");
        }
    }
}

/// Periodic status line for operators
pub struct HeartbeatJob {
    registry: Arc<SessionRegistry>,
}

impl HeartbeatJob {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl PeriodicJob for HeartbeatJob {
    fn name(&self) -> &'static str {
        "heartbeat"
    }

    async fn run(&self) {
        let stats = self.registry.stats().await;
        let pending = self.registry.tracker().pending_count().await;
        tracing::info!(
            open_rooms = stats.open_rooms,
            closed_rooms = stats.closed_rooms,
            connected = stats.connected_participants,
            pending_finalize = pending,
            "Heartbeat"
        );
    }
}
