use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::participant::JoinRequest;
use super::room::{JoinAccepted, Room, RoomActivity};
use super::signaling::{ChatMessage, CloseReason, ControlEvent, EventSender, ServerEvent};
use crate::attendance::{AttendanceSummary, FinalizeRequest, PresenceTracker};
use crate::class::{ClassRecord, ClassStatus, ClassStore};
use crate::clock::{to_chrono, Clock};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub open_rooms: usize,
    pub closed_rooms: usize,
    pub connected_participants: usize,
}

/// Table of active rooms.
///
/// The map lock is held only to look up or insert a room; all per-room work
/// is serialized on that room's own mutex, so rooms never contend with each
/// other.
pub struct SessionRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
    store: Arc<dyn ClassStore>,
    tracker: Arc<PresenceTracker>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl SessionRegistry {
    pub fn new(
        store: Arc<dyn ClassStore>,
        tracker: Arc<PresenceTracker>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            store,
            tracker,
            clock,
            config,
        })
    }

    pub fn tracker(&self) -> &Arc<PresenceTracker> {
        &self.tracker
    }

    /// Returns the existing room or creates it. Never reopens a closed room.
    pub async fn open_room(&self, class_id: &str, room_id: &str) -> Arc<Mutex<Room>> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return room.clone();
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                tracing::info!(room_id = %room_id, class_id = %class_id, "Room opened");
                Arc::new(Mutex::new(Room::new(
                    room_id.to_string(),
                    class_id.to_string(),
                    self.config.chat_log_capacity,
                    self.clock.now(),
                )))
            })
            .clone()
    }

    pub async fn join(
        &self,
        room_id: &str,
        connection_id: &str,
        request: JoinRequest,
        sender: EventSender,
    ) -> Result<JoinAccepted> {
        if let Some(room) = self.find_room(room_id).await {
            if room.lock().await.is_closed() {
                return Err(SessionError::RoomClosed(room_id.to_string()));
            }
        }

        let class = self
            .store
            .find_by_room(room_id)
            .await?
            .ok_or_else(|| SessionError::RoomNotFound(room_id.to_string()))?;
        let now = self.clock.now();
        self.ensure_joinable(&class, now)?;

        let room = self.open_room(&class.id, room_id).await;
        let user_id = request.user_id.clone();
        let accepted = room.lock().await.admit(
            connection_id,
            request,
            sender,
            self.config.max_participants,
            now,
        )?;

        tracing::info!(
            room_id = %room_id,
            connection_id = %connection_id,
            user_id = %user_id,
            participants = accepted.participants.len(),
            "Participant joined room"
        );
        Ok(accepted)
    }

    pub async fn leave(&self, room_id: &str, connection_id: &str) -> Result<()> {
        let room = self.room(room_id).await?;
        let now = self.clock.now();
        let info = room.lock().await.depart(connection_id, now)?;

        tracing::info!(
            room_id = %room_id,
            connection_id = %connection_id,
            user_id = %info.user_id,
            "Participant left room"
        );
        Ok(())
    }

    /// Transport-level disconnect. Closes the interval at the last moment the
    /// connection was known alive; never fails.
    pub async fn disconnect(&self, room_id: &str, connection_id: &str, last_seen: DateTime<Utc>) {
        let Some(room) = self.find_room(room_id).await else {
            return;
        };
        let at = last_seen.min(self.clock.now());
        let departed = room.lock().await.depart(connection_id, at);
        match departed {
            Ok(info) => tracing::info!(
                room_id = %room_id,
                connection_id = %connection_id,
                user_id = %info.user_id,
                "Participant disconnected"
            ),
            Err(e) => tracing::debug!(
                room_id = %room_id,
                connection_id = %connection_id,
                error = %e,
                "Disconnect after leave or close"
            ),
        }
    }

    /// Explicit termination. The class record is not touched here; ending a
    /// class goes through the lifecycle scheduler.
    pub async fn close_room(
        &self,
        room_id: &str,
        reason: CloseReason,
    ) -> Result<Option<AttendanceSummary>> {
        let class_id = self.room(room_id).await?.lock().await.class_id.clone();
        Ok(self.finalize_class(&class_id, room_id, reason).await)
    }

    /// Closes the class's room (if any) and hands presence to the tracker.
    /// Re-finalizing a closed room is a no-op. A class with no room still
    /// gets a summary in which every enrolled student is absent.
    pub async fn finalize_class(
        &self,
        class_id: &str,
        room_id: &str,
        reason: CloseReason,
    ) -> Option<AttendanceSummary> {
        let now = self.clock.now();
        let records = match self.find_room(room_id).await {
            Some(room) => {
                let mut room = room.lock().await;
                match room.close(reason, now) {
                    Some(records) => records,
                    None => return None,
                }
            }
            None => Vec::new(),
        };

        tracing::info!(
            room_id = %room_id,
            class_id = %class_id,
            reason = ?reason,
            "Room closed"
        );

        if !reason.records_attendance() {
            return None;
        }

        let request = FinalizeRequest {
            class_id: class_id.to_string(),
            room_id: room_id.to_string(),
            records,
            closed_at: now,
        };
        self.tracker.finalize(request).await.ok()
    }

    pub async fn relay_signal(
        &self,
        room_id: &str,
        from: &str,
        to: &str,
        payload: Value,
    ) -> Result<()> {
        let room = self.room(room_id).await?;
        let now = self.clock.now();
        room.lock().await.relay_signal(from, to, payload, now)?;
        tracing::debug!(room_id = %room_id, from = %from, to = %to, "Relayed signal");
        Ok(())
    }

    pub async fn broadcast_chat(
        &self,
        room_id: &str,
        from: &str,
        text: String,
    ) -> Result<ChatMessage> {
        let room = self.room(room_id).await?;
        let now = self.clock.now();
        let message = room.lock().await.append_chat(from, text, now)?;
        tracing::debug!(room_id = %room_id, from = %from, seq = message.seq, "Chat broadcast");
        Ok(message)
    }

    pub async fn broadcast_control(
        &self,
        room_id: &str,
        from: &str,
        event: ControlEvent,
        payload: Value,
    ) -> Result<()> {
        let room = self.room(room_id).await?;
        let now = self.clock.now();
        room.lock().await.apply_control(from, event, payload, now)?;
        tracing::debug!(room_id = %room_id, from = %from, event = ?event, "Control broadcast");
        Ok(())
    }

    /// Class id of the room if `connection_id` may moderate it.
    pub async fn require_moderator(&self, room_id: &str, connection_id: &str) -> Result<String> {
        let room = self.room(room_id).await?;
        let room = room.lock().await;
        let info = room.role_of(connection_id)?;
        if !info.role.can_moderate() {
            return Err(SessionError::Unauthorized(connection_id.to_string()));
        }
        Ok(room.class_id.clone())
    }

    /// Host-only removal of another participant.
    pub async fn remove_participant(
        &self,
        room_id: &str,
        by: &str,
        target: &str,
    ) -> Result<()> {
        self.require_moderator(room_id, by).await?;
        let room = self.room(room_id).await?;
        let now = self.clock.now();
        let mut room = room.lock().await;
        room.notify(
            target,
            ServerEvent::Error {
                code: "removed".to_string(),
                message: "Removed by host".to_string(),
            },
        );
        let info = room.depart(target, now)?;

        tracing::info!(
            room_id = %room_id,
            by = %by,
            user_id = %info.user_id,
            "Participant removed by host"
        );
        Ok(())
    }

    /// Whether `connection_id` is still attached to the open room.
    pub async fn is_attached(&self, room_id: &str, connection_id: &str) -> bool {
        let Some(room) = self.find_room(room_id).await else {
            return false;
        };
        let room = room.lock().await;
        let attached = !room.is_closed() && room.role_of(connection_id).is_ok();
        attached
    }

    pub async fn activity(&self, room_id: &str) -> Option<RoomActivity> {
        let room = self.find_room(room_id).await?;
        let activity = room.lock().await.activity();
        Some(activity)
    }

    pub async fn open_room_activity(&self) -> Vec<RoomActivity> {
        let rooms: Vec<Arc<Mutex<Room>>> = self.rooms.read().await.values().cloned().collect();
        let mut activity = Vec::with_capacity(rooms.len());
        for room in rooms {
            let room = room.lock().await;
            if !room.is_closed() {
                activity.push(room.activity());
            }
        }
        activity
    }

    /// Drops closed rooms past the retention window. Returns how many.
    pub async fn reap_closed_rooms(&self) -> usize {
        let now = self.clock.now();
        let retention = to_chrono(self.config.closed_room_retention);

        let candidates: Vec<(String, Arc<Mutex<Room>>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, room)| (id.clone(), room.clone()))
            .collect();

        let mut expired = Vec::new();
        for (room_id, room) in candidates {
            if let Some(closed) = room.lock().await.closed_state() {
                if closed.at + retention <= now {
                    expired.push(room_id);
                }
            }
        }

        if expired.is_empty() {
            return 0;
        }
        let mut rooms = self.rooms.write().await;
        for room_id in &expired {
            rooms.remove(room_id);
            tracing::debug!(room_id = %room_id, "Reaped closed room");
        }
        expired.len()
    }

    /// Final summary if persisted, otherwise the best available view.
    pub async fn attendance_summary(&self, class_id: &str) -> Result<AttendanceSummary> {
        if let Some(summary) = self.tracker.stored_summary(class_id).await? {
            return Ok(summary);
        }
        if let Some(summary) = self.tracker.pending_summary(class_id).await? {
            return Ok(summary);
        }

        let class = self
            .store
            .get(class_id)
            .await?
            .ok_or_else(|| SessionError::ClassNotFound(class_id.to_string()))?;
        let records = match self.find_room(&class.room_id).await {
            Some(room) => room.lock().await.presence_records(),
            None => Vec::new(),
        };
        self.tracker
            .live_summary(&class, &records, self.clock.now())
            .await
    }

    /// Finalized summaries, most recently ended first.
    pub async fn recent_class_stats(&self, limit: usize) -> Result<Vec<AttendanceSummary>> {
        self.tracker.recent_stats(limit).await
    }

    pub async fn stats(&self) -> RegistryStats {
        let rooms: Vec<Arc<Mutex<Room>>> = self.rooms.read().await.values().cloned().collect();
        let mut stats = RegistryStats::default();
        for room in rooms {
            let room = room.lock().await;
            if room.is_closed() {
                stats.closed_rooms += 1;
            } else {
                stats.open_rooms += 1;
                stats.connected_participants += room.connected_count();
            }
        }
        stats
    }

    fn ensure_joinable(&self, class: &ClassRecord, now: DateTime<Utc>) -> Result<()> {
        if class.status.is_terminal() {
            return Err(SessionError::RoomClosed(class.room_id.clone()));
        }
        if class.status == ClassStatus::Scheduled
            && now < class.scheduled_start_time - to_chrono(self.config.pre_join_grace)
        {
            return Err(SessionError::RoomNotLive(class.room_id.clone()));
        }
        Ok(())
    }

    async fn find_room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    async fn room(&self, room_id: &str) -> Result<Arc<Mutex<Room>>> {
        self.find_room(room_id)
            .await
            .ok_or_else(|| SessionError::RoomNotFound(room_id.to_string()))
    }
}
