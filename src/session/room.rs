use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;

use super::participant::{JoinRequest, Participant, ParticipantInfo};
use super::signaling::{ChatMessage, CloseReason, ControlEvent, EventSender, ServerEvent};
use crate::attendance::PresenceRecord;
use crate::error::{Result, SessionError};

struct Connection {
    user_id: String,
    sender: EventSender,
}

#[derive(Debug, Clone, Copy)]
pub struct ClosedState {
    pub reason: CloseReason,
    pub at: DateTime<Utc>,
}

/// Point-in-time view of a room used by the scheduler and reporting
#[derive(Debug, Clone)]
pub struct RoomActivity {
    pub room_id: String,
    pub class_id: String,
    pub connected: usize,
    pub empty_since: Option<DateTime<Utc>>,
    pub host_departed_at: Option<DateTime<Utc>>,
    pub closed: Option<ClosedState>,
}

/// Result of a successful join
#[derive(Debug, Clone)]
pub struct JoinAccepted {
    pub connection_id: String,
    pub participants: Vec<ParticipantInfo>,
    pub recent_chat: Vec<ChatMessage>,
}

/// State of one live class session.
///
/// Every method runs under the room's lock. Events are only queued onto
/// each connection's outbound channel here, which never blocks; the socket
/// writes happen in the per-connection writer task.
pub struct Room {
    pub room_id: String,
    pub class_id: String,
    pub created_at: DateTime<Utc>,
    /// Keyed by user id so a rejoin continues the same presence history
    participants: HashMap<String, Participant>,
    connections: HashMap<String, Connection>,
    chat_log: VecDeque<ChatMessage>,
    chat_capacity: usize,
    next_chat_seq: u64,
    closed: Option<ClosedState>,
    host_departed_at: Option<DateTime<Utc>>,
    empty_since: Option<DateTime<Utc>>,
    /// Connections whose outbound queue was full or closed on the last send
    lagging: Vec<String>,
}

impl Room {
    pub fn new(room_id: String, class_id: String, chat_capacity: usize, now: DateTime<Utc>) -> Self {
        Self {
            room_id,
            class_id,
            created_at: now,
            participants: HashMap::new(),
            connections: HashMap::new(),
            chat_log: VecDeque::with_capacity(chat_capacity.min(256)),
            chat_capacity: chat_capacity.max(1),
            next_chat_seq: 1,
            closed: None,
            host_departed_at: None,
            empty_since: Some(now),
            lagging: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_some()
    }

    pub fn closed_state(&self) -> Option<ClosedState> {
        self.closed
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    pub fn activity(&self) -> RoomActivity {
        RoomActivity {
            room_id: self.room_id.clone(),
            class_id: self.class_id.clone(),
            connected: self.connections.len(),
            empty_since: self.empty_since,
            host_departed_at: self.host_departed_at,
            closed: self.closed,
        }
    }

    pub fn admit(
        &mut self,
        connection_id: &str,
        request: JoinRequest,
        sender: EventSender,
        max_participants: usize,
        now: DateTime<Utc>,
    ) -> Result<JoinAccepted> {
        self.ensure_open()?;
        if self.connections.contains_key(connection_id) {
            return Err(SessionError::InvalidMessage(format!(
                "connection {} already joined",
                connection_id
            )));
        }

        // One live connection per user: a second join replaces the first
        let superseded = self
            .participants
            .get(&request.user_id)
            .filter(|p| p.is_connected())
            .map(|p| p.connection_id.clone());

        if superseded.is_none() && self.connections.len() >= max_participants {
            return Err(SessionError::RoomFull {
                room_id: self.room_id.clone(),
                max: max_participants,
            });
        }

        if let Some(old_connection) = superseded {
            if let Some(old) = self.connections.remove(&old_connection) {
                let _ = old.sender.try_send(ServerEvent::Error {
                    code: "superseded".to_string(),
                    message: "Joined from another connection".to_string(),
                });
            }
            self.broadcast_except(
                connection_id,
                ServerEvent::ParticipantLeft {
                    room_id: self.room_id.clone(),
                    connection_id: old_connection,
                    user_id: request.user_id.clone(),
                },
            );
        }

        let user_id = request.user_id.clone();
        let role = request.role;
        let info = match self.participants.get_mut(&user_id) {
            Some(participant) => {
                participant.rejoin(connection_id.to_string(), request, now);
                participant.info()
            }
            None => {
                let participant = Participant::new(connection_id.to_string(), request, now);
                let info = participant.info();
                self.participants.insert(user_id.clone(), participant);
                info
            }
        };

        self.connections.insert(
            connection_id.to_string(),
            Connection {
                user_id,
                sender,
            },
        );
        if role.can_moderate() {
            self.host_departed_at = None;
        }
        self.empty_since = None;

        self.broadcast_except(
            connection_id,
            ServerEvent::ParticipantJoined {
                room_id: self.room_id.clone(),
                participant: info,
            },
        );

        let accepted = JoinAccepted {
            connection_id: connection_id.to_string(),
            participants: self.connected_participants(),
            recent_chat: self.chat_log.iter().cloned().collect(),
        };
        self.evict_lagging(now);
        Ok(accepted)
    }

    /// Closes the connection's presence interval at `at`.
    pub fn depart(&mut self, connection_id: &str, at: DateTime<Utc>) -> Result<ParticipantInfo> {
        let info = self.detach(connection_id, at)?;
        self.evict_lagging(at);
        Ok(info)
    }

    fn detach(&mut self, connection_id: &str, at: DateTime<Utc>) -> Result<ParticipantInfo> {
        self.ensure_open()?;
        let connection = self
            .connections
            .remove(connection_id)
            .ok_or_else(|| SessionError::UnknownParticipant(connection_id.to_string()))?;

        let participant = self
            .participants
            .get_mut(&connection.user_id)
            .ok_or_else(|| SessionError::internal("connection without participant"))?;
        participant.leave(at);
        let info = participant.info();

        if info.role.can_moderate() && !self.has_connected_moderator() {
            self.host_departed_at = Some(at);
        }
        if self.connections.is_empty() {
            self.empty_since = Some(at);
        }

        self.broadcast_except(
            connection_id,
            ServerEvent::ParticipantLeft {
                room_id: self.room_id.clone(),
                connection_id: connection_id.to_string(),
                user_id: info.user_id.clone(),
            },
        );
        Ok(info)
    }

    /// Forwards to one connection. A target that cannot take the event is
    /// dropped from the room.
    pub fn relay_signal(
        &mut self,
        from: &str,
        to: &str,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_open()?;
        self.participant_for(from)?;
        let target = self
            .connections
            .get(to)
            .ok_or_else(|| SessionError::UnknownParticipant(to.to_string()))?;

        let sent = target.sender.try_send(ServerEvent::SignalReceived {
            room_id: self.room_id.clone(),
            from: from.to_string(),
            payload,
        });
        if sent.is_err() {
            self.lagging.push(to.to_string());
            self.evict_lagging(now);
            return Err(SessionError::UnknownParticipant(to.to_string()));
        }
        Ok(())
    }

    /// Appends to the bounded chat log and forwards to everyone else.
    pub fn append_chat(&mut self, from: &str, text: String, now: DateTime<Utc>) -> Result<ChatMessage> {
        self.ensure_open()?;
        let participant = self.participant_for(from)?;
        let message = ChatMessage {
            seq: self.next_chat_seq,
            from: from.to_string(),
            user_id: participant.user_id.clone(),
            display_name: participant.display_name.clone(),
            text,
            sent_at: now,
        };
        self.next_chat_seq += 1;

        self.chat_log.push_back(message.clone());
        while self.chat_log.len() > self.chat_capacity {
            self.chat_log.pop_front();
        }

        self.broadcast_except(
            from,
            ServerEvent::ChatReceived {
                room_id: self.room_id.clone(),
                message: message.clone(),
            },
        );
        self.evict_lagging(now);
        Ok(message)
    }

    /// Updates the sender's flags and forwards the event to everyone else.
    pub fn apply_control(
        &mut self,
        from: &str,
        event: ControlEvent,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Result<ParticipantInfo> {
        self.ensure_open()?;
        let user_id = self.user_for(from)?.to_string();
        let participant = self
            .participants
            .get_mut(&user_id)
            .ok_or_else(|| SessionError::UnknownParticipant(from.to_string()))?;
        participant.flags.apply(event);
        let info = participant.info();

        self.broadcast_except(
            from,
            ServerEvent::ControlReceived {
                room_id: self.room_id.clone(),
                from: from.to_string(),
                event,
                payload,
            },
        );
        self.evict_lagging(now);
        Ok(info)
    }

    pub fn role_of(&self, connection_id: &str) -> Result<ParticipantInfo> {
        self.participant_for(connection_id).map(Participant::info)
    }

    /// Queues an event for one connection. Returns false if it is gone.
    pub fn notify(&self, connection_id: &str, event: ServerEvent) -> bool {
        self.connections
            .get(connection_id)
            .map(|c| c.sender.try_send(event).is_ok())
            .unwrap_or(false)
    }

    /// Closes every open interval at `now`, tells all clients and detaches
    /// them. Returns `None` if the room was already closed.
    pub fn close(&mut self, reason: CloseReason, now: DateTime<Utc>) -> Option<Vec<PresenceRecord>> {
        if self.closed.is_some() {
            return None;
        }

        for participant in self.participants.values_mut() {
            if participant.is_connected() {
                participant.leave(now);
            }
        }
        for connection in self.connections.values() {
            let _ = connection.sender.try_send(ServerEvent::RoomClosed {
                room_id: self.room_id.clone(),
                reason,
            });
        }
        self.connections.clear();
        self.lagging.clear();
        self.closed = Some(ClosedState { reason, at: now });
        self.empty_since.get_or_insert(now);

        Some(self.presence_records())
    }

    pub fn presence_records(&self) -> Vec<PresenceRecord> {
        let mut records: Vec<PresenceRecord> = self
            .participants
            .values()
            .map(Participant::presence_record)
            .collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        records
    }

    pub fn connected_participants(&self) -> Vec<ParticipantInfo> {
        let mut infos: Vec<ParticipantInfo> = self
            .connections
            .values()
            .filter_map(|c| self.participants.get(&c.user_id))
            .map(Participant::info)
            .collect();
        infos.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        infos
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.is_some() {
            return Err(SessionError::RoomClosed(self.room_id.clone()));
        }
        Ok(())
    }

    fn user_for(&self, connection_id: &str) -> Result<&str> {
        self.connections
            .get(connection_id)
            .map(|c| c.user_id.as_str())
            .ok_or_else(|| SessionError::UnknownParticipant(connection_id.to_string()))
    }

    fn participant_for(&self, connection_id: &str) -> Result<&Participant> {
        let user_id = self.user_for(connection_id)?;
        self.participants
            .get(user_id)
            .ok_or_else(|| SessionError::UnknownParticipant(connection_id.to_string()))
    }

    fn has_connected_moderator(&self) -> bool {
        self.connections.values().any(|c| {
            self.participants
                .get(&c.user_id)
                .is_some_and(|p| p.role.can_moderate())
        })
    }

    fn broadcast_except(&mut self, skip: &str, event: ServerEvent) {
        for (connection_id, connection) in &self.connections {
            if connection_id == skip {
                continue;
            }
            if let Err(e) = connection.sender.try_send(event.clone()) {
                let queue = match e {
                    TrySendError::Full(_) => "full",
                    TrySendError::Closed(_) => "closed",
                };
                tracing::debug!(
                    room_id = %self.room_id,
                    connection_id = %connection_id,
                    queue = queue,
                    "Outbound queue unavailable, dropping connection"
                );
                self.lagging.push(connection_id.clone());
            }
        }
    }

    /// Implicit leave for every connection that could not take an event.
    fn evict_lagging(&mut self, at: DateTime<Utc>) {
        while let Some(connection_id) = self.lagging.pop() {
            if let Ok(info) = self.detach(&connection_id, at) {
                tracing::warn!(
                    room_id = %self.room_id,
                    connection_id = %connection_id,
                    user_id = %info.user_id,
                    "Dropped connection with stalled outbound queue"
                );
            }
        }
    }
}
