use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;

use super::participant::JoinRequest;
use super::registry::SessionRegistry;
use super::signaling::{ClientMessage, CloseReason, EventSender, ServerEvent};
use crate::clock::Clock;
use crate::error::{Result, SessionError};
use crate::lifecycle::LifecycleScheduler;

/// Per-connection message handler. Owns the connection id and the room it
/// joined; the transport feeds it parsed messages and calls
/// [`cleanup`](Self::cleanup) when the connection goes away.
pub struct SignalingHandler {
    registry: Arc<SessionRegistry>,
    scheduler: Arc<LifecycleScheduler>,
    clock: Arc<dyn Clock>,
    sender: EventSender,
    connection_id: String,
    room_id: Option<String>,
    last_seen: DateTime<Utc>,
}

impl SignalingHandler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        scheduler: Arc<LifecycleScheduler>,
        clock: Arc<dyn Clock>,
        sender: EventSender,
    ) -> Self {
        let last_seen = clock.now();
        Self {
            registry,
            scheduler,
            clock,
            sender,
            connection_id: generate_connection_id(),
            room_id: None,
            last_seen,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Records liveness for transports that see pings or other frames.
    pub fn touch(&mut self) {
        self.last_seen = self.clock.now();
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        self.touch();
        if let Err(e) = self.dispatch(message).await {
            tracing::debug!(
                connection_id = %self.connection_id,
                error = %e,
                "Rejected client message"
            );
            let _ = self.sender.try_send(ServerEvent::Error {
                code: e.rejection_code().to_string(),
                message: e.to_string(),
            });
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Join {
                room_id,
                user_id,
                name,
                role,
            } => {
                if let Some(current) = self.room_id.clone() {
                    if self.registry.is_attached(&current, &self.connection_id).await {
                        return Err(SessionError::InvalidMessage(format!(
                            "already joined room {}",
                            current
                        )));
                    }
                    // Closed, removed or superseded; the old room is gone
                    self.room_id = None;
                }
                let request = JoinRequest {
                    user_id,
                    display_name: name,
                    role,
                };
                let accepted = self
                    .registry
                    .join(&room_id, &self.connection_id, request, self.sender.clone())
                    .await?;
                self.room_id = Some(room_id.clone());
                let _ = self.sender.try_send(ServerEvent::Joined {
                    room_id,
                    connection_id: accepted.connection_id,
                    participants: accepted.participants,
                    recent_chat: accepted.recent_chat,
                });
                Ok(())
            }

            ClientMessage::Leave => {
                let room_id = self.joined_room()?;
                let result = self.registry.leave(&room_id, &self.connection_id).await;
                self.room_id = None;
                result
            }

            ClientMessage::Signal { to, payload } => {
                let room_id = self.joined_room()?;
                self.registry
                    .relay_signal(&room_id, &self.connection_id, &to, payload)
                    .await
            }

            ClientMessage::Chat { text } => {
                let room_id = self.joined_room()?;
                self.registry
                    .broadcast_chat(&room_id, &self.connection_id, text)
                    .await
                    .map(|_| ())
            }

            ClientMessage::Control { event, payload } => {
                let room_id = self.joined_room()?;
                self.registry
                    .broadcast_control(&room_id, &self.connection_id, event, payload)
                    .await
            }

            ClientMessage::EndClass => {
                let room_id = self.joined_room()?;
                let class_id = self
                    .registry
                    .require_moderator(&room_id, &self.connection_id)
                    .await?;
                self.scheduler
                    .end_class(&class_id, CloseReason::HostEnded)
                    .await?;
                self.room_id = None;
                Ok(())
            }

            ClientMessage::RemoveParticipant { connection_id } => {
                let room_id = self.joined_room()?;
                self.registry
                    .remove_participant(&room_id, &self.connection_id, &connection_id)
                    .await
            }
        }
    }

    /// Implicit leave when the transport closes. An unclean close uses the
    /// last time the connection was seen alive.
    pub async fn cleanup(&mut self, clean: bool) {
        if clean {
            self.touch();
        }
        if let Some(room_id) = self.room_id.take() {
            self.registry
                .disconnect(&room_id, &self.connection_id, self.last_seen)
                .await;
        }
    }

    fn joined_room(&self) -> Result<String> {
        self.room_id
            .clone()
            .ok_or_else(|| SessionError::InvalidMessage("not joined to a room".to_string()))
    }
}

fn generate_connection_id() -> String {
    let mut rng = rand::thread_rng();
    format!("conn-{:016x}", rng.gen::<u64>())
}
