use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use super::participant::{ParticipantInfo, ParticipantRole};

/// Bounded outbound queue for one connection. The transport drains it and
/// performs the actual network writes; a connection whose queue fills up is
/// dropped from its room.
pub type EventSender = mpsc::Sender<ServerEvent>;

/// Messages accepted from real-time clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    Join {
        room_id: String,
        user_id: String,
        name: Option<String>,
        #[serde(default)]
        role: ParticipantRole,
    },

    Leave,

    /// Opaque negotiation payload (session descriptions, candidates)
    Signal {
        to: String,
        payload: Value,
    },

    Chat {
        text: String,
    },

    Control {
        event: ControlEvent,
        #[serde(default)]
        payload: Value,
    },

    /// Host-only: end the class for everyone
    EndClass,

    /// Host-only: drop another participant from the room
    RemoveParticipant {
        connection_id: String,
    },
}

/// Events pushed to real-time clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    Joined {
        room_id: String,
        connection_id: String,
        participants: Vec<ParticipantInfo>,
        recent_chat: Vec<ChatMessage>,
    },

    ParticipantJoined {
        room_id: String,
        participant: ParticipantInfo,
    },

    ParticipantLeft {
        room_id: String,
        connection_id: String,
        user_id: String,
    },

    SignalReceived {
        room_id: String,
        from: String,
        payload: Value,
    },

    ChatReceived {
        room_id: String,
        message: ChatMessage,
    },

    ControlReceived {
        room_id: String,
        from: String,
        event: ControlEvent,
        payload: Value,
    },

    RoomClosed {
        room_id: String,
        reason: CloseReason,
    },

    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Position in the room's chat order
    pub seq: u64,
    pub from: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlEvent {
    HandRaise,
    HandLower,
    MicOn,
    MicOff,
    CameraOn,
    CameraOff,
    ScreenShareStart,
    ScreenShareStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Scheduled end time reached
    ScheduleEnded,
    HostEnded,
    /// Host left and the room stayed empty
    HostAbsent,
    /// Room left empty after its class was no longer running
    Idle,
    Cancelled,
}

impl CloseReason {
    /// Cancelled classes do not produce an attendance summary
    pub fn records_attendance(self) -> bool {
        !matches!(self, CloseReason::Cancelled)
    }
}
