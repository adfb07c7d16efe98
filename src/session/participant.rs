use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signaling::ControlEvent;
use crate::attendance::{PresenceInterval, PresenceRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Host,
    CoHost,
    #[default]
    Attendee,
}

impl ParticipantRole {
    /// Roles allowed to end the class or remove participants
    pub fn can_moderate(self) -> bool {
        matches!(self, ParticipantRole::Host | ParticipantRole::CoHost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Joined,
    /// Interval closed; a new join opens a fresh interval
    Rejoinable,
}

/// Last-known media flags. Informational only, never used for attendance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlags {
    pub cam_on: bool,
    pub mic_on: bool,
    pub hand_raised: bool,
    pub screen_sharing: bool,
}

impl MediaFlags {
    pub fn apply(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::HandRaise => self.hand_raised = true,
            ControlEvent::HandLower => self.hand_raised = false,
            ControlEvent::MicOn => self.mic_on = true,
            ControlEvent::MicOff => self.mic_on = false,
            ControlEvent::CameraOn => self.cam_on = true,
            ControlEvent::CameraOff => self.cam_on = false,
            ControlEvent::ScreenShareStart => self.screen_sharing = true,
            ControlEvent::ScreenShareStop => self.screen_sharing = false,
        }
    }
}

/// Who is joining. Profile data beyond this stays with the user directory.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub user_id: String,
    pub display_name: Option<String>,
    pub role: ParticipantRole,
}

/// Public view of a participant sent to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub connection_id: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub role: ParticipantRole,
    pub flags: MediaFlags,
}

#[derive(Debug, Clone)]
pub struct Participant {
    /// Most recent connection; replaced on rejoin
    pub connection_id: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub state: PresenceState,
    pub intervals: Vec<PresenceInterval>,
    pub flags: MediaFlags,
}

impl Participant {
    pub fn new(connection_id: String, request: JoinRequest, now: DateTime<Utc>) -> Self {
        Self {
            connection_id,
            user_id: request.user_id,
            display_name: request.display_name,
            role: request.role,
            joined_at: now,
            state: PresenceState::Joined,
            intervals: vec![PresenceInterval::open(now)],
            flags: MediaFlags::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == PresenceState::Joined
    }

    /// Reattaches under a new connection and opens a new interval.
    pub fn rejoin(&mut self, connection_id: String, request: JoinRequest, now: DateTime<Utc>) {
        self.close_interval(now);
        self.connection_id = connection_id;
        if request.display_name.is_some() {
            self.display_name = request.display_name;
        }
        self.role = request.role;
        self.state = PresenceState::Joined;
        self.flags = MediaFlags::default();
        self.intervals.push(PresenceInterval::open(now));
    }

    pub fn leave(&mut self, at: DateTime<Utc>) {
        self.close_interval(at);
        self.state = PresenceState::Rejoinable;
    }

    fn close_interval(&mut self, at: DateTime<Utc>) {
        if let Some(interval) = self.intervals.iter_mut().rev().find(|i| i.is_open()) {
            interval.close(at);
        }
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            connection_id: self.connection_id.clone(),
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            flags: self.flags,
        }
    }

    pub fn presence_record(&self) -> PresenceRecord {
        PresenceRecord {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            intervals: self.intervals.clone(),
        }
    }
}
