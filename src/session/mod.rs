mod handler;
mod participant;
mod registry;
mod room;
mod signaling;

pub use handler::SignalingHandler;
pub use participant::{JoinRequest, MediaFlags, Participant, ParticipantInfo, ParticipantRole, PresenceState};
pub use registry::{RegistryStats, SessionRegistry};
pub use room::{ClosedState, JoinAccepted, Room, RoomActivity};
pub use signaling::{ChatMessage, ClientMessage, CloseReason, ControlEvent, EventSender, ServerEvent};
