//! Live session lifecycle and real-time coordination for scheduled classes.
//!
//! - [`lifecycle`] moves classes SCHEDULED → LIVE → ENDED on a periodic sweep.
//! - [`session`] hosts rooms: presence, signaling relay, chat and control.
//! - [`attendance`] turns presence intervals into attendance summaries.

pub mod api;
pub mod attendance;
pub mod class;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod session;

pub use error::{Result, SessionError};
