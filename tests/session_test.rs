// Room membership, relay and presence tests against the registry

mod common;

use chrono::Duration;
use common::{at, Harness};
use live_classroom::attendance::PresenceClassification;
use live_classroom::config::{SchedulerConfig, SessionConfig};
use live_classroom::error::SessionError;
use live_classroom::session::{
    CloseReason, ControlEvent, JoinRequest, ParticipantRole, ServerEvent,
};
use serde_json::json;
use tokio::sync::mpsc;

async fn live_harness(session: SessionConfig, roster: &[&str]) -> Harness {
    let h = Harness::with_config(at(10, 1), SchedulerConfig::default(), session);
    h.add_class("c1", "room-1", at(10, 0), at(11, 0), roster).await;
    h.scheduler.sweep().await.unwrap();
    h
}

#[tokio::test]
async fn test_join_before_pre_join_grace_is_rejected() {
    let h = Harness::new(at(9, 45));
    h.add_class("c1", "room-1", at(10, 0), at(11, 0), &["a"]).await;

    let err = h.join("room-1", "a", ParticipantRole::Attendee).await.err().unwrap();
    assert!(matches!(err, SessionError::RoomNotLive(_)));
    assert_eq!(err.rejection_code(), "not-yet-live");

    // Early joiners wait in the room; time before the start does not count
    h.set_time(at(9, 55));
    let _a = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();
    h.set_time(at(10, 0));
    h.scheduler.sweep().await.unwrap();
    h.set_time(at(10, 50));
    h.registry.leave("room-1", "conn-a").await.unwrap();
    h.set_time(at(11, 0));
    h.scheduler.sweep().await.unwrap();

    let summary = h.registry.attendance_summary("c1").await.unwrap();
    assert_eq!(summary.participants[0].total_present_seconds, 50.0 * 60.0);
    assert_eq!(summary.participants[0].classification, PresenceClassification::Present);
}

#[tokio::test]
async fn test_join_unknown_room_is_not_found() {
    let h = live_harness(SessionConfig::default(), &[]).await;
    let err = h.join("nope", "a", ParticipantRole::Attendee).await.err().unwrap();
    assert!(matches!(err, SessionError::RoomNotFound(_)));
}

#[tokio::test]
async fn test_room_full_and_superseded_connection() {
    let session = SessionConfig {
        max_participants: 2,
        ..SessionConfig::default()
    };
    let h = live_harness(session, &[]).await;
    let mut a = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();
    let mut b = h.join("room-1", "b", ParticipantRole::Attendee).await.unwrap();

    let err = h.join("room-1", "c", ParticipantRole::Attendee).await.err().unwrap();
    assert!(matches!(err, SessionError::RoomFull { max: 2, .. }));

    // Same user from a second connection replaces the first and fits
    let (tx, _rx) = mpsc::channel(64);
    let request = JoinRequest {
        user_id: "a".to_string(),
        display_name: None,
        role: ParticipantRole::Attendee,
    };
    let accepted = h.registry.join("room-1", "conn-a2", request, tx).await.unwrap();
    assert_eq!(accepted.participants.len(), 2);

    assert!(a
        .drain()
        .iter()
        .any(|e| matches!(e, ServerEvent::Error { code, .. } if code == "superseded")));
    let seen_by_b = b.drain();
    assert!(matches!(
        &seen_by_b[0],
        ServerEvent::ParticipantLeft { connection_id, .. } if connection_id == "conn-a"
    ));
    assert!(matches!(&seen_by_b[1], ServerEvent::ParticipantJoined { .. }));
    assert_eq!(h.registry.stats().await.connected_participants, 2);
}

#[tokio::test]
async fn test_chat_is_ordered_and_history_is_bounded() {
    let session = SessionConfig {
        chat_log_capacity: 2,
        ..SessionConfig::default()
    };
    let h = live_harness(session, &[]).await;
    let mut a = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();
    let mut b = h.join("room-1", "b", ParticipantRole::Attendee).await.unwrap();
    a.drain();

    for text in ["one", "two", "three"] {
        h.registry
            .broadcast_chat("room-1", "conn-a", text.to_string())
            .await
            .unwrap();
    }

    let received: Vec<(u64, String)> = b
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            ServerEvent::ChatReceived { message, .. } => Some((message.seq, message.text)),
            _ => None,
        })
        .collect();
    assert_eq!(
        received,
        vec![
            (1, "one".to_string()),
            (2, "two".to_string()),
            (3, "three".to_string()),
        ]
    );
    // No echo to the sender
    assert!(a.drain().is_empty());

    let late = h.join("room-1", "c", ParticipantRole::Attendee).await.unwrap();
    let history: Vec<u64> = late.accepted.recent_chat.iter().map(|m| m.seq).collect();
    assert_eq!(history, vec![2, 3]);
    assert_eq!(late.accepted.recent_chat[0].display_name.as_deref(), Some("A"));
}

#[tokio::test]
async fn test_signal_relay_targets_one_connection() {
    let h = live_harness(SessionConfig::default(), &[]).await;
    let mut a = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();
    let mut b = h.join("room-1", "b", ParticipantRole::Attendee).await.unwrap();
    a.drain();

    let offer = json!({"sdp": "v=0", "kind": "offer"});
    h.registry
        .relay_signal("room-1", "conn-a", "conn-b", offer.clone())
        .await
        .unwrap();
    assert_eq!(
        b.drain(),
        vec![ServerEvent::SignalReceived {
            room_id: "room-1".to_string(),
            from: "conn-a".to_string(),
            payload: offer,
        }]
    );
    assert!(a.drain().is_empty());

    let err = h
        .registry
        .relay_signal("room-1", "conn-a", "conn-missing", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::UnknownParticipant(_)));

    let err = h
        .registry
        .relay_signal("room-1", "conn-stranger", "conn-b", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::UnknownParticipant(_)));
}

#[tokio::test]
async fn test_control_events_update_flags() {
    let h = live_harness(SessionConfig::default(), &[]).await;
    let _a = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();
    let mut b = h.join("room-1", "b", ParticipantRole::Attendee).await.unwrap();

    h.registry
        .broadcast_control("room-1", "conn-a", ControlEvent::HandRaise, json!(null))
        .await
        .unwrap();
    assert!(matches!(
        &b.drain()[..],
        [ServerEvent::ControlReceived { event: ControlEvent::HandRaise, from, .. }] if from == "conn-a"
    ));

    let c = h.join("room-1", "c", ParticipantRole::Attendee).await.unwrap();
    let a_info = c
        .accepted
        .participants
        .iter()
        .find(|p| p.user_id == "a")
        .unwrap();
    assert!(a_info.flags.hand_raised);
}

#[tokio::test]
async fn test_rejoin_sums_intervals_once() {
    let h = live_harness(SessionConfig::default(), &["a"]).await;

    h.set_time(at(10, 5));
    let _first = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();

    // Dropped connection noticed late; last sign of life was 10:10
    h.set_time(at(10, 12));
    h.registry.disconnect("room-1", "conn-a", at(10, 10)).await;

    let _second = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();
    h.set_time(at(10, 59));
    h.registry.leave("room-1", "conn-a").await.unwrap();

    h.set_time(at(11, 1));
    h.scheduler.sweep().await.unwrap();

    let summary = h.registry.attendance_summary("c1").await.unwrap();
    assert_eq!(summary.participants.len(), 1);
    assert_eq!(summary.participants[0].total_present_seconds, 52.0 * 60.0);
    assert_eq!(summary.present_count, 1);
}

#[tokio::test]
async fn test_live_summary_counts_open_intervals_up_to_now() {
    let h = live_harness(SessionConfig::default(), &["a", "b"]).await;
    let _a = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();

    h.set_time(at(10, 11));
    let summary = h.registry.attendance_summary("c1").await.unwrap();
    assert!(!summary.finalized);
    assert_eq!(summary.actual_end_time, at(10, 11));
    assert_eq!(summary.participants[0].total_present_seconds, 600.0);
    assert_eq!(summary.present_count, 1);
    assert_eq!(summary.absent_count, 1);

    let err = h.registry.attendance_summary("missing").await.unwrap_err();
    assert!(matches!(err, SessionError::ClassNotFound(_)));
}

#[tokio::test]
async fn test_closed_room_rejects_then_is_reaped() {
    let h = live_harness(SessionConfig::default(), &[]).await;
    let mut a = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();
    let mut b = h.join("room-1", "b", ParticipantRole::Attendee).await.unwrap();
    a.drain();

    h.set_time(at(11, 1));
    h.scheduler.sweep().await.unwrap();

    let closed = ServerEvent::RoomClosed {
        room_id: "room-1".to_string(),
        reason: CloseReason::ScheduleEnded,
    };
    assert_eq!(a.drain(), vec![closed.clone()]);
    assert_eq!(b.drain(), vec![closed]);

    let err = h.join("room-1", "c", ParticipantRole::Attendee).await.err().unwrap();
    assert!(matches!(err, SessionError::RoomClosed(_)));
    let err = h
        .registry
        .broadcast_chat("room-1", "conn-a", "late".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::RoomClosed(_)));

    h.clock.advance(Duration::seconds(60));
    assert_eq!(h.registry.reap_closed_rooms().await, 0);
    h.clock.advance(Duration::seconds(60));
    assert_eq!(h.registry.reap_closed_rooms().await, 1);

    let err = h.join("room-1", "c", ParticipantRole::Attendee).await.err().unwrap();
    assert!(matches!(err, SessionError::RoomClosed(_)));
    let err = h
        .registry
        .relay_signal("room-1", "conn-a", "conn-b", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::RoomNotFound(_)));
}

#[tokio::test]
async fn test_moderator_can_remove_participant() {
    let h = live_harness(SessionConfig::default(), &[]).await;
    let _host = h.join("room-1", "instructor", ParticipantRole::CoHost).await.unwrap();
    let mut a = h.join("room-1", "a", ParticipantRole::Attendee).await.unwrap();
    let mut b = h.join("room-1", "b", ParticipantRole::Attendee).await.unwrap();
    a.drain();

    let err = h
        .registry
        .remove_participant("room-1", "conn-b", "conn-a")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Unauthorized(_)));

    h.registry
        .remove_participant("room-1", "conn-instructor", "conn-a")
        .await
        .unwrap();
    assert!(matches!(&a.drain()[..], [ServerEvent::Error { code, .. }] if code == "removed"));
    assert!(b
        .drain()
        .iter()
        .any(|e| matches!(e, ServerEvent::ParticipantLeft { user_id, .. } if user_id == "a")));
    assert_eq!(h.registry.stats().await.connected_participants, 2);
}
