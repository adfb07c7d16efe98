//! Attendance derived from presence intervals.
//!
//! Intervals are clipped to the class window `[actual_start, actual_end]`
//! and merged per user before summing, so overlapping connections and
//! rejoins are never double-counted.

mod tracker;

pub use tracker::{FinalizeRequest, PresenceTracker};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous span during which a participant was connected.
/// `left_at` is `None` while the connection is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceInterval {
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl PresenceInterval {
    pub fn open(joined_at: DateTime<Utc>) -> Self {
        Self {
            joined_at,
            left_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.left_at.is_none()
    }

    /// Closes the interval. A leave earlier than the join collapses the
    /// interval to zero length.
    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.left_at.is_none() {
            self.left_at = Some(at.max(self.joined_at));
        }
    }

    /// The interval restricted to `window`, treating an open interval as
    /// running until the window end. Empty results are dropped.
    fn clip(&self, window: &ClassWindow) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.joined_at.max(window.start);
        let end = self.left_at.unwrap_or(window.end).min(window.end);
        (end > start).then_some((start, end))
    }
}

/// Presence history for one user within one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub display_name: Option<String>,
    pub intervals: Vec<PresenceInterval>,
}

impl PresenceRecord {
    /// Milliseconds present inside `window`, with overlapping intervals merged.
    pub fn present_millis(&self, window: &ClassWindow) -> i64 {
        let mut spans: Vec<(DateTime<Utc>, DateTime<Utc>)> =
            self.intervals.iter().filter_map(|i| i.clip(window)).collect();
        spans.sort_by_key(|(start, _)| *start);

        let mut total = 0;
        let mut current: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
        for (start, end) in spans {
            current = match current {
                Some((cur_start, cur_end)) if start <= cur_end => {
                    Some((cur_start, cur_end.max(end)))
                }
                Some((cur_start, cur_end)) => {
                    total += (cur_end - cur_start).num_milliseconds();
                    Some((start, end))
                }
                None => Some((start, end)),
            };
        }
        if let Some((start, end)) = current {
            total += (end - start).num_milliseconds();
        }
        total
    }
}

/// The span attendance is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ClassWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    pub fn effective_millis(&self) -> i64 {
        (self.end - self.start).num_milliseconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceClassification {
    Present,
    LeftEarly,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendancePolicy {
    /// Fraction of the effective duration needed to count as present (inclusive)
    pub presence_threshold: f64,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            presence_threshold: 0.8,
        }
    }
}

impl AttendancePolicy {
    pub fn classify(&self, present_millis: i64, effective_millis: i64) -> PresenceClassification {
        if present_millis <= 0 {
            return PresenceClassification::Absent;
        }
        if effective_millis > 0
            && present_millis as f64 / effective_millis as f64 >= self.presence_threshold
        {
            PresenceClassification::Present
        } else {
            PresenceClassification::LeftEarly
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantAttendance {
    pub user_id: String,
    pub display_name: Option<String>,
    pub total_present_seconds: f64,
    pub attendance_percentage: f64,
    pub classification: PresenceClassification,
    /// Joined without an enrollment; excluded from the class-level counts
    pub guest: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub class_id: String,
    pub room_id: String,
    pub actual_start_time: DateTime<Utc>,
    pub actual_end_time: DateTime<Utc>,
    /// End of the class, used to order recent stats
    pub class_ended_at: DateTime<Utc>,
    pub total_students: usize,
    pub present_count: usize,
    pub left_early_count: usize,
    pub absent_count: usize,
    pub average_attendance_percentage: f64,
    pub participants: Vec<ParticipantAttendance>,
    /// False for on-demand summaries of a class still in progress
    pub finalized: bool,
}

/// Identifies the class a summary is computed for.
#[derive(Debug, Clone)]
pub struct SummaryScope<'a> {
    pub class_id: &'a str,
    pub room_id: &'a str,
    pub window: ClassWindow,
    pub finalized: bool,
}

/// Builds the roster-based summary. Enrolled users without a presence record
/// count as ABSENT with 0%. Users with presence but no enrollment are listed
/// as guests after the roster and do not affect the aggregates.
pub fn compute_summary(
    scope: SummaryScope<'_>,
    roster: &[String],
    records: &[PresenceRecord],
    policy: &AttendancePolicy,
) -> AttendanceSummary {
    let effective = scope.window.effective_millis();
    let mut participants = Vec::with_capacity(roster.len());
    let mut seen = HashSet::new();

    for user_id in roster {
        if !seen.insert(user_id.as_str()) {
            continue;
        }
        let record = records.iter().find(|r| &r.user_id == user_id);
        let present = record.map_or(0, |r| r.present_millis(&scope.window));
        participants.push(participant_attendance(
            user_id,
            record.and_then(|r| r.display_name.clone()),
            present,
            effective,
            policy,
            false,
        ));
    }

    let mut guests: Vec<&PresenceRecord> = records
        .iter()
        .filter(|r| !seen.contains(r.user_id.as_str()))
        .collect();
    guests.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    for record in guests {
        participants.push(participant_attendance(
            &record.user_id,
            record.display_name.clone(),
            record.present_millis(&scope.window),
            effective,
            policy,
            true,
        ));
    }

    let enrolled: Vec<&ParticipantAttendance> = participants.iter().filter(|p| !p.guest).collect();
    let count = |class: PresenceClassification| {
        enrolled.iter().filter(|p| p.classification == class).count()
    };
    let total_students = enrolled.len();
    let present_count = count(PresenceClassification::Present);
    let left_early_count = count(PresenceClassification::LeftEarly);
    let absent_count = count(PresenceClassification::Absent);
    let average = if enrolled.is_empty() {
        0.0
    } else {
        enrolled.iter().map(|p| p.attendance_percentage).sum::<f64>() / total_students as f64
    };

    AttendanceSummary {
        class_id: scope.class_id.to_string(),
        room_id: scope.room_id.to_string(),
        actual_start_time: scope.window.start,
        actual_end_time: scope.window.end,
        class_ended_at: scope.window.end,
        total_students,
        present_count,
        left_early_count,
        absent_count,
        average_attendance_percentage: average,
        participants,
        finalized: scope.finalized,
    }
}

fn participant_attendance(
    user_id: &str,
    display_name: Option<String>,
    present_millis: i64,
    effective_millis: i64,
    policy: &AttendancePolicy,
    guest: bool,
) -> ParticipantAttendance {
    let percentage = if effective_millis > 0 {
        (present_millis as f64 / effective_millis as f64 * 100.0).min(100.0)
    } else {
        0.0
    };
    ParticipantAttendance {
        user_id: user_id.to_string(),
        display_name,
        total_present_seconds: present_millis as f64 / 1000.0,
        attendance_percentage: percentage,
        classification: policy.classify(present_millis, effective_millis),
        guest,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
    }

    fn closed(from: DateTime<Utc>, to: DateTime<Utc>) -> PresenceInterval {
        PresenceInterval {
            joined_at: from,
            left_at: Some(to),
        }
    }

    fn record(user_id: &str, intervals: Vec<PresenceInterval>) -> PresenceRecord {
        PresenceRecord {
            user_id: user_id.to_string(),
            display_name: None,
            intervals,
        }
    }

    fn scope(window: ClassWindow) -> SummaryScope<'static> {
        SummaryScope {
            class_id: "c1",
            room_id: "room-1",
            window,
            finalized: true,
        }
    }

    #[test]
    fn test_intervals_clipped_to_window() {
        let window = ClassWindow::new(at(10, 0), at(11, 0));
        let r = record("a", vec![closed(at(9, 30), at(10, 30)), closed(at(10, 50), at(11, 30))]);
        assert_eq!(r.present_millis(&window), Duration::minutes(40).num_milliseconds());
    }

    #[test]
    fn test_open_interval_runs_to_window_end() {
        let window = ClassWindow::new(at(10, 0), at(10, 45));
        let r = record("a", vec![PresenceInterval::open(at(10, 15))]);
        assert_eq!(r.present_millis(&window), Duration::minutes(30).num_milliseconds());
    }

    #[test]
    fn test_overlapping_intervals_not_double_counted() {
        let window = ClassWindow::new(at(10, 0), at(11, 0));
        let r = record(
            "a",
            vec![
                closed(at(10, 0), at(10, 30)),
                closed(at(10, 20), at(10, 40)),
                closed(at(10, 50), at(10, 55)),
            ],
        );
        assert_eq!(r.present_millis(&window), Duration::minutes(45).num_milliseconds());
    }

    #[test]
    fn test_presence_never_exceeds_effective_duration() {
        let window = ClassWindow::new(at(10, 0), at(11, 0));
        let mut intervals = Vec::new();
        let mut t = at(9, 0);
        for _ in 0..20 {
            intervals.push(closed(t, t + Duration::minutes(7)));
            t += Duration::minutes(5);
        }
        let r = record("a", intervals);
        assert!(r.present_millis(&window) <= window.effective_millis());
    }

    #[test]
    fn test_close_before_join_collapses() {
        let mut interval = PresenceInterval::open(at(10, 10));
        interval.close(at(10, 5));
        assert_eq!(interval.left_at, Some(at(10, 10)));

        interval.close(at(10, 50));
        assert_eq!(interval.left_at, Some(at(10, 10)));
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let policy = AttendancePolicy::default();
        let effective = 100_000;
        assert_eq!(policy.classify(80_000, effective), PresenceClassification::Present);
        assert_eq!(policy.classify(79_999, effective), PresenceClassification::LeftEarly);
        assert_eq!(policy.classify(1, effective), PresenceClassification::LeftEarly);
        assert_eq!(policy.classify(0, effective), PresenceClassification::Absent);
    }

    #[test]
    fn test_exactly_eighty_percent_of_an_hour() {
        let window = ClassWindow::new(at(10, 0), at(11, 0));
        let r = record("a", vec![closed(at(10, 0), at(10, 48))]);
        let summary = compute_summary(scope(window), &["a".to_string()], &[r], &AttendancePolicy::default());
        assert_eq!(summary.participants[0].classification, PresenceClassification::Present);
        assert_eq!(summary.participants[0].total_present_seconds, 2880.0);
    }

    #[test]
    fn test_enrolled_never_joined_is_absent() {
        let window = ClassWindow::new(at(10, 0), at(11, 0));
        let roster = vec!["a".to_string(), "c".to_string()];
        let records = vec![record("a", vec![closed(at(10, 0), at(11, 0))])];

        let summary = compute_summary(scope(window), &roster, &records, &AttendancePolicy::default());
        assert_eq!(summary.total_students, 2);
        assert_eq!(summary.present_count, 1);
        assert_eq!(summary.absent_count, 1);
        let c = &summary.participants[1];
        assert_eq!(c.user_id, "c");
        assert_eq!(c.total_present_seconds, 0.0);
        assert_eq!(c.classification, PresenceClassification::Absent);
        assert!((summary.average_attendance_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_guests_listed_but_excluded_from_aggregates() {
        let window = ClassWindow::new(at(10, 0), at(11, 0));
        let roster = vec!["a".to_string()];
        let records = vec![
            record("a", vec![closed(at(10, 0), at(10, 30))]),
            record("visitor", vec![closed(at(10, 0), at(11, 0))]),
        ];

        let summary = compute_summary(scope(window), &roster, &records, &AttendancePolicy::default());
        assert_eq!(summary.total_students, 1);
        assert_eq!(summary.present_count, 0);
        assert_eq!(summary.left_early_count, 1);
        assert_eq!(summary.participants.len(), 2);
        assert!(summary.participants[1].guest);
        assert_eq!(summary.participants[1].classification, PresenceClassification::Present);
        assert!((summary.average_attendance_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_length_window_marks_everyone_absent() {
        let window = ClassWindow::new(at(10, 0), at(10, 0));
        let records = vec![record("a", vec![closed(at(9, 0), at(11, 0))])];
        let summary = compute_summary(scope(window), &["a".to_string()], &records, &AttendancePolicy::default());
        assert_eq!(summary.absent_count, 1);
        assert_eq!(summary.average_attendance_percentage, 0.0);
    }

    #[test]
    fn test_empty_roster() {
        let window = ClassWindow::new(at(10, 0), at(11, 0));
        let summary = compute_summary(scope(window), &[], &[], &AttendancePolicy::default());
        assert_eq!(summary.total_students, 0);
        assert_eq!(summary.average_attendance_percentage, 0.0);
    }
}
