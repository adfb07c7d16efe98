// Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;

use live_classroom::attendance::{AttendancePolicy, AttendanceSummary, PresenceTracker};
use live_classroom::class::{ClassRecord, ClassStatus, ClassStore, InMemoryClassStore};
use live_classroom::clock::{Clock, ManualClock};
use live_classroom::config::{SchedulerConfig, SessionConfig};
use live_classroom::error::{Result, SessionError};
use live_classroom::lifecycle::LifecycleScheduler;
use live_classroom::session::{JoinAccepted, JoinRequest, ParticipantRole, ServerEvent, SessionRegistry};

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0).unwrap()
}

/// In-memory store that can be told to fail lookups or specific writes
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryClassStore,
    fail_saves: AtomicBool,
    fail_reads: AtomicBool,
    fail_transitions: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Fails single-record lookups (`get`, `find_by_room`)
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SessionError::store("injected read failure"));
        }
        Ok(())
    }

    pub fn fail_transitions_for(&self, class_id: &str) {
        self.fail_transitions.lock().unwrap().insert(class_id.to_string());
    }

    pub fn heal_transitions(&self) {
        self.fail_transitions.lock().unwrap().clear();
    }
}

#[async_trait]
impl ClassStore for FlakyStore {
    async fn list_by_status(&self, status: ClassStatus) -> Result<Vec<ClassRecord>> {
        self.inner.list_by_status(status).await
    }

    async fn get(&self, class_id: &str) -> Result<Option<ClassRecord>> {
        self.check_reads()?;
        self.inner.get(class_id).await
    }

    async fn find_by_room(&self, room_id: &str) -> Result<Option<ClassRecord>> {
        self.check_reads()?;
        self.inner.find_by_room(room_id).await
    }

    async fn update_status(
        &self,
        class_id: &str,
        expected: ClassStatus,
        new_status: ClassStatus,
        at: DateTime<Utc>,
    ) -> Result<ClassRecord> {
        if self.fail_transitions.lock().unwrap().contains(class_id) {
            return Err(SessionError::store("injected transition failure"));
        }
        self.inner.update_status(class_id, expected, new_status, at).await
    }

    async fn get_roster(&self, class_id: &str) -> Result<Vec<String>> {
        self.inner.get_roster(class_id).await
    }

    async fn save_attendance(&self, summary: &AttendanceSummary) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SessionError::store("injected save failure"));
        }
        self.inner.save_attendance(summary).await
    }

    async fn get_attendance(&self, class_id: &str) -> Result<Option<AttendanceSummary>> {
        self.inner.get_attendance(class_id).await
    }

    async fn list_recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceSummary>> {
        self.inner.list_recent_attendance(limit).await
    }
}

/// Fully wired engine on a manual clock
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<FlakyStore>,
    pub tracker: Arc<PresenceTracker>,
    pub registry: Arc<SessionRegistry>,
    pub scheduler: Arc<LifecycleScheduler>,
}

impl Harness {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_config(start, SchedulerConfig::default(), SessionConfig::default())
    }

    pub fn with_config(
        start: DateTime<Utc>,
        scheduler_config: SchedulerConfig,
        session_config: SessionConfig,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(FlakyStore::default());
        let dyn_store: Arc<dyn ClassStore> = store.clone();
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let tracker = Arc::new(PresenceTracker::new(
            dyn_store.clone(),
            AttendancePolicy {
                presence_threshold: session_config.presence_threshold,
            },
        ));
        let registry = SessionRegistry::new(
            dyn_store.clone(),
            tracker.clone(),
            dyn_clock.clone(),
            session_config,
        );
        let scheduler = LifecycleScheduler::new(dyn_store, registry.clone(), dyn_clock, scheduler_config);

        Self {
            clock,
            store,
            tracker,
            registry,
            scheduler,
        }
    }

    pub async fn add_class(
        &self,
        class_id: &str,
        room_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        roster: &[&str],
    ) {
        self.store
            .inner
            .insert(
                ClassRecord::scheduled(class_id, room_id, start, end),
                roster.iter().map(|s| s.to_string()).collect(),
            )
            .await;
    }

    pub async fn class(&self, class_id: &str) -> ClassRecord {
        self.store.get(class_id).await.unwrap().unwrap()
    }

    pub fn set_time(&self, time: DateTime<Utc>) {
        self.clock.set(time);
    }

    /// Joins as `user_id` on connection `conn-<user_id>`.
    pub async fn join(&self, room_id: &str, user_id: &str, role: ParticipantRole) -> Result<Client> {
        let (tx, rx) = mpsc::channel(64);
        let connection_id = format!("conn-{}", user_id);
        let request = JoinRequest {
            user_id: user_id.to_string(),
            display_name: Some(user_id.to_uppercase()),
            role,
        };
        let accepted = self.registry.join(room_id, &connection_id, request, tx).await?;
        Ok(Client {
            connection_id,
            accepted,
            events: rx,
        })
    }
}

pub struct Client {
    pub connection_id: String,
    pub accepted: JoinAccepted,
    pub events: mpsc::Receiver<ServerEvent>,
}

impl Client {
    /// Everything queued so far
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
