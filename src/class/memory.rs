use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{ClassRecord, ClassStatus, ClassStore};
use crate::attendance::AttendanceSummary;
use crate::error::{Result, SessionError};

/// Seed file entry: a class record plus its enrollment roster
#[derive(Debug, Clone, Deserialize)]
pub struct ClassSeed {
    #[serde(flatten)]
    pub record: ClassRecord,
    #[serde(default)]
    pub roster: Vec<String>,
}

/// Process-local class store used by the server binary and the tests.
#[derive(Default)]
pub struct InMemoryClassStore {
    classes: RwLock<HashMap<String, ClassRecord>>,
    rosters: RwLock<HashMap<String, Vec<String>>>,
    attendance: RwLock<HashMap<String, AttendanceSummary>>,
}

impl InMemoryClassStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: ClassRecord, roster: Vec<String>) {
        let class_id = record.id.clone();
        self.classes.write().await.insert(class_id.clone(), record);
        self.rosters.write().await.insert(class_id, roster);
    }

    /// Loads class records from a JSON array of [`ClassSeed`] entries.
    pub async fn load_seed_file(&self, path: &Path) -> Result<usize> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SessionError::store(format!("{}: {}", path.display(), e)))?;
        let seeds: Vec<ClassSeed> = serde_json::from_str(&raw)?;
        let count = seeds.len();

        for seed in seeds {
            self.insert(seed.record, seed.roster).await;
        }

        tracing::info!(path = %path.display(), count = count, "Loaded class seed file");
        Ok(count)
    }
}

#[async_trait]
impl ClassStore for InMemoryClassStore {
    async fn list_by_status(&self, status: ClassStatus) -> Result<Vec<ClassRecord>> {
        let classes = self.classes.read().await;
        let mut matching: Vec<ClassRecord> = classes
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.scheduled_start_time.cmp(&b.scheduled_start_time));
        Ok(matching)
    }

    async fn get(&self, class_id: &str) -> Result<Option<ClassRecord>> {
        Ok(self.classes.read().await.get(class_id).cloned())
    }

    async fn find_by_room(&self, room_id: &str) -> Result<Option<ClassRecord>> {
        let classes = self.classes.read().await;
        Ok(classes.values().find(|c| c.room_id == room_id).cloned())
    }

    async fn update_status(
        &self,
        class_id: &str,
        expected: ClassStatus,
        new_status: ClassStatus,
        at: DateTime<Utc>,
    ) -> Result<ClassRecord> {
        let mut classes = self.classes.write().await;
        let record = classes
            .get_mut(class_id)
            .ok_or_else(|| SessionError::ClassNotFound(class_id.to_string()))?;

        if record.status != expected || !expected.can_transition_to(new_status) {
            return Err(SessionError::StaleTransition {
                class_id: class_id.to_string(),
                expected,
                found: record.status,
            });
        }

        record.apply_transition(new_status, at);
        Ok(record.clone())
    }

    async fn get_roster(&self, class_id: &str) -> Result<Vec<String>> {
        Ok(self
            .rosters
            .read()
            .await
            .get(class_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_attendance(&self, summary: &AttendanceSummary) -> Result<()> {
        let mut attendance = self.attendance.write().await;
        attendance
            .entry(summary.class_id.clone())
            .or_insert_with(|| summary.clone());
        Ok(())
    }

    async fn get_attendance(&self, class_id: &str) -> Result<Option<AttendanceSummary>> {
        Ok(self.attendance.read().await.get(class_id).cloned())
    }

    async fn list_recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceSummary>> {
        let attendance = self.attendance.read().await;
        let mut summaries: Vec<AttendanceSummary> = attendance.values().cloned().collect();
        summaries.sort_by(|a, b| b.class_ended_at.cmp(&a.class_ended_at));
        summaries.truncate(limit);
        Ok(summaries)
    }
}
