//! Read access to the three record collections.
//!
//! The collection job appends records; the analysis layer only reads them.
//! Subjects with no data yield empty vectors rather than errors.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::records::{ActorSnapshot, GroupSnapshot, InteractionEvent, RecordSet, TimeWindow};

/// Ordered, time-bounded reads by subject id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Actor snapshots whose `actor_id` or `group_id` equals `subject`.
    async fn actor_snapshots(
        &self,
        subject: &str,
        window: &TimeWindow,
    ) -> Result<Vec<ActorSnapshot>, StoreError>;

    async fn group_snapshots(
        &self,
        subject: &str,
        window: &TimeWindow,
    ) -> Result<Vec<GroupSnapshot>, StoreError>;

    /// Events whose `actor_id` or `group_id` equals `subject`.
    async fn interaction_events(
        &self,
        subject: &str,
        window: &TimeWindow,
    ) -> Result<Vec<InteractionEvent>, StoreError>;

    /// Load all three collections for `subject` concurrently.
    async fn load(&self, subject: &str, window: &TimeWindow) -> Result<RecordSet, StoreError> {
        let (actor_snapshots, group_snapshots, events) = tokio::try_join!(
            self.actor_snapshots(subject, window),
            self.group_snapshots(subject, window),
            self.interaction_events(subject, window),
        )?;
        let mut set = RecordSet {
            subject_id: subject.to_string(),
            window: *window,
            actor_snapshots,
            group_snapshots,
            events,
        };
        set.sort();
        Ok(set)
    }
}

/// On-disk interchange shape for a batch of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFile {
    #[serde(default)]
    pub actors: Vec<ActorSnapshot>,
    #[serde(default)]
    pub groups: Vec<GroupSnapshot>,
    #[serde(default)]
    pub events: Vec<InteractionEvent>,
}

impl RecordFile {
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)?;
        let file: RecordFile = serde_json::from_str(&raw)?;
        info!(
            path = %path.display(),
            actors = file.actors.len(),
            groups = file.groups.len(),
            events = file.events.len(),
            "Loaded record file"
        );
        Ok(file)
    }
}

#[derive(Default)]
struct Collections {
    actors: Vec<ActorSnapshot>,
    groups: Vec<GroupSnapshot>,
    events: Vec<InteractionEvent>,
}

/// Append-only in-memory store.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: RwLock<Collections>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(file: RecordFile) -> Self {
        Self {
            inner: RwLock::new(Collections {
                actors: file.actors,
                groups: file.groups,
                events: file.events,
            }),
        }
    }

    pub async fn append_actor_snapshot(&self, snapshot: ActorSnapshot) {
        self.inner.write().await.actors.push(snapshot);
    }

    pub async fn append_group_snapshot(&self, snapshot: GroupSnapshot) {
        self.inner.write().await.groups.push(snapshot);
    }

    pub async fn append_event(&self, event: InteractionEvent) {
        self.inner.write().await.events.push(event);
    }

    pub async fn extend(&self, file: RecordFile) {
        let mut inner = self.inner.write().await;
        inner.actors.extend(file.actors);
        inner.groups.extend(file.groups);
        inner.events.extend(file.events);
    }

    pub async fn len(&self) -> usize {
        let inner = self.inner.read().await;
        inner.actors.len() + inner.groups.len() + inner.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn matches(subject: &str, primary: &str, group: Option<&str>) -> bool {
    primary == subject || group == Some(subject)
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn actor_snapshots(
        &self,
        subject: &str,
        window: &TimeWindow,
    ) -> Result<Vec<ActorSnapshot>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<ActorSnapshot> = inner
            .actors
            .iter()
            .filter(|s| matches(subject, &s.actor_id, s.group_id.as_deref()))
            .filter(|s| window.contains(s.timestamp))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.timestamp);
        debug!(subject, count = out.len(), "actor snapshots read");
        Ok(out)
    }

    async fn group_snapshots(
        &self,
        subject: &str,
        window: &TimeWindow,
    ) -> Result<Vec<GroupSnapshot>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<GroupSnapshot> = inner
            .groups
            .iter()
            .filter(|s| s.group_id == subject && window.contains(s.timestamp))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.timestamp);
        Ok(out)
    }

    async fn interaction_events(
        &self,
        subject: &str,
        window: &TimeWindow,
    ) -> Result<Vec<InteractionEvent>, StoreError> {
        let inner = self.inner.read().await;
        let mut out: Vec<InteractionEvent> = inner
            .events
            .iter()
            .filter(|e| matches(subject, &e.actor_id, Some(&e.group_id)))
            .filter(|e| window.contains(e.timestamp))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.timestamp);
        debug!(subject, count = out.len(), "interaction events read");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::EventKind;
    use chrono::{Duration, TimeZone, Utc};
    use std::io::Write;

    fn snapshot(actor: &str, group: &str, day: i64) -> ActorSnapshot {
        ActorSnapshot {
            actor_id: actor.to_string(),
            group_id: Some(group.to_string()),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap() + Duration::days(day),
            display_name: None,
            role: None,
            rank_score: 1000.0,
            donations_given: 0,
            donations_received: 0,
            competitive_stars: 0,
        }
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 10, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn unknown_subject_reads_empty() {
        let store = MemoryRecordStore::new();
        let set = store.load("nobody", &window()).await.unwrap();
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn subject_matches_actor_or_group() {
        let store = MemoryRecordStore::new();
        store.append_actor_snapshot(snapshot("a1", "g1", 1)).await;
        store.append_actor_snapshot(snapshot("a2", "g1", 0)).await;
        store.append_actor_snapshot(snapshot("a3", "g2", 0)).await;

        let by_group = store.actor_snapshots("g1", &window()).await.unwrap();
        assert_eq!(by_group.len(), 2);
        assert_eq!(by_group[0].actor_id, "a2", "sorted by timestamp");

        let by_actor = store.actor_snapshots("a3", &window()).await.unwrap();
        assert_eq!(by_actor.len(), 1);
    }

    #[tokio::test]
    async fn window_bounds_reads() {
        let store = MemoryRecordStore::new();
        store.append_actor_snapshot(snapshot("a1", "g1", 2)).await;
        store.append_actor_snapshot(snapshot("a1", "g1", 30)).await;
        let set = store.load("a1", &window()).await.unwrap();
        assert_eq!(set.actor_snapshots.len(), 1);
    }

    #[tokio::test]
    async fn events_match_on_group() {
        let store = MemoryRecordStore::new();
        store
            .append_event(InteractionEvent {
                id: "ev1".into(),
                kind: EventKind::Encounter,
                actor_id: "g1".into(),
                group_id: "g1".into(),
                encounter_id: "w1".into(),
                timestamp: Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap(),
                magnitude: 30.0,
                order: 0,
                actor_position: None,
                target_id: None,
                target_position: None,
                stakes: None,
                partition: None,
                outcome: None,
                opponent_magnitude: None,
            })
            .await;
        assert_eq!(store.interaction_events("g1", &window()).await.unwrap().len(), 1);
        assert!(store.interaction_events("g2", &window()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_file_loads_from_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let file = RecordFile {
            actors: vec![snapshot("a1", "g1", 1)],
            ..Default::default()
        };
        write!(tmp, "{}", serde_json::to_string(&file).unwrap()).unwrap();

        let loaded = RecordFile::from_path(tmp.path()).unwrap();
        let store = MemoryRecordStore::from_file(loaded);
        assert_eq!(store.len().await, 1);
    }

    #[test]
    fn malformed_record_file_is_parse_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(tmp, "{{not json").unwrap();
        let err = RecordFile::from_path(tmp.path()).unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }
}
