use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actor or group identifier as issued by the upstream provider.
pub type SubjectId = String;

/// Encounter identifier linking an encounter summary to its sub-actions.
pub type EncounterId = String;

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

/// Point-in-time view of a single actor, appended by the collection job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActorSnapshot {
    pub actor_id: SubjectId,
    #[serde(default)]
    pub group_id: Option<SubjectId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Formal role inside the group (member, admin, leader, ...).
    #[serde(default)]
    pub role: Option<String>,
    pub rank_score: f64,
    #[serde(default)]
    pub donations_given: u64,
    #[serde(default)]
    pub donations_received: u64,
    #[serde(default)]
    pub competitive_stars: u64,
}

/// Point-in-time view of a group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupSnapshot {
    pub group_id: SubjectId,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub member_ids: Vec<SubjectId>,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub ties: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Summary of a whole competitive encounter (one per encounter).
    Encounter,
    /// A single action taken by one actor inside an encounter.
    SubAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Tie,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win => write!(f, "win"),
            Outcome::Loss => write!(f, "loss"),
            Outcome::Tie => write!(f, "tie"),
        }
    }
}

/// Competitive encounter or sub-action record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionEvent {
    #[serde(default = "new_event_id")]
    pub id: String,
    pub kind: EventKind,
    pub actor_id: SubjectId,
    pub group_id: SubjectId,
    pub encounter_id: EncounterId,
    pub timestamp: DateTime<Utc>,
    /// Outcome magnitude: stars/score for a sub-action, group total for an encounter.
    #[serde(default)]
    pub magnitude: f64,
    /// 1-based position of a sub-action inside its encounter.
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub actor_position: Option<u32>,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub target_position: Option<u32>,
    /// Situational stakes in [0, 1] when the collector knows them.
    #[serde(default)]
    pub stakes: Option<f64>,
    /// Partition label used by the fairness audit (e.g. "league", "regular").
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub opponent_magnitude: Option<f64>,
}

impl InteractionEvent {
    pub fn is_sub_action(&self) -> bool {
        self.kind == EventKind::SubAction
    }

    pub fn is_encounter(&self) -> bool {
        self.kind == EventKind::Encounter
    }
}

/// Contiguous, inclusive time range an analysis covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// Window covering the last `days` days up to now.
    pub fn trailing_days(days: u32) -> Self {
        let end = Utc::now();
        Self::new(end - Duration::days(i64::from(days)), end)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Everything the record store holds for one subject inside one window.
///
/// Each collection is sorted by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSet {
    pub subject_id: SubjectId,
    pub window: TimeWindow,
    pub actor_snapshots: Vec<ActorSnapshot>,
    pub group_snapshots: Vec<GroupSnapshot>,
    pub events: Vec<InteractionEvent>,
}

impl RecordSet {
    pub fn empty(subject_id: impl Into<SubjectId>, window: TimeWindow) -> Self {
        Self {
            subject_id: subject_id.into(),
            window,
            actor_snapshots: Vec::new(),
            group_snapshots: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actor_snapshots.is_empty() && self.group_snapshots.is_empty() && self.events.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.actor_snapshots.len() + self.group_snapshots.len() + self.events.len()
    }

    /// Restore timestamp ordering after records were assembled out of order.
    pub fn sort(&mut self) {
        self.actor_snapshots.sort_by_key(|s| s.timestamp);
        self.group_snapshots.sort_by_key(|s| s.timestamp);
        self.events.sort_by_key(|e| e.timestamp);
    }

    pub fn sub_actions(&self) -> impl Iterator<Item = &InteractionEvent> {
        self.events.iter().filter(|e| e.is_sub_action())
    }

    pub fn encounter_summaries(&self) -> impl Iterator<Item = &InteractionEvent> {
        self.events.iter().filter(|e| e.is_encounter())
    }

    pub fn latest_group_snapshot(&self) -> Option<&GroupSnapshot> {
        self.group_snapshots.last()
    }
}
