use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use clanscope_core::{ActorSnapshot, InteractionEvent, RecordSet};

use super::{
    collection_tolerance, consistency_index, group_trajectory, momentum, ratio, tenure_days,
    RatioClass, DEFAULT_COLLECTION_TOLERANCE_SECS,
};

/// Per-actor features derived from that actor's snapshots and sub-actions.
#[derive(Debug, Clone)]
pub struct ActorFeatures {
    pub actor_id: String,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub snapshot_count: usize,
    pub rank_series: Vec<(DateTime<Utc>, f64)>,
    pub rank_momentum: f64,
    /// Cumulative counters from the latest snapshot.
    pub donations_given: u64,
    pub donations_received: u64,
    pub donation_ratio: f64,
    pub ratio_class: RatioClass,
    /// Consistency of donation activity between snapshots.
    pub consistency: Option<f64>,
    pub tenure_days: f64,
    pub encounters_joined: usize,
    pub actions: usize,
}

impl ActorFeatures {
    fn from_snapshots(actor_id: &str, snapshots: &[&ActorSnapshot]) -> Self {
        let rank_series: Vec<(DateTime<Utc>, f64)> =
            snapshots.iter().map(|s| (s.timestamp, s.rank_score)).collect();
        let given_series: Vec<f64> = snapshots.iter().map(|s| s.donations_given as f64).collect();
        let latest = snapshots.last();
        let given = latest.map_or(0, |s| s.donations_given);
        let received = latest.map_or(0, |s| s.donations_received);
        let donation_ratio = ratio(given as f64, received as f64);
        let tenure = match (snapshots.first(), snapshots.last()) {
            (Some(first), Some(last)) => tenure_days(first.timestamp, last.timestamp),
            _ => 0.0,
        };

        Self {
            actor_id: actor_id.to_string(),
            display_name: latest.and_then(|s| s.display_name.clone()),
            role: latest.and_then(|s| s.role.clone()),
            snapshot_count: snapshots.len(),
            rank_momentum: momentum(&rank_series),
            rank_series,
            donations_given: given,
            donations_received: received,
            donation_ratio,
            ratio_class: RatioClass::classify(donation_ratio),
            consistency: consistency_index(&given_series),
            tenure_days: tenure,
            encounters_joined: 0,
            actions: 0,
        }
    }

    fn without_snapshots(actor_id: &str) -> Self {
        Self::from_snapshots(actor_id, &[])
    }
}

/// Sub-actions of one encounter plus its summary record, if collected.
#[derive(Debug, Clone, Default)]
pub struct EncounterGroup {
    pub encounter_id: String,
    /// Ordered by `order`, then timestamp.
    pub sub_actions: Vec<InteractionEvent>,
    pub summary: Option<InteractionEvent>,
}

impl EncounterGroup {
    pub fn total_magnitude(&self) -> f64 {
        self.sub_actions.iter().map(|e| e.magnitude).sum()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.sub_actions
            .iter()
            .map(|e| e.timestamp)
            .chain(self.summary.iter().map(|s| s.timestamp))
            .min()
    }
}

/// Ephemeral features computed for one analyzer invocation.
#[derive(Debug, Clone)]
pub struct FeatureBundle {
    pub subject_id: String,
    pub actors: BTreeMap<String, ActorFeatures>,
    pub encounters: BTreeMap<String, EncounterGroup>,
    /// Rank trajectory of the subject: the actor's own series, or the
    /// member mean per collection run for a group.
    pub trajectory: Vec<(DateTime<Utc>, f64)>,
    pub trajectory_momentum: f64,
    pub sub_action_count: usize,
}

impl FeatureBundle {
    /// Extract with the default collection-run tolerance.
    pub fn extract(records: &RecordSet) -> Self {
        Self::extract_with_tolerance(
            records,
            collection_tolerance(DEFAULT_COLLECTION_TOLERANCE_SECS),
        )
    }

    /// `tolerance` is the width of one collection run when member snapshots
    /// are averaged into the group trajectory.
    pub fn extract_with_tolerance(records: &RecordSet, tolerance: Duration) -> Self {
        let mut by_actor: BTreeMap<&str, Vec<&ActorSnapshot>> = BTreeMap::new();
        for snap in &records.actor_snapshots {
            by_actor.entry(snap.actor_id.as_str()).or_default().push(snap);
        }

        let mut actors: BTreeMap<String, ActorFeatures> = by_actor
            .iter()
            .map(|(id, snaps)| (id.to_string(), ActorFeatures::from_snapshots(id, snaps)))
            .collect();

        if let Some(group) = records.latest_group_snapshot() {
            for member in &group.member_ids {
                actors
                    .entry(member.clone())
                    .or_insert_with(|| ActorFeatures::without_snapshots(member));
            }
        }

        let mut encounters: BTreeMap<String, EncounterGroup> = BTreeMap::new();
        let mut joined: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        let mut sub_action_count = 0;
        for ev in &records.events {
            let group = encounters
                .entry(ev.encounter_id.clone())
                .or_insert_with(|| EncounterGroup {
                    encounter_id: ev.encounter_id.clone(),
                    ..Default::default()
                });
            if ev.is_sub_action() {
                group.sub_actions.push(ev.clone());
                joined.entry(ev.actor_id.as_str()).or_default().insert(ev.encounter_id.as_str());
                sub_action_count += 1;
                actors
                    .entry(ev.actor_id.clone())
                    .or_insert_with(|| ActorFeatures::without_snapshots(&ev.actor_id))
                    .actions += 1;
            } else {
                group.summary = Some(ev.clone());
            }
        }
        for group in encounters.values_mut() {
            group.sub_actions.sort_by_key(|e| (e.order, e.timestamp));
        }
        for (actor, ids) in joined {
            if let Some(features) = actors.get_mut(actor) {
                features.encounters_joined = ids.len();
            }
        }

        let trajectory = match actors.get(&records.subject_id) {
            Some(own) if !own.rank_series.is_empty() => own.rank_series.clone(),
            _ => group_trajectory(&records.actor_snapshots, tolerance),
        };

        Self {
            subject_id: records.subject_id.clone(),
            actors,
            encounters,
            trajectory_momentum: momentum(&trajectory),
            trajectory,
            sub_action_count,
        }
    }

    pub fn encounter_count(&self) -> usize {
        self.encounters.len()
    }

    /// Encounters that have at least one sub-action.
    pub fn encounters_with_actions(&self) -> impl Iterator<Item = &EncounterGroup> {
        self.encounters.values().filter(|g| !g.sub_actions.is_empty())
    }

    pub fn participation_rate(&self, actor_id: &str) -> f64 {
        let total = self.encounter_count();
        if total == 0 {
            return 0.0;
        }
        self.actors
            .get(actor_id)
            .map_or(0.0, |a| a.encounters_joined as f64 / total as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use clanscope_core::{EventKind, GroupSnapshot, TimeWindow};

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn snap(actor: &str, day: i64, rank: f64, given: u64, received: u64) -> ActorSnapshot {
        ActorSnapshot {
            actor_id: actor.into(),
            group_id: Some("g".into()),
            timestamp: t(day),
            display_name: None,
            role: None,
            rank_score: rank,
            donations_given: given,
            donations_received: received,
            competitive_stars: 0,
        }
    }

    fn action(actor: &str, encounter: &str, order: u32) -> InteractionEvent {
        InteractionEvent {
            id: format!("{encounter}-{order}"),
            kind: EventKind::SubAction,
            actor_id: actor.into(),
            group_id: "g".into(),
            encounter_id: encounter.into(),
            timestamp: t(1),
            magnitude: 2.0,
            order,
            actor_position: None,
            target_id: None,
            target_position: None,
            stakes: None,
            partition: None,
            outcome: None,
            opponent_magnitude: None,
        }
    }

    fn records() -> RecordSet {
        let mut rs = RecordSet::empty("g", TimeWindow::new(t(0), t(10)));
        rs.actor_snapshots = vec![
            snap("a", 0, 100.0, 0, 0),
            snap("b", 0, 200.0, 10, 20),
            snap("a", 1, 110.0, 5, 1),
            snap("b", 1, 220.0, 20, 40),
        ];
        rs.group_snapshots = vec![GroupSnapshot {
            group_id: "g".into(),
            timestamp: t(1),
            member_ids: vec!["a".into(), "b".into(), "c".into()],
            level: 5,
            wins: 0,
            losses: 0,
            ties: 0,
        }];
        rs.events = vec![action("b", "e1", 2), action("a", "e1", 1), action("a", "e2", 1)];
        rs
    }

    #[test]
    fn extracts_actor_features() {
        let fb = FeatureBundle::extract(&records());
        assert_eq!(fb.actors.len(), 3, "group roster adds c");
        let a = &fb.actors["a"];
        assert_eq!(a.snapshot_count, 2);
        assert_eq!(a.donations_given, 5);
        assert_eq!(a.ratio_class, RatioClass::Giver);
        assert_eq!(a.encounters_joined, 2);
        assert_eq!(a.actions, 2);
        assert!((a.tenure_days - 1.0).abs() < 1e-9);
        assert_eq!(fb.actors["c"].snapshot_count, 0);
    }

    #[test]
    fn groups_sub_actions_by_encounter() {
        let fb = FeatureBundle::extract(&records());
        assert_eq!(fb.encounter_count(), 2);
        let e1 = &fb.encounters["e1"];
        assert_eq!(e1.sub_actions[0].actor_id, "a");
        assert_eq!(e1.total_magnitude(), 4.0);
        assert_eq!(fb.participation_rate("b"), 0.5);
        assert_eq!(fb.participation_rate("zz"), 0.0);
    }

    #[test]
    fn group_trajectory_is_member_mean() {
        let fb = FeatureBundle::extract(&records());
        assert_eq!(fb.trajectory, vec![(t(0), 150.0), (t(1), 165.0)]);
        assert!((fb.trajectory_momentum - 15.0).abs() < 1e-9);
    }

    #[test]
    fn group_trajectory_averages_each_collection_run() {
        let mut rs = records();
        for s in rs.actor_snapshots.iter_mut().filter(|s| s.actor_id == "b") {
            s.timestamp += Duration::seconds(2);
        }
        let fb = FeatureBundle::extract(&rs);
        assert_eq!(fb.trajectory, vec![(t(0), 150.0), (t(1), 165.0)]);

        let exact = FeatureBundle::extract_with_tolerance(&rs, Duration::zero());
        assert_eq!(exact.trajectory.len(), 4);
    }

    #[test]
    fn actor_trajectory_is_own_series() {
        let mut rs = records();
        rs.subject_id = "a".into();
        let fb = FeatureBundle::extract(&rs);
        assert_eq!(fb.trajectory, vec![(t(0), 100.0), (t(1), 110.0)]);
    }
}
