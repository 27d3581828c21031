use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use clanscope_core::{InteractionEvent, RecordSet};

use super::{Analyzer, AnalyzerId};
use crate::features::{EncounterGroup, FeatureBundle};
use crate::report::{Confidence, Report};
use crate::stats;
use crate::thresholds::CoordinationThresholds;

/// Coordination: timing, targeting and sequencing of sub-actions within each
/// encounter, combined into a 0-100 index.
pub struct CoordinationAnalyzer {
    thresholds: CoordinationThresholds,
}

#[derive(Debug, Clone, Copy)]
struct EncounterScore {
    timing: f64,
    targeting: f64,
    motif: f64,
    index: f64,
}

impl CoordinationAnalyzer {
    pub fn new(thresholds: CoordinationThresholds) -> Self {
        Self { thresholds }
    }

    fn eligible(&self, group: &EncounterGroup) -> bool {
        group.sub_actions.len() >= self.thresholds.min_encounter_actions
    }

    fn eligible_count(&self, records: &RecordSet) -> usize {
        let mut per_encounter: BTreeMap<&str, usize> = BTreeMap::new();
        for ev in records.sub_actions() {
            *per_encounter.entry(ev.encounter_id.as_str()).or_insert(0) += 1;
        }
        per_encounter
            .values()
            .filter(|n| **n >= self.thresholds.min_encounter_actions)
            .count()
    }

    /// Share of actions followed by enough others inside the window.
    fn timing_score(&self, actions: &[InteractionEvent]) -> f64 {
        let t = &self.thresholds;
        let mut times: Vec<_> = actions.iter().map(|a| a.timestamp).collect();
        times.sort();
        let window = Duration::seconds(t.window_secs);

        let coordinated = times
            .iter()
            .enumerate()
            .filter(|(i, start)| {
                times[i + 1..]
                    .iter()
                    .take_while(|later| **later - **start <= window)
                    .count()
                    >= t.min_followers
            })
            .count();

        let n = times.len() as f64;
        if coordinated as f64 >= n * t.timing_high_share {
            t.timing_high
        } else if coordinated as f64 >= n * t.timing_mid_share {
            t.timing_mid
        } else {
            t.timing_low
        }
    }

    /// Closer to one action per distinct target scores higher.
    fn targeting_score(actions: &[InteractionEvent]) -> f64 {
        let targets: BTreeSet<String> = actions
            .iter()
            .filter_map(|a| {
                a.target_id
                    .clone()
                    .or_else(|| a.target_position.map(|p| format!("#{p}")))
            })
            .collect();
        if targets.is_empty() {
            return 0.0;
        }
        let per_target = actions.len() as f64 / targets.len() as f64;
        (1.0 - (per_target - 1.0).abs() / 2.0).clamp(0.0, 1.0)
    }

    fn motif_score(&self, actions: &[InteractionEvent]) -> f64 {
        let t = &self.thresholds;
        let n = actions.len() as f64;
        let sequential = actions
            .windows(2)
            .filter(|w| match (w[0].target_position, w[1].target_position) {
                (Some(a), Some(b)) => a.abs_diff(b) <= 1,
                _ => false,
            })
            .count() as f64;
        let mirror = actions
            .iter()
            .filter(|a| matches!((a.actor_position, a.target_position), (Some(x), Some(y)) if x == y))
            .count() as f64;

        if sequential > n * t.sequential_share {
            t.sequential_score
        } else if mirror > n * t.mirror_share {
            t.mirror_score
        } else {
            t.default_motif_score
        }
    }

    fn score(&self, group: &EncounterGroup) -> EncounterScore {
        let t = &self.thresholds;
        let timing = self.timing_score(&group.sub_actions);
        let targeting = Self::targeting_score(&group.sub_actions);
        let motif = self.motif_score(&group.sub_actions);
        let index =
            (t.timing_weight * timing + t.targeting_weight * targeting + t.motif_weight * motif)
                * 100.0;
        EncounterScore {
            timing,
            targeting,
            motif,
            index,
        }
    }

    fn grade(&self, index: f64) -> (&'static str, &'static str) {
        let t = &self.thresholds;
        if index >= t.grade_a {
            ("A", "the group operates as a cohesive unit")
        } else if index >= t.grade_b {
            ("B", "effective teamwork with room for improvement")
        } else if index >= t.grade_c {
            ("C", "basic coordination; significant improvement possible")
        } else {
            ("D", "actors largely act independently")
        }
    }
}

impl Analyzer for CoordinationAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Coordination
    }

    fn minimum_data_met(&self, records: &RecordSet) -> bool {
        self.eligible_count(records) > 0
    }

    fn insufficient_reason(&self, _records: &RecordSet) -> String {
        format!(
            "Coordination needs at least one encounter with {} or more sub-actions.",
            self.thresholds.min_encounter_actions
        )
    }

    fn sample_size(&self, records: &RecordSet) -> usize {
        self.eligible_count(records)
    }

    fn analyze(&self, features: &FeatureBundle, _records: &RecordSet) -> Report {
        let t = &self.thresholds;

        let mut scored: Vec<(&EncounterGroup, EncounterScore)> = features
            .encounters_with_actions()
            .filter(|g| self.eligible(g))
            .map(|g| (g, self.score(g)))
            .collect();
        scored.sort_by_key(|(g, _)| g.started_at());
        let excluded = features.encounters_with_actions().count() - scored.len();

        let indices: Vec<f64> = scored.iter().map(|(_, s)| s.index).collect();
        let index = stats::mean(&indices);
        let component = |f: fn(&EncounterScore) -> f64| {
            stats::mean(&scored.iter().map(|(_, s)| f(s)).collect::<Vec<_>>())
        };
        let (grade, grade_text) = self.grade(index);

        let mut builder = Report::builder(AnalyzerId::Coordination, features.subject_id.clone())
            .metric("coordination_index", index)
            .metric("timing_score", component(|s| s.timing))
            .metric("targeting_score", component(|s| s.targeting))
            .metric("motif_score", component(|s| s.motif))
            .metric("encounters_scored", scored.len() as f64)
            .metric("encounters_excluded", excluded as f64)
            .metric("best_index", indices.iter().copied().fold(f64::MIN, f64::max))
            .metric("worst_index", indices.iter().copied().fold(f64::MAX, f64::min));
        for (group, score) in &scored {
            builder = builder.metric(format!("encounter_index:{}", group.encounter_id), score.index);
        }

        let mut interpretation =
            format!("Coordination index {index:.1} (grade {grade}): {grade_text}.");

        if indices.len() >= t.min_trend_encounters {
            let xs: Vec<f64> = (0..indices.len()).map(|i| i as f64).collect();
            let slope = stats::linear_regression(&xs, &indices).map_or(0.0, |f| f.slope);
            let consistency = 100.0 - stats::std_dev(&indices).min(t.consistency_std_cap);
            let trend = if slope > t.trend_slope {
                "improving"
            } else if slope < -t.trend_slope {
                "declining"
            } else {
                "stable"
            };
            builder = builder
                .metric("trend_slope", slope)
                .metric("consistency", consistency);
            interpretation.push_str(&format!(
                " Across {} encounters coordination is {trend}.",
                indices.len()
            ));
        }
        if excluded > 0 {
            interpretation.push_str(&format!(
                " {excluded} single-action encounters were excluded."
            ));
        }

        builder
            .interpretation(interpretation)
            .confidence(Confidence::from_count(
                scored.len(),
                t.high_confidence_encounters,
                t.medium_confidence_encounters,
            ))
            .sample_size(scored.len())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::run;
    use crate::analyzers::testutil::{action, records};

    fn analyzer() -> CoordinationAnalyzer {
        CoordinationAnalyzer::new(CoordinationThresholds::default())
    }

    fn targeted(mut ev: InteractionEvent, actor_pos: u32, target_pos: u32) -> InteractionEvent {
        ev.actor_position = Some(actor_pos);
        ev.target_position = Some(target_pos);
        ev
    }

    #[test]
    fn single_action_encounters_are_insufficient() {
        let mut rs = records("g");
        rs.events.push(action("a", "e1", 1, 0, 2.0));
        rs.events.push(action("b", "e2", 1, 0, 2.0));
        let r = run(&analyzer(), &rs);
        assert!(r.is_insufficient());
        assert_eq!(r.sample_size, 0);
    }

    #[test]
    fn tight_mirrored_encounter_scores_high() {
        let mut rs = records("g");
        for i in 1..=4u32 {
            let ev = action(&format!("a{i}"), "e1", i, i as i64, 2.0);
            rs.events.push(targeted(ev, i, i));
        }
        let r = run(&analyzer(), &rs);
        // every action has two followers within five minutes except the last two
        assert_eq!(r.metric("timing_score"), Some(0.9));
        assert_eq!(r.metric("targeting_score"), Some(1.0));
        // adjacent target positions differ by one: sequential cleanup wins
        assert_eq!(r.metric("motif_score"), Some(0.7));
        let index = r.metric("coordination_index").unwrap();
        assert!((index - 88.0).abs() < 1e-9, "index {index}");
        assert!(r.interpretation.contains("grade A"));
    }

    #[test]
    fn single_action_encounters_are_excluded_from_mean() {
        let mut rs = records("g");
        for i in 1..=4u32 {
            let ev = action(&format!("a{i}"), "e1", i, i as i64, 2.0);
            rs.events.push(targeted(ev, i, i));
        }
        rs.events.push(action("solo", "e2", 1, 0, 1.0));
        let r = run(&analyzer(), &rs);
        assert_eq!(r.metric("encounters_scored"), Some(1.0));
        assert_eq!(r.metric("encounters_excluded"), Some(1.0));
        assert!((r.metric("coordination_index").unwrap() - 88.0).abs() < 1e-9);
    }

    #[test]
    fn scattered_encounter_scores_low() {
        let mut rs = records("g");
        for (i, minute) in [0i64, 60, 120, 180].iter().enumerate() {
            let mut ev = action("a", "e1", i as u32 + 1, *minute, 1.0);
            ev.target_id = Some("same".into());
            rs.events.push(ev);
        }
        let r = run(&analyzer(), &rs);
        assert_eq!(r.metric("timing_score"), Some(0.3));
        assert_eq!(r.metric("targeting_score"), Some(0.0));
        assert_eq!(r.metric("motif_score"), Some(0.4));
        assert!(r.interpretation.contains("grade D"));
    }

    #[test]
    fn trend_reported_from_three_encounters() {
        let mut rs = records("g");
        for e in 0..3 {
            for i in 1..=2u32 {
                let ev = action("a", &format!("e{e}"), i, e * 1000 + i as i64, 1.0);
                rs.events.push(ev);
            }
        }
        let r = run(&analyzer(), &rs);
        assert!(r.metric("trend_slope").is_some());
        assert!(r.interpretation.contains("stable"));
    }
}
