use std::collections::{BTreeMap, BTreeSet};

use clanscope_core::{Outcome, RecordSet};

use super::{Analyzer, AnalyzerId};
use crate::features::FeatureBundle;
use crate::report::{Confidence, Report};
use crate::stats;
use crate::thresholds::ContributionThresholds;

/// Collective contribution: how evenly shared-encounter output is spread
/// across members, who free-rides, and whether effort tracks success.
pub struct ContributionAnalyzer {
    thresholds: ContributionThresholds,
}

impl ContributionAnalyzer {
    pub fn new(thresholds: ContributionThresholds) -> Self {
        Self { thresholds }
    }

    fn actor_count(records: &RecordSet) -> usize {
        let mut actors: BTreeSet<&str> = records
            .actor_snapshots
            .iter()
            .map(|s| s.actor_id.as_str())
            .collect();
        actors.extend(records.sub_actions().map(|e| e.actor_id.as_str()));
        if let Some(group) = records.latest_group_snapshot() {
            actors.extend(group.member_ids.iter().map(String::as_str));
        }
        actors.len()
    }

    fn encounters_with_actions(records: &RecordSet) -> usize {
        records
            .sub_actions()
            .map(|e| e.encounter_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

impl Analyzer for ContributionAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Contribution
    }

    fn minimum_data_met(&self, records: &RecordSet) -> bool {
        Self::actor_count(records) >= self.thresholds.min_actors
            && Self::encounters_with_actions(records) > 0
    }

    fn insufficient_reason(&self, records: &RecordSet) -> String {
        format!(
            "Contribution analysis needs at least {} actors and one encounter with sub-actions; found {} actors and {} encounters.",
            self.thresholds.min_actors,
            Self::actor_count(records),
            Self::encounters_with_actions(records)
        )
    }

    fn sample_size(&self, records: &RecordSet) -> usize {
        Self::encounters_with_actions(records)
    }

    fn analyze(&self, features: &FeatureBundle, _records: &RecordSet) -> Report {
        let t = &self.thresholds;

        let mut per_actor: BTreeMap<&str, f64> =
            features.actors.keys().map(|id| (id.as_str(), 0.0)).collect();
        let mut successful = Vec::new();
        let mut unsuccessful = Vec::new();
        let mut encounters = 0;
        for group in features.encounters_with_actions() {
            encounters += 1;
            for action in &group.sub_actions {
                *per_actor.entry(action.actor_id.as_str()).or_insert(0.0) += action.magnitude;
            }
            match group.summary.as_ref().and_then(|s| s.outcome) {
                Some(Outcome::Win) => successful.push(group.total_magnitude()),
                Some(_) => unsuccessful.push(group.total_magnitude()),
                None => {}
            }
        }

        let values: Vec<f64> = per_actor.values().copied().collect();
        let total: f64 = values.iter().sum();
        let mean = stats::mean(&values);
        let gini = stats::gini(&values);
        let floor = stats::percentile(&values, t.free_rider_percentile).unwrap_or(0.0);
        let top_cut = stats::percentile(&values, t.top_percentile).unwrap_or(0.0);

        let free_riders: Vec<&str> = per_actor
            .iter()
            .filter(|(_, v)| **v <= floor && **v < mean)
            .map(|(id, _)| *id)
            .collect();
        let top_share = if total > 0.0 {
            values.iter().filter(|v| **v >= top_cut).sum::<f64>() / total
        } else {
            0.0
        };

        let mut builder = Report::builder(AnalyzerId::Contribution, features.subject_id.clone())
            .metric("gini", gini)
            .metric("total_contribution", total)
            .metric("mean_contribution", mean)
            .metric("free_rider_threshold", floor)
            .metric("free_rider_count", free_riders.len() as f64)
            .metric("top_decile_share", top_share)
            .metric("actor_count", values.len() as f64)
            .metric("encounters", encounters as f64);
        for (actor, value) in &per_actor {
            builder = builder.keyed_metric("contribution", actor, *value);
        }

        let spread = if gini < 0.2 {
            "evenly shared"
        } else if gini < 0.4 {
            "moderately concentrated"
        } else {
            "carried by a few actors"
        };
        let mut interpretation = format!(
            "Contribution across {encounters} encounters is {spread} (Gini {gini:.2}); the top decile supplies {:.0}% of the total.",
            top_share * 100.0
        );
        if free_riders.is_empty() {
            interpretation.push_str(" No free riders detected.");
        } else {
            interpretation.push_str(&format!(" Possible free riders: {}.", free_riders.join(", ")));
        }

        let comparable = successful.len() >= t.min_comparison_encounters
            && unsuccessful.len() >= t.min_comparison_encounters;
        if let Some(test) = comparable
            .then(|| stats::welch_t_test(&successful, &unsuccessful))
            .flatten()
        {
            let gap = stats::mean(&successful) - stats::mean(&unsuccessful);
            builder = builder
                .metric("success_effort_gap", gap)
                .metric("success_t_statistic", test.statistic)
                .metric("success_p_value", test.p_value);
            if test.p_value < t.significance {
                interpretation.push_str(&format!(
                    " Won encounters carry significantly {} contribution (p={:.3}).",
                    if gap > 0.0 { "more" } else { "less" },
                    test.p_value
                ));
            } else {
                interpretation.push_str(" Contribution does not differ significantly between won and lost encounters.");
            }
        }

        builder
            .interpretation(interpretation)
            .confidence(Confidence::from_count(
                encounters,
                t.high_confidence_encounters,
                t.medium_confidence_encounters,
            ))
            .sample_size(encounters)
            .build()
    }
}
