use std::collections::BTreeMap;

use clanscope_core::{InteractionEvent, RecordSet};

use super::{Analyzer, AnalyzerId};
use crate::features::{EncounterGroup, FeatureBundle};
use crate::report::{Confidence, Report};
use crate::stats;
use crate::thresholds::PressureThresholds;

const Z_95: f64 = 1.96;

/// Pressure response: how each actor's outcome magnitude shifts with stakes.
///
/// Fits `magnitude = baseline + β·stakes` per actor. β > 0 marks a clutch
/// performer, β < 0 a choke-prone one.
pub struct PressureAnalyzer {
    thresholds: PressureThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Archetype {
    Clutch,
    Neutral,
    ChokeProne,
}

#[derive(Debug, Clone)]
struct ActorPressure {
    actions: usize,
    mean: f64,
    std: f64,
    sensitivity: f64,
    sensitivity_half_width: f64,
    r_squared: f64,
    variance_share: f64,
    choke_probability: f64,
    reliability: f64,
    archetype: Archetype,
    under_sampled: bool,
}

impl PressureAnalyzer {
    pub fn new(thresholds: PressureThresholds) -> Self {
        Self { thresholds }
    }

    fn action_counts(records: &RecordSet) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for ev in records.sub_actions() {
            *counts.entry(ev.actor_id.as_str()).or_insert(0) += 1;
        }
        counts
    }

    /// Stakes of one sub-action in [0, 1].
    fn stakes(&self, ev: &InteractionEvent, encounter: &EncounterGroup) -> f64 {
        if let Some(s) = ev.stakes {
            return s.clamp(0.0, 1.0);
        }
        let t = &self.thresholds;
        let summary = encounter.summary.as_ref();
        let mut stakes = 0.0;

        // Positive when the subject's side trails.
        let gap = summary.and_then(|s| s.opponent_magnitude.map(|opp| opp - s.magnitude));
        if let Some(g) = gap.filter(|g| *g > 0.0) {
            stakes += (g * t.deficit_per_point).min(t.deficit_cap);
        }

        let total = encounter.sub_actions.len();
        if total > 0 && ev.order > 0 {
            let position = ev.order as f64 / total as f64;
            let close = gap.map_or(true, |g| g.abs() <= t.close_margin);
            if position < t.early_share {
                stakes += t.early_stakes;
            } else if position > 1.0 - t.late_share && close {
                stakes += t.late_stakes;
            }
        }

        let partition = ev
            .partition
            .as_deref()
            .or_else(|| summary.and_then(|s| s.partition.as_deref()));
        if let Some(p) = partition {
            if !t.baseline_partitions.iter().any(|b| b == p) {
                stakes += t.partition_stakes;
            }
        }

        stakes.clamp(0.0, 1.0)
    }

    fn profile(&self, stakes: &[f64], magnitudes: &[f64]) -> ActorPressure {
        let t = &self.thresholds;
        let n = magnitudes.len();
        let mean = stats::mean(magnitudes);
        let std = stats::sample_std_dev(magnitudes);

        let fit = stats::linear_regression(stakes, magnitudes);
        let sensitivity = fit.map_or(0.0, |f| f.slope);
        let r_squared = fit.map_or(0.0, |f| f.r_squared);
        let under_sampled = n < t.min_actions;
        let mut half_width = fit.map_or(0.0, |f| Z_95 * f.slope_std_err);
        if under_sampled {
            half_width *= t.uncertainty_widening;
        }

        let variance_share = self.between_group_share(stakes, magnitudes, mean);

        let effective_std = std * t.choke_sigma_multiplier;
        let choke_probability = if effective_std > 0.0 {
            let predicted = mean + sensitivity * t.choke_pressure;
            let threshold = mean - std;
            stats::normal_cdf((threshold - predicted) / effective_std).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut consistency = 1.0 / (1.0 + std);
        if sensitivity < 0.0 {
            consistency *= t.choke_prone_penalty;
        }
        let reliability = consistency * (1.0 - choke_probability);

        let archetype = if sensitivity.abs() < t.neutral_band {
            Archetype::Neutral
        } else if sensitivity > 0.0 {
            Archetype::Clutch
        } else {
            Archetype::ChokeProne
        };

        ActorPressure {
            actions: n,
            mean,
            std,
            sensitivity,
            sensitivity_half_width: half_width,
            r_squared,
            variance_share,
            choke_probability,
            reliability,
            archetype,
            under_sampled,
        }
    }

    /// Share of magnitude variance explained by the high/low stakes split.
    fn between_group_share(&self, stakes: &[f64], magnitudes: &[f64], mean: f64) -> f64 {
        let (high, low): (Vec<(f64, f64)>, Vec<(f64, f64)>) = stakes
            .iter()
            .copied()
            .zip(magnitudes.iter().copied())
            .partition(|(s, _)| *s >= self.thresholds.high_stakes_split);
        if high.is_empty() || low.is_empty() {
            return 0.0;
        }
        let total_ss: f64 = magnitudes.iter().map(|m| (m - mean).powi(2)).sum();
        if total_ss <= 0.0 {
            return 0.0;
        }
        let between = |group: &[(f64, f64)]| {
            let values: Vec<f64> = group.iter().map(|(_, m)| *m).collect();
            values.len() as f64 * (stats::mean(&values) - mean).powi(2)
        };
        ((between(&high) + between(&low)) / total_ss).clamp(0.0, 1.0)
    }
}

impl Analyzer for PressureAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Pressure
    }

    fn minimum_data_met(&self, records: &RecordSet) -> bool {
        Self::action_counts(records)
            .values()
            .any(|n| *n >= self.thresholds.min_actions_floor)
    }

    fn insufficient_reason(&self, records: &RecordSet) -> String {
        let best = Self::action_counts(records).values().copied().max().unwrap_or(0);
        format!(
            "Pressure response needs at least {} actions from one actor; the most active actor has {}.",
            self.thresholds.min_actions_floor, best
        )
    }

    fn sample_size(&self, records: &RecordSet) -> usize {
        records.sub_actions().count()
    }

    fn analyze(&self, features: &FeatureBundle, _records: &RecordSet) -> Report {
        let t = &self.thresholds;
        let mut samples: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for encounter in features.encounters.values() {
            for ev in &encounter.sub_actions {
                let slot = samples.entry(ev.actor_id.as_str()).or_default();
                slot.0.push(self.stakes(ev, encounter));
                slot.1.push(ev.magnitude);
            }
        }

        let profiles: BTreeMap<&str, ActorPressure> = samples
            .iter()
            .filter(|(_, (_, m))| m.len() >= t.min_actions_floor)
            .map(|(actor, (s, m))| (*actor, self.profile(s, m)))
            .collect();

        let analyzed = profiles.len();
        let actions: usize = profiles.values().map(|p| p.actions).sum();
        let count = |a: Archetype| profiles.values().filter(|p| p.archetype == a).count();
        let clutch = count(Archetype::Clutch);
        let choke = count(Archetype::ChokeProne);
        let neutral = count(Archetype::Neutral);
        let under_sampled = profiles.values().filter(|p| p.under_sampled).count();

        let avg = |f: fn(&ActorPressure) -> f64| {
            stats::mean(&profiles.values().map(f).collect::<Vec<_>>())
        };

        let mut builder = Report::builder(AnalyzerId::Pressure, features.subject_id.clone())
            .metric("actors_analyzed", analyzed as f64)
            .metric("mean_sensitivity", avg(|p| p.sensitivity))
            .metric("mean_reliability", avg(|p| p.reliability))
            .metric("mean_choke_probability", avg(|p| p.choke_probability))
            .metric("mean_variance_share", avg(|p| p.variance_share))
            .metric("clutch_count", clutch as f64)
            .metric("choke_prone_count", choke as f64)
            .metric("neutral_count", neutral as f64)
            .metric("under_sampled_count", under_sampled as f64);
        for (actor, p) in &profiles {
            builder = builder
                .keyed_metric("actions", actor, p.actions as f64)
                .keyed_metric("baseline", actor, p.mean)
                .keyed_metric("baseline_std", actor, p.std)
                .keyed_metric("sensitivity", actor, p.sensitivity)
                .keyed_metric("sensitivity_ci", actor, p.sensitivity_half_width)
                .keyed_metric("r_squared", actor, p.r_squared)
                .keyed_metric("variance_share", actor, p.variance_share)
                .keyed_metric("choke_probability", actor, p.choke_probability)
                .keyed_metric("reliability", actor, p.reliability);
        }

        let most_reliable = profiles
            .iter()
            .max_by(|a, b| a.1.reliability.total_cmp(&b.1.reliability))
            .map(|(actor, _)| *actor)
            .unwrap_or("none");
        let mut interpretation = format!(
            "{analyzed} actors analyzed: {clutch} clutch, {neutral} pressure-neutral, {choke} choke-prone. Most reliable under pressure: {most_reliable}."
        );
        if under_sampled > 0 {
            interpretation.push_str(&format!(
                " {under_sampled} actors have fewer than {} actions; their sensitivity intervals are widened.",
                t.min_actions
            ));
        }

        let confidence = if under_sampled > 0 {
            Confidence::Low
        } else {
            Confidence::from_count(actions, t.high_confidence_actions, t.medium_confidence_actions)
        };

        builder
            .interpretation(interpretation)
            .confidence(confidence)
            .sample_size(actions)
            .build()
    }
}
