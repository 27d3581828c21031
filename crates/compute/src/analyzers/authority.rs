use std::collections::BTreeMap;

use clanscope_core::RecordSet;

use super::{Analyzer, AnalyzerId};
use crate::features::FeatureBundle;
use crate::report::{Confidence, Report};
use crate::stats;
use crate::thresholds::AuthorityThresholds;

/// Authority distribution: how concentrated informal influence is.
///
/// Each actor's influence is a weighted blend of donation leadership,
/// participation, activity consistency and tenure. Shannon entropy over the
/// normalized influence shares buckets the group into centralized,
/// oligarchic or distributed.
pub struct AuthorityAnalyzer {
    thresholds: AuthorityThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Structure {
    Centralized,
    Oligarchic,
    Distributed,
}

impl Structure {
    fn describe(self) -> &'static str {
        match self {
            Structure::Centralized => "centralized: a single actor or a very small core dominates",
            Structure::Oligarchic => "oligarchic: influence is shared among a few key actors",
            Structure::Distributed => "distributed: many actors contribute to leadership",
        }
    }
}

impl AuthorityAnalyzer {
    pub fn new(thresholds: AuthorityThresholds) -> Self {
        Self { thresholds }
    }

    fn influences(&self, features: &FeatureBundle) -> BTreeMap<String, f64> {
        let t = &self.thresholds;
        let w = &t.weights;
        features
            .actors
            .values()
            .map(|a| {
                let donation = a.donation_ratio.min(t.donation_ratio_cap) / t.donation_ratio_cap;
                let participation = features.participation_rate(&a.actor_id);
                let consistency = a.consistency.unwrap_or(0.0);
                let tenure = (a.tenure_days / t.tenure_full_days).min(1.0);
                let score = w.donation * donation
                    + w.participation * participation
                    + w.consistency * consistency
                    + w.tenure * tenure;
                (a.actor_id.clone(), score)
            })
            .collect()
    }

    fn structure(&self, entropy: f64) -> Structure {
        if entropy < self.thresholds.centralized_below {
            Structure::Centralized
        } else if entropy < self.thresholds.oligarchic_below {
            Structure::Oligarchic
        } else {
            Structure::Distributed
        }
    }
}

impl Analyzer for AuthorityAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Authority
    }

    fn minimum_data_met(&self, records: &RecordSet) -> bool {
        let features = FeatureBundle::extract(records);
        if features.actors.len() < self.thresholds.min_actors {
            return false;
        }
        self.influences(&features).values().sum::<f64>() > 0.0
    }

    fn insufficient_reason(&self, records: &RecordSet) -> String {
        let actors = FeatureBundle::extract(records).actors.len();
        if actors < self.thresholds.min_actors {
            format!(
                "Authority distribution needs at least {} actors; found {}.",
                self.thresholds.min_actors, actors
            )
        } else {
            "No actor shows any measurable influence, so entropy is undefined.".to_string()
        }
    }

    fn sample_size(&self, records: &RecordSet) -> usize {
        FeatureBundle::extract(records).actors.len()
    }

    fn analyze(&self, features: &FeatureBundle, _records: &RecordSet) -> Report {
        let influences = self.influences(features);
        let total: f64 = influences.values().sum();
        let n = influences.len();

        let shares: Vec<f64> = influences.values().map(|v| v / total).collect();
        let entropy = stats::shannon_entropy(&shares);
        let max_entropy = (n as f64).log2();
        let normalized = entropy / max_entropy.max(1.0);
        let scores: Vec<f64> = influences.values().copied().collect();
        let gini = stats::gini(&scores);
        let top_share = shares.iter().copied().fold(0.0, f64::max);

        let mut ranked: Vec<(&String, &f64)> = influences.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let leaders: Vec<&str> = ranked.iter().take(3).map(|(id, _)| id.as_str()).collect();

        let structure = self.structure(entropy);
        let interpretation = format!(
            "Leadership is {} (entropy {:.2} of a possible {:.2} bits, Gini {:.2}). Most influential: {}.",
            structure.describe(),
            entropy,
            max_entropy,
            gini,
            leaders.join(", ")
        );

        let mut builder = Report::builder(AnalyzerId::Authority, features.subject_id.clone())
            .metric("entropy", entropy)
            .metric("max_entropy", max_entropy)
            .metric("normalized_entropy", normalized)
            .metric("gini", gini)
            .metric("top_share", top_share)
            .metric("actor_count", n as f64);
        for (actor, score) in &influences {
            builder = builder.keyed_metric("influence", actor, *score);
        }

        builder
            .interpretation(interpretation)
            .confidence(Confidence::from_count(
                n,
                self.thresholds.high_confidence_actors,
                self.thresholds.medium_confidence_actors,
            ))
            .sample_size(n)
            .build()
    }
}
