use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use clanscope_core::{ActorSnapshot, RecordSet};

use super::{Analyzer, AnalyzerId};
use crate::algorithms::pagerank::{weighted_pagerank, WeightedEdges};
use crate::features::{collection_tolerance, CollectionRuns, FeatureBundle, RatioClass};
use crate::report::{Confidence, Report};
use crate::stats;
use crate::thresholds::ResourceFlowThresholds;

/// Resource-flow network: who supplies whom, how concentrated giving is,
/// and how reciprocal the exchange is.
pub struct ResourceFlowAnalyzer {
    thresholds: ResourceFlowThresholds,
}

/// Growth of a cumulative counter; a drop means the counter was reset and
/// the new value is all growth since the reset.
fn counter_delta(prev: u64, cur: u64) -> f64 {
    if cur >= prev {
        (cur - prev) as f64
    } else {
        cur as f64
    }
}

/// Infer directed flows from cumulative given/received counters.
///
/// Between consecutive snapshots of each actor the given- and received-deltas
/// are attributed to the collection run of the later snapshot. Within a run
/// every giver's delta is split across the other actors in proportion to
/// what they received.
pub fn infer_flows(snapshots: &[ActorSnapshot], tolerance: Duration) -> WeightedEdges {
    let runs = CollectionRuns::of_snapshots(snapshots, tolerance);
    let mut by_actor: BTreeMap<&str, Vec<&ActorSnapshot>> = BTreeMap::new();
    for s in snapshots {
        by_actor.entry(s.actor_id.as_str()).or_default().push(s);
    }

    // run start -> actor -> (given delta, received delta)
    let mut instants: BTreeMap<DateTime<Utc>, BTreeMap<&str, (f64, f64)>> = BTreeMap::new();
    for (actor, mut series) in by_actor {
        series.sort_by_key(|s| s.timestamp);
        for pair in series.windows(2) {
            let given = counter_delta(pair[0].donations_given, pair[1].donations_given);
            let received = counter_delta(pair[0].donations_received, pair[1].donations_received);
            if given > 0.0 || received > 0.0 {
                let delta = instants
                    .entry(runs.run_of(pair[1].timestamp))
                    .or_default()
                    .entry(actor)
                    .or_insert((0.0, 0.0));
                delta.0 += given;
                delta.1 += received;
            }
        }
    }

    let mut edges = WeightedEdges::new();
    for deltas in instants.values() {
        for (giver, (given, _)) in deltas {
            if *given <= 0.0 {
                continue;
            }
            let others: f64 = deltas
                .iter()
                .filter(|(id, _)| *id != giver)
                .map(|(_, (_, r))| r)
                .sum();
            if others <= 0.0 {
                continue;
            }
            for (receiver, (_, received)) in deltas {
                if receiver == giver || *received <= 0.0 {
                    continue;
                }
                *edges
                    .entry((giver.to_string(), receiver.to_string()))
                    .or_insert(0.0) += given * received / others;
            }
        }
    }
    edges
}

fn reciprocity(edges: &WeightedEdges) -> f64 {
    let total: f64 = edges.values().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let mutual: f64 = edges
        .iter()
        .map(|((a, b), w)| {
            let back = edges.get(&(b.clone(), a.clone())).copied().unwrap_or(0.0);
            w.min(back)
        })
        .sum();
    mutual / total
}

impl ResourceFlowAnalyzer {
    pub fn new(thresholds: ResourceFlowThresholds) -> Self {
        Self { thresholds }
    }

    fn flows(&self, records: &RecordSet) -> WeightedEdges {
        infer_flows(&records.actor_snapshots, self.collection_tolerance())
    }

    fn actor_count(records: &RecordSet) -> usize {
        records
            .actor_snapshots
            .iter()
            .map(|s| s.actor_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

impl Analyzer for ResourceFlowAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::ResourceFlow
    }

    fn minimum_data_met(&self, records: &RecordSet) -> bool {
        Self::actor_count(records) >= self.thresholds.min_actors
            && self.flows(records).values().sum::<f64>() > 0.0
    }

    fn insufficient_reason(&self, records: &RecordSet) -> String {
        let actors = Self::actor_count(records);
        if actors < self.thresholds.min_actors {
            format!(
                "Resource flow needs at least {} actors; found {}.",
                self.thresholds.min_actors, actors
            )
        } else {
            "No resource exchange could be inferred between consecutive snapshots.".to_string()
        }
    }

    fn sample_size(&self, records: &RecordSet) -> usize {
        Self::actor_count(records)
    }

    fn collection_tolerance(&self) -> Duration {
        collection_tolerance(self.thresholds.collection_tolerance_secs)
    }

    fn analyze(&self, features: &FeatureBundle, records: &RecordSet) -> Report {
        let t = &self.thresholds;
        let edges = self.flows(records);
        let total_flow: f64 = edges.values().sum();

        let mut out_flow: BTreeMap<&str, f64> = BTreeMap::new();
        let mut active: BTreeSet<String> = BTreeSet::new();
        for ((source, target), w) in &edges {
            *out_flow.entry(source.as_str()).or_insert(0.0) += w;
            active.insert(source.clone());
            active.insert(target.clone());
        }

        // isolated actors are left out of the ranking but still count toward inequality
        let everyone: Vec<&str> = features.actors.keys().map(String::as_str).collect();
        let isolated = everyone.iter().filter(|a| !active.contains(**a)).count();
        let outflows: Vec<f64> = everyone
            .iter()
            .map(|a| out_flow.get(a).copied().unwrap_or(0.0))
            .collect();
        let gini = stats::gini(&outflows);
        let reciprocity = reciprocity(&edges);

        let centrality =
            weighted_pagerank(&active, &edges, t.damping, t.max_iterations, t.convergence);
        let mut ranked: Vec<(&String, &f64)> = centrality.iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));

        let class_count = |c: RatioClass| features.actors.values().filter(|a| a.ratio_class == c).count();
        let givers = class_count(RatioClass::Giver);
        let receivers = class_count(RatioClass::Receiver);
        let balanced = class_count(RatioClass::Balanced);
        let dependents = features
            .actors
            .values()
            .filter(|a| a.donation_ratio < t.dependent_ratio)
            .count();
        let health = ((1.0 - gini) * t.health_equality_weight
            + reciprocity * t.health_reciprocity_weight)
            * 100.0;

        let mut builder = Report::builder(AnalyzerId::ResourceFlow, features.subject_id.clone())
            .metric("total_flow", total_flow)
            .metric("edge_count", edges.len() as f64)
            .metric("active_actors", active.len() as f64)
            .metric("isolated_actors", isolated as f64)
            .metric("gini_outflow", gini)
            .metric("reciprocity", reciprocity)
            .metric("health_score", health)
            .metric("giver_count", givers as f64)
            .metric("receiver_count", receivers as f64)
            .metric("balanced_count", balanced as f64)
            .metric("dependent_count", dependents as f64);
        for (actor, score) in &centrality {
            builder = builder.keyed_metric("centrality", actor, *score);
        }
        for (actor, flow) in &out_flow {
            builder = builder.keyed_metric("outflow", actor, *flow);
        }

        let hubs: Vec<&str> = ranked.iter().take(3).map(|(id, _)| id.as_str()).collect();
        let concentration = if gini > t.concentrated_gini {
            "concentrated in a few suppliers"
        } else {
            "spread across the group"
        };
        let interpretation = format!(
            "Giving is {concentration} (Gini {gini:.2}); reciprocity {:.0}%. Central hubs: {}. {isolated} actors took no part in the exchange.",
            reciprocity * 100.0,
            hubs.join(", ")
        );

        let n = features.actors.len();
        builder
            .interpretation(interpretation)
            .confidence(Confidence::from_count(
                n,
                t.high_confidence_actors,
                t.medium_confidence_actors,
            ))
            .sample_size(n)
            .build()
    }
}
