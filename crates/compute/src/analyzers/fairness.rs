use std::collections::BTreeMap;

use clanscope_core::{InteractionEvent, Outcome, RecordSet};

use super::{Analyzer, AnalyzerId};
use crate::features::FeatureBundle;
use crate::report::{Confidence, Report};
use crate::stats;
use crate::thresholds::FairnessThresholds;

const UNLABELED: &str = "unlabeled";

/// Matchmaking fairness audit: compares win rates across partition cells
/// against an equal-strength null.
pub struct FairnessAnalyzer {
    thresholds: FairnessThresholds,
}

#[derive(Debug, Default)]
struct Cell {
    encounters: u64,
    wins: u64,
    difficulty: f64,
}

impl Cell {
    fn win_rate(&self) -> f64 {
        if self.encounters == 0 {
            0.0
        } else {
            self.wins as f64 / self.encounters as f64
        }
    }
}

impl FairnessAnalyzer {
    pub fn new(thresholds: FairnessThresholds) -> Self {
        Self { thresholds }
    }

    /// Encounter summaries with a known outcome, bucketed by partition label.
    fn cells(&self, records: &RecordSet) -> BTreeMap<String, Cell> {
        let mut cells: BTreeMap<String, Cell> = BTreeMap::new();
        for summary in records.encounter_summaries() {
            let Some(outcome) = summary.outcome else {
                continue;
            };
            let label = summary.partition.clone().unwrap_or_else(|| UNLABELED.to_string());
            let cell = cells.entry(label).or_default();
            cell.encounters += 1;
            if outcome == Outcome::Win {
                cell.wins += 1;
            }
            cell.difficulty += self.difficulty(summary, outcome);
        }
        cells
    }

    fn is_eligible(&self, cell: &Cell) -> bool {
        cell.encounters >= self.thresholds.min_cell_encounters as u64
    }

    /// How hard the matchup looked, judged from the final margin.
    fn difficulty(&self, summary: &InteractionEvent, outcome: Outcome) -> f64 {
        let t = &self.thresholds;
        let w = &t.difficulty;
        match outcome {
            Outcome::Win => w.win,
            Outcome::Tie => w.tie,
            Outcome::Loss => {
                let own = summary.magnitude;
                let Some(opponent) = summary.opponent_magnitude else {
                    return w.other_loss;
                };
                let top = own.max(opponent);
                if top <= 0.0 {
                    return w.other_loss;
                }
                let share = (own - opponent).abs() / top;
                if share <= t.close_margin_share {
                    w.close_loss
                } else if share >= t.blowout_margin_share {
                    w.blowout_loss
                } else {
                    w.other_loss
                }
            }
        }
    }
}

impl Analyzer for FairnessAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Fairness
    }

    fn minimum_data_met(&self, records: &RecordSet) -> bool {
        self.cells(records).values().any(|c| self.is_eligible(c))
    }

    fn insufficient_reason(&self, records: &RecordSet) -> String {
        let cells = self.cells(records);
        if cells.is_empty() {
            return "Fairness audit needs encounter results; none were recorded.".to_string();
        }
        let sizes: Vec<String> = cells
            .iter()
            .map(|(label, c)| format!("{label}={}", c.encounters))
            .collect();
        format!(
            "Fairness audit needs at least {} encounters in some partition; found {}.",
            self.thresholds.min_cell_encounters,
            sizes.join(", ")
        )
    }

    fn sample_size(&self, records: &RecordSet) -> usize {
        self.cells(records).values().map(|c| c.encounters as usize).sum()
    }

    fn analyze(&self, features: &FeatureBundle, records: &RecordSet) -> Report {
        let t = &self.thresholds;
        let (eligible, excluded): (Vec<_>, Vec<_>) = self
            .cells(records)
            .into_iter()
            .partition(|(_, c)| self.is_eligible(c));

        let encounters: u64 = eligible.iter().map(|(_, c)| c.encounters).sum();
        let wins: u64 = eligible.iter().map(|(_, c)| c.wins).sum();
        let observed = wins as f64 / encounters as f64;
        let bias = observed - t.expected_win_rate;
        let difficulty = eligible.iter().map(|(_, c)| c.difficulty).sum::<f64>() / encounters as f64;

        let mut builder = Report::builder(AnalyzerId::Fairness, features.subject_id.clone())
            .metric("win_rate", observed)
            .metric("expected_win_rate", t.expected_win_rate)
            .metric("bias_score", bias)
            .metric("mean_difficulty", difficulty)
            .metric("eligible_cells", eligible.len() as f64)
            .metric("excluded_cells", excluded.len() as f64);
        for (label, cell) in &eligible {
            builder = builder
                .keyed_metric("win_rate", label, cell.win_rate())
                .keyed_metric("bias", label, cell.win_rate() - t.expected_win_rate)
                .keyed_metric("encounters", label, cell.encounters as f64);
        }

        let lean = if bias.abs() < 0.05 {
            "matches the equal-strength expectation"
        } else if bias > 0.0 {
            "favours the subject"
        } else {
            "works against the subject"
        };
        let mut interpretation = format!(
            "Win rate {:.0}% over {encounters} encounters {lean} (bias {bias:+.2}).",
            observed * 100.0
        );

        let mut by_size: Vec<&(String, Cell)> = eligible.iter().collect();
        by_size.sort_by(|a, b| b.1.encounters.cmp(&a.1.encounters).then_with(|| a.0.cmp(&b.0)));
        if let [first, second, ..] = by_size.as_slice() {
            if let Some(test) = stats::two_proportion_z_test(
                first.1.wins,
                first.1.encounters,
                second.1.wins,
                second.1.encounters,
            ) {
                builder = builder
                    .metric("z_statistic", test.statistic)
                    .metric("p_value", test.p_value);
                let verdict = if test.p_value < t.significance {
                    "differ significantly"
                } else {
                    "do not differ significantly"
                };
                interpretation.push_str(&format!(
                    " Win rates in '{}' and '{}' {verdict} (p={:.3}).",
                    first.0, second.0, test.p_value
                ));
            }
        }
        if !excluded.is_empty() {
            let names: Vec<&str> = excluded.iter().map(|(label, _)| label.as_str()).collect();
            interpretation.push_str(&format!(
                " Excluded for fewer than {} encounters: {}.",
                t.min_cell_encounters,
                names.join(", ")
            ));
        }

        builder
            .interpretation(interpretation)
            .confidence(Confidence::from_count(
                encounters as usize,
                t.high_confidence_encounters,
                t.medium_confidence_encounters,
            ))
            .sample_size(encounters as usize)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::run;
    use crate::analyzers::testutil::{encounter, records};

    fn analyzer() -> FairnessAnalyzer {
        FairnessAnalyzer::new(FairnessThresholds::default())
    }

    fn results(rs: &mut RecordSet, partition: Option<&str>, wins: usize, losses: usize) {
        let prefix = partition.unwrap_or("none");
        for i in 0..wins + losses {
            let outcome = if i < wins { Outcome::Win } else { Outcome::Loss };
            let (own, opp) = if i < wins { (30.0, 20.0) } else { (20.0, 30.0) };
            rs.events.push(encounter(&format!("{prefix}-{i}"), i as i64, partition, outcome, own, opp));
        }
    }

    #[test]
    fn under_filled_cell_is_insufficient() {
        let mut rs = records("g");
        results(&mut rs, Some("league"), 2, 2);
        let r = run(&analyzer(), &rs);
        assert!(r.is_insufficient());
        assert_eq!(r.sample_size, 4);
        assert!(r.interpretation.contains("league=4"));
    }

    #[test]
    fn balanced_cell_has_no_bias_and_small_cells_are_named() {
        let mut rs = records("g");
        results(&mut rs, Some("league"), 3, 3);
        results(&mut rs, None, 1, 1);
        let r = run(&analyzer(), &rs);
        assert!(!r.is_insufficient());
        assert_eq!(r.metric("bias_score"), Some(0.0));
        assert_eq!(r.keyed_metric("win_rate", "league"), Some(0.5));
        assert_eq!(r.metric("excluded_cells"), Some(1.0));
        assert!(r.interpretation.contains("unlabeled"));
        assert!(r.metric("p_value").is_none());
        assert_eq!(r.sample_size, 6);
    }

    #[test]
    fn lopsided_cells_differ_significantly() {
        let mut rs = records("g");
        results(&mut rs, Some("league"), 18, 2);
        results(&mut rs, Some("regular"), 4, 16);
        let r = run(&analyzer(), &rs);
        assert!(r.metric("p_value").unwrap() < 0.05);
        assert!(r.interpretation.contains("differ significantly"));
        assert!(!r.interpretation.contains("do not differ"));
        assert_eq!(r.confidence, Confidence::High);
    }

    #[test]
    fn close_loss_is_hardest() {
        let a = analyzer();
        let mut rs = records("g");
        rs.events.push(encounter("c", 0, None, Outcome::Loss, 95.0, 100.0));
        rs.events.push(encounter("b", 0, None, Outcome::Loss, 20.0, 100.0));
        rs.events.push(encounter("o", 0, None, Outcome::Loss, 80.0, 100.0));
        let d: Vec<f64> = rs
            .encounter_summaries()
            .map(|s| a.difficulty(s, Outcome::Loss))
            .collect();
        assert_eq!(d, vec![0.8, 0.5, 0.6]);
    }
}
