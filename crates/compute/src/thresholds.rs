//! Analyzer thresholds: minimum samples, cut-offs, bucket boundaries and
//! weights, loadable from an `AnalysisThresholds` YAML document.
//!
//! Every field has a built-in default so a document only needs to name the
//! values it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::features::MAX_COLLECTION_TOLERANCE_SECS;

pub const THRESHOLDS_KIND: &str = "AnalysisThresholds";

#[derive(Debug, thiserror::Error)]
pub enum ThresholdsError {
    #[error("failed to read thresholds file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse thresholds document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("expected kind AnalysisThresholds, found {0}")]
    WrongKind(String),
    #[error("invalid thresholds: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

// ── YAML-level types ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsDocument {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ThresholdsMetadata,
    #[serde(default)]
    pub spec: Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsMetadata {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// All analyzer thresholds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    pub authority: AuthorityThresholds,
    pub pressure: PressureThresholds,
    pub coordination: CoordinationThresholds,
    pub volatility: VolatilityThresholds,
    pub resource_flow: ResourceFlowThresholds,
    pub contribution: ContributionThresholds,
    pub fairness: FairnessThresholds,
}

impl Thresholds {
    pub fn from_yaml(yaml: &str) -> Result<Self, ThresholdsError> {
        let doc: ThresholdsDocument = serde_yaml::from_str(yaml)?;
        if doc.kind != THRESHOLDS_KIND {
            return Err(ThresholdsError::WrongKind(doc.kind));
        }
        doc.spec.validate()?;
        tracing::info!(id = %doc.metadata.id, "Loaded analysis thresholds");
        Ok(doc.spec)
    }

    /// Range checks the analyzers rely on. Every violation is reported,
    /// each prefixed with its path in the document.
    pub fn validate(&self) -> Result<(), ThresholdsError> {
        let mut v = Violations::default();

        let a = &self.authority;
        v.at_least("authority.min_actors", a.min_actors, 1);
        v.positive("authority.donation_ratio_cap", a.donation_ratio_cap);
        v.positive("authority.tenure_full_days", a.tenure_full_days);
        for (name, w) in [
            ("donation", a.weights.donation),
            ("participation", a.weights.participation),
            ("consistency", a.weights.consistency),
            ("tenure", a.weights.tenure),
        ] {
            v.non_negative(&format!("authority.weights.{name}"), w);
        }

        let p = &self.pressure;
        v.at_least("pressure.min_actions_floor", p.min_actions_floor, 3);
        v.at_least("pressure.min_actions", p.min_actions, p.min_actions_floor);
        v.unit("pressure.early_share", p.early_share);
        v.unit("pressure.late_share", p.late_share);

        let c = &self.coordination;
        v.at_least("coordination.min_encounter_actions", c.min_encounter_actions, 2);
        v.positive("coordination.window_secs", c.window_secs as f64);
        v.positive("coordination.consistency_std_cap", c.consistency_std_cap);
        for (name, w) in [
            ("timing_weight", c.timing_weight),
            ("targeting_weight", c.targeting_weight),
            ("motif_weight", c.motif_weight),
        ] {
            v.non_negative(&format!("coordination.{name}"), w);
        }

        let vol = &self.volatility;
        v.at_least("volatility.min_points", vol.min_points, 3);
        v.at_least("volatility.regime_window", vol.regime_window, 2);
        v.positive("volatility.regime_full_slope", vol.regime_full_slope);
        v.tolerance("volatility.collection_tolerance_secs", vol.collection_tolerance_secs);

        let rf = &self.resource_flow;
        v.at_least("resource_flow.min_actors", rf.min_actors, 2);
        v.open_unit("resource_flow.damping", rf.damping);
        v.at_least("resource_flow.max_iterations", rf.max_iterations, 1);
        v.positive("resource_flow.convergence", rf.convergence);
        v.tolerance("resource_flow.collection_tolerance_secs", rf.collection_tolerance_secs);

        let ct = &self.contribution;
        v.at_least("contribution.min_actors", ct.min_actors, 2);
        v.percentile("contribution.free_rider_percentile", ct.free_rider_percentile);
        v.percentile("contribution.top_percentile", ct.top_percentile);
        v.at_least("contribution.min_comparison_encounters", ct.min_comparison_encounters, 2);
        v.open_unit("contribution.significance", ct.significance);

        let f = &self.fairness;
        v.at_least("fairness.min_cell_encounters", f.min_cell_encounters, 1);
        v.open_unit("fairness.expected_win_rate", f.expected_win_rate);
        v.open_unit("fairness.significance", f.significance);
        v.unit("fairness.close_margin_share", f.close_margin_share);
        v.unit("fairness.blowout_margin_share", f.blowout_margin_share);

        v.finish()
    }

    pub fn from_path(path: &Path) -> Result<Self, ThresholdsError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }
}

#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn error(&mut self, path: &str, message: String) {
        self.0.push(format!("{path}: {message}"));
    }

    fn at_least(&mut self, path: &str, value: usize, min: usize) {
        if value < min {
            self.error(path, format!("must be at least {min}, got {value}"));
        }
    }

    fn positive(&mut self, path: &str, value: f64) {
        if !(value.is_finite() && value > 0.0) {
            self.error(path, format!("must be a positive number, got {value}"));
        }
    }

    fn non_negative(&mut self, path: &str, value: f64) {
        if !(value.is_finite() && value >= 0.0) {
            self.error(path, format!("must not be negative, got {value}"));
        }
    }

    fn unit(&mut self, path: &str, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            self.error(path, format!("must be within [0, 1], got {value}"));
        }
    }

    fn open_unit(&mut self, path: &str, value: f64) {
        if !(value > 0.0 && value < 1.0) {
            self.error(path, format!("must be strictly between 0 and 1, got {value}"));
        }
    }

    fn percentile(&mut self, path: &str, value: f64) {
        if !(0.0..=100.0).contains(&value) {
            self.error(path, format!("must be within [0, 100], got {value}"));
        }
    }

    fn tolerance(&mut self, path: &str, secs: u64) {
        if secs > MAX_COLLECTION_TOLERANCE_SECS {
            self.error(
                path,
                format!("must be at most {MAX_COLLECTION_TOLERANCE_SECS}, got {secs}"),
            );
        }
    }

    fn finish(self) -> Result<(), ThresholdsError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ThresholdsError::Invalid(self.0))
        }
    }
}

// ── Authority distribution ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorityThresholds {
    pub min_actors: usize,
    pub weights: AuthorityWeights,
    /// Donation ratios above this count as full leadership.
    pub donation_ratio_cap: f64,
    /// Tenure reaching this many days scores 1.
    pub tenure_full_days: f64,
    /// Entropy below this (bits) is centralized.
    pub centralized_below: f64,
    /// Entropy below this (bits) is oligarchic; above is distributed.
    pub oligarchic_below: f64,
    pub high_confidence_actors: usize,
    pub medium_confidence_actors: usize,
}

impl Default for AuthorityThresholds {
    fn default() -> Self {
        Self {
            min_actors: 2,
            weights: AuthorityWeights::default(),
            donation_ratio_cap: 5.0,
            tenure_full_days: 30.0,
            centralized_below: 1.5,
            oligarchic_below: 2.5,
            high_confidence_actors: 10,
            medium_confidence_actors: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AuthorityWeights {
    pub donation: f64,
    pub participation: f64,
    pub consistency: f64,
    pub tenure: f64,
}

impl Default for AuthorityWeights {
    fn default() -> Self {
        Self {
            donation: 0.30,
            participation: 0.35,
            consistency: 0.20,
            tenure: 0.15,
        }
    }
}

// ── Pressure response ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PressureThresholds {
    /// Actors with fewer actions are skipped entirely.
    pub min_actions_floor: usize,
    /// Actors below this are reported with widened uncertainty and low confidence.
    pub min_actions: usize,
    pub uncertainty_widening: f64,
    /// |β| below this is pressure-neutral.
    pub neutral_band: f64,
    /// Stakes at or above this count as high stakes in the variance split.
    pub high_stakes_split: f64,
    pub choke_pressure: f64,
    pub choke_sigma_multiplier: f64,
    pub choke_prone_penalty: f64,
    /// Deficit pressure per unit of opponent lead, capped at `deficit_cap`.
    pub deficit_per_point: f64,
    pub deficit_cap: f64,
    pub early_share: f64,
    pub early_stakes: f64,
    pub late_share: f64,
    pub late_stakes: f64,
    /// Late actions only add stakes when the score gap is within this margin.
    pub close_margin: f64,
    /// Partition labels that carry no extra stakes.
    pub baseline_partitions: Vec<String>,
    pub partition_stakes: f64,
    pub high_confidence_actions: usize,
    pub medium_confidence_actions: usize,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            min_actions_floor: 3,
            min_actions: 8,
            uncertainty_widening: 1.5,
            neutral_band: 0.2,
            high_stakes_split: 0.5,
            choke_pressure: 0.8,
            choke_sigma_multiplier: 1.2,
            choke_prone_penalty: 0.8,
            deficit_per_point: 0.1,
            deficit_cap: 0.4,
            early_share: 0.3,
            early_stakes: 0.2,
            late_share: 0.3,
            late_stakes: 0.3,
            close_margin: 3.0,
            baseline_partitions: vec!["regular".to_string()],
            partition_stakes: 0.1,
            high_confidence_actions: 100,
            medium_confidence_actions: 40,
        }
    }
}

// ── Coordination ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinationThresholds {
    /// Encounters with fewer sub-actions score 0 and are excluded.
    pub min_encounter_actions: usize,
    pub window_secs: i64,
    /// Followers inside the window for an action to count as coordinated.
    pub min_followers: usize,
    pub timing_high_share: f64,
    pub timing_mid_share: f64,
    pub timing_high: f64,
    pub timing_mid: f64,
    pub timing_low: f64,
    pub sequential_share: f64,
    pub sequential_score: f64,
    pub mirror_share: f64,
    pub mirror_score: f64,
    pub default_motif_score: f64,
    pub timing_weight: f64,
    pub targeting_weight: f64,
    pub motif_weight: f64,
    pub grade_a: f64,
    pub grade_b: f64,
    pub grade_c: f64,
    pub min_trend_encounters: usize,
    /// Index points per encounter beyond which the trend is improving or declining.
    pub trend_slope: f64,
    /// Standard deviation cap used by the consistency score.
    pub consistency_std_cap: f64,
    pub high_confidence_encounters: usize,
    pub medium_confidence_encounters: usize,
}

impl Default for CoordinationThresholds {
    fn default() -> Self {
        Self {
            min_encounter_actions: 2,
            window_secs: 300,
            min_followers: 2,
            timing_high_share: 0.3,
            timing_mid_share: 0.1,
            timing_high: 0.9,
            timing_mid: 0.6,
            timing_low: 0.3,
            sequential_share: 0.4,
            sequential_score: 0.7,
            mirror_share: 0.5,
            mirror_score: 0.8,
            default_motif_score: 0.4,
            timing_weight: 0.3,
            targeting_weight: 0.4,
            motif_weight: 0.3,
            grade_a: 75.0,
            grade_b: 60.0,
            grade_c: 45.0,
            min_trend_encounters: 3,
            trend_slope: 2.0,
            consistency_std_cap: 30.0,
            high_confidence_encounters: 10,
            medium_confidence_encounters: 5,
        }
    }
}

// ── Volatility ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VolatilityThresholds {
    pub min_points: usize,
    /// Member snapshots this close to a run's first snapshot belong to the
    /// same group trajectory point.
    pub collection_tolerance_secs: u64,
    pub forecast_horizon_days: u32,
    /// Stability index = max(0, 100 - scale * std(returns)).
    pub stability_scale: f64,
    /// Trailing points inspected for a momentum or tilt regime.
    pub regime_window: usize,
    /// Slope per point beyond which a streak counts as a regime.
    pub regime_slope: f64,
    /// Share of same-signed steps a regime requires.
    pub regime_share: f64,
    /// Slope giving full regime strength.
    pub regime_full_slope: f64,
    pub high_confidence_points: usize,
    pub medium_confidence_points: usize,
}

impl Default for VolatilityThresholds {
    fn default() -> Self {
        Self {
            min_points: 10,
            collection_tolerance_secs: 300,
            forecast_horizon_days: 7,
            stability_scale: 1000.0,
            regime_window: 14,
            regime_slope: 10.0,
            regime_share: 0.6,
            regime_full_slope: 50.0,
            high_confidence_points: 30,
            medium_confidence_points: 20,
        }
    }
}

// ── Resource flow ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceFlowThresholds {
    pub min_actors: usize,
    /// Snapshots this close to a run's first snapshot are one collection pass.
    pub collection_tolerance_secs: u64,
    pub damping: f64,
    pub max_iterations: usize,
    pub convergence: f64,
    /// Gini of out-flow above this is reported as concentrated.
    pub concentrated_gini: f64,
    /// Donation ratio below which an actor depends on others.
    pub dependent_ratio: f64,
    pub health_equality_weight: f64,
    pub health_reciprocity_weight: f64,
    pub high_confidence_actors: usize,
    pub medium_confidence_actors: usize,
}

impl Default for ResourceFlowThresholds {
    fn default() -> Self {
        Self {
            min_actors: 2,
            collection_tolerance_secs: 300,
            damping: 0.85,
            max_iterations: 100,
            convergence: 1e-6,
            concentrated_gini: 0.6,
            dependent_ratio: 0.3,
            health_equality_weight: 0.4,
            health_reciprocity_weight: 0.6,
            high_confidence_actors: 10,
            medium_confidence_actors: 5,
        }
    }
}

// ── Collective contribution ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ContributionThresholds {
    pub min_actors: usize,
    pub free_rider_percentile: f64,
    pub top_percentile: f64,
    /// Encounters needed on each side before comparing them.
    pub min_comparison_encounters: usize,
    pub significance: f64,
    pub high_confidence_encounters: usize,
    pub medium_confidence_encounters: usize,
}

impl Default for ContributionThresholds {
    fn default() -> Self {
        Self {
            min_actors: 2,
            free_rider_percentile: 10.0,
            top_percentile: 90.0,
            min_comparison_encounters: 2,
            significance: 0.05,
            high_confidence_encounters: 10,
            medium_confidence_encounters: 5,
        }
    }
}

// ── Fairness audit ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FairnessThresholds {
    pub min_cell_encounters: usize,
    pub expected_win_rate: f64,
    pub significance: f64,
    /// Margin (as a share of the winner's total) at or below which a result is close.
    pub close_margin_share: f64,
    /// Margin share at or above which a result is a blowout.
    pub blowout_margin_share: f64,
    pub difficulty: DifficultyWeights,
    pub high_confidence_encounters: usize,
    pub medium_confidence_encounters: usize,
}

impl Default for FairnessThresholds {
    fn default() -> Self {
        Self {
            min_cell_encounters: 5,
            expected_win_rate: 0.5,
            significance: 0.05,
            close_margin_share: 0.1,
            blowout_margin_share: 0.3,
            difficulty: DifficultyWeights::default(),
            high_confidence_encounters: 30,
            medium_confidence_encounters: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DifficultyWeights {
    pub close_loss: f64,
    pub blowout_loss: f64,
    pub other_loss: f64,
    pub win: f64,
    pub tie: f64,
}

impl Default for DifficultyWeights {
    fn default() -> Self {
        Self {
            close_loss: 0.8,
            blowout_loss: 0.5,
            other_loss: 0.6,
            win: 0.3,
            tie: 0.5,
        }
    }
}
