use chrono::Duration;
use clanscope_core::RecordSet;

use super::{Analyzer, AnalyzerId};
use crate::features::{collection_tolerance, tenure_days, FeatureBundle};
use crate::report::{Confidence, Report};
use crate::stats;
use crate::thresholds::VolatilityThresholds;

const Z_95: f64 = 1.96;

/// Volatility: fits a mean-reverting (Ornstein-Uhlenbeck) process to the
/// subject's rank trajectory and projects it a few days forward.
pub struct VolatilityAnalyzer {
    thresholds: VolatilityThresholds,
}

/// Fitted process parameters, per day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ReversionFit {
    /// Reversion rate θ, floored at 0.
    pub theta: f64,
    /// Equilibrium level μ.
    pub mu: f64,
    /// Diffusion σ per √day.
    pub sigma: f64,
}

/// Mean and 95% band of the projected level after the horizon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Forecast {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

impl VolatilityAnalyzer {
    pub fn new(thresholds: VolatilityThresholds) -> Self {
        Self { thresholds }
    }

    /// Regress ΔX on X: `ΔX = a + b·X`, giving θ = -b/Δt̄ and μ = -a/b.
    pub(crate) fn fit(times_days: &[f64], values: &[f64]) -> ReversionFit {
        let fallback_mu = stats::mean(values);
        if values.len() < 3 {
            return ReversionFit { theta: 0.0, mu: fallback_mu, sigma: 0.0 };
        }
        let dt: Vec<f64> = times_days.windows(2).map(|w| w[1] - w[0]).collect();
        let avg_dt = stats::mean(&dt);
        let level = &values[..values.len() - 1];
        let delta: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

        let Some(reg) = stats::linear_regression(level, &delta) else {
            return ReversionFit {
                theta: 0.0,
                mu: fallback_mu,
                sigma: if avg_dt > 0.0 { stats::std_dev(&delta) / avg_dt.sqrt() } else { 0.0 },
            };
        };

        let theta = if avg_dt > 0.0 { (-reg.slope / avg_dt).max(0.0) } else { 0.0 };
        let mu = if theta > 0.0 { -reg.intercept / reg.slope } else { fallback_mu };
        let sigma = if avg_dt > 0.0 { reg.residual_std / avg_dt.sqrt() } else { 0.0 };
        ReversionFit { theta, mu, sigma }
    }

    /// Propagate the mean and variance of the process one day at a time.
    pub(crate) fn forecast(fit: ReversionFit, current: f64, days: u32) -> Forecast {
        let mut mean = current;
        let mut var = 0.0;
        for _ in 0..days {
            if fit.theta > 0.0 {
                let decay = (-fit.theta).exp();
                mean = fit.mu + (mean - fit.mu) * decay;
                var = var * decay * decay
                    + fit.sigma.powi(2) * (1.0 - decay * decay) / (2.0 * fit.theta);
            } else {
                var += fit.sigma.powi(2);
            }
        }
        let half = Z_95 * var.sqrt();
        Forecast { mean, lower: mean - half, upper: mean + half }
    }

    fn stability(&self, values: &[f64]) -> (f64, f64) {
        let returns: Vec<f64> = values
            .windows(2)
            .filter(|w| w[0] != 0.0)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect();
        let volatility = stats::std_dev(&returns);
        let stability = (100.0 - self.thresholds.stability_scale * volatility).max(0.0);
        (volatility, stability)
    }

    /// Signed regime strength in [-1, 1] over the trailing window.
    fn regime(&self, values: &[f64]) -> f64 {
        let t = &self.thresholds;
        let recent = &values[values.len().saturating_sub(t.regime_window)..];
        let xs: Vec<f64> = (0..recent.len()).map(|i| i as f64).collect();
        let Some(fit) = stats::linear_regression(&xs, recent) else {
            return 0.0;
        };
        let steps = recent.len().saturating_sub(1) as f64;
        let ups = recent.windows(2).filter(|w| w[1] > w[0]).count() as f64;
        let downs = recent.windows(2).filter(|w| w[1] < w[0]).count() as f64;
        if fit.slope > t.regime_slope && ups > steps * t.regime_share {
            (fit.slope / t.regime_full_slope).min(1.0)
        } else if fit.slope < -t.regime_slope && downs > steps * t.regime_share {
            -(fit.slope.abs() / t.regime_full_slope).min(1.0)
        } else {
            0.0
        }
    }

    /// Points in the subject trajectory, one per collection run for a group.
    fn trajectory_len(&self, records: &RecordSet) -> usize {
        FeatureBundle::extract_with_tolerance(records, self.collection_tolerance())
            .trajectory
            .len()
    }
}

fn stability_label(stability: f64) -> &'static str {
    if stability > 80.0 {
        "very stable"
    } else if stability > 60.0 {
        "stable"
    } else if stability > 40.0 {
        "volatile"
    } else {
        "highly volatile"
    }
}

impl Analyzer for VolatilityAnalyzer {
    fn id(&self) -> AnalyzerId {
        AnalyzerId::Volatility
    }

    fn minimum_data_met(&self, records: &RecordSet) -> bool {
        self.trajectory_len(records) >= self.thresholds.min_points
    }

    fn insufficient_reason(&self, records: &RecordSet) -> String {
        format!(
            "Volatility needs at least {} ordered trajectory points; found {}.",
            self.thresholds.min_points,
            self.trajectory_len(records)
        )
    }

    fn sample_size(&self, records: &RecordSet) -> usize {
        self.trajectory_len(records)
    }

    fn collection_tolerance(&self) -> Duration {
        collection_tolerance(self.thresholds.collection_tolerance_secs)
    }

    fn analyze(&self, features: &FeatureBundle, _records: &RecordSet) -> Report {
        let t = &self.thresholds;
        let traj = &features.trajectory;
        let (Some(&(origin, _)), Some(&(_, current))) = (traj.first(), traj.last()) else {
            return Report::insufficient(
                AnalyzerId::Volatility,
                features.subject_id.clone(),
                0,
                "Volatility needs a non-empty trajectory.",
            );
        };
        let times: Vec<f64> = traj.iter().map(|(ts, _)| tenure_days(origin, *ts)).collect();
        let values: Vec<f64> = traj.iter().map(|(_, v)| *v).collect();

        let fit = Self::fit(&times, &values);
        let forecast = Self::forecast(fit, current, t.forecast_horizon_days);
        let (volatility, stability) = self.stability(&values);
        let regime = self.regime(&values);

        let mut builder = Report::builder(AnalyzerId::Volatility, features.subject_id.clone())
            .metric("mean", stats::mean(&values))
            .metric("std", stats::std_dev(&values))
            .metric("current", current)
            .metric("equilibrium", fit.mu)
            .metric("reversion_rate", fit.theta)
            .metric("diffusion", fit.sigma)
            .metric("drift", features.trajectory_momentum)
            .metric("volatility_index", volatility)
            .metric("stability_index", stability)
            .metric("regime_strength", regime)
            .metric("forecast_mean", forecast.mean)
            .metric("forecast_lower", forecast.lower)
            .metric("forecast_upper", forecast.upper)
            .metric("forecast_horizon_days", f64::from(t.forecast_horizon_days));
        if fit.theta > 0.0 {
            builder = builder.metric("half_life_days", std::f64::consts::LN_2 / fit.theta);
        }

        let direction = if forecast.mean > current {
            "rise"
        } else if forecast.mean < current {
            "fall"
        } else {
            "hold steady"
        };
        let regime_text = if regime > 0.0 {
            " A sustained upward streak is under way."
        } else if regime < 0.0 {
            " A sustained losing streak suggests tilt."
        } else {
            ""
        };
        let reversion_text = if fit.theta > 0.0 {
            format!("reverts toward {:.0} at {:.3}/day", fit.mu, fit.theta)
        } else {
            "shows no mean reversion".to_string()
        };
        let interpretation = format!(
            "Trajectory is {} (stability {:.0}/100) and {}. Over {} days it is expected to {} to about {:.0} (95% band {:.0} to {:.0}).{}",
            stability_label(stability),
            stability,
            reversion_text,
            t.forecast_horizon_days,
            direction,
            forecast.mean,
            forecast.lower,
            forecast.upper,
            regime_text
        );

        builder
            .interpretation(interpretation)
            .confidence(Confidence::from_count(
                values.len(),
                t.high_confidence_points,
                t.medium_confidence_points,
            ))
            .sample_size(values.len())
            .build()
    }
}
