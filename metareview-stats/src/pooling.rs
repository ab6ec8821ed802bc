//! Fixed- and random-effects pooling.
//!
//! Inverse-variance fixed effects and DerSimonian–Laird random effects, with
//! Cochran's Q, I², H², τ² and a t-based prediction interval.
//!
//! Heterogeneity is always measured around the fixed-effect summary, because
//! Q needs a reference point that does not depend on τ². Both fixed and
//! random weight percentages are reported for every study whichever model is
//! chosen.
//!
//! # Example
//!
//! ```
//! use metareview_stats::pooling::{meta_analysis, Model};
//! use metareview_stats::study::{EffectMeasure, Study};
//!
//! let studies = vec![
//!     Study::binary("1", "ISIS-2", 791, 8587, 1029, 8600),
//!     Study::binary("2", "SALT", 150, 676, 196, 684),
//!     Study::binary("3", "UK-TIA", 286, 1632, 168, 814),
//! ];
//! let result = meta_analysis(&studies, EffectMeasure::OddsRatio, Model::Random).unwrap();
//! assert!(result.effect < 1.0);
//! assert!(result.prediction_interval.is_some());
//! ```

use core::fmt;

use metareview_core::{MetaError, Result, Summarizable};

use crate::distribution::{chi_squared_p_value, t_quantile, z_to_p};
use crate::effect_size::{calculate_ci, calculate_effect_size, to_original_scale};
use crate::study::{EffectMeasure, Study};

/// Pooling model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Model {
    /// Inverse-variance fixed effect: one true effect shared by all studies.
    Fixed,
    /// DerSimonian–Laird random effects: true effects vary across studies.
    #[default]
    Random,
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// A study's identity plus its analysis-scale effect, the unit every
/// diagnostic re-pools.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StudyEstimate {
    pub id: String,
    pub name: String,
    pub year: Option<i32>,
    pub yi: f64,
    pub sei: f64,
}

impl StudyEstimate {
    pub fn vi(&self) -> f64 {
        self.sei * self.sei
    }
}

/// Per-study record of a pooled analysis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StudyEffect {
    pub id: String,
    pub name: String,
    pub year: Option<i32>,
    /// Effect on the analysis scale.
    pub yi: f64,
    /// Standard error of `yi`.
    pub sei: f64,
    /// Sampling variance `sei²`.
    pub vi: f64,
    /// Fixed-effect weight, percent of the total fixed weight.
    pub weight_fixed: f64,
    /// Random-effects weight, percent of the total random weight.
    pub weight_random: f64,
    /// Lower 95% bound on the reporting scale.
    pub ci_lower: f64,
    /// Upper 95% bound on the reporting scale.
    pub ci_upper: f64,
    /// Effect on the reporting scale.
    pub effect: f64,
}

impl From<&StudyEffect> for StudyEstimate {
    fn from(s: &StudyEffect) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            year: s.year,
            yi: s.yi,
            sei: s.sei,
        }
    }
}

/// Between-study heterogeneity statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Heterogeneity {
    /// Cochran's Q.
    pub q: f64,
    /// Degrees of freedom, `k − 1`.
    pub df: usize,
    /// Upper-tail chi-squared p-value of Q.
    pub p_value: f64,
    /// I² in percent, within `[0, 100]`.
    pub i2: f64,
    /// DerSimonian–Laird between-study variance, never negative.
    pub tau2: f64,
    pub tau: f64,
    /// H² = Q / df (1 when df = 0).
    pub h2: f64,
}

impl Heterogeneity {
    /// Heterogeneity of a single study: nothing to measure.
    pub fn none() -> Self {
        Self {
            q: 0.0,
            df: 0,
            p_value: 1.0,
            i2: 0.0,
            tau2: 0.0,
            tau: 0.0,
            h2: 1.0,
        }
    }
}

/// Range in which the true effect of a new study is expected to fall.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PredictionInterval {
    /// Lower bound on the reporting scale.
    pub lower: f64,
    /// Upper bound on the reporting scale.
    pub upper: f64,
    /// Degrees of freedom of the t quantile, `k − 2`.
    pub df: usize,
}

/// Result of pooling a set of studies.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetaAnalysisResult {
    /// Pooled effect on the analysis scale under `model`.
    pub summary: f64,
    /// Standard error of `summary`.
    pub se: f64,
    /// Pooled effect on the reporting scale.
    pub effect: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// Wald z statistic `summary / se`.
    pub z: f64,
    /// Two-sided p-value of `z`.
    pub p_value: f64,
    pub model: Model,
    pub measure: EffectMeasure,
    /// Inverse-variance fixed-effect summary, reported whatever `model` is.
    pub fixed_summary: f64,
    pub fixed_se: f64,
    /// Per-study records, in input order.
    pub studies: Vec<StudyEffect>,
    pub heterogeneity: Heterogeneity,
    /// Present only when k ≥ 3.
    pub prediction_interval: Option<PredictionInterval>,
}

impl MetaAnalysisResult {
    /// Number of pooled studies.
    pub fn k(&self) -> usize {
        self.studies.len()
    }

    /// The pooled studies as re-poolable estimates, in input order.
    pub fn estimates(&self) -> Vec<StudyEstimate> {
        self.studies.iter().map(StudyEstimate::from).collect()
    }

    /// τ² that enters the weights of the chosen model (0 for fixed effect).
    pub fn model_tau2(&self) -> f64 {
        match self.model {
            Model::Fixed => 0.0,
            Model::Random => self.heterogeneity.tau2,
        }
    }
}

impl Summarizable for MetaAnalysisResult {
    fn summary(&self) -> String {
        format!(
            "{} {:.3} [{:.3}, {:.3}], z={:.3}, p={:.4}, I²={:.1}%, τ²={:.4} ({} effects, k={})",
            self.measure,
            self.effect,
            self.ci_lower,
            self.ci_upper,
            self.z,
            self.p_value,
            self.heterogeneity.i2,
            self.heterogeneity.tau2,
            self.model,
            self.k(),
        )
    }
}

// ── Entry points ───────────────────────────────────────────────────────────

/// Compute every study's effect for `measure`, preserving input order.
///
/// # Errors
///
/// Propagates the first effect-size failure (measure/data mismatch or
/// invalid values), prefixed with the offending study's id.
pub fn estimate_studies(studies: &[Study], measure: EffectMeasure) -> Result<Vec<StudyEstimate>> {
    studies
        .iter()
        .map(|study| {
            let est = calculate_effect_size(&study.data, measure).map_err(|e| match e {
                MetaError::InvalidInput(msg) => {
                    MetaError::InvalidInput(format!("study {}: {}", study.id, msg))
                }
                other => other,
            })?;
            Ok(StudyEstimate {
                id: study.id.clone(),
                name: study.name.clone(),
                year: study.year,
                yi: est.yi,
                sei: est.sei,
            })
        })
        .collect()
}

/// Pool studies under `model`.
///
/// # Errors
///
/// [`MetaError::EmptyStudies`] for an empty slice, plus any effect-size error.
pub fn meta_analysis(studies: &[Study], measure: EffectMeasure, model: Model) -> Result<MetaAnalysisResult> {
    if studies.is_empty() {
        return Err(MetaError::EmptyStudies);
    }
    let estimates = estimate_studies(studies, measure)?;
    pool_estimates(&estimates, measure, model)
}

/// Pool pre-computed study estimates under `model`.
///
/// # Errors
///
/// [`MetaError::EmptyStudies`] for an empty slice, and
/// [`MetaError::InvalidInput`] if any `yi` is non-finite or any `sei` is not
/// a positive finite number.
pub fn pool_estimates(
    estimates: &[StudyEstimate],
    measure: EffectMeasure,
    model: Model,
) -> Result<MetaAnalysisResult> {
    if estimates.is_empty() {
        return Err(MetaError::EmptyStudies);
    }
    for e in estimates {
        if !e.yi.is_finite() || !(e.sei > 0.0 && e.sei.is_finite()) {
            return Err(MetaError::InvalidInput(format!(
                "study {}: need finite yi and positive sei (yi={}, sei={})",
                e.id, e.yi, e.sei
            )));
        }
    }

    let yi: Vec<f64> = estimates.iter().map(|e| e.yi).collect();
    let vi: Vec<f64> = estimates.iter().map(StudyEstimate::vi).collect();
    let k = estimates.len();

    let fixed = weighted_mean(&yi, &vi, 0.0);
    let heterogeneity = heterogeneity_from(&yi, &vi);
    let random = weighted_mean(&yi, &vi, heterogeneity.tau2);

    let (summary, se) = match model {
        Model::Fixed => (fixed.mean, fixed.se),
        Model::Random => (random.mean, random.se),
    };

    let z = summary / se;
    let (ci_lower, ci_upper) = calculate_ci(summary, se, measure);

    let studies = estimates
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let (lo, hi) = calculate_ci(e.yi, e.sei, measure);
            StudyEffect {
                id: e.id.clone(),
                name: e.name.clone(),
                year: e.year,
                yi: e.yi,
                sei: e.sei,
                vi: vi[i],
                weight_fixed: 100.0 / vi[i] / fixed.total_weight,
                weight_random: 100.0 / (vi[i] + heterogeneity.tau2) / random.total_weight,
                ci_lower: lo,
                ci_upper: hi,
                effect: to_original_scale(e.yi, measure),
            }
        })
        .collect();

    let prediction_interval = if k >= 3 {
        let df = k - 2;
        let t = t_quantile(0.975, df as f64);
        let spread = t * (heterogeneity.tau2 + se * se).sqrt();
        Some(PredictionInterval {
            lower: to_original_scale(summary - spread, measure),
            upper: to_original_scale(summary + spread, measure),
            df,
        })
    } else {
        None
    };

    tracing::trace!(k, %model, %measure, summary, se, tau2 = heterogeneity.tau2, "pooled studies");

    Ok(MetaAnalysisResult {
        summary,
        se,
        effect: to_original_scale(summary, measure),
        ci_lower,
        ci_upper,
        z,
        p_value: z_to_p(z),
        model,
        measure,
        fixed_summary: fixed.mean,
        fixed_se: fixed.se,
        studies,
        heterogeneity,
        prediction_interval,
    })
}

/// Heterogeneity of a set of estimates around their fixed-effect summary.
pub fn compute_heterogeneity(estimates: &[StudyEstimate]) -> Heterogeneity {
    let yi: Vec<f64> = estimates.iter().map(|e| e.yi).collect();
    let vi: Vec<f64> = estimates.iter().map(StudyEstimate::vi).collect();
    heterogeneity_from(&yi, &vi)
}

// ── Internals ──────────────────────────────────────────────────────────────

/// Inverse-variance weighted mean with weights `1 / (vi + tau2)`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WeightedMean {
    pub mean: f64,
    pub se: f64,
    pub total_weight: f64,
}

pub(crate) fn weighted_mean(yi: &[f64], vi: &[f64], tau2: f64) -> WeightedMean {
    let mut sum_w = 0.0;
    let mut sum_wy = 0.0;
    for (y, v) in yi.iter().zip(vi) {
        let w = 1.0 / (v + tau2);
        sum_w += w;
        sum_wy += w * y;
    }
    WeightedMean {
        mean: sum_wy / sum_w,
        se: (1.0 / sum_w).sqrt(),
        total_weight: sum_w,
    }
}

pub(crate) fn heterogeneity_from(yi: &[f64], vi: &[f64]) -> Heterogeneity {
    let k = yi.len();
    if k < 2 {
        return Heterogeneity::none();
    }
    let df = k - 1;
    let fixed = weighted_mean(yi, vi, 0.0);

    let mut q = 0.0;
    let mut sum_w2 = 0.0;
    for (y, v) in yi.iter().zip(vi) {
        let w = 1.0 / v;
        q += w * (y - fixed.mean).powi(2);
        sum_w2 += w * w;
    }

    let c = fixed.total_weight - sum_w2 / fixed.total_weight;
    let df_f = df as f64;
    let tau2 = if c > 0.0 { ((q - df_f) / c).max(0.0) } else { 0.0 };
    let i2 = if q > 0.0 {
        ((q - df_f) / q * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Heterogeneity {
        q,
        df,
        p_value: chi_squared_p_value(q, df_f),
        i2,
        tau2,
        tau: tau2.sqrt(),
        h2: q / df_f,
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn aspirin_random_effects_regression_fixture() {
        let r = meta_analysis(&aspirin(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        assert!((r.summary - (-0.26786294750144196)).abs() < 1e-9);
        assert!((r.effect - 0.7650126208095385).abs() < 1e-9);
        assert!((r.se - 0.03427571921096785).abs() < 1e-9);
        assert!((r.ci_lower - 0.7153070720006681).abs() < 1e-8);
        assert!((r.ci_upper - 0.8181721290144494).abs() < 1e-8);
        assert!((r.heterogeneity.q - 2.7037934553274097).abs() < 1e-8);
        assert_eq!(r.heterogeneity.df, 6);
        assert_eq!(r.heterogeneity.i2, 0.0);
        assert_eq!(r.heterogeneity.tau2, 0.0);
        assert!((r.heterogeneity.h2 - 0.4506322425545683).abs() < 1e-9);
        assert!((r.z - (-7.81494753918187)).abs() < 1e-7);
        assert!(r.p_value < 1e-13);
    }

    #[test]
    fn fleiss_random_effects_matches_published_dl() {
        let r = meta_analysis(&fleiss93(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        assert!((r.effect - 0.8763).abs() < 5e-3);
        assert!((r.ci_lower - 0.7743).abs() < 5e-3);
        assert!((r.ci_upper - 0.9917).abs() < 5e-3);
        assert!((r.heterogeneity.i2 - 39.67).abs() < 0.01);
        assert!((r.heterogeneity.tau2 - 0.009637).abs() < 1e-5);
        assert!((r.heterogeneity.q - 9.946).abs() < 1e-3);
        assert!((r.fixed_summary.exp() - 0.8969).abs() < 5e-4);
    }

    #[test]
    fn aspirin_weights_match_reference() {
        let r = meta_analysis(&aspirin(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        let expected = [
            47.06088415896168,
            7.473902905528959,
            10.00718508717816,
            17.59306676152415,
            8.449712653770328,
            7.9851569951344485,
            1.4300914379022769,
        ];
        for (s, w) in r.studies.iter().zip(expected) {
            assert!((s.weight_fixed - w).abs() < 1e-8);
            assert!((s.weight_random - w).abs() < 1e-8);
        }
        // input order is preserved
        let names: Vec<&str> = r.studies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["ISIS-2", "SALT", "UK-TIA", "ESPS-2", "TPT", "HOT", "PPP"]);
    }

    #[test]
    fn continuous_mean_difference() {
        let r = meta_analysis(&blood_pressure(), EffectMeasure::MeanDifference, Model::Random).unwrap();
        assert!((r.summary - (-7.170930379893113)).abs() < 1e-8);
        assert!((r.se - 0.6360163215855754).abs() < 1e-8);
        assert!((r.heterogeneity.i2 - 53.65996396830865).abs() < 1e-6);
        assert!((r.heterogeneity.tau2 - 1.257360474421408).abs() < 1e-8);
        assert_eq!(r.effect, r.summary);
    }

    #[test]
    fn continuous_hedges_g() {
        let r = meta_analysis(
            &blood_pressure(),
            EffectMeasure::StandardizedMeanDifference,
            Model::Random,
        )
        .unwrap();
        assert!((r.summary - (-1.385270926256601)).abs() < 1e-8);
        assert!((r.se - 0.17107991824863825).abs() < 1e-8);
        assert!((r.heterogeneity.i2 - 69.24331883564228).abs() < 1e-6);
    }

    #[test]
    fn hazard_ratio_pooling() {
        let studies = vec![
            Study::hazard("a", "ONCO_A", 0.72, 0.65, 0.80),
            Study::hazard("b", "ONCO_B", 0.85, 0.74, 0.97),
            Study::hazard("c", "ONCO_C", 0.68, 0.58, 0.80),
        ];
        let r = meta_analysis(&studies, EffectMeasure::HazardRatio, Model::Random).unwrap();
        assert!((r.effect - 0.7480685262998437).abs() < 1e-8);
        assert!((r.heterogeneity.i2 - 62.231721245036574).abs() < 1e-6);
        assert!((r.heterogeneity.tau2 - 0.00741204160011844).abs() < 1e-9);
        assert!(r.prediction_interval.is_some());
    }

    #[test]
    fn single_study_has_zeroed_heterogeneity() {
        let studies = vec![Study::binary("s", "Solo", 50, 200, 70, 200)];
        let r = meta_analysis(&studies, EffectMeasure::OddsRatio, Model::Random).unwrap();
        assert_eq!(r.heterogeneity, Heterogeneity::none());
        assert!(r.prediction_interval.is_none());
        assert!((r.studies[0].weight_fixed - 100.0).abs() < 1e-12);
        assert!((r.studies[0].weight_random - 100.0).abs() < 1e-12);
        assert!((r.summary - r.studies[0].yi).abs() < 1e-12);
    }

    #[test]
    fn two_studies_have_no_prediction_interval() {
        let studies = vec![
            Study::binary("a", "Duo_A", 30, 100, 45, 100),
            Study::binary("b", "Duo_B", 15, 80, 25, 80),
        ];
        let r = meta_analysis(&studies, EffectMeasure::OddsRatio, Model::Fixed).unwrap();
        assert_eq!(r.heterogeneity.df, 1);
        assert!(r.prediction_interval.is_none());
    }

    #[test]
    fn prediction_interval_contains_ci() {
        let r = meta_analysis(&fleiss93(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        let pi = r.prediction_interval.unwrap();
        assert_eq!(pi.df, 5);
        assert!(pi.lower < r.ci_lower && pi.upper > r.ci_upper);
    }

    #[test]
    fn fixed_model_uses_fixed_summary() {
        let r = meta_analysis(&fleiss93(), EffectMeasure::OddsRatio, Model::Fixed).unwrap();
        assert_eq!(r.summary, r.fixed_summary);
        assert_eq!(r.model_tau2(), 0.0);
        // random weights are still reported and differ under heterogeneity
        assert!(r.studies.iter().any(|s| (s.weight_fixed - s.weight_random).abs() > 1e-3));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(
            meta_analysis(&[], EffectMeasure::OddsRatio, Model::Random).unwrap_err(),
            MetaError::EmptyStudies
        );
        assert!(pool_estimates(&[], EffectMeasure::MeanDifference, Model::Fixed).is_err());
    }

    #[test]
    fn mismatched_measure_is_an_error() {
        let err = meta_analysis(&aspirin(), EffectMeasure::MeanDifference, Model::Random).unwrap_err();
        assert!(matches!(err, MetaError::MeasureMismatch { .. }));
    }

    #[test]
    fn identical_effects_have_zero_q() {
        let est: Vec<StudyEstimate> = (0..4)
            .map(|i| StudyEstimate {
                id: i.to_string(),
                name: format!("S{}", i),
                year: None,
                yi: 0.3,
                sei: 0.1 + 0.05 * i as f64,
            })
            .collect();
        let h = compute_heterogeneity(&est);
        assert!(h.q.abs() < 1e-20);
        assert_eq!(h.i2, 0.0);
        assert_eq!(h.tau2, 0.0);
    }

    #[test]
    fn summary_line_mentions_measure_and_model() {
        let r = meta_analysis(&aspirin(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        let line = r.summary();
        assert!(line.starts_with("OR 0.765"));
        assert!(line.contains("random effects"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn estimates() -> impl Strategy<Value = Vec<StudyEstimate>> {
        proptest::collection::vec((-2.0f64..2.0, 0.02f64..1.5), 1..=20).prop_map(|pairs| {
            pairs
                .into_iter()
                .enumerate()
                .map(|(i, (yi, sei))| StudyEstimate {
                    id: i.to_string(),
                    name: format!("S{}", i),
                    year: None,
                    yi,
                    sei,
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn weights_sum_to_one_hundred(est in estimates()) {
            let r = pool_estimates(&est, EffectMeasure::MeanDifference, Model::Random).unwrap();
            let wf: f64 = r.studies.iter().map(|s| s.weight_fixed).sum();
            let wr: f64 = r.studies.iter().map(|s| s.weight_random).sum();
            prop_assert!((wf - 100.0).abs() < 1e-6);
            prop_assert!((wr - 100.0).abs() < 1e-6);
        }

        #[test]
        fn heterogeneity_is_bounded(est in estimates()) {
            let h = compute_heterogeneity(&est);
            prop_assert!(h.i2 >= 0.0 && h.i2 <= 100.0);
            prop_assert!(h.tau2 >= 0.0);
            prop_assert!(h.q >= 0.0);
            if h.df == 0 {
                prop_assert_eq!(h.i2, 0.0);
                prop_assert_eq!(h.tau2, 0.0);
                prop_assert_eq!(h.q, 0.0);
            }
        }

        #[test]
        fn pooled_estimate_within_study_range(est in estimates()) {
            let r = pool_estimates(&est, EffectMeasure::OddsRatio, Model::Random).unwrap();
            let lo = est.iter().map(|e| e.yi).fold(f64::INFINITY, f64::min);
            let hi = est.iter().map(|e| e.yi).fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(r.summary >= lo - 1e-9 && r.summary <= hi + 1e-9);
        }

        #[test]
        fn original_scale_round_trips(y in -5.0f64..5.0) {
            for m in [EffectMeasure::OddsRatio, EffectMeasure::HazardRatio, EffectMeasure::MeanDifference] {
                let back = crate::effect_size::from_original_scale(to_original_scale(y, m), m);
                prop_assert!((back - y).abs() < 1e-10);
            }
        }
    }
}
