//! Small-study effect and publication-bias diagnostics.
//!
//! - [`eggers_test`] — regression of standardized effect on precision
//! - [`beggs_test`] — rank correlation of effect and variance
//! - [`trim_and_fill`] — Duval–Tweedie imputation of missing studies
//!
//! Every test needs at least [`MIN_STUDIES`] studies and returns `None`
//! otherwise, or when its statistic is undefined for the data at hand.

use core::fmt;

use metareview_core::{Scored, Summarizable};

use crate::distribution::{t_quantile, t_to_p, z_to_p};
use crate::effect_size::{calculate_ci, to_original_scale};
use crate::pooling::{weighted_mean, MetaAnalysisResult, StudyEffect};

/// Minimum number of studies for any bias test.
pub const MIN_STUDIES: usize = 3;

// ── Egger ──────────────────────────────────────────────────────────────────

/// Egger's regression test for funnel-plot asymmetry.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EggersTest {
    /// Regression intercept; zero under symmetry.
    pub intercept: f64,
    /// Standard error of the intercept.
    pub se: f64,
    pub t: f64,
    /// `k − 2`.
    pub df: usize,
    pub p_value: f64,
    pub slope: f64,
    /// 95% CI of the intercept.
    pub ci_lower: f64,
    pub ci_upper: f64,
}

impl Scored for EggersTest {
    fn score(&self) -> f64 {
        self.p_value
    }
}

impl Summarizable for EggersTest {
    fn summary(&self) -> String {
        format!(
            "Egger intercept {:.3} (SE {:.3}), t={:.3}, df={}, p={:.4}",
            self.intercept, self.se, self.t, self.df, self.p_value
        )
    }
}

/// Ordinary least squares of `yᵢ / seᵢ` on `1 / seᵢ`.
///
/// `None` with fewer than [`MIN_STUDIES`] studies, when all studies share
/// one precision (the slope is undefined), or when the fit is exact.
pub fn eggers_test(effects: &[StudyEffect]) -> Option<EggersTest> {
    let k = effects.len();
    if k < MIN_STUDIES {
        tracing::debug!(k, "Egger's test skipped: too few studies");
        return None;
    }
    let x: Vec<f64> = effects.iter().map(|s| 1.0 / s.sei).collect();
    let y: Vec<f64> = effects.iter().map(|s| s.yi / s.sei).collect();
    let n = k as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let sxx: f64 = x.iter().map(|xi| (xi - mean_x).powi(2)).sum();
    let sum_x2: f64 = x.iter().map(|xi| xi * xi).sum();
    if sxx <= 1e-12 * sum_x2 {
        tracing::debug!(sxx, "Egger's test skipped: precision does not vary");
        return None;
    }
    let sxy: f64 = x.iter().zip(&y).map(|(xi, yi)| (xi - mean_x) * (yi - mean_y)).sum();

    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;
    let sse: f64 = x
        .iter()
        .zip(&y)
        .map(|(xi, yi)| (yi - intercept - slope * xi).powi(2))
        .sum();
    let df = k - 2;
    let mse = sse / df as f64;
    let se = (mse * (1.0 / n + mean_x * mean_x / sxx)).sqrt();
    if !(se > 0.0) {
        tracing::debug!("Egger's test skipped: exact fit");
        return None;
    }

    let t = intercept / se;
    let t_crit = t_quantile(0.975, df as f64);
    Some(EggersTest {
        intercept,
        se,
        t,
        df,
        p_value: t_to_p(t, df as f64),
        slope,
        ci_lower: intercept - t_crit * se,
        ci_upper: intercept + t_crit * se,
    })
}

// ── Begg ───────────────────────────────────────────────────────────────────

/// Begg and Mazumdar's rank correlation test.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BeggsTest {
    /// Kendall's τ between effect and variance.
    pub tau: f64,
    /// Concordant minus discordant pairs.
    pub s: i64,
    /// `S / √(k(k−1)(2k+5)/18)`.
    pub z: f64,
    pub p_value: f64,
}

impl Scored for BeggsTest {
    fn score(&self) -> f64 {
        self.p_value
    }
}

impl Summarizable for BeggsTest {
    fn summary(&self) -> String {
        format!("Begg τ={:.3}, z={:.3}, p={:.4}", self.tau, self.z, self.p_value)
    }
}

/// Kendall's τ between `yᵢ` and `vᵢ` with the no-ties null variance.
///
/// `None` with fewer than [`MIN_STUDIES`] studies.
pub fn beggs_test(effects: &[StudyEffect]) -> Option<BeggsTest> {
    let k = effects.len();
    if k < MIN_STUDIES {
        tracing::debug!(k, "Begg's test skipped: too few studies");
        return None;
    }
    let mut s: i64 = 0;
    for i in 0..k {
        for j in (i + 1)..k {
            let d = (effects[i].yi - effects[j].yi) * (effects[i].vi - effects[j].vi);
            if d > 0.0 {
                s += 1;
            } else if d < 0.0 {
                s -= 1;
            }
        }
    }
    let kf = k as f64;
    let variance = kf * (kf - 1.0) * (2.0 * kf + 5.0) / 18.0;
    let z = s as f64 / variance.sqrt();
    Some(BeggsTest {
        tau: s as f64 / (kf * (kf - 1.0) / 2.0),
        s,
        z,
        p_value: z_to_p(z),
    })
}

// ── Trim and fill ──────────────────────────────────────────────────────────

/// Estimator of the number of missing studies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TrimFillEstimator {
    /// Length of the outermost run on the heavier side, minus one.
    #[default]
    R0,
    /// Based on the Wilcoxon rank sum of the heavier side.
    L0,
}

impl fmt::Display for TrimFillEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::R0 => write!(f, "R0"),
            Self::L0 => write!(f, "L0"),
        }
    }
}

/// Side of the funnel on which studies are imputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FunnelSide {
    Left,
    Right,
}

/// A study mirrored across the summary.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImputedStudy {
    /// Id of the study that was mirrored.
    pub mirror_of: String,
    pub yi: f64,
    pub sei: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrimAndFillResult {
    pub estimator: TrimFillEstimator,
    /// Estimated number of missing studies.
    pub k0: usize,
    /// Side the missing studies are imputed on.
    pub side: FunnelSide,
    pub original_summary: f64,
    pub adjusted_summary: f64,
    pub adjusted_se: f64,
    pub adjusted_effect: f64,
    pub adjusted_ci_lower: f64,
    pub adjusted_ci_upper: f64,
    pub imputed: Vec<ImputedStudy>,
}

impl Summarizable for TrimAndFillResult {
    fn summary(&self) -> String {
        format!(
            "trim-and-fill ({}): k0={}, adjusted {:.3} [{:.3}, {:.3}]",
            self.estimator, self.k0, self.adjusted_effect, self.adjusted_ci_lower, self.adjusted_ci_upper
        )
    }
}

/// Average ranks (1-based) of `values`, ties sharing their mean rank.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// One pass of trim-and-fill around the summary of `result`.
///
/// Deviations from the summary are ranked by magnitude. The side with the
/// larger rank sum is taken as overpopulated, `k0` of its most extreme
/// studies are mirrored onto the other side as `2μ − yᵢ`, and the augmented
/// set is re-pooled with inverse-variance (fixed-effect) weights.
///
/// With `k0 = 0` the result restates the original summary, SE and CI
/// unchanged. `None` with fewer than [`MIN_STUDIES`] studies.
pub fn trim_and_fill(result: &MetaAnalysisResult, estimator: TrimFillEstimator) -> Option<TrimAndFillResult> {
    let k = result.k();
    if k < MIN_STUDIES {
        tracing::debug!(k, "trim-and-fill skipped: too few studies");
        return None;
    }
    let summary = result.summary;
    let deviations: Vec<f64> = result.studies.iter().map(|s| s.yi - summary).collect();
    let magnitudes: Vec<f64> = deviations.iter().map(|d| d.abs()).collect();
    let ranks = average_ranks(&magnitudes);

    let rank_sum = |positive: bool| -> f64 {
        deviations
            .iter()
            .zip(&ranks)
            .filter(|(d, _)| if positive { **d > 0.0 } else { **d < 0.0 })
            .map(|(_, r)| r)
            .sum()
    };
    let right = rank_sum(true);
    let left = rank_sum(false);
    let heavy_right = right >= left;
    let on_heavy = |d: f64| if heavy_right { d > 0.0 } else { d < 0.0 };

    // Most extreme first.
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| magnitudes[b].total_cmp(&magnitudes[a]));
    let heavy: Vec<usize> = order.iter().copied().filter(|&i| on_heavy(deviations[i])).collect();

    let k0 = match estimator {
        TrimFillEstimator::R0 => {
            let run = order.iter().take_while(|&&i| on_heavy(deviations[i])).count();
            run.saturating_sub(1)
        }
        TrimFillEstimator::L0 => {
            let t = if heavy_right { right } else { left };
            let kf = k as f64;
            let l0 = ((4.0 * t - kf * (kf + 1.0)) / (2.0 * kf - 1.0)).round();
            if l0 > 0.0 {
                l0 as usize
            } else {
                0
            }
        }
    }
    .min(heavy.len());

    let side = if heavy_right { FunnelSide::Left } else { FunnelSide::Right };
    tracing::debug!(%estimator, k0, ?side, right, left, "trim-and-fill");

    if k0 == 0 {
        return Some(TrimAndFillResult {
            estimator,
            k0,
            side,
            original_summary: summary,
            adjusted_summary: summary,
            adjusted_se: result.se,
            adjusted_effect: result.effect,
            adjusted_ci_lower: result.ci_lower,
            adjusted_ci_upper: result.ci_upper,
            imputed: Vec::new(),
        });
    }

    let imputed: Vec<ImputedStudy> = heavy[..k0]
        .iter()
        .map(|&i| ImputedStudy {
            mirror_of: result.studies[i].id.clone(),
            yi: 2.0 * summary - result.studies[i].yi,
            sei: result.studies[i].sei,
        })
        .collect();

    let (yi, vi): (Vec<f64>, Vec<f64>) = result
        .studies
        .iter()
        .map(|s| (s.yi, s.vi))
        .chain(imputed.iter().map(|s| (s.yi, s.sei * s.sei)))
        .unzip();
    let adjusted = weighted_mean(&yi, &vi, 0.0);
    let (lo, hi) = calculate_ci(adjusted.mean, adjusted.se, result.measure);

    Some(TrimAndFillResult {
        estimator,
        k0,
        side,
        original_summary: summary,
        adjusted_summary: adjusted.mean,
        adjusted_se: adjusted.se,
        adjusted_effect: to_original_scale(adjusted.mean, result.measure),
        adjusted_ci_lower: lo,
        adjusted_ci_upper: hi,
        imputed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooling::fixtures::{aspirin, fleiss93};
    use crate::pooling::{meta_analysis, Model};
    use crate::study::{EffectMeasure, Study};

    fn skewed() -> Vec<Study> {
        let data = [
            (0.10, 0.05),
            (0.12, 0.06),
            (0.15, 0.08),
            (0.20, 0.10),
            (0.50, 0.20),
            (0.80, 0.30),
            (1.00, 0.35),
            (0.05, 0.07),
        ];
        data.iter()
            .enumerate()
            .map(|(i, &(y, s))| Study::generic(i.to_string(), format!("S{}", i), y, s))
            .collect()
    }

    #[test]
    fn egger_on_aspirin_matches_reference() {
        let r = meta_analysis(&aspirin(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        let e = eggers_test(&r.studies).unwrap();
        assert!((e.intercept - 0.22256712160238878).abs() < 1e-9);
        assert!((e.se - 0.6379007182478682).abs() < 1e-9);
        assert!((e.t - 0.34890558238234526).abs() < 1e-9);
        assert!((e.slope + 0.2860803617422128).abs() < 1e-9);
        assert_eq!(e.df, 5);
        assert!(e.p_value > 0.70 && e.p_value < 0.78);
        assert!(e.ci_lower < 0.0 && e.ci_upper > 0.0);
        assert_eq!(e.score(), e.p_value);
    }

    #[test]
    fn egger_detects_small_study_effect() {
        let r = meta_analysis(&skewed(), EffectMeasure::MeanDifference, Model::Fixed).unwrap();
        let e = eggers_test(&r.studies).unwrap();
        assert!((e.intercept - 2.7865410920932163).abs() < 1e-9);
        assert!((e.se - 0.3887266714317021).abs() < 1e-9);
        assert!(e.p_value < 0.01);
    }

    #[test]
    fn egger_identical_precision_is_unavailable() {
        let studies: Vec<Study> = [0.1, 0.3, -0.2, 0.5]
            .iter()
            .enumerate()
            .map(|(i, &y)| Study::generic(i.to_string(), "S", y, 0.2))
            .collect();
        let r = meta_analysis(&studies, EffectMeasure::MeanDifference, Model::Random).unwrap();
        assert!(eggers_test(&r.studies).is_none());
    }

    #[test]
    fn begg_reference_values() {
        let r = meta_analysis(&fleiss93(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        let b = beggs_test(&r.studies).unwrap();
        assert_eq!(b.s, -13);
        assert!((b.tau + 0.6190476190476191).abs() < 1e-12);
        assert!((b.z + 1.9524420798548594).abs() < 1e-9);
        assert!((b.p_value - 0.05088574121639131).abs() < 1e-6);

        let r = meta_analysis(&skewed(), EffectMeasure::MeanDifference, Model::Fixed).unwrap();
        let b = beggs_test(&r.studies).unwrap();
        assert_eq!(b.s, 24);
        assert!((b.p_value - 0.002985470891268821).abs() < 1e-6);
    }

    #[test]
    fn tests_need_three_studies() {
        let studies = vec![
            Study::generic("a", "A", 0.1, 0.1),
            Study::generic("b", "B", 0.3, 0.2),
        ];
        let r = meta_analysis(&studies, EffectMeasure::MeanDifference, Model::Random).unwrap();
        assert!(eggers_test(&r.studies).is_none());
        assert!(beggs_test(&r.studies).is_none());
        assert!(trim_and_fill(&r, TrimFillEstimator::R0).is_none());
    }

    #[test]
    fn trim_and_fill_without_asymmetry_restates_summary() {
        let r = meta_analysis(&aspirin(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        let tf = trim_and_fill(&r, TrimFillEstimator::R0).unwrap();
        assert_eq!(tf.k0, 0);
        assert_eq!(tf.adjusted_summary, r.summary);
        assert_eq!(tf.adjusted_se, r.se);
        assert_eq!(tf.adjusted_effect, r.effect);
        assert_eq!(tf.adjusted_ci_lower, r.ci_lower);
        assert_eq!(tf.adjusted_ci_upper, r.ci_upper);
        assert!(tf.imputed.is_empty());
    }

    #[test]
    fn trim_and_fill_imputes_missing_left_studies() {
        let r = meta_analysis(&skewed(), EffectMeasure::MeanDifference, Model::Fixed).unwrap();
        assert!((r.summary - 0.1323826247467907).abs() < 1e-12);
        let tf = trim_and_fill(&r, TrimFillEstimator::R0).unwrap();
        assert_eq!(tf.k0, 2);
        assert_eq!(tf.side, FunnelSide::Left);
        assert_eq!(tf.imputed[0].mirror_of, "6");
        assert!((tf.imputed[0].yi + 0.7352347505064186).abs() < 1e-12);
        assert!((tf.imputed[1].yi + 0.5352347505064187).abs() < 1e-12);
        assert!((tf.adjusted_summary - 0.12031549775691744).abs() < 1e-12);
        assert!((tf.adjusted_se - 0.028847589501015618).abs() < 1e-12);
        assert!(tf.adjusted_summary < tf.original_summary);
    }

    #[test]
    fn l0_estimator_on_fleiss() {
        let r = meta_analysis(&fleiss93(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        assert_eq!(trim_and_fill(&r, TrimFillEstimator::R0).unwrap().k0, 0);
        let tf = trim_and_fill(&r, TrimFillEstimator::L0).unwrap();
        assert_eq!(tf.k0, 2);
        assert_eq!(tf.side, FunnelSide::Right);
        assert!((tf.adjusted_summary + 0.09834875055716222).abs() < 1e-10);
        assert!((tf.adjusted_se - 0.03226542931925484).abs() < 1e-10);
        assert!((tf.imputed[0].yi - 0.12042680450205234).abs() < 1e-10);
    }

    #[test]
    fn average_ranks_share_ties() {
        assert_eq!(average_ranks(&[0.3, 0.1, 0.3, 0.2]), vec![3.5, 1.0, 3.5, 2.0]);
    }
}
