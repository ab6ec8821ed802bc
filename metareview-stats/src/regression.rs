//! Mixed-effects meta-regression.
//!
//! Effects are regressed on one study-level covariate by weighted least
//! squares. Residual heterogeneity τ² is estimated by the method of moments
//! from the fixed-effect fit:
//!
//! ```text
//! τ²_res = max(0, (QE − (k − p)) / (Σw − tr((XᵀWX)⁻¹ XᵀW²X)))
//! ```
//!
//! and the model is refit with weights `1 / (vᵢ + τ²_res)`. Coefficient
//! tests are Wald z tests; `QM` tests all non-intercept coefficients jointly.
//!
//! The weighted least-squares core ([`fit_mixed_effects`]) is shared with
//! [dose-response modelling](crate::dose_response).

use core::fmt;

use metareview_core::{MetaError, Result, Summarizable};

use crate::distribution::{chi_squared_p_value, z_to_p};
use crate::effect_size::Z_95;
use crate::linalg::{invert_matrix, quadratic_form, weighted_least_squares, WlsFit};
use crate::pooling::{estimate_studies, heterogeneity_from, StudyEstimate};
use crate::study::{EffectMeasure, Study};

/// Minimum number of studies carrying the covariate.
pub const MIN_STUDIES: usize = 3;

/// Study-level moderator.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Covariate {
    /// Publication year.
    Year,
    /// Administered dose.
    Dose,
    /// Caller-supplied values, one per study in input order.
    Custom { name: String, values: Vec<f64> },
}

impl Covariate {
    fn values(&self, studies: &[Study]) -> Result<Vec<Option<f64>>> {
        match self {
            Self::Year => Ok(studies.iter().map(|s| s.year.map(f64::from)).collect()),
            Self::Dose => Ok(studies.iter().map(|s| s.dose).collect()),
            Self::Custom { name, values } => {
                if values.len() != studies.len() {
                    return Err(MetaError::InvalidInput(format!(
                        "covariate {} has {} values for {} studies",
                        name,
                        values.len(),
                        studies.len()
                    )));
                }
                Ok(values.iter().map(|v| Some(*v)).collect())
            }
        }
    }
}

impl fmt::Display for Covariate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year => write!(f, "year"),
            Self::Dose => write!(f, "dose"),
            Self::Custom { name, .. } => write!(f, "{}", name),
        }
    }
}

/// One estimated regression coefficient.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegressionCoefficient {
    pub name: String,
    pub estimate: f64,
    pub se: f64,
    pub z: f64,
    pub p_value: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

impl RegressionCoefficient {
    pub(crate) fn new(name: impl Into<String>, estimate: f64, se: f64) -> Self {
        let z = estimate / se;
        Self {
            name: name.into(),
            estimate,
            se,
            z,
            p_value: z_to_p(z),
            ci_lower: estimate - Z_95 * se,
            ci_upper: estimate + Z_95 * se,
        }
    }
}

/// A study placed on the bubble plot: covariate against effect, sized by
/// weight.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BubblePoint {
    pub id: String,
    pub name: String,
    pub x: f64,
    pub yi: f64,
    pub sei: f64,
    /// Mixed-model weight in percent.
    pub weight: f64,
}

/// Result of a single-covariate meta-regression.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetaRegressionResult {
    pub covariate: String,
    pub measure: EffectMeasure,
    /// Studies that carried the covariate.
    pub k: usize,
    pub intercept: RegressionCoefficient,
    pub slope: RegressionCoefficient,
    /// Residual between-study variance.
    pub tau2: f64,
    /// Omnibus moderator test.
    pub qm: f64,
    pub qm_df: usize,
    pub qm_p_value: f64,
    /// Residual heterogeneity.
    pub qe: f64,
    pub qe_df: usize,
    pub qe_p_value: f64,
    /// Share of τ² explained by the covariate, in percent.
    pub r2: f64,
    pub points: Vec<BubblePoint>,
}

impl MetaRegressionResult {
    /// Fitted effect at covariate value `x` on the analysis scale.
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept.estimate + self.slope.estimate * x
    }
}

impl Summarizable for MetaRegressionResult {
    fn summary(&self) -> String {
        format!(
            "{} on {}: slope {:.4} (SE {:.4}, p={:.4}), QM={:.3}, τ²={:.4}, R²={:.1}% (k={})",
            self.measure,
            self.covariate,
            self.slope.estimate,
            self.slope.se,
            self.slope.p_value,
            self.qm,
            self.tau2,
            self.r2,
            self.k,
        )
    }
}

/// Mixed-effects weighted least-squares fit.
#[derive(Debug, Clone)]
pub(crate) struct MixedFit {
    /// Refit under weights `1 / (vᵢ + τ²)`.
    pub fit: WlsFit,
    pub tau2: f64,
    pub weights: Vec<f64>,
    pub qe: f64,
    pub qe_df: usize,
    pub qm: f64,
}

/// Fit `yi` on the row-major design `x` (k rows, `p` columns, first column
/// the intercept) with method-of-moments τ².
///
/// `None` when the design is singular.
pub(crate) fn fit_mixed_effects(x: &[f64], yi: &[f64], vi: &[f64], p: usize) -> Option<MixedFit> {
    let k = yi.len();
    let w: Vec<f64> = vi.iter().map(|v| 1.0 / v).collect();
    let fixed = weighted_least_squares(x, yi, &w, p)?;
    let qe = fixed.weighted_rss;
    let qe_df = k.saturating_sub(p);

    // tr((XᵀWX)⁻¹ XᵀW²X)
    let mut xtw2x = vec![0.0; p * p];
    for i in 0..k {
        let row = &x[i * p..(i + 1) * p];
        for a in 0..p {
            for b in 0..p {
                xtw2x[a * p + b] += w[i] * w[i] * row[a] * row[b];
            }
        }
    }
    let trace: f64 = (0..p)
        .flat_map(|a| (0..p).map(move |b| (a, b)))
        .map(|(a, b)| fixed.xtwx_inv[a * p + b] * xtw2x[b * p + a])
        .sum();
    let c = w.iter().sum::<f64>() - trace;
    let tau2 = if c > 0.0 {
        ((qe - qe_df as f64) / c).max(0.0)
    } else {
        0.0
    };

    let weights: Vec<f64> = vi.iter().map(|v| 1.0 / (v + tau2)).collect();
    let fit = weighted_least_squares(x, yi, &weights, p)?;

    // Wald test of all non-intercept coefficients.
    let m = p - 1;
    let mut sub = vec![0.0; m * m];
    for a in 0..m {
        for b in 0..m {
            sub[a * m + b] = fit.xtwx_inv[(a + 1) * p + (b + 1)];
        }
    }
    let qm = quadratic_form(&invert_matrix(&sub, m)?, &fit.coefficients[1..]);

    tracing::trace!(k, p, qe, tau2, qm, "mixed-effects fit");

    Some(MixedFit {
        fit,
        tau2,
        weights,
        qe,
        qe_df,
        qm,
    })
}

fn has_spread(x: &[f64]) -> bool {
    let first = x[0];
    x.iter().any(|v| (v - first).abs() > 1e-12 * first.abs().max(1.0))
}

/// Regress study effects on one covariate.
///
/// Studies lacking the covariate are left out. Returns `Ok(None)` when fewer
/// than [`MIN_STUDIES`] studies remain or all share one covariate value.
///
/// # Errors
///
/// Effect-size errors, and [`MetaError::InvalidInput`] for a custom
/// covariate whose length differs from `studies` or that holds non-finite
/// values.
pub fn meta_regression(
    studies: &[Study],
    measure: EffectMeasure,
    covariate: &Covariate,
) -> Result<Option<MetaRegressionResult>> {
    let values = covariate.values(studies)?;
    let (kept, x): (Vec<Study>, Vec<f64>) = studies
        .iter()
        .zip(values)
        .filter_map(|(s, v)| v.map(|v| (s.clone(), v)))
        .unzip();
    if let Some(bad) = x.iter().find(|v| !v.is_finite()) {
        return Err(MetaError::InvalidInput(format!(
            "covariate {} has non-finite value {}",
            covariate, bad
        )));
    }
    let estimates = estimate_studies(&kept, measure)?;
    Ok(regress_estimates(&estimates, &x, measure, &covariate.to_string()))
}

/// Regress pre-computed estimates on covariate values aligned with them.
pub fn regress_estimates(
    estimates: &[StudyEstimate],
    x: &[f64],
    measure: EffectMeasure,
    covariate: &str,
) -> Option<MetaRegressionResult> {
    let k = estimates.len();
    if k < MIN_STUDIES || x.len() != k {
        tracing::debug!(k, covariate, "meta-regression skipped: too few studies");
        return None;
    }
    if !has_spread(x) {
        tracing::debug!(covariate, "meta-regression skipped: covariate has no spread");
        return None;
    }

    let yi: Vec<f64> = estimates.iter().map(|e| e.yi).collect();
    let vi: Vec<f64> = estimates.iter().map(StudyEstimate::vi).collect();
    let design: Vec<f64> = x.iter().flat_map(|&v| [1.0, v]).collect();
    let mixed = fit_mixed_effects(&design, &yi, &vi, 2)?;

    let total_tau2 = heterogeneity_from(&yi, &vi).tau2;
    let r2 = if total_tau2 > 0.0 {
        ((total_tau2 - mixed.tau2) / total_tau2 * 100.0).max(0.0)
    } else {
        0.0
    };

    let total_weight: f64 = mixed.weights.iter().sum();
    let points = estimates
        .iter()
        .zip(x)
        .zip(&mixed.weights)
        .map(|((e, &xv), w)| BubblePoint {
            id: e.id.clone(),
            name: e.name.clone(),
            x: xv,
            yi: e.yi,
            sei: e.sei,
            weight: 100.0 * w / total_weight,
        })
        .collect();

    let fit = &mixed.fit;
    Some(MetaRegressionResult {
        covariate: covariate.to_string(),
        measure,
        k,
        intercept: RegressionCoefficient::new("intercept", fit.coefficients[0], fit.inv_diag(0).sqrt()),
        slope: RegressionCoefficient::new(covariate, fit.coefficients[1], fit.inv_diag(1).sqrt()),
        tau2: mixed.tau2,
        qm: mixed.qm,
        qm_df: 1,
        qm_p_value: chi_squared_p_value(mixed.qm, 1.0),
        qe: mixed.qe,
        qe_df: mixed.qe_df,
        qe_p_value: chi_squared_p_value(mixed.qe, mixed.qe_df as f64),
        r2,
        points,
    })
}
