//! Dose-response meta-regression.
//!
//! Study effects are modelled as a linear or quadratic function of dose with
//! the mixed-effects weighted least-squares core of
//! [`regression`](crate::regression). The fitted curve is sampled at evenly
//! spaced doses across the observed range with a pointwise 95% band
//! `ŷ ± 1.96·√(xᵀ Cov x)`.

use core::fmt;

use metareview_core::{MetaError, Result, Summarizable};

use crate::distribution::chi_squared_p_value;
use crate::effect_size::{to_original_scale, Z_95};
use crate::linalg::quadratic_form;
use crate::pooling::estimate_studies;
use crate::regression::{fit_mixed_effects, RegressionCoefficient};
use crate::study::{EffectMeasure, Study};

/// Minimum number of studies with a recorded dose.
pub const MIN_STUDIES: usize = 3;

/// Default number of curve intervals.
pub const DEFAULT_CURVE_STEPS: usize = 50;

/// Shape of the dose-response curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DoseModel {
    /// `y = b0 + b1·d`
    #[default]
    Linear,
    /// `y = b0 + b1·d + b2·d²`
    Quadratic,
}

impl DoseModel {
    /// Number of regression parameters.
    pub fn parameters(self) -> usize {
        match self {
            Self::Linear => 2,
            Self::Quadratic => 3,
        }
    }

    fn row(self, dose: f64) -> Vec<f64> {
        match self {
            Self::Linear => vec![1.0, dose],
            Self::Quadratic => vec![1.0, dose, dose * dose],
        }
    }
}

impl fmt::Display for DoseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "linear"),
            Self::Quadratic => write!(f, "quadratic"),
        }
    }
}

/// One sample of the fitted curve.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DoseCurvePoint {
    pub dose: f64,
    /// Fitted effect on the analysis scale.
    pub fitted: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// `fitted` on the reporting scale.
    pub effect: f64,
    pub effect_lower: f64,
    pub effect_upper: f64,
}

/// An observed study on the dose axis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DosePoint {
    pub id: String,
    pub name: String,
    pub dose: f64,
    pub yi: f64,
    pub sei: f64,
}

/// Fitted dose-response model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DoseResponseResult {
    pub model: DoseModel,
    pub measure: EffectMeasure,
    pub k: usize,
    /// Intercept, linear and (quadratic model only) squared-dose terms.
    pub coefficients: Vec<RegressionCoefficient>,
    pub tau2: f64,
    /// Joint test of the dose terms.
    pub qm: f64,
    pub qm_p_value: f64,
    pub qe: f64,
    pub qe_p_value: f64,
    pub points: Vec<DosePoint>,
    pub curve: Vec<DoseCurvePoint>,
}

impl DoseResponseResult {
    /// Fitted effect at `dose` on the analysis scale.
    pub fn predict(&self, dose: f64) -> f64 {
        self.model
            .row(dose)
            .iter()
            .zip(&self.coefficients)
            .map(|(x, c)| x * c.estimate)
            .sum()
    }
}

impl Summarizable for DoseResponseResult {
    fn summary(&self) -> String {
        format!(
            "{} dose-response ({}): QM={:.3}, p={:.4}, τ²={:.4} (k={})",
            self.model, self.measure, self.qm, self.qm_p_value, self.tau2, self.k
        )
    }
}

/// Fit a dose-response curve over the studies that record a dose.
///
/// `steps` is the number of intervals of the sampled curve, giving
/// `steps + 1` points from the lowest to the highest observed dose.
/// Returns `Ok(None)` with fewer than [`MIN_STUDIES`] dosed studies, when all
/// doses coincide, or when the design is singular (a quadratic over two
/// distinct doses, for instance).
///
/// # Errors
///
/// Effect-size errors, and [`MetaError::InvalidInput`] for `steps == 0` or a
/// non-finite dose.
pub fn dose_response(
    studies: &[Study],
    measure: EffectMeasure,
    model: DoseModel,
    steps: usize,
) -> Result<Option<DoseResponseResult>> {
    if steps == 0 {
        return Err(MetaError::InvalidInput("dose curve needs at least one step".into()));
    }
    let dosed: Vec<Study> = studies.iter().filter(|s| s.dose.is_some()).cloned().collect();
    let doses: Vec<f64> = dosed.iter().filter_map(|s| s.dose).collect();
    if let Some(bad) = doses.iter().find(|d| !d.is_finite()) {
        return Err(MetaError::InvalidInput(format!("non-finite dose {}", bad)));
    }
    let k = dosed.len();
    if k < MIN_STUDIES {
        tracing::debug!(k, "dose-response skipped: too few dosed studies");
        return Ok(None);
    }

    let lo = doses.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = doses.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi - lo <= 1e-12 * hi.abs().max(1.0) {
        tracing::debug!(dose = lo, "dose-response skipped: single dose level");
        return Ok(None);
    }

    let estimates = estimate_studies(&dosed, measure)?;
    let yi: Vec<f64> = estimates.iter().map(|e| e.yi).collect();
    let vi: Vec<f64> = estimates.iter().map(|e| e.vi()).collect();
    let p = model.parameters();
    let design: Vec<f64> = doses.iter().flat_map(|&d| model.row(d)).collect();
    let Some(mixed) = fit_mixed_effects(&design, &yi, &vi, p) else {
        return Ok(None);
    };
    let fit = &mixed.fit;

    const NAMES: [&str; 3] = ["intercept", "dose", "dose²"];
    let coefficients = (0..p)
        .map(|j| RegressionCoefficient::new(NAMES[j], fit.coefficients[j], fit.inv_diag(j).sqrt()))
        .collect();

    let curve = (0..=steps)
        .map(|i| {
            let dose = lo + (hi - lo) * i as f64 / steps as f64;
            let row = model.row(dose);
            let fitted: f64 = row.iter().zip(&fit.coefficients).map(|(x, c)| x * c).sum();
            let se = quadratic_form(&fit.xtwx_inv, &row).max(0.0).sqrt();
            let ci_lower = fitted - Z_95 * se;
            let ci_upper = fitted + Z_95 * se;
            DoseCurvePoint {
                dose,
                fitted,
                ci_lower,
                ci_upper,
                effect: to_original_scale(fitted, measure),
                effect_lower: to_original_scale(ci_lower, measure),
                effect_upper: to_original_scale(ci_upper, measure),
            }
        })
        .collect();

    let points = estimates
        .iter()
        .zip(&doses)
        .map(|(e, &dose)| DosePoint {
            id: e.id.clone(),
            name: e.name.clone(),
            dose,
            yi: e.yi,
            sei: e.sei,
        })
        .collect();

    Ok(Some(DoseResponseResult {
        model,
        measure,
        k,
        coefficients,
        tau2: mixed.tau2,
        qm: mixed.qm,
        qm_p_value: chi_squared_p_value(mixed.qm, (p - 1) as f64),
        qe: mixed.qe,
        qe_p_value: chi_squared_p_value(mixed.qe, mixed.qe_df as f64),
        points,
        curve,
    }))
}
