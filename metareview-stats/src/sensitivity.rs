//! Sensitivity and influence diagnostics.
//!
//! - [`leave_one_out`] — re-pool without each study in turn
//! - [`cumulative_meta_analysis`] — re-pool as studies accrue by year
//! - [`influence_diagnostics`] — hat values, studentized residuals, Cook's
//!   distance, DFFITS and covariance ratios
//!
//! All three re-use [`pool_estimates`] as a black box under the model of the
//! result they are given. With the `parallel` feature the leave-one-out
//! refits are spread across the rayon thread pool.

use metareview_core::Result;

use crate::pooling::{pool_estimates, MetaAnalysisResult, StudyEstimate};

/// Minimum number of studies for leave-one-out and influence measures.
pub const MIN_STUDIES: usize = 3;

/// Pooled result with one study omitted.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensitivityResult {
    pub omitted_id: String,
    pub omitted_name: String,
    pub summary: f64,
    pub se: f64,
    pub effect: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
    pub i2: f64,
    pub tau2: f64,
}

/// Pooled result after adding one more study in chronological order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CumulativeStep {
    pub added_id: String,
    pub added_name: String,
    pub year: Option<i32>,
    /// Number of studies pooled at this step.
    pub k: usize,
    pub summary: f64,
    pub effect: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
    pub i2: f64,
}

/// Regression-style influence measures for one study.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InfluenceDiagnostic {
    pub id: String,
    pub name: String,
    /// Leverage `wᵢ / Σw` under the model weights.
    pub hat: f64,
    /// Internally studentized residual `eᵢ / √((vᵢ + τ²)(1 − hᵢ))`.
    pub studentized_residual: f64,
    /// `(μ − μ₍₋ᵢ₎)² / se²`.
    pub cooks_distance: f64,
    /// `(μ − μ₍₋ᵢ₎) / √(hᵢ (vᵢ + τ²₍₋ᵢ₎))`.
    pub dffits: f64,
    /// Ratio of the summary variance without and with the study, `1 / (1 − hᵢ)`.
    pub cov_ratio: f64,
    /// τ² after omitting the study.
    pub tau2_deleted: f64,
    /// Cochran's Q after omitting the study.
    pub q_deleted: f64,
    /// Model weight in percent.
    pub weight: f64,
}

fn without(estimates: &[StudyEstimate], skip: usize) -> Vec<StudyEstimate> {
    estimates
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != skip)
        .map(|(_, e)| e.clone())
        .collect()
}

fn refits(result: &MetaAnalysisResult) -> Result<Vec<MetaAnalysisResult>> {
    let estimates = result.estimates();
    let refit = |i: usize| pool_estimates(&without(&estimates, i), result.measure, result.model);

    #[cfg(feature = "parallel")]
    let fits = {
        use rayon::prelude::*;
        (0..estimates.len())
            .into_par_iter()
            .map(refit)
            .collect::<Result<Vec<_>>>()?
    };
    #[cfg(not(feature = "parallel"))]
    let fits = (0..estimates.len()).map(refit).collect::<Result<Vec<_>>>()?;

    Ok(fits)
}

/// Re-pool the analysis once per study with that study left out.
///
/// Returns an empty vector when fewer than [`MIN_STUDIES`] studies were
/// pooled. Output order follows the input order of the omitted studies.
pub fn leave_one_out(result: &MetaAnalysisResult) -> Result<Vec<SensitivityResult>> {
    if result.k() < MIN_STUDIES {
        tracing::debug!(k = result.k(), "leave-one-out skipped: too few studies");
        return Ok(Vec::new());
    }

    let fits = refits(result)?;
    Ok(result
        .studies
        .iter()
        .zip(fits)
        .map(|(omitted, fit)| SensitivityResult {
            omitted_id: omitted.id.clone(),
            omitted_name: omitted.name.clone(),
            summary: fit.summary,
            se: fit.se,
            effect: fit.effect,
            ci_lower: fit.ci_lower,
            ci_upper: fit.ci_upper,
            p_value: fit.p_value,
            i2: fit.heterogeneity.i2,
            tau2: fit.heterogeneity.tau2,
        })
        .collect())
}

/// Cumulative meta-analysis in order of publication year.
///
/// Studies without a year go last; ties keep their input order. Step `n`
/// pools the first `n` studies of that order.
pub fn cumulative_meta_analysis(result: &MetaAnalysisResult) -> Result<Vec<CumulativeStep>> {
    let mut ordered = result.estimates();
    ordered.sort_by_key(|e| (e.year.is_none(), e.year));

    let mut steps = Vec::with_capacity(ordered.len());
    for n in 1..=ordered.len() {
        let fit = pool_estimates(&ordered[..n], result.measure, result.model)?;
        let added = &ordered[n - 1];
        steps.push(CumulativeStep {
            added_id: added.id.clone(),
            added_name: added.name.clone(),
            year: added.year,
            k: n,
            summary: fit.summary,
            effect: fit.effect,
            ci_lower: fit.ci_lower,
            ci_upper: fit.ci_upper,
            p_value: fit.p_value,
            i2: fit.heterogeneity.i2,
        });
    }
    Ok(steps)
}

/// Influence measures for every study of a pooled result.
///
/// Hat values, studentized residuals and covariance ratios come straight from
/// the model weights; Cook's distance and DFFITS use leave-one-out refits.
/// Returns an empty vector when fewer than [`MIN_STUDIES`] studies were
/// pooled. Flagging is left to the caller, see
/// [`InfluenceThresholds`](crate::config::InfluenceThresholds).
pub fn influence_diagnostics(result: &MetaAnalysisResult) -> Result<Vec<InfluenceDiagnostic>> {
    if result.k() < MIN_STUDIES {
        tracing::debug!(k = result.k(), "influence diagnostics skipped: too few studies");
        return Ok(Vec::new());
    }

    let tau2 = result.model_tau2();
    let total_weight: f64 = result.studies.iter().map(|s| 1.0 / (s.vi + tau2)).sum();
    let se2 = result.se * result.se;
    let fits = refits(result)?;

    Ok(result
        .studies
        .iter()
        .zip(fits)
        .map(|(s, fit)| {
            let w = 1.0 / (s.vi + tau2);
            let hat = w / total_weight;
            let residual = s.yi - result.summary;
            let studentized_residual = residual / ((s.vi + tau2) * (1.0 - hat)).sqrt();
            let shift = result.summary - fit.summary;
            let tau2_deleted = fit.model_tau2();
            InfluenceDiagnostic {
                id: s.id.clone(),
                name: s.name.clone(),
                hat,
                studentized_residual,
                cooks_distance: shift * shift / se2,
                dffits: shift / (hat * (s.vi + tau2_deleted)).sqrt(),
                cov_ratio: 1.0 / (1.0 - hat),
                tau2_deleted: fit.heterogeneity.tau2,
                q_deleted: fit.heterogeneity.q,
                weight: 100.0 * hat,
            }
        })
        .collect())
}
