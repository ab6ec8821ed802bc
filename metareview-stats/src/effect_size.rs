//! Effect size transforms.
//!
//! Converts each [`StudyData`] variant into a common `(yi, sei)` pair on the
//! analysis scale:
//! - [`log_odds_ratio`] / [`log_risk_ratio`] — binary data, after
//!   [`continuity_correction`]
//! - [`mean_difference`] / [`hedges_g`] — continuous data
//! - [`log_hazard_ratio`] — reported HR and 95% CI
//!
//! [`to_original_scale`], [`from_original_scale`] and [`calculate_ci`] are the
//! inverse/CI helpers shared by every downstream component. Confidence
//! intervals on log-scale measures are formed in log space and then
//! exponentiated.

use metareview_core::{MetaError, Result};

use crate::study::{EffectMeasure, StudyData};

/// Two-sided 95% normal critical value used for every reported interval.
pub const Z_95: f64 = 1.96;

/// A study's effect on the analysis scale with its standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EffectEstimate {
    /// Point estimate (log scale for ratio measures).
    pub yi: f64,
    /// Standard error of `yi`.
    pub sei: f64,
}

impl EffectEstimate {
    /// Sampling variance `sei²`.
    pub fn vi(&self) -> f64 {
        self.sei * self.sei
    }
}

/// A 2×2 table after (possible) continuity correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrectedTable {
    /// Events in the treatment arm (1).
    pub events1: f64,
    /// Subjects in the treatment arm (1).
    pub total1: f64,
    /// Events in the control arm (2).
    pub events2: f64,
    /// Subjects in the control arm (2).
    pub total2: f64,
    /// Whether the correction was applied.
    pub corrected: bool,
}

/// Zero-cell continuity correction.
///
/// When any cell of the 2×2 table is empty (no events, or every subject had
/// the event), 0.5 is added to both event counts and 1 to both totals, which
/// adds 0.5 to each of the four cells.
pub fn continuity_correction(events1: u32, total1: u32, events2: u32, total2: u32) -> CorrectedTable {
    let needs = events1 == 0 || events2 == 0 || events1 == total1 || events2 == total2;
    let (e1, t1, e2, t2) = (
        f64::from(events1),
        f64::from(total1),
        f64::from(events2),
        f64::from(total2),
    );
    if needs {
        tracing::trace!(events1, total1, events2, total2, "applying zero-cell continuity correction");
        CorrectedTable {
            events1: e1 + 0.5,
            total1: t1 + 1.0,
            events2: e2 + 0.5,
            total2: t2 + 1.0,
            corrected: true,
        }
    } else {
        CorrectedTable {
            events1: e1,
            total1: t1,
            events2: e2,
            total2: t2,
            corrected: false,
        }
    }
}

/// Log odds ratio and its Woolf standard error from a corrected table.
pub fn log_odds_ratio(table: &CorrectedTable) -> EffectEstimate {
    let a = table.events1;
    let b = table.total1 - table.events1;
    let c = table.events2;
    let d = table.total2 - table.events2;
    EffectEstimate {
        yi: ((a * d) / (b * c)).ln(),
        sei: (1.0 / a + 1.0 / b + 1.0 / c + 1.0 / d).sqrt(),
    }
}

/// Log risk ratio and its standard error from a corrected table.
pub fn log_risk_ratio(table: &CorrectedTable) -> EffectEstimate {
    let p1 = table.events1 / table.total1;
    let p2 = table.events2 / table.total2;
    EffectEstimate {
        yi: (p1 / p2).ln(),
        sei: ((1.0 - p1) / table.events1 + (1.0 - p2) / table.events2).sqrt(),
    }
}

/// Raw mean difference `mean1 − mean2`.
pub fn mean_difference(mean1: f64, sd1: f64, n1: f64, mean2: f64, sd2: f64, n2: f64) -> EffectEstimate {
    EffectEstimate {
        yi: mean1 - mean2,
        sei: (sd1 * sd1 / n1 + sd2 * sd2 / n2).sqrt(),
    }
}

/// Hedges' g: pooled-SD Cohen's d scaled by `J = 1 − 3/(4·df − 1)`,
/// `df = n1 + n2 − 2`.
pub fn hedges_g(mean1: f64, sd1: f64, n1: f64, mean2: f64, sd2: f64, n2: f64) -> EffectEstimate {
    let df = n1 + n2 - 2.0;
    let pooled_sd = (((n1 - 1.0) * sd1 * sd1 + (n2 - 1.0) * sd2 * sd2) / df).sqrt();
    let d = (mean1 - mean2) / pooled_sd;
    let j = 1.0 - 3.0 / (4.0 * df - 1.0);
    let g = d * j;
    EffectEstimate {
        yi: g,
        sei: ((n1 + n2) / (n1 * n2) + g * g / (2.0 * (n1 + n2))).sqrt() * j,
    }
}

/// Log hazard ratio with the standard error recovered from a 95% CI.
pub fn log_hazard_ratio(hr: f64, ci_lower: f64, ci_upper: f64) -> EffectEstimate {
    EffectEstimate {
        yi: hr.ln(),
        sei: (ci_upper.ln() - ci_lower.ln()) / (2.0 * Z_95),
    }
}

/// Compute a study's effect for `measure`.
///
/// # Errors
///
/// Returns [`MetaError::MeasureMismatch`] when the data variant cannot
/// produce `measure`, and [`MetaError::InvalidInput`] for values that make
/// the transform undefined (empty arms, non-positive SDs or standard errors,
/// non-finite numbers, non-positive hazard ratios or inverted CIs).
pub fn calculate_effect_size(data: &StudyData, measure: EffectMeasure) -> Result<EffectEstimate> {
    if !measure.accepts(data) {
        return Err(MetaError::MeasureMismatch {
            measure: measure.code().into(),
            data: data.kind().into(),
        });
    }

    let estimate = match *data {
        StudyData::Binary {
            events1,
            total1,
            events2,
            total2,
        } => {
            if total1 == 0 || total2 == 0 {
                return Err(MetaError::InvalidInput(
                    "binary study: arm totals must be positive".into(),
                ));
            }
            if events1 > total1 || events2 > total2 {
                return Err(MetaError::InvalidInput(format!(
                    "binary study: events exceed total ({}/{}, {}/{})",
                    events1, total1, events2, total2
                )));
            }
            let table = continuity_correction(events1, total1, events2, total2);
            match measure {
                EffectMeasure::RiskRatio => log_risk_ratio(&table),
                _ => log_odds_ratio(&table),
            }
        }
        StudyData::Continuous {
            mean1,
            sd1,
            n1,
            mean2,
            sd2,
            n2,
        } => {
            if !mean1.is_finite() || !mean2.is_finite() {
                return Err(MetaError::InvalidInput(
                    "continuous study: means must be finite".into(),
                ));
            }
            if !(sd1 > 0.0 && sd1.is_finite() && sd2 > 0.0 && sd2.is_finite()) {
                return Err(MetaError::InvalidInput(
                    "continuous study: standard deviations must be positive".into(),
                ));
            }
            if n1 == 0 || n2 == 0 {
                return Err(MetaError::InvalidInput(
                    "continuous study: sample sizes must be positive".into(),
                ));
            }
            let (n1, n2) = (f64::from(n1), f64::from(n2));
            match measure {
                EffectMeasure::StandardizedMeanDifference => {
                    if n1 + n2 < 3.0 {
                        return Err(MetaError::InvalidInput(
                            "continuous study: SMD needs n1 + n2 >= 3".into(),
                        ));
                    }
                    hedges_g(mean1, sd1, n1, mean2, sd2, n2)
                }
                _ => mean_difference(mean1, sd1, n1, mean2, sd2, n2),
            }
        }
        StudyData::Generic { yi, sei } => {
            if !yi.is_finite() || !(sei > 0.0 && sei.is_finite()) {
                return Err(MetaError::InvalidInput(format!(
                    "generic study: need finite yi and positive sei (yi={}, sei={})",
                    yi, sei
                )));
            }
            EffectEstimate { yi, sei }
        }
        StudyData::Hazard {
            hr,
            ci_lower,
            ci_upper,
        } => {
            let valid = [hr, ci_lower, ci_upper]
                .iter()
                .all(|v| *v > 0.0 && v.is_finite());
            if !valid || ci_lower >= ci_upper {
                return Err(MetaError::InvalidInput(format!(
                    "hazard study: need 0 < ciLower < ciUpper and hr > 0 (hr={}, ci={}..{})",
                    hr, ci_lower, ci_upper
                )));
            }
            log_hazard_ratio(hr, ci_lower, ci_upper)
        }
    };

    Ok(estimate)
}

/// Whether `measure` is pooled on the log scale.
pub fn is_log_scale(measure: EffectMeasure) -> bool {
    measure.is_log_scale()
}

/// Map an analysis-scale value back to the measure's reporting scale.
pub fn to_original_scale(value: f64, measure: EffectMeasure) -> f64 {
    if measure.is_log_scale() {
        value.exp()
    } else {
        value
    }
}

/// Map a reporting-scale value onto the analysis scale.
pub fn from_original_scale(value: f64, measure: EffectMeasure) -> f64 {
    if measure.is_log_scale() {
        value.ln()
    } else {
        value
    }
}

/// 95% confidence interval `(lower, upper)` on the reporting scale.
pub fn calculate_ci(yi: f64, sei: f64, measure: EffectMeasure) -> (f64, f64) {
    (
        to_original_scale(yi - Z_95 * sei, measure),
        to_original_scale(yi + Z_95 * sei, measure),
    )
}
