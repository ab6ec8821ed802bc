//! Number needed to treat (or harm).
//!
//! A pooled ratio is turned into an absolute risk difference at the control
//! event rate observed across the binary studies:
//!
//! - RR: `ARD = CER·(RR − 1)`
//! - OR: `EER = OR·CER / (1 − CER + OR·CER)`, `ARD = EER − CER` (Sackett)
//!
//! and `NNT = 1 / |ARD|`. When the ratio's CI includes 1 the NNT interval
//! runs through infinity, so only the bound on the side of the point
//! estimate is finite.

use core::fmt;

use metareview_core::Summarizable;

use crate::plots::implied_treatment_rate;
use crate::pooling::MetaAnalysisResult;
use crate::study::{EffectMeasure, Study, StudyData};

const MIN_ARD: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum NntKind {
    /// Treatment lowers the event rate (NNT).
    Benefit,
    /// Treatment raises the event rate (NNH).
    Harm,
}

impl fmt::Display for NntKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Benefit => write!(f, "NNT"),
            Self::Harm => write!(f, "NNH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NntResult {
    pub kind: NntKind,
    pub nnt: f64,
    /// Lower bound, always finite.
    pub ci_lower: f64,
    /// Upper bound, `None` (unbounded) when `crosses_null`.
    pub ci_upper: Option<f64>,
    /// The ratio CI includes 1.
    pub crosses_null: bool,
    pub control_event_rate: f64,
    pub experimental_event_rate: f64,
    pub absolute_risk_difference: f64,
}

impl NntResult {
    /// Upper bound with the open end of a null-crossing interval as `+∞`.
    pub fn upper_bound(&self) -> f64 {
        self.ci_upper.unwrap_or(f64::INFINITY)
    }
}

impl Summarizable for NntResult {
    fn summary(&self) -> String {
        match self.ci_upper {
            Some(upper) => format!(
                "{} {:.1} ({:.1} to {:.1}), CER {:.3}",
                self.kind, self.nnt, self.ci_lower, upper, self.control_event_rate
            ),
            None => format!(
                "{} {:.1} ({:.1} to ∞, CI crosses null), CER {:.3}",
                self.kind, self.nnt, self.ci_lower, self.control_event_rate
            ),
        }
    }
}

fn risk_difference(measure: EffectMeasure, ratio: f64, cer: f64) -> Option<f64> {
    implied_treatment_rate(measure, ratio, cer).map(|eer| eer - cer)
}

/// Pooled control event rate over every binary study, from raw counts.
pub fn control_event_rate(studies: &[Study]) -> Option<f64> {
    let (events, total) = studies.iter().fold((0u64, 0u64), |(e, t), s| match s.data {
        StudyData::Binary { events2, total2, .. } => (e + u64::from(events2), t + u64::from(total2)),
        _ => (e, t),
    });
    (total > 0).then(|| events as f64 / total as f64)
}

/// Convert a pooled OR or RR into a number needed to treat or harm.
///
/// `None` for other measures, without binary studies, or when the absolute
/// risk difference is effectively zero.
pub fn number_needed_to_treat(studies: &[Study], result: &MetaAnalysisResult) -> Option<NntResult> {
    if !matches!(result.measure, EffectMeasure::OddsRatio | EffectMeasure::RiskRatio) {
        return None;
    }
    let cer = control_event_rate(studies)?;
    let ard = risk_difference(result.measure, result.effect, cer)?;
    if ard.abs() < MIN_ARD {
        tracing::debug!(ard, "NNT undefined: no absolute risk difference");
        return None;
    }
    let ard_lower = risk_difference(result.measure, result.ci_lower, cer)?;
    let ard_upper = risk_difference(result.measure, result.ci_upper, cer)?;

    let kind = if ard < 0.0 { NntKind::Benefit } else { NntKind::Harm };
    let crosses_null = result.ci_lower < 1.0 && result.ci_upper > 1.0;
    let (ci_lower, ci_upper) = if crosses_null {
        let same_side = match kind {
            NntKind::Benefit => ard_lower,
            NntKind::Harm => ard_upper,
        };
        (1.0 / same_side.abs(), None)
    } else {
        let a = 1.0 / ard_lower.abs();
        let b = 1.0 / ard_upper.abs();
        (a.min(b), Some(a.max(b)))
    };

    Some(NntResult {
        kind,
        nnt: 1.0 / ard.abs(),
        ci_lower,
        ci_upper,
        crosses_null,
        control_event_rate: cer,
        experimental_event_rate: cer + ard,
        absolute_risk_difference: ard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooling::fixtures::{aspirin, blood_pressure};
    use crate::pooling::{meta_analysis, Model};

    #[test]
    fn odds_ratio_uses_sackett_conversion() {
        let studies = aspirin();
        let r = meta_analysis(&studies, EffectMeasure::OddsRatio, Model::Random).unwrap();
        let n = number_needed_to_treat(&studies, &r).unwrap();
        assert_eq!(n.kind, NntKind::Benefit);
        assert!((n.control_event_rate - 0.08413304042856593).abs() < 1e-12);
        assert!((n.absolute_risk_difference + 0.018472072020458502).abs() < 1e-9);
        assert!((n.nnt - 54.13577853596841).abs() < 1e-6);
        assert!((n.ci_lower - 44.493388808800134).abs() < 1e-6);
        assert!((n.upper_bound() - 70.28222613572377).abs() < 1e-6);
        assert!(!n.crosses_null);
        assert!(n.summary().starts_with("NNT 54.1"));
    }

    #[test]
    fn risk_ratio_uses_direct_multiplication() {
        let studies = aspirin();
        let r = meta_analysis(&studies, EffectMeasure::RiskRatio, Model::Random).unwrap();
        let n = number_needed_to_treat(&studies, &r).unwrap();
        assert!((n.absolute_risk_difference + 0.017216625778904177).abs() < 1e-9);
        assert!((n.nnt - 58.083390604058835).abs() < 1e-6);
        assert!((n.ci_lower - 47.73617208094011).abs() < 1e-6);
        assert!((n.upper_bound() - 75.38997112591814).abs() < 1e-6);
    }

    #[test]
    fn ci_crossing_null_has_one_infinite_bound() {
        let studies = vec![
            Study::binary("a", "A", 10, 100, 14, 100),
            Study::binary("b", "B", 8, 90, 9, 95),
        ];
        let r = meta_analysis(&studies, EffectMeasure::RiskRatio, Model::Fixed).unwrap();
        assert!(r.ci_lower < 1.0 && r.ci_upper > 1.0);
        let n = number_needed_to_treat(&studies, &r).unwrap();
        assert!(n.crosses_null);
        assert_eq!(n.kind, NntKind::Benefit);
        assert!(n.ci_lower.is_finite());
        assert!(n.ci_lower < n.nnt);
        assert_eq!(n.ci_upper, None);
        assert!(n.upper_bound().is_infinite());
        assert!(n.summary().contains("crosses null"));
    }

    #[test]
    fn harm_is_reported_as_nnh() {
        let studies = vec![
            Study::binary("a", "A", 30, 100, 15, 100),
            Study::binary("b", "B", 25, 100, 12, 100),
        ];
        let r = meta_analysis(&studies, EffectMeasure::OddsRatio, Model::Fixed).unwrap();
        let n = number_needed_to_treat(&studies, &r).unwrap();
        assert_eq!(n.kind, NntKind::Harm);
        assert!(n.absolute_risk_difference > 0.0);
        assert!(n.ci_lower <= n.nnt && n.nnt <= n.upper_bound());
    }

    #[test]
    fn null_effect_is_undefined() {
        let studies = vec![
            Study::binary("a", "A", 10, 100, 10, 100),
            Study::binary("b", "B", 20, 100, 20, 100),
        ];
        let r = meta_analysis(&studies, EffectMeasure::RiskRatio, Model::Fixed).unwrap();
        assert!(number_needed_to_treat(&studies, &r).is_none());
    }

    #[test]
    fn difference_measures_have_no_nnt() {
        let studies = blood_pressure();
        let r = meta_analysis(&studies, EffectMeasure::MeanDifference, Model::Random).unwrap();
        assert!(number_needed_to_treat(&studies, &r).is_none());
        assert_eq!(control_event_rate(&studies), None);
    }
}
