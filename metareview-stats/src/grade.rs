//! GRADE certainty-of-evidence rating.
//!
//! Evidence starts at 4 ("high") and each of five domains can downgrade it by
//! one (serious) or two (very serious) levels. Inconsistency, imprecision and
//! publication bias are derived from the pooled result and the bias tests;
//! risk of bias and indirectness need reviewer judgement and default to no
//! concern. Any domain can be overridden.

use core::fmt;

use metareview_core::{Scored, Summarizable};

use crate::bias::{BeggsTest, EggersTest, TrimAndFillResult};
use crate::config::GradeThresholds;
use crate::pooling::MetaAnalysisResult;

/// Starting score for a body of randomized evidence.
pub const START_SCORE: i32 = 4;

/// Level of concern in one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Concern {
    #[default]
    NoConcern,
    Serious,
    VerySerious,
}

impl Concern {
    /// Score change: 0, −1 or −2.
    pub fn downgrade(self) -> i32 {
        match self {
            Self::NoConcern => 0,
            Self::Serious => -1,
            Self::VerySerious => -2,
        }
    }
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConcern => write!(f, "no_concern"),
            Self::Serious => write!(f, "serious"),
            Self::VerySerious => write!(f, "very_serious"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum GradeDomain {
    RiskOfBias,
    Inconsistency,
    Indirectness,
    Imprecision,
    PublicationBias,
}

impl GradeDomain {
    pub const ALL: [GradeDomain; 5] = [
        Self::RiskOfBias,
        Self::Inconsistency,
        Self::Indirectness,
        Self::Imprecision,
        Self::PublicationBias,
    ];
}

impl fmt::Display for GradeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RiskOfBias => write!(f, "risk of bias"),
            Self::Inconsistency => write!(f, "inconsistency"),
            Self::Indirectness => write!(f, "indirectness"),
            Self::Imprecision => write!(f, "imprecision"),
            Self::PublicationBias => write!(f, "publication bias"),
        }
    }
}

/// Final certainty rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CertaintyLevel {
    High,
    Moderate,
    Low,
    VeryLow,
}

impl CertaintyLevel {
    /// `4 → high`, `3 → moderate`, `2 → low`, anything lower `→ very_low`.
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 4 => Self::High,
            3 => Self::Moderate,
            2 => Self::Low,
            _ => Self::VeryLow,
        }
    }
}

impl fmt::Display for CertaintyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Moderate => write!(f, "moderate"),
            Self::Low => write!(f, "low"),
            Self::VeryLow => write!(f, "very_low"),
        }
    }
}

/// Caller judgements that replace the automatic assessment of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GradeOverrides {
    pub risk_of_bias: Option<Concern>,
    pub inconsistency: Option<Concern>,
    pub indirectness: Option<Concern>,
    pub imprecision: Option<Concern>,
    pub publication_bias: Option<Concern>,
}

impl GradeOverrides {
    pub fn get(&self, domain: GradeDomain) -> Option<Concern> {
        match domain {
            GradeDomain::RiskOfBias => self.risk_of_bias,
            GradeDomain::Inconsistency => self.inconsistency,
            GradeDomain::Indirectness => self.indirectness,
            GradeDomain::Imprecision => self.imprecision,
            GradeDomain::PublicationBias => self.publication_bias,
        }
    }

    pub fn set(&mut self, domain: GradeDomain, concern: Option<Concern>) {
        let slot = match domain {
            GradeDomain::RiskOfBias => &mut self.risk_of_bias,
            GradeDomain::Inconsistency => &mut self.inconsistency,
            GradeDomain::Indirectness => &mut self.indirectness,
            GradeDomain::Imprecision => &mut self.imprecision,
            GradeDomain::PublicationBias => &mut self.publication_bias,
        };
        *slot = concern;
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GradeFactor {
    pub domain: GradeDomain,
    pub concern: Concern,
    /// False when the caller overrode this domain.
    pub auto: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GradeAssessment {
    /// `max(1, 4 + Σ downgrades)`.
    pub score: i32,
    pub level: CertaintyLevel,
    /// One factor per domain in [`GradeDomain::ALL`] order.
    pub factors: Vec<GradeFactor>,
}

impl Scored for GradeAssessment {
    fn score(&self) -> f64 {
        f64::from(self.score)
    }
}

impl Summarizable for GradeAssessment {
    fn summary(&self) -> String {
        let concerns: Vec<String> = self
            .factors
            .iter()
            .filter(|f| f.concern != Concern::NoConcern)
            .map(|f| format!("{} {}", f.domain, f.concern))
            .collect();
        if concerns.is_empty() {
            format!("certainty {} (score {})", self.level, self.score)
        } else {
            format!("certainty {} (score {}): {}", self.level, self.score, concerns.join(", "))
        }
    }
}

/// Everything the automatic domains look at.
#[derive(Debug, Clone, Copy)]
pub struct GradeEvidence<'a> {
    pub result: &'a MetaAnalysisResult,
    pub egger: Option<&'a EggersTest>,
    pub begg: Option<&'a BeggsTest>,
    pub trim_fill: Option<&'a TrimAndFillResult>,
}

fn inconsistency(result: &MetaAnalysisResult, t: &GradeThresholds) -> (Concern, String) {
    let h = &result.heterogeneity;
    if h.df == 0 {
        return (Concern::NoConcern, "single study".into());
    }
    if h.i2 > t.i2_very_serious {
        (Concern::VerySerious, format!("I²={:.1}% > {}%", h.i2, t.i2_very_serious))
    } else if h.i2 > t.i2_serious {
        (Concern::Serious, format!("I²={:.1}% > {}%", h.i2, t.i2_serious))
    } else if h.p_value < t.q_alpha {
        (Concern::Serious, format!("Q p={:.4} < {}", h.p_value, t.q_alpha))
    } else {
        (Concern::NoConcern, format!("I²={:.1}%", h.i2))
    }
}

fn imprecision(result: &MetaAnalysisResult, t: &GradeThresholds) -> (Concern, String) {
    let null = result.measure.null_value();
    let crosses = result.ci_lower <= null && null <= result.ci_upper;
    let width = result.ci_upper - result.ci_lower;
    let wide = if result.measure.is_log_scale() {
        width > t.ratio_ci_width
    } else {
        width > t.difference_ci_width_factor * result.effect.abs()
    };
    let reason = format!(
        "CI [{:.3}, {:.3}]{}{}",
        result.ci_lower,
        result.ci_upper,
        if crosses { ", crosses null" } else { "" },
        if wide { ", wide" } else { "" }
    );
    let concern = match (crosses, wide) {
        (true, true) => Concern::VerySerious,
        (true, false) | (false, true) => Concern::Serious,
        (false, false) => Concern::NoConcern,
    };
    (concern, reason)
}

fn publication_bias(evidence: &GradeEvidence<'_>, t: &GradeThresholds) -> (Concern, String) {
    let k = evidence.result.k();
    if k < t.min_studies_publication_bias {
        return (
            Concern::NoConcern,
            format!("not assessed: {} studies < {}", k, t.min_studies_publication_bias),
        );
    }
    let mut triggers = Vec::new();
    if let Some(e) = evidence.egger.filter(|e| e.p_value < t.bias_alpha) {
        triggers.push(format!("Egger p={:.4}", e.p_value));
    }
    if let Some(b) = evidence.begg.filter(|b| b.p_value < t.bias_alpha) {
        triggers.push(format!("Begg p={:.4}", b.p_value));
    }
    if let Some(tf) = evidence.trim_fill.filter(|tf| tf.k0 > 0) {
        triggers.push(format!("trim-and-fill k0={}", tf.k0));
    }
    let concern = match triggers.len() {
        0 => return (Concern::NoConcern, "no asymmetry detected".into()),
        1 => Concern::Serious,
        _ => Concern::VerySerious,
    };
    (concern, triggers.join(", "))
}

/// Rate the certainty of the evidence behind a pooled result.
pub fn assess_grade(
    evidence: &GradeEvidence<'_>,
    thresholds: &GradeThresholds,
    overrides: &GradeOverrides,
) -> GradeAssessment {
    let factors: Vec<GradeFactor> = GradeDomain::ALL
        .iter()
        .map(|&domain| {
            if let Some(concern) = overrides.get(domain) {
                return GradeFactor {
                    domain,
                    concern,
                    auto: false,
                    reason: "reviewer judgement".into(),
                };
            }
            let (concern, reason) = match domain {
                GradeDomain::Inconsistency => inconsistency(evidence.result, thresholds),
                GradeDomain::Imprecision => imprecision(evidence.result, thresholds),
                GradeDomain::PublicationBias => publication_bias(evidence, thresholds),
                GradeDomain::RiskOfBias | GradeDomain::Indirectness => {
                    (Concern::NoConcern, "not assessed".into())
                }
            };
            GradeFactor {
                domain,
                concern,
                auto: true,
                reason,
            }
        })
        .collect();

    let score = (START_SCORE + factors.iter().map(|f| f.concern.downgrade()).sum::<i32>()).max(1);
    let level = CertaintyLevel::from_score(score);
    tracing::debug!(score, %level, "GRADE assessment");
    GradeAssessment { score, level, factors }
}
