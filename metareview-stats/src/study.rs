//! Study records and effect measures.
//!
//! A [`Study`] is owned by the caller and never mutated by the engine. Its
//! [`StudyData`] payload is one of four mutually exclusive variants; which
//! [`EffectMeasure`]s a variant can produce is decided by an exhaustive
//! match in [`EffectMeasure::accepts`].

use core::fmt;

/// Per-study measurements.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum StudyData {
    /// 2×2 table: events and totals in the treatment (1) and control (2) arms.
    Binary {
        events1: u32,
        total1: u32,
        events2: u32,
        total2: u32,
    },
    /// Arm means, standard deviations and sample sizes.
    Continuous {
        mean1: f64,
        sd1: f64,
        n1: u32,
        mean2: f64,
        sd2: f64,
        n2: u32,
    },
    /// A pre-computed effect `yi` with standard error `sei`, already on the
    /// analysis scale (log scale for ratio measures).
    Generic { yi: f64, sei: f64 },
    /// A reported hazard ratio with its 95% confidence interval.
    Hazard { hr: f64, ci_lower: f64, ci_upper: f64 },
}

impl StudyData {
    /// Short lowercase name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Binary { .. } => "binary",
            Self::Continuous { .. } => "continuous",
            Self::Generic { .. } => "generic",
            Self::Hazard { .. } => "hazard",
        }
    }
}

/// A single study entering the analysis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Study {
    pub id: String,
    pub name: String,
    pub year: Option<i32>,
    pub subgroup: Option<String>,
    pub dose: Option<f64>,
    pub data: StudyData,
}

impl Study {
    /// Create a study with no year, subgroup or dose.
    pub fn new(id: impl Into<String>, name: impl Into<String>, data: StudyData) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            year: None,
            subgroup: None,
            dose: None,
            data,
        }
    }

    /// Binary study from a 2×2 table.
    pub fn binary(
        id: impl Into<String>,
        name: impl Into<String>,
        events1: u32,
        total1: u32,
        events2: u32,
        total2: u32,
    ) -> Self {
        Self::new(
            id,
            name,
            StudyData::Binary {
                events1,
                total1,
                events2,
                total2,
            },
        )
    }

    /// Continuous study from arm summaries.
    #[allow(clippy::too_many_arguments)]
    pub fn continuous(
        id: impl Into<String>,
        name: impl Into<String>,
        mean1: f64,
        sd1: f64,
        n1: u32,
        mean2: f64,
        sd2: f64,
        n2: u32,
    ) -> Self {
        Self::new(
            id,
            name,
            StudyData::Continuous {
                mean1,
                sd1,
                n1,
                mean2,
                sd2,
                n2,
            },
        )
    }

    /// Study carrying a pre-computed effect and standard error.
    pub fn generic(id: impl Into<String>, name: impl Into<String>, yi: f64, sei: f64) -> Self {
        Self::new(id, name, StudyData::Generic { yi, sei })
    }

    /// Study reporting a hazard ratio and its 95% CI.
    pub fn hazard(
        id: impl Into<String>,
        name: impl Into<String>,
        hr: f64,
        ci_lower: f64,
        ci_upper: f64,
    ) -> Self {
        Self::new(id, name, StudyData::Hazard { hr, ci_lower, ci_upper })
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_subgroup(mut self, subgroup: impl Into<String>) -> Self {
        self.subgroup = Some(subgroup.into());
        self
    }

    pub fn with_dose(mut self, dose: f64) -> Self {
        self.dose = Some(dose);
        self
    }
}

/// The effect measure pooled across studies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EffectMeasure {
    /// Odds ratio (log scale).
    #[cfg_attr(feature = "serde", serde(rename = "OR"))]
    OddsRatio,
    /// Risk ratio (log scale).
    #[cfg_attr(feature = "serde", serde(rename = "RR"))]
    RiskRatio,
    /// Mean difference (raw scale).
    #[cfg_attr(feature = "serde", serde(rename = "MD"))]
    MeanDifference,
    /// Standardized mean difference, Hedges' g (raw scale).
    #[cfg_attr(feature = "serde", serde(rename = "SMD"))]
    StandardizedMeanDifference,
    /// Hazard ratio (log scale).
    #[cfg_attr(feature = "serde", serde(rename = "HR"))]
    HazardRatio,
}

impl EffectMeasure {
    /// Conventional abbreviation (`"OR"`, `"RR"`, `"MD"`, `"SMD"`, `"HR"`).
    pub fn code(self) -> &'static str {
        match self {
            Self::OddsRatio => "OR",
            Self::RiskRatio => "RR",
            Self::MeanDifference => "MD",
            Self::StandardizedMeanDifference => "SMD",
            Self::HazardRatio => "HR",
        }
    }

    /// Whether the measure is pooled on the log scale.
    pub fn is_log_scale(self) -> bool {
        match self {
            Self::OddsRatio | Self::RiskRatio | Self::HazardRatio => true,
            Self::MeanDifference | Self::StandardizedMeanDifference => false,
        }
    }

    /// The value indicating no effect on the original scale (1 or 0).
    pub fn null_value(self) -> f64 {
        if self.is_log_scale() {
            1.0
        } else {
            0.0
        }
    }

    /// Whether `data` can produce this measure.
    ///
    /// Binary → OR/RR, Continuous → MD/SMD, Hazard → HR, Generic → any.
    pub fn accepts(self, data: &StudyData) -> bool {
        match data {
            StudyData::Binary { .. } => matches!(self, Self::OddsRatio | Self::RiskRatio),
            StudyData::Continuous { .. } => {
                matches!(self, Self::MeanDifference | Self::StandardizedMeanDifference)
            }
            StudyData::Hazard { .. } => matches!(self, Self::HazardRatio),
            StudyData::Generic { .. } => true,
        }
    }
}

impl fmt::Display for EffectMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measure_data_compatibility() {
        let binary = Study::binary("a", "A", 1, 10, 2, 10).data;
        let cont = Study::continuous("b", "B", 1.0, 1.0, 10, 0.0, 1.0, 10).data;
        let hazard = Study::hazard("c", "C", 0.8, 0.6, 1.1).data;
        let generic = Study::generic("d", "D", 0.1, 0.2).data;

        assert!(EffectMeasure::OddsRatio.accepts(&binary));
        assert!(EffectMeasure::RiskRatio.accepts(&binary));
        assert!(!EffectMeasure::MeanDifference.accepts(&binary));
        assert!(EffectMeasure::StandardizedMeanDifference.accepts(&cont));
        assert!(!EffectMeasure::HazardRatio.accepts(&cont));
        assert!(EffectMeasure::HazardRatio.accepts(&hazard));
        assert!(!EffectMeasure::OddsRatio.accepts(&hazard));
        for m in [
            EffectMeasure::OddsRatio,
            EffectMeasure::RiskRatio,
            EffectMeasure::MeanDifference,
            EffectMeasure::StandardizedMeanDifference,
            EffectMeasure::HazardRatio,
        ] {
            assert!(m.accepts(&generic));
        }
    }

    #[test]
    fn builder_sets_optional_fields() {
        let s = Study::generic("x", "X", 0.0, 1.0)
            .with_year(2004)
            .with_subgroup("adults")
            .with_dose(75.0);
        assert_eq!(s.year, Some(2004));
        assert_eq!(s.subgroup.as_deref(), Some("adults"));
        assert_eq!(s.dose, Some(75.0));
    }

    #[test]
    fn measure_codes_and_scale() {
        assert_eq!(EffectMeasure::StandardizedMeanDifference.to_string(), "SMD");
        assert!(EffectMeasure::HazardRatio.is_log_scale());
        assert!(!EffectMeasure::MeanDifference.is_log_scale());
        assert_eq!(EffectMeasure::RiskRatio.null_value(), 1.0);
        assert_eq!(EffectMeasure::MeanDifference.null_value(), 0.0);
    }
}
