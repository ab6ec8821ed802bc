//! Analysis settings.
//!
//! Every knob has a conventional default, so `AnalysisConfig::default()` runs
//! a DerSimonian–Laird random-effects analysis with the usual cutoffs.

use metareview_core::{MetaError, Result};

use crate::bias::TrimFillEstimator;
use crate::dose_response::{DoseModel, DEFAULT_CURVE_STEPS};
use crate::grade::GradeOverrides;
use crate::pooling::Model;
use crate::regression::Covariate;
use crate::sensitivity::InfluenceDiagnostic;

/// Cutoffs for the automatic GRADE domains.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GradeThresholds {
    /// I² (percent) above which inconsistency is serious.
    pub i2_serious: f64,
    /// I² (percent) above which inconsistency is very serious.
    pub i2_very_serious: f64,
    /// Heterogeneity Q p-value below which inconsistency is serious.
    pub q_alpha: f64,
    /// Significance level of Egger's and Begg's tests.
    pub bias_alpha: f64,
    /// Publication bias is only assessed with at least this many studies.
    pub min_studies_publication_bias: usize,
    /// CI width on the ratio scale counted as wide.
    pub ratio_ci_width: f64,
    /// CI width, as a multiple of `|effect|`, counted as wide for differences.
    pub difference_ci_width_factor: f64,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            i2_serious: 50.0,
            i2_very_serious: 75.0,
            q_alpha: 0.10,
            bias_alpha: 0.10,
            min_studies_publication_bias: 10,
            ratio_ci_width: 1.0,
            difference_ci_width_factor: 2.0,
        }
    }
}

/// Conventional flags for [`InfluenceDiagnostic`] values.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InfluenceThresholds {
    /// Cook's distance above `cooks_multiplier / k`.
    pub cooks_multiplier: f64,
    /// Hat value above `hat_multiplier / k`.
    pub hat_multiplier: f64,
    /// `|studentized residual|` above this.
    pub studentized_residual: f64,
    /// `|DFFITS|` above this.
    pub dffits: f64,
}

impl Default for InfluenceThresholds {
    fn default() -> Self {
        Self {
            cooks_multiplier: 4.0,
            hat_multiplier: 2.0,
            studentized_residual: 2.0,
            dffits: 1.0,
        }
    }
}

/// Which cutoffs a study exceeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InfluenceFlags {
    pub cooks_distance: bool,
    pub hat: bool,
    pub studentized_residual: bool,
    pub dffits: bool,
}

impl InfluenceFlags {
    pub fn any(&self) -> bool {
        self.cooks_distance || self.hat || self.studentized_residual || self.dffits
    }
}

impl InfluenceThresholds {
    /// Flag one study of an analysis pooling `k` studies.
    pub fn flags(&self, diagnostic: &InfluenceDiagnostic, k: usize) -> InfluenceFlags {
        let k = k as f64;
        InfluenceFlags {
            cooks_distance: diagnostic.cooks_distance > self.cooks_multiplier / k,
            hat: diagnostic.hat > self.hat_multiplier / k,
            studentized_residual: diagnostic.studentized_residual.abs() > self.studentized_residual,
            dffits: diagnostic.dffits.abs() > self.dffits,
        }
    }
}

/// Settings for a full [`analyze`](crate::report::analyze) run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalysisConfig {
    pub model: Model,
    pub trim_fill_estimator: TrimFillEstimator,
    pub dose_model: DoseModel,
    /// Intervals of the sampled dose-response curve.
    pub dose_curve_steps: usize,
    /// Moderator for meta-regression; none skips it.
    pub covariate: Option<Covariate>,
    pub influence: InfluenceThresholds,
    pub grade: GradeThresholds,
    pub grade_overrides: GradeOverrides,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            model: Model::Random,
            trim_fill_estimator: TrimFillEstimator::R0,
            dose_model: DoseModel::Linear,
            dose_curve_steps: DEFAULT_CURVE_STEPS,
            covariate: None,
            influence: InfluenceThresholds::default(),
            grade: GradeThresholds::default(),
            grade_overrides: GradeOverrides::default(),
        }
    }
}

fn check_probability(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(MetaError::InvalidInput(format!(
            "config: {} must be in (0, 1), got {}",
            name, value
        )))
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(MetaError::InvalidInput(format!(
            "config: {} must be positive, got {}",
            name, value
        )))
    }
}

impl AnalysisConfig {
    /// Reject settings that cannot produce a meaningful analysis.
    ///
    /// # Errors
    ///
    /// [`MetaError::InvalidInput`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.dose_curve_steps == 0 {
            return Err(MetaError::InvalidInput(
                "config: dose_curve_steps must be > 0".into(),
            ));
        }
        let g = &self.grade;
        if !(0.0..=100.0).contains(&g.i2_serious)
            || !(0.0..=100.0).contains(&g.i2_very_serious)
            || g.i2_serious > g.i2_very_serious
        {
            return Err(MetaError::InvalidInput(format!(
                "config: need 0 <= i2_serious ({}) <= i2_very_serious ({}) <= 100",
                g.i2_serious, g.i2_very_serious
            )));
        }
        check_probability("q_alpha", g.q_alpha)?;
        check_probability("bias_alpha", g.bias_alpha)?;
        check_positive("ratio_ci_width", g.ratio_ci_width)?;
        check_positive("difference_ci_width_factor", g.difference_ci_width_factor)?;

        let i = &self.influence;
        check_positive("cooks_multiplier", i.cooks_multiplier)?;
        check_positive("hat_multiplier", i.hat_multiplier)?;
        check_positive("studentized_residual", i.studentized_residual)?;
        check_positive("dffits", i.dffits)?;
        Ok(())
    }
}
