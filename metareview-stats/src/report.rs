//! One-shot analysis bundling every diagnostic.

use metareview_core::{Result, Summarizable};

use crate::bias::{beggs_test, eggers_test, trim_and_fill, BeggsTest, EggersTest, TrimAndFillResult};
use crate::config::{AnalysisConfig, InfluenceFlags};
use crate::dose_response::{dose_response, DoseResponseResult};
use crate::grade::{assess_grade, GradeAssessment, GradeEvidence};
use crate::nnt::{number_needed_to_treat, NntResult};
use crate::plots::{
    baujat_plot, funnel_plot, galbraith_plot, labbe_plot, BaujatPlot, FunnelPlot, GalbraithPlot,
    LabbePlot,
};
use crate::pooling::{meta_analysis, MetaAnalysisResult};
use crate::regression::{meta_regression, MetaRegressionResult};
use crate::sensitivity::{
    cumulative_meta_analysis, influence_diagnostics, leave_one_out, CumulativeStep,
    InfluenceDiagnostic, SensitivityResult,
};
use crate::study::{EffectMeasure, Study};
use crate::subgroup::{subgroup_analysis, SubgroupAnalysisResult};

/// Everything computed for one set of studies. Parts that need more data
/// than was supplied are `None` or empty.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnalysisReport {
    pub result: MetaAnalysisResult,
    pub leave_one_out: Vec<SensitivityResult>,
    pub cumulative: Vec<CumulativeStep>,
    pub influence: Vec<InfluenceDiagnostic>,
    /// Parallel to `influence`.
    pub influence_flags: Vec<InfluenceFlags>,
    /// Present when at least one study carries a subgroup label.
    pub subgroups: Option<SubgroupAnalysisResult>,
    pub regression: Option<MetaRegressionResult>,
    pub dose_response: Option<DoseResponseResult>,
    pub funnel: FunnelPlot,
    pub galbraith: Option<GalbraithPlot>,
    pub baujat: Option<BaujatPlot>,
    pub labbe: Option<LabbePlot>,
    pub egger: Option<EggersTest>,
    pub begg: Option<BeggsTest>,
    pub trim_fill: Option<TrimAndFillResult>,
    pub grade: GradeAssessment,
    pub nnt: Option<NntResult>,
}

impl Summarizable for AnalysisReport {
    fn summary(&self) -> String {
        let mut lines = vec![self.result.summary()];
        if let Some(s) = &self.subgroups {
            lines.push(s.summary());
        }
        if let Some(r) = &self.regression {
            lines.push(r.summary());
        }
        if let Some(d) = &self.dose_response {
            lines.push(d.summary());
        }
        if let Some(e) = &self.egger {
            lines.push(e.summary());
        }
        if let Some(b) = &self.begg {
            lines.push(b.summary());
        }
        if let Some(tf) = &self.trim_fill {
            lines.push(tf.summary());
        }
        if let Some(n) = &self.nnt {
            lines.push(n.summary());
        }
        lines.push(self.grade.summary());
        lines.join("\n")
    }
}

/// Run the full analysis of `studies` under `config`.
///
/// # Errors
///
/// Invalid configuration, an empty study list, measure/data mismatches and
/// invalid study values. Insufficient data for any single diagnostic is not
/// an error.
pub fn analyze(studies: &[Study], measure: EffectMeasure, config: &AnalysisConfig) -> Result<AnalysisReport> {
    config.validate()?;
    let result = meta_analysis(studies, measure, config.model)?;
    let k = result.k();
    tracing::debug!(k, %measure, model = %config.model, "starting analysis");

    let influence = influence_diagnostics(&result)?;
    let influence_flags = influence.iter().map(|d| config.influence.flags(d, k)).collect();

    let subgroups = if studies.iter().any(|s| s.subgroup.is_some()) {
        Some(subgroup_analysis(studies, measure, config.model)?)
    } else {
        None
    };
    let regression = match &config.covariate {
        Some(covariate) => meta_regression(studies, measure, covariate)?,
        None => None,
    };
    let dose_response = if studies.iter().any(|s| s.dose.is_some()) {
        dose_response(studies, measure, config.dose_model, config.dose_curve_steps)?
    } else {
        None
    };

    let egger = eggers_test(&result.studies);
    let begg = beggs_test(&result.studies);
    let trim_fill = trim_and_fill(&result, config.trim_fill_estimator);
    let grade = assess_grade(
        &GradeEvidence {
            result: &result,
            egger: egger.as_ref(),
            begg: begg.as_ref(),
            trim_fill: trim_fill.as_ref(),
        },
        &config.grade,
        &config.grade_overrides,
    );

    Ok(AnalysisReport {
        leave_one_out: leave_one_out(&result)?,
        cumulative: cumulative_meta_analysis(&result)?,
        influence,
        influence_flags,
        subgroups,
        regression,
        dose_response,
        funnel: funnel_plot(&result),
        galbraith: galbraith_plot(&result.studies),
        baujat: baujat_plot(&result.studies, result.summary, result.model_tau2()),
        labbe: labbe_plot(studies, &result),
        egger,
        begg,
        trim_fill,
        grade,
        nnt: number_needed_to_treat(studies, &result),
        result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grade::CertaintyLevel;
    use crate::pooling::fixtures::{blood_pressure, fleiss93};
    use crate::pooling::Model;
    use crate::regression::Covariate;
    use metareview_core::MetaError;

    #[test]
    fn full_report_on_fleiss() {
        let config = AnalysisConfig {
            covariate: Some(Covariate::Year),
            ..AnalysisConfig::default()
        };
        let report = analyze(&fleiss93(), EffectMeasure::OddsRatio, &config).unwrap();
        assert!((report.result.effect - 0.8763).abs() < 5e-4);
        assert_eq!(report.leave_one_out.len(), 7);
        assert_eq!(report.cumulative.len(), 7);
        assert_eq!(report.influence_flags.len(), 7);
        assert!(report.subgroups.is_none());
        assert!(report.regression.is_some());
        assert!(report.dose_response.is_none());
        assert!(report.labbe.is_some());
        assert!(report.nnt.is_some());
        assert_eq!(report.trim_fill.as_ref().unwrap().k0, 0);
        assert_eq!(report.grade.level, CertaintyLevel::High);
        let text = report.summary();
        assert!(text.lines().count() >= 5);
        assert!(text.ends_with("certainty high (score 4)"));
    }

    #[test]
    fn small_analysis_leaves_diagnostics_empty() {
        let studies = vec![
            Study::binary("a", "A", 30, 100, 45, 100).with_subgroup("x"),
            Study::binary("b", "B", 15, 80, 25, 80).with_subgroup("y"),
        ];
        let report = analyze(&studies, EffectMeasure::RiskRatio, &AnalysisConfig::default()).unwrap();
        assert!(report.leave_one_out.is_empty());
        assert!(report.influence.is_empty());
        assert!(report.egger.is_none());
        assert!(report.begg.is_none());
        assert!(report.trim_fill.is_none());
        assert_eq!(report.cumulative.len(), 2);
        assert_eq!(report.subgroups.unwrap().subgroups.len(), 2);
    }

    #[test]
    fn continuous_report_has_no_nnt() {
        let config = AnalysisConfig {
            model: Model::Fixed,
            ..AnalysisConfig::default()
        };
        let report = analyze(&blood_pressure(), EffectMeasure::MeanDifference, &config).unwrap();
        assert!(report.nnt.is_none());
        assert!(report.labbe.is_none());
        assert_eq!(report.result.model, Model::Fixed);
    }

    #[test]
    fn errors_propagate() {
        let err = analyze(&[], EffectMeasure::OddsRatio, &AnalysisConfig::default()).unwrap_err();
        assert_eq!(err, MetaError::EmptyStudies);

        let err = analyze(&blood_pressure(), EffectMeasure::OddsRatio, &AnalysisConfig::default())
            .unwrap_err();
        assert!(matches!(err, MetaError::MeasureMismatch { .. }));

        let bad = AnalysisConfig {
            dose_curve_steps: 0,
            ..AnalysisConfig::default()
        };
        assert!(analyze(&fleiss93(), EffectMeasure::OddsRatio, &bad).is_err());
    }
}
