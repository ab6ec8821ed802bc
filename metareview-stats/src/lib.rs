//! Meta-analysis engine for systematic reviews.
//!
//! Turns per-study measurements into pooled effects, heterogeneity
//! statistics, influence and bias diagnostics, and a GRADE certainty rating.
//! Every function is a pure transform of its inputs; nothing is cached.
//!
//! # Quick start
//!
//! ```
//! use metareview_stats::{analyze, AnalysisConfig, EffectMeasure, Study};
//!
//! let studies = vec![
//!     Study::binary("1", "MRC-1", 49, 615, 67, 624).with_year(1974),
//!     Study::binary("2", "CDP", 44, 758, 64, 771).with_year(1976),
//!     Study::binary("3", "MRC-2", 102, 832, 126, 850).with_year(1979),
//!     Study::binary("4", "GASP", 32, 317, 38, 309).with_year(1979),
//! ];
//! let report = analyze(&studies, EffectMeasure::OddsRatio, &AnalysisConfig::default()).unwrap();
//! assert!(report.result.effect < 1.0);
//! assert_eq!(report.leave_one_out.len(), 4);
//! ```
//!
//! # Features
//!
//! - `serde` — `Serialize`/`Deserialize` on inputs and results
//! - `parallel` — leave-one-out refits on the rayon thread pool

pub mod distribution;
pub mod study;
pub mod effect_size;
pub mod pooling;
pub mod sensitivity;
pub mod subgroup;
pub mod linalg;
pub mod regression;
pub mod dose_response;
pub mod plots;
pub mod bias;
pub mod grade;
pub mod nnt;
pub mod config;
pub mod report;

pub use study::{EffectMeasure, Study, StudyData};
pub use effect_size::{calculate_ci, calculate_effect_size, is_log_scale, to_original_scale, EffectEstimate};
pub use pooling::{
    compute_heterogeneity, estimate_studies, meta_analysis, pool_estimates, Heterogeneity,
    MetaAnalysisResult, Model, PredictionInterval, StudyEffect, StudyEstimate,
};
pub use sensitivity::{cumulative_meta_analysis, influence_diagnostics, leave_one_out};
pub use subgroup::subgroup_analysis;
pub use regression::{meta_regression, Covariate};
pub use dose_response::{dose_response, DoseModel};
pub use bias::{beggs_test, eggers_test, trim_and_fill, TrimFillEstimator};
pub use grade::{assess_grade, CertaintyLevel, Concern, GradeOverrides};
pub use nnt::number_needed_to_treat;
pub use config::{AnalysisConfig, GradeThresholds, InfluenceThresholds};
pub use report::{analyze, AnalysisReport};

#[cfg(all(test, feature = "serde"))]
mod serde_tests {
    use super::*;
    use crate::pooling::fixtures::fleiss93;

    #[test]
    fn report_round_trips_through_json() {
        let config = AnalysisConfig {
            covariate: Some(Covariate::Year),
            ..AnalysisConfig::default()
        };
        let report = analyze(&fleiss93(), EffectMeasure::OddsRatio, &config).unwrap();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"measure\":\"OR\""));
        assert!(json.contains("\"model\":\"random\""));
        let back: AnalysisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.result.k(), 7);
        assert_eq!(back.grade, report.grade);
        assert!((back.result.summary - report.result.summary).abs() < 1e-12);
    }

    #[test]
    fn open_nnt_bound_round_trips_through_json() {
        let studies = vec![
            Study::binary("a", "A", 10, 100, 14, 100),
            Study::binary("b", "B", 8, 90, 9, 95),
            Study::binary("c", "C", 12, 110, 15, 105),
        ];
        let report = analyze(&studies, EffectMeasure::RiskRatio, &AnalysisConfig::default()).unwrap();
        let nnt = report.nnt.unwrap();
        assert!(nnt.crosses_null);
        assert_eq!(nnt.ci_upper, None);

        let json = serde_json::to_string(&nnt).unwrap();
        assert!(json.contains("\"ci_upper\":null"));
        let back: nnt::NntResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ci_upper, None);
        assert!(back.upper_bound().is_infinite());
        assert!((back.ci_lower - nnt.ci_lower).abs() < 1e-12);

        let json = serde_json::to_string(&report).unwrap();
        let back: AnalysisReport = serde_json::from_str(&json).unwrap();
        let back_nnt = back.nnt.unwrap();
        assert!(back_nnt.crosses_null);
        assert_eq!(back_nnt.ci_upper, None);
        assert!((back_nnt.nnt - nnt.nnt).abs() < 1e-9);
    }

    #[test]
    fn studies_and_config_round_trip() {
        let studies = fleiss93();
        let json = serde_json::to_string(&studies).unwrap();
        let back: Vec<Study> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, studies);

        let config = AnalysisConfig::default();
        let back: AnalysisConfig = serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
