//! Subgroup analysis with a test for subgroup differences.
//!
//! Each subgroup is pooled on its own under the requested model. The
//! between-subgroup statistic treats the subgroup summaries as studies:
//! `Q = Σ w_g (θ_g − θ̄)²` with `w_g = 1 / se_g²`, `θ̄` their inverse-variance
//! mean and `df = G − 1`.

use metareview_core::{Result, Scored, Summarizable};

use crate::distribution::chi_squared_p_value;
use crate::pooling::{meta_analysis, MetaAnalysisResult, Model};
use crate::study::{EffectMeasure, Study};

/// Name given to studies without a subgroup label.
pub const UNLABELLED: &str = "Other";

/// One subgroup and its pooled result.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Subgroup {
    pub name: String,
    pub result: MetaAnalysisResult,
}

/// Test for differences between subgroups.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubgroupTest {
    pub q: f64,
    pub df: usize,
    pub p_value: f64,
}

impl Scored for SubgroupTest {
    fn score(&self) -> f64 {
        self.p_value
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubgroupAnalysisResult {
    /// Subgroups in order of first appearance.
    pub subgroups: Vec<Subgroup>,
    /// `None` with fewer than two subgroups.
    pub test: Option<SubgroupTest>,
    /// All studies pooled together, ignoring subgroups.
    pub overall: MetaAnalysisResult,
}

impl Summarizable for SubgroupAnalysisResult {
    fn summary(&self) -> String {
        match &self.test {
            Some(t) => format!(
                "{} subgroups: Q={:.3}, df={}, p={:.4}",
                self.subgroups.len(),
                t.q,
                t.df,
                t.p_value
            ),
            None => format!("{} subgroup: no between-group test", self.subgroups.len()),
        }
    }
}

/// Pool each subgroup separately and test for differences between them.
///
/// # Errors
///
/// Any pooling error, including [`EmptyStudies`](metareview_core::MetaError::EmptyStudies)
/// for an empty slice.
pub fn subgroup_analysis(
    studies: &[Study],
    measure: EffectMeasure,
    model: Model,
) -> Result<SubgroupAnalysisResult> {
    let overall = meta_analysis(studies, measure, model)?;

    let mut groups: Vec<(String, Vec<Study>)> = Vec::new();
    for study in studies {
        let name = study.subgroup.as_deref().unwrap_or(UNLABELLED);
        match groups.iter_mut().find(|(g, _)| g == name) {
            Some((_, members)) => members.push(study.clone()),
            None => groups.push((name.to_string(), vec![study.clone()])),
        }
    }

    let subgroups = groups
        .into_iter()
        .map(|(name, members)| {
            Ok(Subgroup {
                name,
                result: meta_analysis(&members, measure, model)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let test = between_subgroup_test(&subgroups);
    if let Some(t) = &test {
        tracing::debug!(groups = subgroups.len(), q = t.q, p = t.p_value, "subgroup differences");
    }

    Ok(SubgroupAnalysisResult {
        subgroups,
        test,
        overall,
    })
}

fn between_subgroup_test(subgroups: &[Subgroup]) -> Option<SubgroupTest> {
    if subgroups.len() < 2 {
        return None;
    }
    let weights: Vec<f64> = subgroups.iter().map(|g| 1.0 / (g.result.se * g.result.se)).collect();
    let total: f64 = weights.iter().sum();
    let mean = subgroups
        .iter()
        .zip(&weights)
        .map(|(g, w)| w * g.result.summary)
        .sum::<f64>()
        / total;
    let q: f64 = subgroups
        .iter()
        .zip(&weights)
        .map(|(g, w)| w * (g.result.summary - mean).powi(2))
        .sum();
    let df = subgroups.len() - 1;
    Some(SubgroupTest {
        q,
        df,
        p_value: chi_squared_p_value(q, df as f64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pooling::fixtures::fleiss93;

    fn labelled() -> Vec<Study> {
        fleiss93()
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.with_subgroup(if i < 4 { "early" } else { "late" }))
            .collect()
    }

    #[test]
    fn between_group_q_matches_reference() {
        let r = subgroup_analysis(&labelled(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        assert_eq!(r.subgroups.len(), 2);
        assert_eq!(r.subgroups[0].name, "early");
        assert_eq!(r.subgroups[0].result.k(), 4);
        assert!((r.subgroups[0].result.summary + 0.27960807748984146).abs() < 1e-10);
        assert!((r.subgroups[1].result.summary + 0.050788315547095425).abs() < 1e-10);
        assert!((r.subgroups[1].result.heterogeneity.tau2 - 0.015678722698812042).abs() < 1e-10);

        let t = r.test.unwrap();
        assert_eq!(t.df, 1);
        assert!((t.q - 3.031265690242569).abs() < 1e-8);
        assert!((t.p_value - 0.08167428163200394).abs() < 1e-6);
        assert_eq!(t.score(), t.p_value);
    }

    #[test]
    fn overall_ignores_subgroups() {
        let r = subgroup_analysis(&labelled(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        let plain = meta_analysis(&fleiss93(), EffectMeasure::OddsRatio, Model::Random).unwrap();
        assert_eq!(r.overall, plain);
    }

    #[test]
    fn unlabelled_studies_share_a_group() {
        let r = subgroup_analysis(&fleiss93(), EffectMeasure::OddsRatio, Model::Fixed).unwrap();
        assert_eq!(r.subgroups.len(), 1);
        assert_eq!(r.subgroups[0].name, UNLABELLED);
        assert!(r.test.is_none());
        assert!(r.summary().contains("no between-group test"));
    }

    #[test]
    fn identical_subgroups_have_zero_q() {
        let studies = vec![
            Study::generic("1", "A1", 0.2, 0.1).with_subgroup("a"),
            Study::generic("2", "B1", 0.2, 0.1).with_subgroup("b"),
            Study::generic("3", "A2", 0.4, 0.2).with_subgroup("a"),
            Study::generic("4", "B2", 0.4, 0.2).with_subgroup("b"),
        ];
        let r = subgroup_analysis(&studies, EffectMeasure::MeanDifference, Model::Fixed).unwrap();
        let t = r.test.unwrap();
        assert!(t.q.abs() < 1e-20);
        assert!((t.p_value - 1.0).abs() < 1e-12);
    }
}
