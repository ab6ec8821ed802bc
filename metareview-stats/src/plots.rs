//! Plot geometry for funnel, Galbraith, Baujat and L'Abbé plots.
//!
//! Nothing here renders. Each function returns coordinates plus the derived
//! reference lines and classifications that a chart layer draws.

use crate::effect_size::Z_95;
use crate::pooling::{weighted_mean, MetaAnalysisResult, StudyEffect};
use crate::study::{EffectMeasure, Study, StudyData};

// ── Funnel ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunnelPoint {
    pub id: String,
    pub name: String,
    /// Effect on the analysis scale (x axis).
    pub yi: f64,
    /// Standard error (inverted y axis).
    pub sei: f64,
}

/// Pseudo-confidence region: a triangle with its apex at the summary
/// (`se = 0`) and its base at the largest observed standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunnelContour {
    /// Two-sided confidence level, e.g. 0.95.
    pub level: f64,
    pub z: f64,
    pub se_max: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunnelPlot {
    pub summary: f64,
    pub points: Vec<FunnelPoint>,
    /// 90%, 95% and 99% contours.
    pub contours: Vec<FunnelContour>,
}

const CONTOURS: [(f64, f64); 3] = [(0.90, 1.644853626951), (0.95, Z_95), (0.99, 2.575829303549)];

/// Funnel plot of effect against standard error around the pooled summary.
pub fn funnel_plot(result: &MetaAnalysisResult) -> FunnelPlot {
    let points: Vec<FunnelPoint> = result
        .studies
        .iter()
        .map(|s| FunnelPoint {
            id: s.id.clone(),
            name: s.name.clone(),
            yi: s.yi,
            sei: s.sei,
        })
        .collect();
    let se_max = points.iter().map(|p| p.sei).fold(0.0, f64::max);
    let contours = CONTOURS
        .iter()
        .map(|&(level, z)| FunnelContour {
            level,
            z,
            se_max,
            lower: result.summary - z * se_max,
            upper: result.summary + z * se_max,
        })
        .collect();
    FunnelPlot {
        summary: result.summary,
        points,
        contours,
    }
}

// ── Galbraith ──────────────────────────────────────────────────────────────

/// Half-width of the Galbraith band in standardized units.
pub const GALBRAITH_BAND: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GalbraithPoint {
    pub id: String,
    pub name: String,
    /// Precision `1 / sei`.
    pub x: f64,
    /// Standardized effect `yi / sei`.
    pub y: f64,
    /// Vertical distance from the regression line.
    pub residual: f64,
    pub outlier: bool,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GalbraithPlot {
    /// Slope of the line through the origin, the fixed-effect summary.
    pub slope: f64,
    /// Band half-width around the line.
    pub band: f64,
    pub points: Vec<GalbraithPoint>,
}

/// Radial (Galbraith) plot. `None` for an empty slice.
pub fn galbraith_plot(effects: &[StudyEffect]) -> Option<GalbraithPlot> {
    if effects.is_empty() {
        return None;
    }
    let (sxy, sxx) = effects.iter().fold((0.0, 0.0), |(sxy, sxx), s| {
        let x = 1.0 / s.sei;
        (sxy + x * s.yi / s.sei, sxx + x * x)
    });
    let slope = sxy / sxx;
    let points = effects
        .iter()
        .map(|s| {
            let x = 1.0 / s.sei;
            let y = s.yi / s.sei;
            let residual = y - slope * x;
            GalbraithPoint {
                id: s.id.clone(),
                name: s.name.clone(),
                x,
                y,
                residual,
                outlier: residual.abs() > GALBRAITH_BAND,
            }
        })
        .collect();
    Some(GalbraithPlot {
        slope,
        band: GALBRAITH_BAND,
        points,
    })
}

// ── Baujat ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BaujatPoint {
    pub id: String,
    pub name: String,
    /// Contribution to heterogeneity, `(yᵢ − μ)² / (vᵢ + τ²)`.
    pub contribution: f64,
    /// Influence on the summary, `(μ − μ₍₋ᵢ₎)² / Var(μ₍₋ᵢ₎)`.
    pub influence: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BaujatPlot {
    pub points: Vec<BaujatPoint>,
    /// Quadrant split on the x axis.
    pub mean_contribution: f64,
    /// Quadrant split on the y axis.
    pub mean_influence: f64,
}

/// Baujat plot for study effects around `summary` with between-study
/// variance `tau2`. `None` with fewer than two studies.
pub fn baujat_plot(effects: &[StudyEffect], summary: f64, tau2: f64) -> Option<BaujatPlot> {
    let k = effects.len();
    if k < 2 {
        return None;
    }
    let yi: Vec<f64> = effects.iter().map(|s| s.yi).collect();
    let vi: Vec<f64> = effects.iter().map(|s| s.vi).collect();

    let points: Vec<BaujatPoint> = (0..k)
        .map(|i| {
            let (y_rest, v_rest): (Vec<f64>, Vec<f64>) = (0..k)
                .filter(|&j| j != i)
                .map(|j| (yi[j], vi[j]))
                .unzip();
            let rest = weighted_mean(&y_rest, &v_rest, tau2);
            BaujatPoint {
                id: effects[i].id.clone(),
                name: effects[i].name.clone(),
                contribution: (yi[i] - summary).powi(2) / (vi[i] + tau2),
                influence: (summary - rest.mean).powi(2) / (rest.se * rest.se),
            }
        })
        .collect();

    let mean_contribution = points.iter().map(|p| p.contribution).sum::<f64>() / k as f64;
    let mean_influence = points.iter().map(|p| p.influence).sum::<f64>() / k as f64;
    Some(BaujatPlot {
        points,
        mean_contribution,
        mean_influence,
    })
}

// ── L'Abbé ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabbePoint {
    pub id: String,
    pub name: String,
    /// Control event rate (x axis).
    pub control_rate: f64,
    /// Experimental event rate (y axis).
    pub treatment_rate: f64,
    /// Total participants, for marker size.
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabbePlot {
    pub points: Vec<LabbePoint>,
    /// `(control_rate, treatment_rate)` samples of the pooled-effect curve.
    /// Empty unless the measure is OR or RR.
    pub expected: Vec<(f64, f64)>,
}

const LABBE_LINE_STEPS: usize = 20;

/// Treatment event rate implied by a ratio `effect` at control rate `cer`.
pub(crate) fn implied_treatment_rate(measure: EffectMeasure, effect: f64, cer: f64) -> Option<f64> {
    match measure {
        EffectMeasure::OddsRatio => Some(effect * cer / (1.0 - cer + effect * cer)),
        EffectMeasure::RiskRatio => Some((effect * cer).min(1.0)),
        _ => None,
    }
}

/// L'Abbé plot of binary studies with the line implied by the pooled effect.
/// `None` when no study carries usable binary data.
pub fn labbe_plot(studies: &[Study], result: &MetaAnalysisResult) -> Option<LabbePlot> {
    let points: Vec<LabbePoint> = studies
        .iter()
        .filter_map(|s| match s.data {
            StudyData::Binary {
                events1,
                total1,
                events2,
                total2,
            } if total1 > 0 && total2 > 0 => Some(LabbePoint {
                id: s.id.clone(),
                name: s.name.clone(),
                control_rate: f64::from(events2) / f64::from(total2),
                treatment_rate: f64::from(events1) / f64::from(total1),
                size: total1 + total2,
            }),
            _ => None,
        })
        .collect();
    if points.is_empty() {
        return None;
    }

    let expected = (0..=LABBE_LINE_STEPS)
        .filter_map(|i| {
            let cer = i as f64 / LABBE_LINE_STEPS as f64;
            implied_treatment_rate(result.measure, result.effect, cer).map(|eer| (cer, eer))
        })
        .collect();

    Some(LabbePlot { points, expected })
}
