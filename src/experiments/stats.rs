use serde::{Deserialize, Serialize};

use super::config::ConfidenceThreshold;
use crate::error::VerdictError;

pub const Z_90: f64 = 1.645;
pub const Z_95: f64 = 1.96;
pub const Z_99: f64 = 2.576;

pub const DEFAULT_BASELINE_RATE: f64 = 0.05;
pub const DEFAULT_MINIMUM_DETECTABLE_EFFECT: f64 = 0.20;

pub const MIN_IMPRESSIONS_PER_VARIANT: u64 = 100;
pub const MIN_CONVERSIONS_PER_VARIANT: u64 = 10;

// ── Result Structs ──────────────────────────────────────────────────

/// Which side of a pairwise comparison won. `A` is the control.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    A,
    B,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfidenceLevel {
    #[serde(rename = "99%")]
    NinetyNine,
    #[serde(rename = "95%")]
    NinetyFive,
    #[serde(rename = "90%")]
    Ninety,
    #[serde(rename = "Not significant")]
    NotSignificant,
}

impl ConfidenceLevel {
    pub fn label(&self) -> &'static str {
        match self {
            ConfidenceLevel::NinetyNine => "99%",
            ConfidenceLevel::NinetyFive => "95%",
            ConfidenceLevel::Ninety => "90%",
            ConfidenceLevel::NotSignificant => "Not significant",
        }
    }
}

/// Wald interval around a conversion rate, in percent.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SampleSizeRecommendation {
    pub baseline_rate: f64,
    pub minimum_detectable_effect: f64,
    pub per_variant: u64,
    pub additional_a: u64,
    pub additional_b: u64,
}

impl SampleSizeRecommendation {
    pub fn additional_total(&self) -> u64 {
        self.additional_a.saturating_add(self.additional_b)
    }
}

/// Outcome of the two-proportion z-test between a control (`a`) and a
/// treatment (`b`). Rates are fractions; lift and intervals are percentages.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SignificanceResult {
    pub rate_a: f64,
    pub rate_b: f64,
    pub z_score: f64,
    pub p_value: f64,
    pub confidence_90: bool,
    pub confidence_95: bool,
    pub confidence_99: bool,
    pub is_significant: bool,
    pub lift: f64,
    pub interval_a: ConfidenceInterval,
    pub interval_b: ConfidenceInterval,
    pub winner: Option<Side>,
    pub sample_size: SampleSizeRecommendation,
    pub confidence_level: ConfidenceLevel,
}

impl SignificanceResult {
    pub fn reaches(&self, threshold: ConfidenceThreshold) -> bool {
        match threshold {
            ConfidenceThreshold::NinetyNine => self.confidence_99,
            ConfidenceThreshold::NinetyFive => self.confidence_95,
            ConfidenceThreshold::Ninety => self.confidence_90,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SufficiencyProgress {
    pub impressions: u8,
    pub conversions: u8,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SufficiencyResult {
    pub sufficient: bool,
    pub warnings: Vec<String>,
    pub progress: SufficiencyProgress,
}

// ── Normal CDF (A&S 26.2.17 with Horner's method) ───────────────────

/// Computes P(Z > z) for the standard normal distribution.
/// Uses Abramowitz & Stegun 26.2.17 rational approximation with Horner's method.
/// Caller must pass z >= 0 (use z.abs() before calling).
pub fn normal_sf(z: f64) -> f64 {
    debug_assert!(z >= 0.0, "normal_sf requires z >= 0, got {}", z);

    let t = 1.0 / (1.0 + 0.2316419 * z);
    let d = 0.3989423 * (-z * z / 2.0).exp();

    let poly = t
        * (0.3193815 + t * (-0.3565638 + t * (1.781478 + t * (-1.821256 + t * 1.330274))));

    d * poly
}

/// Standard normal CDF. Negative inputs mirror through `1 - Φ(-x)`.
pub fn normal_cdf(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 - normal_sf(x)
    } else {
        1.0 - normal_cdf(-x)
    }
}

// ── Two-Proportion Z-Test ───────────────────────────────────────────

/// Pooled two-proportion z-test of treatment `b` against control `a`.
///
/// Conversions above impressions are clamped to the impression count so a
/// transiently inconsistent snapshot still yields rates in `[0, 1]`.
pub fn two_proportion_z_test(
    impressions_a: u64,
    conversions_a: u64,
    impressions_b: u64,
    conversions_b: u64,
) -> Result<SignificanceResult, VerdictError> {
    if impressions_a == 0 || impressions_b == 0 {
        return Err(VerdictError::InvalidImpressions {
            impressions_a,
            impressions_b,
        });
    }

    let conversions_a = clamp_conversions(impressions_a, conversions_a);
    let conversions_b = clamp_conversions(impressions_b, conversions_b);

    let n_a = impressions_a as f64;
    let n_b = impressions_b as f64;
    let rate_a = conversions_a as f64 / n_a;
    let rate_b = conversions_b as f64 / n_b;

    let pooled = (conversions_a + conversions_b) as f64 / (n_a + n_b);
    let se = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();

    if se == 0.0 || !se.is_finite() {
        return Err(VerdictError::ZeroStandardError);
    }

    let z = (rate_b - rate_a) / se;
    let p_value = (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0);

    let confidence_90 = z.abs() >= Z_90;
    let confidence_95 = z.abs() >= Z_95;
    let confidence_99 = z.abs() >= Z_99;

    let lift = if rate_a > 0.0 {
        (rate_b - rate_a) / rate_a * 100.0
    } else {
        0.0
    };

    let winner = if !confidence_95 {
        None
    } else if rate_b > rate_a {
        Some(Side::B)
    } else if rate_a > rate_b {
        Some(Side::A)
    } else {
        None
    };

    let confidence_level = if confidence_99 {
        ConfidenceLevel::NinetyNine
    } else if confidence_95 {
        ConfidenceLevel::NinetyFive
    } else if confidence_90 {
        ConfidenceLevel::Ninety
    } else {
        ConfidenceLevel::NotSignificant
    };

    Ok(SignificanceResult {
        rate_a,
        rate_b,
        z_score: z,
        p_value,
        confidence_90,
        confidence_95,
        confidence_99,
        is_significant: confidence_95,
        lift,
        interval_a: wald_interval(rate_a, impressions_a),
        interval_b: wald_interval(rate_b, impressions_b),
        winner,
        sample_size: recommend_sample_size(rate_a, rate_b, impressions_a, impressions_b),
        confidence_level,
    })
}

fn clamp_conversions(impressions: u64, conversions: u64) -> u64 {
    if conversions > impressions {
        tracing::warn!(
            impressions,
            conversions,
            "conversions exceed impressions; clamping to impression count"
        );
        impressions
    } else {
        conversions
    }
}

/// 95% Wald interval, expressed in percent and clamped to `[0, 100]`.
fn wald_interval(rate: f64, impressions: u64) -> ConfidenceInterval {
    let margin = Z_95 * (rate * (1.0 - rate) / impressions as f64).sqrt();
    ConfidenceInterval {
        lower: ((rate - margin) * 100.0).clamp(0.0, 100.0),
        upper: ((rate + margin) * 100.0).clamp(0.0, 100.0),
    }
}

// ── Sample Size Recommender ─────────────────────────────────────────

/// Per-variant sample needed to detect a 20% relative change at the
/// observed baseline, plus how many more impressions each side still needs.
pub fn recommend_sample_size(
    rate_a: f64,
    rate_b: f64,
    impressions_a: u64,
    impressions_b: u64,
) -> SampleSizeRecommendation {
    let observed = rate_a.max(rate_b);
    let baseline = if observed > 0.0 {
        observed
    } else {
        DEFAULT_BASELINE_RATE
    };
    let per_variant = required_sample_size(baseline, DEFAULT_MINIMUM_DETECTABLE_EFFECT);

    SampleSizeRecommendation {
        baseline_rate: baseline,
        minimum_detectable_effect: DEFAULT_MINIMUM_DETECTABLE_EFFECT,
        per_variant,
        additional_a: per_variant.saturating_sub(impressions_a),
        additional_b: per_variant.saturating_sub(impressions_b),
    }
}

/// Lehr's rule of thumb: `n = 16·p(1-p) / (mde·p)²` per variant.
pub fn required_sample_size(baseline_rate: f64, relative_mde: f64) -> u64 {
    let delta = relative_mde * baseline_rate;
    if delta <= 0.0 || !delta.is_finite() {
        return u64::MAX;
    }
    let n = 16.0 * baseline_rate * (1.0 - baseline_rate) / delta.powi(2);
    n.max(0.0).ceil() as u64
}

// ── Data Sufficiency ────────────────────────────────────────────────

/// Flags a comparison whose weaker side is below either threshold. Progress
/// tracks the weaker side, since both need to get there.
pub fn check_data_sufficiency(
    impressions_a: u64,
    conversions_a: u64,
    impressions_b: u64,
    conversions_b: u64,
) -> SufficiencyResult {
    let impressions = impressions_a.min(impressions_b);
    let conversions = conversions_a.min(conversions_b);

    let mut warnings = Vec::new();
    if impressions < MIN_IMPRESSIONS_PER_VARIANT {
        warnings.push(format!(
            "Each variation needs at least {} impressions (lowest has {})",
            MIN_IMPRESSIONS_PER_VARIANT, impressions
        ));
    }
    if conversions < MIN_CONVERSIONS_PER_VARIANT {
        warnings.push(format!(
            "Each variation needs at least {} conversions (lowest has {})",
            MIN_CONVERSIONS_PER_VARIANT, conversions
        ));
    }

    SufficiencyResult {
        sufficient: warnings.is_empty(),
        warnings,
        progress: SufficiencyProgress {
            impressions: progress_percent(impressions, MIN_IMPRESSIONS_PER_VARIANT),
            conversions: progress_percent(conversions, MIN_CONVERSIONS_PER_VARIANT),
        },
    }
}

fn progress_percent(actual: u64, threshold: u64) -> u8 {
    if threshold == 0 {
        return 100;
    }
    let pct = (actual as f64 / threshold as f64 * 100.0).round();
    pct.min(100.0) as u8
}

// ── SRM Detection ───────────────────────────────────────────────────

/// Chi-squared critical values at p = 0.01 for 1..=10 degrees of freedom.
const CHI2_CRITICAL_P01: [f64; 10] = [
    6.635, 9.210, 11.345, 13.277, 15.086, 16.812, 18.475, 20.090, 21.666, 23.209,
];

/// Chi-squared test for sample ratio mismatch across any number of arms.
/// Each arm is `(observed_impressions, weight_percentage)`; arms with zero
/// weight are left out. Returns true when chi2 exceeds the p = 0.01 threshold.
pub fn check_sample_ratio_mismatch(arms: &[(u64, u8)]) -> bool {
    let weighted: Vec<(u64, f64)> = arms
        .iter()
        .filter(|(_, weight)| *weight > 0)
        .map(|&(n, weight)| (n, weight as f64))
        .collect();

    if weighted.len() < 2 {
        return false;
    }

    let total: u64 = weighted.iter().map(|(n, _)| n).sum();
    let total_weight: f64 = weighted.iter().map(|(_, w)| w).sum();
    if total == 0 || total_weight == 0.0 {
        return false;
    }

    let chi2: f64 = weighted
        .iter()
        .map(|&(observed, weight)| {
            let expected = total as f64 * weight / total_weight;
            (observed as f64 - expected).powi(2) / expected
        })
        .sum();

    let df = weighted.len() - 1;
    let critical = CHI2_CRITICAL_P01
        .get(df - 1)
        .copied()
        .unwrap_or(CHI2_CRITICAL_P01[CHI2_CRITICAL_P01.len() - 1]);

    chi2 > critical
}
