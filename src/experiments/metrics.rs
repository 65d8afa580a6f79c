//! Campaign-level comparison of every treatment variant against the control.
//!
//! Pure over the variant snapshot handed in: no repository access, so the
//! same counts always produce the same report.

use serde::{Deserialize, Serialize};

use super::config::{ConfidenceThreshold, Variant};
use super::stats::{self, ConfidenceLevel, SignificanceResult, SufficiencyResult};
use crate::error::{ErrorPayload, VerdictError};

// ── Output structs ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    pub id: String,
    pub name: String,
    pub impressions: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub weight_percentage: u8,
}

impl VariantSummary {
    fn from_variant(variant: &Variant) -> Self {
        Self {
            id: variant.id.clone(),
            name: variant.name.clone(),
            impressions: variant.impressions,
            conversions: variant.conversions,
            conversion_rate: variant.conversion_rate(),
            weight_percentage: variant.weight_percentage,
        }
    }
}

/// One treatment measured against the control.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantComparison {
    pub variant: VariantSummary,
    /// `None` when the z-test could not run; see `unavailable`.
    pub significance: Option<SignificanceResult>,
    pub unavailable: Option<ErrorPayload>,
    pub sufficiency: SufficiencyResult,
    pub interpretation: String,
}

impl VariantComparison {
    pub fn reaches(&self, threshold: ConfidenceThreshold) -> bool {
        self.significance
            .as_ref()
            .is_some_and(|s| s.reaches(threshold))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignComparison {
    pub control: VariantSummary,
    pub comparisons: Vec<VariantComparison>,
    /// Observed impressions deviate from the configured weights (p < 0.01).
    pub sample_ratio_mismatch: bool,
}

impl CampaignComparison {
    pub fn for_variant(&self, variant_id: &str) -> Option<&VariantComparison> {
        self.comparisons.iter().find(|c| c.variant.id == variant_id)
    }
}

// ── Aggregation ─────────────────────────────────────────────────────

/// The flagged control, or the first variant listed when none is flagged.
pub fn control_index(variants: &[Variant]) -> usize {
    variants.iter().position(|v| v.is_control).unwrap_or(0)
}

pub fn compare_variants(variants: &[Variant]) -> Result<CampaignComparison, VerdictError> {
    if variants.len() < 2 {
        return Err(VerdictError::InsufficientVariants(variants.len()));
    }

    let control_idx = control_index(variants);
    let control = &variants[control_idx];

    let comparisons = variants
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != control_idx)
        .map(|(_, variant)| compare_pair(control, variant))
        .collect();

    let arms: Vec<(u64, u8)> = variants
        .iter()
        .map(|v| (v.impressions, v.weight_percentage))
        .collect();

    Ok(CampaignComparison {
        control: VariantSummary::from_variant(control),
        comparisons,
        sample_ratio_mismatch: stats::check_sample_ratio_mismatch(&arms),
    })
}

fn compare_pair(control: &Variant, variant: &Variant) -> VariantComparison {
    let sufficiency = stats::check_data_sufficiency(
        control.impressions,
        control.conversions,
        variant.impressions,
        variant.conversions,
    );

    let (significance, unavailable) = match stats::two_proportion_z_test(
        control.impressions,
        control.conversions,
        variant.impressions,
        variant.conversions,
    ) {
        Ok(result) => (Some(result), None),
        Err(err) => (None, Some(err.to_payload())),
    };

    let interpretation = match &significance {
        Some(result) => interpret(result, &control.name, &variant.name),
        None => format!(
            "Not enough data to compare {} against {} yet.",
            variant.name, control.name
        ),
    };

    VariantComparison {
        variant: VariantSummary::from_variant(variant),
        significance,
        unavailable,
        sufficiency,
        interpretation,
    }
}

/// Plain-language reading of a comparison for reporting surfaces.
pub fn interpret(result: &SignificanceResult, control_name: &str, variant_name: &str) -> String {
    let direction = if result.rate_b > result.rate_a {
        "outperforming"
    } else {
        "underperforming"
    };
    let magnitude = if result.rate_a > 0.0 {
        format!(" by {:.1}%", result.lift.abs())
    } else {
        String::new()
    };

    match result.confidence_level {
        ConfidenceLevel::NinetyNine | ConfidenceLevel::NinetyFive => format!(
            "{variant_name} is {direction} {control_name}{magnitude} with {} confidence.",
            result.confidence_level.label()
        ),
        ConfidenceLevel::Ninety => format!(
            "{variant_name} is trending toward {direction} {control_name}{magnitude} at 90% confidence, \
             not yet significant at 95%."
        ),
        ConfidenceLevel::NotSignificant => {
            if result.rate_a == result.rate_b {
                format!(
                    "No difference between {variant_name} and {control_name} so far. Keep collecting data."
                )
            } else {
                format!(
                    "No significant difference between {variant_name} and {control_name} yet \
                     ({:+.1}% observed lift). Keep collecting data.",
                    result.lift
                )
            }
        }
    }
}
