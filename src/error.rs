use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VerdictError {
    #[error("Impressions must be positive for both variants (got {impressions_a} and {impressions_b})")]
    InvalidImpressions {
        impressions_a: u64,
        impressions_b: u64,
    },

    #[error("Standard error is zero; both variants have identical zero variance")]
    ZeroStandardError,

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Variation not found: {0}")]
    VariationNotFound(String),

    #[error("Variation {variant_id} does not belong to campaign {campaign_id}")]
    VariationMismatch {
        variant_id: String,
        campaign_id: String,
    },

    #[error("Campaign {0} already has a declared winner")]
    WinnerExists(String),

    #[error("At least 2 variants are required for comparison, got {0}")]
    InsufficientVariants(usize),

    #[error("Campaign {campaign_id} needs at least 2 variations, has {count}")]
    InsufficientVariations { campaign_id: String, count: usize },

    #[error("Variation {variant_name} has {impressions} impressions, at least {minimum} required")]
    InsufficientData {
        variant_id: String,
        variant_name: String,
        impressions: u64,
        minimum: u64,
    },

    #[error("Campaign {0} has no declared winner")]
    NoWinner(String),

    #[error("Failed to update {} of the variations of campaign {campaign_id}: {}", .failed.len(), .failed.join(", "))]
    UpdateFailed {
        campaign_id: String,
        failed: Vec<String>,
        updated: Vec<String>,
    },

    #[error("Campaign {0} has no impressions recorded yet")]
    NoImpressions(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VerdictError {
    /// Stable machine-readable tag for the error.
    pub fn code(&self) -> &'static str {
        match self {
            VerdictError::InvalidImpressions { .. } => "invalid_impressions",
            VerdictError::ZeroStandardError => "zero_standard_error",
            VerdictError::CampaignNotFound(_) => "campaign_not_found",
            VerdictError::VariationNotFound(_) => "variation_not_found",
            VerdictError::VariationMismatch { .. } => "variation_mismatch",
            VerdictError::WinnerExists(_) => "winner_exists",
            VerdictError::InsufficientVariants(_) => "insufficient_variants",
            VerdictError::InsufficientVariations { .. } => "insufficient_variations",
            VerdictError::InsufficientData { .. } => "insufficient_data",
            VerdictError::NoWinner(_) => "no_winner",
            VerdictError::UpdateFailed { .. } => "update_failed",
            VerdictError::NoImpressions(_) => "no_impressions",
            VerdictError::InvalidTransition { .. } => "invalid_transition",
            VerdictError::InvalidConfig(_) => "invalid_config",
            VerdictError::Io(_) => "io_error",
            VerdictError::Json(_) => "json_error",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serializable `{code, message}` view of an error for reporting surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
