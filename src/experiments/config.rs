use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VerdictError;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub status: CampaignStatus,
    #[serde(default)]
    pub winner_variant_id: Option<String>,
    #[serde(default)]
    pub winner_declared_at: Option<i64>,
    #[serde(default)]
    pub winner_declared_by: Option<String>,
    #[serde(default)]
    pub winner_auto_detected: bool,
    #[serde(default)]
    pub archived_at: Option<i64>,
    #[serde(default)]
    pub archived_by: Option<String>,
    #[serde(default)]
    pub start_date: Option<i64>,
    pub created_at: i64,
}

impl Campaign {
    pub fn has_winner(&self) -> bool {
        self.winner_variant_id.is_some()
    }

    /// Millisecond timestamp the running-time clock starts from.
    pub fn running_since(&self) -> i64 {
        self.start_date.unwrap_or(self.created_at)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub campaign_id: String,
    pub name: String,
    #[serde(default)]
    pub is_control: bool,
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub conversions: u64,
    pub weight_percentage: u8,
}

impl Variant {
    /// Observed conversion rate as a fraction. Zero when nothing was shown yet.
    pub fn conversion_rate(&self) -> f64 {
        if self.impressions == 0 {
            return 0.0;
        }
        self.conversions.min(self.impressions) as f64 / self.impressions as f64
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Archived => "archived",
        }
    }

    /// Single source of truth for lifecycle moves. Staying put is always allowed.
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Draft, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Completed)
                | (Paused, Completed)
                | (Active, Archived)
                | (Paused, Archived)
                | (Completed, Archived)
                | (Archived, Active)
        )
    }

    pub fn transition(self, next: CampaignStatus) -> Result<CampaignStatus, VerdictError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(VerdictError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = VerdictError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "draft" => Ok(CampaignStatus::Draft),
            "active" => Ok(CampaignStatus::Active),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "archived" => Ok(CampaignStatus::Archived),
            _ => Err(VerdictError::InvalidConfig(format!(
                "invalid campaign status: {value}"
            ))),
        }
    }
}

/// Confidence level a variant must reach before auto-detection declares it.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConfidenceThreshold {
    #[serde(rename = "90")]
    Ninety,
    #[default]
    #[serde(rename = "95")]
    NinetyFive,
    #[serde(rename = "99")]
    NinetyNine,
}

impl ConfidenceThreshold {
    pub fn percent(&self) -> u8 {
        match self {
            ConfidenceThreshold::Ninety => 90,
            ConfidenceThreshold::NinetyFive => 95,
            ConfidenceThreshold::NinetyNine => 99,
        }
    }
}

impl fmt::Display for ConfidenceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

impl FromStr for ConfidenceThreshold {
    type Err = VerdictError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().trim_end_matches('%') {
            "90" => Ok(ConfidenceThreshold::Ninety),
            "95" => Ok(ConfidenceThreshold::NinetyFive),
            "99" => Ok(ConfidenceThreshold::NinetyNine),
            _ => Err(VerdictError::InvalidConfig(format!(
                "confidence threshold must be 90, 95 or 99, got '{value}'"
            ))),
        }
    }
}

fn default_min_conversions() -> u64 {
    100
}

fn default_min_running_days() -> u32 {
    7
}

/// Settings consumed by winner auto-detection. Every field falls back to its
/// default when absent from the serialized form.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WinnerSettings {
    #[serde(default = "default_min_conversions")]
    pub min_conversions: u64,
    #[serde(default = "default_min_running_days")]
    pub min_running_days: u32,
    #[serde(default)]
    pub confidence_threshold: ConfidenceThreshold,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default)]
    pub auto_archive: bool,
}

impl Default for WinnerSettings {
    fn default() -> Self {
        Self {
            min_conversions: default_min_conversions(),
            min_running_days: default_min_running_days(),
            confidence_threshold: ConfidenceThreshold::default(),
            auto_apply: false,
            auto_archive: false,
        }
    }
}

impl WinnerSettings {
    pub fn validate(&self) -> Result<(), VerdictError> {
        if self.min_conversions == 0 {
            return Err(VerdictError::InvalidConfig(
                "minConversions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
