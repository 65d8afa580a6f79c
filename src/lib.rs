//! Statistical inference and winner declaration for content experiments.
//!
//! The pure calculators live in [`experiments::stats`] and
//! [`experiments::metrics`]; the stateful conclusion workflow is
//! [`experiments::winner::WinnerService`], which talks to storage only
//! through the repository traits in [`experiments::store`].

pub mod error;
pub mod experiments;

pub use error::{ErrorPayload, VerdictError};
pub use experiments::config::{
    Campaign, CampaignStatus, ConfidenceThreshold, Variant, WinnerSettings,
};
pub use experiments::metrics::{compare_variants, CampaignComparison, VariantComparison};
pub use experiments::stats::{
    check_data_sufficiency, recommend_sample_size, two_proportion_z_test, SignificanceResult,
    SufficiencyResult,
};
pub use experiments::store::{CampaignDocument, CampaignRepository, CampaignStore, VariantRepository};
pub use experiments::winner::{AutoDetectOutcome, Declaration, DeclareOptions, WinnerService};
