//! Winner declaration workflow: validating a declaration, latching the
//! winner, shifting traffic to it, and archiving the campaign.
//!
//! Every status change goes through [`CampaignStatus::transition`]; the winner
//! latch is only ever written through the repository's compare-and-set.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::clock::{Clock, SystemClock};
use super::config::{Campaign, CampaignStatus, Variant, WinnerSettings};
use super::metrics::{self, VariantComparison};
use super::notify::{EventType, Notification, NotificationSink, TracingSink};
use super::store::{CampaignRepository, VariantRepository, WinnerLatch};
use crate::error::{ErrorPayload, VerdictError};

/// Absolute floor below which no variant may take part in a declaration.
pub const MIN_IMPRESSIONS_FOR_DECLARATION: u64 = 30;

const MS_PER_DAY: f64 = 86_400_000.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeclareOptions {
    pub auto_detected: bool,
    pub auto_apply: bool,
    pub archive: bool,
    pub notify: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStep {
    Apply,
    Archive,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpFailure {
    pub step: FollowUpStep,
    pub error: ErrorPayload,
}

/// Summary handed back after a winner is latched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub campaign_id: String,
    pub variant_id: String,
    pub variant_name: String,
    pub declared_at: i64,
    pub declared_by: String,
    pub auto_detected: bool,
    pub applied: bool,
    pub archived: bool,
    pub notified: bool,
    /// Apply/archive steps that failed after the latch was set.
    pub follow_up_failures: Vec<FollowUpFailure>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub campaign_id: String,
    pub winner_variant_id: String,
    pub updated_variants: Vec<String>,
    pub status: CampaignStatus,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "reason")]
pub enum NotReadyReason {
    WinnerAlreadyDeclared,
    TooEarly {
        elapsed_days: f64,
        minimum_days: u32,
    },
    InsufficientConversions {
        variant_id: String,
        conversions: u64,
        minimum: u64,
    },
    NoSignificantVariant {
        threshold: u8,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum AutoDetectOutcome {
    Declared(Declaration),
    NotReady(NotReadyReason),
}

impl AutoDetectOutcome {
    pub fn is_declared(&self) -> bool {
        matches!(self, AutoDetectOutcome::Declared(_))
    }
}

/// Non-binding advice: the best observed variant, significant or not.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub campaign_id: String,
    pub variant_id: String,
    pub variant_name: String,
    pub conversion_rate: f64,
    pub is_control: bool,
    pub significant: bool,
    /// Stats versus the control; `None` when the control itself leads.
    pub comparison: Option<VariantComparison>,
}

pub struct WinnerService {
    campaigns: Arc<dyn CampaignRepository>,
    variants: Arc<dyn VariantRepository>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: WinnerSettings,
}

impl WinnerService {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        variants: Arc<dyn VariantRepository>,
        settings: WinnerSettings,
    ) -> Self {
        Self {
            campaigns,
            variants,
            sink: Arc::new(TracingSink),
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &WinnerSettings {
        &self.settings
    }

    // ── Validation ──────────────────────────────────────────────────

    pub fn check_minimum_data(&self, campaign_id: &str) -> Result<Vec<Variant>, VerdictError> {
        let variants = self.variants.list_variants(campaign_id)?;
        if variants.len() < 2 {
            return Err(VerdictError::InsufficientVariations {
                campaign_id: campaign_id.to_string(),
                count: variants.len(),
            });
        }
        if let Some(thin) = variants
            .iter()
            .find(|v| v.impressions < MIN_IMPRESSIONS_FOR_DECLARATION)
        {
            return Err(VerdictError::InsufficientData {
                variant_id: thin.id.clone(),
                variant_name: thin.name.clone(),
                impressions: thin.impressions,
                minimum: MIN_IMPRESSIONS_FOR_DECLARATION,
            });
        }
        Ok(variants)
    }

    pub fn validate_declaration(
        &self,
        campaign_id: &str,
        variant_id: &str,
    ) -> Result<(Campaign, Variant), VerdictError> {
        let campaign = self.campaigns.get_campaign(campaign_id)?;
        let variant = self.variants.get_variant(variant_id)?;
        if variant.campaign_id != campaign.id {
            return Err(VerdictError::VariationMismatch {
                variant_id: variant.id,
                campaign_id: campaign.id,
            });
        }
        if campaign.has_winner() {
            return Err(VerdictError::WinnerExists(campaign.id));
        }
        self.check_minimum_data(campaign_id)?;
        Ok((campaign, variant))
    }

    // ── Declaration ─────────────────────────────────────────────────

    pub fn declare(
        &self,
        campaign_id: &str,
        variant_id: &str,
        actor: &str,
        options: DeclareOptions,
    ) -> Result<Declaration, VerdictError> {
        let (_, variant) = self.validate_declaration(campaign_id, variant_id)?;

        let declared_at = self.clock.now_ms();
        // Validation above is advisory; this compare-and-set is what guards the latch.
        self.campaigns.set_winner_if_unset(
            campaign_id,
            WinnerLatch {
                variant_id: variant.id.clone(),
                declared_by: actor.to_string(),
                declared_at,
                auto_detected: options.auto_detected,
            },
        )?;

        tracing::info!(
            campaign_id,
            variant_id = %variant.id,
            actor,
            auto_detected = options.auto_detected,
            "winner declared"
        );

        let mut declaration = Declaration {
            campaign_id: campaign_id.to_string(),
            variant_id: variant.id.clone(),
            variant_name: variant.name.clone(),
            declared_at,
            declared_by: actor.to_string(),
            auto_detected: options.auto_detected,
            applied: false,
            archived: false,
            notified: false,
            follow_up_failures: Vec::new(),
        };

        if options.auto_apply {
            match self.apply(campaign_id) {
                Ok(_) => declaration.applied = true,
                Err(err) => {
                    tracing::error!(campaign_id, "failed to apply declared winner: {}", err);
                    declaration.follow_up_failures.push(FollowUpFailure {
                        step: FollowUpStep::Apply,
                        error: err.to_payload(),
                    });
                }
            }
        }

        if options.archive {
            match self.archive_campaign(campaign_id, actor) {
                Ok(_) => declaration.archived = true,
                Err(err) => {
                    tracing::error!(campaign_id, "failed to archive campaign: {}", err);
                    declaration.follow_up_failures.push(FollowUpFailure {
                        step: FollowUpStep::Archive,
                        error: err.to_payload(),
                    });
                }
            }
        }

        if options.notify {
            let event_type = if options.auto_detected {
                EventType::WinnerAutoDetected
            } else {
                EventType::WinnerDeclared
            };
            declaration.notified = self.notify(
                event_type,
                campaign_id,
                json!({
                    "variantId": declaration.variant_id,
                    "variantName": declaration.variant_name,
                    "declaredBy": declaration.declared_by,
                    "autoDetected": declaration.auto_detected,
                    "applied": declaration.applied,
                    "archived": declaration.archived,
                }),
            );
        }

        Ok(declaration)
    }

    /// Routes all traffic to the winner and completes the campaign.
    ///
    /// Variant updates are not rolled back when one fails; the error lists
    /// which variants did and did not change.
    pub fn apply(&self, campaign_id: &str) -> Result<ApplyOutcome, VerdictError> {
        let campaign = self.campaigns.get_campaign(campaign_id)?;
        let winner_id = campaign
            .winner_variant_id
            .clone()
            .ok_or_else(|| VerdictError::NoWinner(campaign_id.to_string()))?;
        // Fail before touching weights; the stored status is checked again on commit.
        campaign.status.transition(CampaignStatus::Completed)?;

        let variants = self.variants.list_variants(campaign_id)?;
        let mut updated = Vec::new();
        let mut failed = Vec::new();
        for variant in &variants {
            let weight = if variant.id == winner_id { 100 } else { 0 };
            match self.variants.set_weight(&variant.id, weight) {
                Ok(_) => updated.push(variant.id.clone()),
                Err(err) => {
                    tracing::warn!(
                        campaign_id,
                        variant_id = %variant.id,
                        "failed to update variant weight: {}",
                        err
                    );
                    failed.push(variant.id.clone());
                }
            }
        }

        if !failed.is_empty() {
            return Err(VerdictError::UpdateFailed {
                campaign_id: campaign_id.to_string(),
                failed,
                updated,
            });
        }

        let saved = self.move_to(campaign_id, CampaignStatus::Completed, |_| Ok(()))?;

        tracing::info!(campaign_id, winner = %winner_id, "winner applied to 100% of traffic");

        Ok(ApplyOutcome {
            campaign_id: campaign_id.to_string(),
            winner_variant_id: winner_id,
            updated_variants: updated,
            status: saved.status,
        })
    }

    /// Zeroes every non-winning variant's weight. Status and the winner's own
    /// weight are left as they are.
    pub fn archive_losers(&self, campaign_id: &str) -> Result<Vec<String>, VerdictError> {
        let campaign = self.campaigns.get_campaign(campaign_id)?;
        let winner_id = campaign
            .winner_variant_id
            .ok_or_else(|| VerdictError::NoWinner(campaign_id.to_string()))?;

        let mut updated = Vec::new();
        let mut failed = Vec::new();
        for variant in self.variants.list_variants(campaign_id)? {
            if variant.id == winner_id {
                continue;
            }
            match self.variants.set_weight(&variant.id, 0) {
                Ok(_) => updated.push(variant.id),
                Err(err) => {
                    tracing::warn!(campaign_id, variant_id = %variant.id, "failed to zero variant weight: {}", err);
                    failed.push(variant.id);
                }
            }
        }

        if !failed.is_empty() {
            return Err(VerdictError::UpdateFailed {
                campaign_id: campaign_id.to_string(),
                failed,
                updated,
            });
        }
        tracing::info!(campaign_id, losers = updated.len(), "losing variants archived");
        Ok(updated)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Every status change funnels through here. `edit` runs against the
    /// stored campaign under the repository's lock and may reject the move.
    fn move_to(
        &self,
        campaign_id: &str,
        next: CampaignStatus,
        mut edit: impl FnMut(&mut Campaign) -> Result<(), VerdictError>,
    ) -> Result<Campaign, VerdictError> {
        let (from, saved) = self
            .campaigns
            .transition_campaign(campaign_id, next, &mut edit)?;
        if from != next {
            tracing::info!(campaign_id, "campaign status {} -> {}", from, next);
        }
        Ok(saved)
    }

    /// Launches a draft. Archived campaigns come back through `restore_campaign`.
    pub fn start(&self, campaign_id: &str) -> Result<Campaign, VerdictError> {
        let now = self.clock.now_ms();
        self.move_to(campaign_id, CampaignStatus::Active, |c| {
            require_origin(
                c,
                &[CampaignStatus::Draft, CampaignStatus::Active],
                CampaignStatus::Active,
            )?;
            if c.start_date.is_none() {
                c.start_date = Some(now);
            }
            Ok(())
        })
    }

    pub fn pause(&self, campaign_id: &str) -> Result<Campaign, VerdictError> {
        self.move_to(campaign_id, CampaignStatus::Paused, |_| Ok(()))
    }

    pub fn resume(&self, campaign_id: &str) -> Result<Campaign, VerdictError> {
        self.move_to(campaign_id, CampaignStatus::Active, |c| {
            require_origin(c, &[CampaignStatus::Paused], CampaignStatus::Active)
        })
    }

    pub fn complete(&self, campaign_id: &str) -> Result<Campaign, VerdictError> {
        self.move_to(campaign_id, CampaignStatus::Completed, |_| Ok(()))
    }

    pub fn archive_campaign(&self, campaign_id: &str, actor: &str) -> Result<Campaign, VerdictError> {
        let now = self.clock.now_ms();
        self.move_to(campaign_id, CampaignStatus::Archived, |c| {
            if c.archived_at.is_none() {
                c.archived_at = Some(now);
                c.archived_by = Some(actor.to_string());
            }
            Ok(())
        })
    }

    pub fn restore_campaign(&self, campaign_id: &str) -> Result<Campaign, VerdictError> {
        self.move_to(campaign_id, CampaignStatus::Active, |c| {
            require_origin(c, &[CampaignStatus::Archived], CampaignStatus::Active)?;
            c.archived_at = None;
            c.archived_by = None;
            Ok(())
        })
    }

    // ── Auto-detection ──────────────────────────────────────────────

    /// Declares a winner once the campaign has run long enough, every variant
    /// has enough conversions, and some variant clears the configured
    /// confidence. Among those, the highest conversion rate wins.
    pub fn auto_detect_winner(&self, campaign_id: &str) -> Result<AutoDetectOutcome, VerdictError> {
        let campaign = self.campaigns.get_campaign(campaign_id)?;
        if campaign.has_winner() {
            return Ok(self.not_ready(campaign_id, NotReadyReason::WinnerAlreadyDeclared));
        }

        let elapsed_days = self
            .clock
            .now_ms()
            .saturating_sub(campaign.running_since())
            .max(0) as f64
            / MS_PER_DAY;
        if elapsed_days < self.settings.min_running_days as f64 {
            return Ok(self.not_ready(
                campaign_id,
                NotReadyReason::TooEarly {
                    elapsed_days,
                    minimum_days: self.settings.min_running_days,
                },
            ));
        }

        let variants = self.variants.list_variants(campaign_id)?;
        if let Some(short) = variants
            .iter()
            .find(|v| v.conversions < self.settings.min_conversions)
        {
            return Ok(self.not_ready(
                campaign_id,
                NotReadyReason::InsufficientConversions {
                    variant_id: short.id.clone(),
                    conversions: short.conversions,
                    minimum: self.settings.min_conversions,
                },
            ));
        }

        let report = metrics::compare_variants(&variants)?;
        let threshold = self.settings.confidence_threshold;
        let control = &variants[metrics::control_index(&variants)];

        let mut best: Option<&Variant> = None;
        for comparison in report.comparisons.iter().filter(|c| c.reaches(threshold)) {
            let Some(treatment) = variants.iter().find(|v| v.id == comparison.variant.id) else {
                continue;
            };
            let better = if treatment.conversion_rate() > control.conversion_rate() {
                treatment
            } else {
                control
            };
            if best.map_or(true, |b| better.conversion_rate() > b.conversion_rate()) {
                best = Some(better);
            }
        }

        let Some(winner) = best else {
            return Ok(self.not_ready(
                campaign_id,
                NotReadyReason::NoSignificantVariant {
                    threshold: threshold.percent(),
                },
            ));
        };

        let declaration = self.declare(
            campaign_id,
            &winner.id,
            "auto-detect",
            DeclareOptions {
                auto_detected: true,
                auto_apply: self.settings.auto_apply,
                archive: self.settings.auto_archive,
                notify: true,
            },
        )?;
        Ok(AutoDetectOutcome::Declared(declaration))
    }

    fn not_ready(&self, campaign_id: &str, reason: NotReadyReason) -> AutoDetectOutcome {
        tracing::debug!(campaign_id, ?reason, "auto-detect not ready");
        AutoDetectOutcome::NotReady(reason)
    }

    // ── Advisory ────────────────────────────────────────────────────

    pub fn get_recommendation(&self, campaign_id: &str) -> Result<Recommendation, VerdictError> {
        let variants = self.variants.list_variants(campaign_id)?;
        if variants.len() < 2 {
            return Err(VerdictError::InsufficientVariations {
                campaign_id: campaign_id.to_string(),
                count: variants.len(),
            });
        }

        let mut best: Option<&Variant> = None;
        for variant in variants.iter().filter(|v| v.impressions > 0) {
            if best.map_or(true, |b| variant.conversion_rate() > b.conversion_rate()) {
                best = Some(variant);
            }
        }
        let best = best.ok_or_else(|| VerdictError::NoImpressions(campaign_id.to_string()))?;

        let control_id = &variants[metrics::control_index(&variants)].id;
        let is_control = &best.id == control_id;
        let comparison = if is_control {
            None
        } else {
            metrics::compare_variants(&variants)?
                .for_variant(&best.id)
                .cloned()
        };
        let significant = comparison
            .as_ref()
            .and_then(|c| c.significance.as_ref())
            .is_some_and(|s| s.is_significant);

        Ok(Recommendation {
            campaign_id: campaign_id.to_string(),
            variant_id: best.id.clone(),
            variant_name: best.name.clone(),
            conversion_rate: best.conversion_rate(),
            is_control,
            significant,
            comparison,
        })
    }

    fn notify(&self, event_type: EventType, campaign_id: &str, payload: serde_json::Value) -> bool {
        let notification = Notification::new(event_type, campaign_id, self.clock.now_ms(), payload);
        match self.sink.emit(&notification) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(
                    campaign_id,
                    event_type = event_type.as_str(),
                    "notification failed: {}",
                    err
                );
                false
            }
        }
    }
}

/// Narrows a move the transition table allows to the origins one operation accepts.
fn require_origin(
    campaign: &Campaign,
    allowed: &[CampaignStatus],
    next: CampaignStatus,
) -> Result<(), VerdictError> {
    if allowed.contains(&campaign.status) {
        Ok(())
    } else {
        Err(VerdictError::InvalidTransition {
            from: campaign.status.to_string(),
            to: next.to_string(),
        })
    }
}
