use std::collections::HashSet;
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::config::{Campaign, CampaignStatus, Variant};
use crate::error::VerdictError;

// ── Repository seams ────────────────────────────────────────────────

/// Winner fields written together by [`CampaignRepository::set_winner_if_unset`].
#[derive(Clone, Debug, PartialEq)]
pub struct WinnerLatch {
    pub variant_id: String,
    pub declared_by: String,
    pub declared_at: i64,
    pub auto_detected: bool,
}

pub trait CampaignRepository: Send + Sync {
    fn get_campaign(&self, id: &str) -> Result<Campaign, VerdictError>;

    /// Moves the stored campaign to `next` and applies `edit`, checking the
    /// transition against the stored status in the same atomic step. `edit`
    /// sees the stored status and may veto the move with an error. Returns
    /// the status it moved from. Winner fields are owned by
    /// `set_winner_if_unset`; edits to them are discarded.
    fn transition_campaign(
        &self,
        campaign_id: &str,
        next: CampaignStatus,
        edit: &mut dyn FnMut(&mut Campaign) -> Result<(), VerdictError>,
    ) -> Result<(CampaignStatus, Campaign), VerdictError>;

    /// Compare-and-set on `winner_variant_id IS NULL`. The check and the
    /// write must be one atomic step; a latched campaign yields `WinnerExists`.
    fn set_winner_if_unset(
        &self,
        campaign_id: &str,
        latch: WinnerLatch,
    ) -> Result<Campaign, VerdictError>;
}

pub trait VariantRepository: Send + Sync {
    fn get_variant(&self, id: &str) -> Result<Variant, VerdictError>;

    fn list_variants(&self, campaign_id: &str) -> Result<Vec<Variant>, VerdictError>;

    /// All-or-nothing update of a single variant's traffic share.
    fn set_weight(&self, variant_id: &str, weight_percentage: u8)
        -> Result<Variant, VerdictError>;
}

// ── Stored document ─────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDocument {
    pub campaign: Campaign,
    pub variants: Vec<Variant>,
}

/// Campaign ids double as file names, so only `[A-Za-z0-9_-]` is allowed.
fn is_valid_campaign_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl CampaignDocument {
    pub fn validate(&self) -> Result<(), VerdictError> {
        if !is_valid_campaign_id(&self.campaign.id) {
            return Err(VerdictError::InvalidConfig(format!(
                "campaign id '{}' must be non-empty and contain only letters, digits, '_' or '-'",
                self.campaign.id
            )));
        }
        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.campaign_id != self.campaign.id {
                return Err(VerdictError::InvalidConfig(format!(
                    "variant '{}' belongs to campaign '{}', not '{}'",
                    variant.id, variant.campaign_id, self.campaign.id
                )));
            }
            if !seen.insert(variant.id.as_str()) {
                return Err(VerdictError::InvalidConfig(format!(
                    "duplicate variant id '{}'",
                    variant.id
                )));
            }
            if variant.weight_percentage > 100 {
                return Err(VerdictError::InvalidConfig(format!(
                    "variant '{}' weightPercentage must be within 0..=100",
                    variant.id
                )));
            }
        }
        if let Some(winner) = &self.campaign.winner_variant_id {
            if !seen.contains(winner.as_str()) {
                return Err(VerdictError::InvalidConfig(format!(
                    "winner '{}' is not a variant of campaign '{}'",
                    winner, self.campaign.id
                )));
            }
        }
        Ok(())
    }
}

// ── File-backed store ───────────────────────────────────────────────

pub struct CampaignStore {
    documents: DashMap<String, CampaignDocument>,
    /// variant id → campaign id
    variant_index: DashMap<String, String>,
    dir: Option<PathBuf>,
}

impl CampaignStore {
    /// Opens (or creates) `{data_dir}/.campaigns` and loads every document in it.
    pub fn new(data_dir: &Path) -> Result<Self, VerdictError> {
        let dir = data_dir.join(".campaigns");
        std::fs::create_dir_all(&dir)?;
        let store = Self {
            documents: DashMap::new(),
            variant_index: DashMap::new(),
            dir: Some(dir),
        };
        store.load_all()?;
        Ok(store)
    }

    /// Store without a backing directory.
    pub fn ephemeral() -> Self {
        Self {
            documents: DashMap::new(),
            variant_index: DashMap::new(),
            dir: None,
        }
    }

    fn load_all(&self) -> Result<(), VerdictError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let data = std::fs::read_to_string(&path)?;
                let document: CampaignDocument = serde_json::from_str(&data)?;
                document.validate()?;
                self.ensure_unclaimed(&document)?;
                if self.documents.contains_key(&document.campaign.id) {
                    return Err(VerdictError::InvalidConfig(format!(
                        "campaign '{}' is stored twice ({})",
                        document.campaign.id,
                        path.display()
                    )));
                }
                self.index(&document);
                self.documents
                    .insert(document.campaign.id.clone(), document);
            }
        }
        Ok(())
    }

    fn ensure_unclaimed(&self, document: &CampaignDocument) -> Result<(), VerdictError> {
        match document
            .variants
            .iter()
            .find(|v| self.variant_index.contains_key(&v.id))
        {
            Some(taken) => Err(VerdictError::InvalidConfig(format!(
                "variant id already in use: {}",
                taken.id
            ))),
            None => Ok(()),
        }
    }

    fn index(&self, document: &CampaignDocument) {
        for variant in &document.variants {
            self.variant_index
                .insert(variant.id.clone(), document.campaign.id.clone());
        }
    }

    fn atomic_write(&self, document: &CampaignDocument) -> Result<(), VerdictError> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let tmp_path = dir.join(format!("{}.json.tmp", document.campaign.id));
        let final_path = dir.join(format!("{}.json", document.campaign.id));
        let data = serde_json::to_string_pretty(document)?;
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    pub fn create(&self, document: CampaignDocument) -> Result<CampaignDocument, VerdictError> {
        document.validate()?;
        self.ensure_unclaimed(&document)?;
        match self.documents.entry(document.campaign.id.clone()) {
            Entry::Occupied(_) => Err(VerdictError::InvalidConfig(format!(
                "campaign already exists: {}",
                document.campaign.id
            ))),
            Entry::Vacant(slot) => {
                self.atomic_write(&document)?;
                self.index(&document);
                slot.insert(document.clone());
                Ok(document)
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<CampaignDocument, VerdictError> {
        self.documents
            .get(id)
            .map(|d| d.clone())
            .ok_or_else(|| VerdictError::CampaignNotFound(id.to_string()))
    }

    pub fn list(&self, status: Option<CampaignStatus>) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self
            .documents
            .iter()
            .filter(|entry| status.map_or(true, |s| entry.value().campaign.status == s))
            .map(|entry| entry.value().campaign.clone())
            .collect();
        campaigns.sort_by(|a, b| a.id.cmp(&b.id));
        campaigns
    }

    /// Applies `change` to a copy of the document, persists it, and only then
    /// swaps it in, all under the entry's write lock.
    fn modify<T>(
        &self,
        campaign_id: &str,
        change: impl FnOnce(&mut CampaignDocument) -> Result<T, VerdictError>,
    ) -> Result<T, VerdictError> {
        let mut entry = self
            .documents
            .get_mut(campaign_id)
            .ok_or_else(|| VerdictError::CampaignNotFound(campaign_id.to_string()))?;
        let mut updated = entry.value().clone();
        let out = change(&mut updated)?;
        self.atomic_write(&updated)?;
        *entry.value_mut() = updated;
        Ok(out)
    }
}

impl CampaignRepository for CampaignStore {
    fn get_campaign(&self, id: &str) -> Result<Campaign, VerdictError> {
        self.documents
            .get(id)
            .map(|d| d.campaign.clone())
            .ok_or_else(|| VerdictError::CampaignNotFound(id.to_string()))
    }

    fn transition_campaign(
        &self,
        campaign_id: &str,
        next: CampaignStatus,
        edit: &mut dyn FnMut(&mut Campaign) -> Result<(), VerdictError>,
    ) -> Result<(CampaignStatus, Campaign), VerdictError> {
        self.modify(campaign_id, |doc| {
            let stored = doc.campaign.clone();
            let next = stored.status.transition(next)?;
            let mut updated = stored.clone();
            edit(&mut updated)?;
            updated.status = next;
            updated.winner_variant_id = stored.winner_variant_id;
            updated.winner_declared_at = stored.winner_declared_at;
            updated.winner_declared_by = stored.winner_declared_by;
            updated.winner_auto_detected = stored.winner_auto_detected;
            doc.campaign = updated.clone();
            Ok((stored.status, updated))
        })
    }

    fn set_winner_if_unset(
        &self,
        campaign_id: &str,
        latch: WinnerLatch,
    ) -> Result<Campaign, VerdictError> {
        self.modify(campaign_id, |doc| {
            if doc.campaign.winner_variant_id.is_some() {
                return Err(VerdictError::WinnerExists(campaign_id.to_string()));
            }
            if !doc.variants.iter().any(|v| v.id == latch.variant_id) {
                return Err(VerdictError::VariationMismatch {
                    variant_id: latch.variant_id.clone(),
                    campaign_id: campaign_id.to_string(),
                });
            }
            doc.campaign.winner_variant_id = Some(latch.variant_id);
            doc.campaign.winner_declared_at = Some(latch.declared_at);
            doc.campaign.winner_declared_by = Some(latch.declared_by);
            doc.campaign.winner_auto_detected = latch.auto_detected;
            Ok(doc.campaign.clone())
        })
    }
}

impl VariantRepository for CampaignStore {
    fn get_variant(&self, id: &str) -> Result<Variant, VerdictError> {
        let campaign_id = self
            .variant_index
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| VerdictError::VariationNotFound(id.to_string()))?;
        self.documents
            .get(&campaign_id)
            .and_then(|doc| doc.variants.iter().find(|v| v.id == id).cloned())
            .ok_or_else(|| VerdictError::VariationNotFound(id.to_string()))
    }

    fn list_variants(&self, campaign_id: &str) -> Result<Vec<Variant>, VerdictError> {
        self.documents
            .get(campaign_id)
            .map(|doc| doc.variants.clone())
            .ok_or_else(|| VerdictError::CampaignNotFound(campaign_id.to_string()))
    }

    fn set_weight(
        &self,
        variant_id: &str,
        weight_percentage: u8,
    ) -> Result<Variant, VerdictError> {
        if weight_percentage > 100 {
            return Err(VerdictError::InvalidConfig(format!(
                "weightPercentage must be within 0..=100, got {weight_percentage}"
            )));
        }
        let campaign_id = self
            .variant_index
            .get(variant_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| VerdictError::VariationNotFound(variant_id.to_string()))?;
        self.modify(&campaign_id, |doc| {
            let variant = doc
                .variants
                .iter_mut()
                .find(|v| v.id == variant_id)
                .ok_or_else(|| VerdictError::VariationNotFound(variant_id.to_string()))?;
            variant.weight_percentage = weight_percentage;
            Ok(variant.clone())
        })
    }
}
