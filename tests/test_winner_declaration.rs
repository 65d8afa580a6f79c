use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use tempfile::TempDir;
use verdict::experiments::clock::ManualClock;
use verdict::experiments::notify::{EventType, RecordingSink};
use verdict::{
    AutoDetectOutcome, Campaign, CampaignDocument, CampaignRepository, CampaignStatus,
    CampaignStore, ConfidenceThreshold, DeclareOptions, Variant, VariantRepository, WinnerService, WinnerSettings,
};

const LAUNCHED_AT: i64 = 1_704_067_200_000; // 2024-01-01T00:00:00Z

fn variant(id: &str, name: &str, control: bool, impressions: u64, conversions: u64) -> Variant {
    Variant {
        id: id.to_string(),
        campaign_id: "hero-banner".to_string(),
        name: name.to_string(),
        is_control: control,
        impressions,
        conversions,
        weight_percentage: 34,
    }
}

fn hero_banner() -> CampaignDocument {
    CampaignDocument {
        campaign: Campaign {
            id: "hero-banner".to_string(),
            name: "Homepage hero banner".to_string(),
            status: CampaignStatus::Draft,
            winner_variant_id: None,
            winner_declared_at: None,
            winner_declared_by: None,
            winner_auto_detected: false,
            archived_at: None,
            archived_by: None,
            start_date: None,
            created_at: LAUNCHED_AT,
        },
        variants: vec![
            variant("hb-original", "Original", true, 12_000, 480),
            variant("hb-video", "Video", false, 12_000, 610),
            variant("hb-carousel", "Carousel", false, 12_000, 455),
        ],
    }
}

fn service(store: Arc<CampaignStore>, clock: Arc<ManualClock>, sink: Arc<RecordingSink>) -> WinnerService {
    WinnerService::new(store.clone(), store, WinnerSettings::default())
        .with_clock(clock)
        .with_sink(sink)
}

#[test]
fn auto_detected_winner_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::from_millis(LAUNCHED_AT));
    let sink = Arc::new(RecordingSink::new());

    {
        let store = Arc::new(CampaignStore::new(tmp.path()).unwrap());
        store.create(hero_banner()).unwrap();
        let service = service(store.clone(), clock.clone(), sink.clone());

        service.start("hero-banner").unwrap();
        clock.advance(Duration::days(3));
        assert!(!service.auto_detect_winner("hero-banner").unwrap().is_declared());

        clock.advance(Duration::days(5));
        let outcome = service.auto_detect_winner("hero-banner").unwrap();
        let AutoDetectOutcome::Declared(declaration) = outcome else {
            panic!("expected a declaration, got {outcome:?}");
        };
        assert_eq!(declaration.variant_id, "hb-video");
        assert!(declaration.auto_detected);
    }

    let reopened = CampaignStore::new(tmp.path()).unwrap();
    let campaign = reopened.get_campaign("hero-banner").unwrap();
    assert_eq!(campaign.winner_variant_id.as_deref(), Some("hb-video"));
    assert_eq!(campaign.winner_declared_by.as_deref(), Some("auto-detect"));
    assert!(campaign.winner_auto_detected);
    assert_eq!(
        campaign.winner_declared_at,
        Some(LAUNCHED_AT + 8 * 86_400_000)
    );

    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::WinnerAutoDetected);
    assert_eq!(events[0].campaign_id, "hero-banner");
}

#[test]
fn manual_declaration_then_apply_then_archive() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(CampaignStore::new(tmp.path()).unwrap());
    store.create(hero_banner()).unwrap();
    let clock = Arc::new(ManualClock::from_millis(LAUNCHED_AT));
    let sink = Arc::new(RecordingSink::new());
    let service = service(store.clone(), clock.clone(), sink.clone());

    service.start("hero-banner").unwrap();
    clock.advance(Duration::days(1));

    let declaration = service
        .declare("hero-banner", "hb-carousel", "dana", DeclareOptions::default())
        .unwrap();
    assert_eq!(declaration.variant_name, "Carousel");
    assert!(sink.events().is_empty());

    let applied = service.apply("hero-banner").unwrap();
    assert_eq!(applied.status, CampaignStatus::Completed);
    let weights: Vec<(String, u8)> = store
        .list_variants("hero-banner")
        .unwrap()
        .into_iter()
        .map(|v| (v.id, v.weight_percentage))
        .collect();
    assert_eq!(
        weights,
        vec![
            ("hb-original".to_string(), 0),
            ("hb-video".to_string(), 0),
            ("hb-carousel".to_string(), 100),
        ]
    );

    let archived = service.archive_campaign("hero-banner", "dana").unwrap();
    assert_eq!(archived.status, CampaignStatus::Archived);
    assert_eq!(archived.winner_variant_id.as_deref(), Some("hb-carousel"));

    let restored = service.restore_campaign("hero-banner").unwrap();
    assert_eq!(restored.status, CampaignStatus::Active);
    assert_eq!(restored.winner_variant_id.as_deref(), Some("hb-carousel"));
}

#[test]
fn racing_declarations_leave_one_winner_on_disk() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(CampaignStore::new(tmp.path()).unwrap());
    store.create(hero_banner()).unwrap();
    let service = Arc::new(WinnerService::new(
        store.clone(),
        store.clone(),
        WinnerSettings::default(),
    ));

    let candidates = ["hb-original", "hb-video", "hb-carousel"];
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let service = Arc::clone(&service);
            let variant_id = candidates[i % candidates.len()];
            std::thread::spawn(move || {
                service
                    .declare("hero-banner", variant_id, &format!("editor-{i}"), DeclareOptions::default())
                    .map(|d| d.variant_id)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    let winners: Vec<&String> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.code() == "winner_exists"));

    let on_disk = std::fs::read_to_string(tmp.path().join(".campaigns/hero-banner.json")).unwrap();
    let json: Value = serde_json::from_str(&on_disk).unwrap();
    assert_eq!(json["campaign"]["winnerVariantId"], winners[0].as_str());
}

#[test]
fn recommendation_and_report_agree_on_best_variant() {
    let store = Arc::new(CampaignStore::ephemeral());
    store.create(hero_banner()).unwrap();
    let service = WinnerService::new(store.clone(), store.clone(), WinnerSettings::default());

    let recommendation = service.get_recommendation("hero-banner").unwrap();
    assert_eq!(recommendation.variant_id, "hb-video");
    assert!(recommendation.significant);

    let report = verdict::compare_variants(&store.list_variants("hero-banner").unwrap()).unwrap();
    let video = report.for_variant("hb-video").unwrap();
    assert!(video.reaches(ConfidenceThreshold::NinetyFive));
    assert!(video.sufficiency.sufficient);
    assert!(video.interpretation.starts_with("Video is outperforming Original"));
    assert!(!report.sample_ratio_mismatch);
}
