#![allow(deprecated)] // Command::cargo_bin: the macro alternative requires a same-package binary

use assert_cmd::Command;
use predicates::str::contains;
use serde_json::{json, Value};
use tempfile::TempDir;

// Clears every VERDICT_* variable so the runner's environment cannot leak in.
fn verdict_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("verdict").unwrap();
    cmd.env_remove("VERDICT_DATA_DIR")
        .env_remove("VERDICT_MIN_CONVERSIONS")
        .env_remove("VERDICT_MIN_DAYS")
        .env_remove("VERDICT_CONFIDENCE")
        .env_remove("VERDICT_AUTO_APPLY")
        .env_remove("VERDICT_AUTO_ARCHIVE")
        .env("RUST_LOG", "warn")
        .arg("--data-dir")
        .arg(data_dir.path());
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

/// Writes a two-variant campaign created on 2024-01-01 and loads it.
fn seed(data_dir: &TempDir, control: (u64, u64), treatment: (u64, u64)) {
    let document = json!({
        "campaign": {
            "id": "pricing-page",
            "name": "Pricing page headline",
            "status": "active",
            "createdAt": 1_704_067_200_000_i64
        },
        "variants": [
            {
                "id": "pp-control",
                "campaignId": "pricing-page",
                "name": "Control",
                "isControl": true,
                "impressions": control.0,
                "conversions": control.1,
                "weightPercentage": 50
            },
            {
                "id": "pp-bold",
                "campaignId": "pricing-page",
                "name": "Bold",
                "impressions": treatment.0,
                "conversions": treatment.1,
                "weightPercentage": 50
            }
        ]
    });
    let file = data_dir.path().join("pricing-page.seed.json");
    std::fs::write(&file, serde_json::to_string(&document).unwrap()).unwrap();
    verdict_cmd(data_dir).arg("create").arg(&file).assert().success();
}

#[test]
fn analyze_prints_comparison_json() {
    let tmp = TempDir::new().unwrap();
    seed(&tmp, (1000, 50), (1000, 80));

    let report = stdout_json(verdict_cmd(&tmp).args(["analyze", "pricing-page"]));
    assert_eq!(report["control"]["id"], "pp-control");
    let bold = &report["comparisons"][0];
    assert_eq!(bold["variant"]["id"], "pp-bold");
    assert_eq!(bold["significance"]["confidenceLevel"], "99%");
    assert_eq!(
        bold["interpretation"],
        "Bold is outperforming Control by 60.0% with 99% confidence."
    );
}

#[test]
fn list_filters_by_status() {
    let tmp = TempDir::new().unwrap();
    seed(&tmp, (1000, 50), (1000, 80));

    let active = stdout_json(verdict_cmd(&tmp).args(["list", "--status", "active"]));
    assert_eq!(active.as_array().unwrap().len(), 1);
    let drafts = stdout_json(verdict_cmd(&tmp).args(["list", "--status", "draft"]));
    assert!(drafts.as_array().unwrap().is_empty());
}

#[test]
fn second_declaration_fails_with_winner_exists() {
    let tmp = TempDir::new().unwrap();
    seed(&tmp, (1000, 50), (1000, 80));

    let declaration = stdout_json(verdict_cmd(&tmp).args([
        "declare",
        "pricing-page",
        "pp-bold",
        "--actor",
        "erin",
    ]));
    assert_eq!(declaration["variantId"], "pp-bold");
    assert_eq!(declaration["declaredBy"], "erin");

    verdict_cmd(&tmp)
        .args(["declare", "pricing-page", "pp-control"])
        .assert()
        .failure()
        .stderr(contains("\"code\":\"winner_exists\""));
}

#[test]
fn declare_with_apply_moves_traffic_and_completes() {
    let tmp = TempDir::new().unwrap();
    seed(&tmp, (1000, 50), (1000, 80));

    let declaration = stdout_json(verdict_cmd(&tmp).args([
        "declare",
        "pricing-page",
        "pp-bold",
        "--apply",
    ]));
    assert_eq!(declaration["applied"], true);

    let completed = stdout_json(verdict_cmd(&tmp).args(["list", "--status", "completed"]));
    assert_eq!(completed[0]["winnerVariantId"], "pp-bold");

    let report = stdout_json(verdict_cmd(&tmp).args(["analyze", "pricing-page"]));
    assert_eq!(report["control"]["weightPercentage"], 0);
    assert_eq!(report["comparisons"][0]["variant"]["weightPercentage"], 100);
}

#[test]
fn apply_without_winner_reports_no_winner() {
    let tmp = TempDir::new().unwrap();
    seed(&tmp, (1000, 50), (1000, 80));

    verdict_cmd(&tmp)
        .args(["apply", "pricing-page"])
        .assert()
        .failure()
        .stderr(contains("\"code\":\"no_winner\""));
}

#[test]
fn unknown_campaign_reports_not_found() {
    let tmp = TempDir::new().unwrap();

    verdict_cmd(&tmp)
        .args(["recommend", "missing"])
        .assert()
        .failure()
        .stderr(contains("campaign_not_found"));
}

#[test]
fn auto_detect_declares_significant_winner() {
    let tmp = TempDir::new().unwrap();
    seed(&tmp, (10_000, 500), (10_000, 650));

    let outcome = stdout_json(verdict_cmd(&tmp).args(["auto-detect", "pricing-page"]));
    assert_eq!(outcome["outcome"], "declared");
    assert_eq!(outcome["variantId"], "pp-bold");
    assert_eq!(outcome["autoDetected"], true);
    assert_eq!(outcome["declaredBy"], "auto-detect");
}

#[test]
fn auto_detect_respects_env_settings() {
    let tmp = TempDir::new().unwrap();
    seed(&tmp, (10_000, 500), (10_000, 650));

    let outcome = stdout_json(
        verdict_cmd(&tmp)
            .env("VERDICT_MIN_CONVERSIONS", "1000")
            .args(["auto-detect", "pricing-page"]),
    );
    assert_eq!(outcome["outcome"], "notReady");
    assert_eq!(outcome["reason"], "insufficientConversions");
    assert_eq!(outcome["variantId"], "pp-control");
}

#[test]
fn zero_min_conversions_is_rejected() {
    let tmp = TempDir::new().unwrap();

    verdict_cmd(&tmp)
        .args(["--min-conversions", "0", "list"])
        .assert()
        .failure()
        .stderr(contains("invalid_config"));
}

#[test]
fn unsupported_confidence_is_a_usage_error() {
    let tmp = TempDir::new().unwrap();

    verdict_cmd(&tmp)
        .env("VERDICT_CONFIDENCE", "80")
        .arg("list")
        .assert()
        .failure()
        .stderr(contains("confidence threshold must be 90, 95 or 99"));
}

#[test]
fn archive_and_restore_round_trip() {
    let tmp = TempDir::new().unwrap();
    seed(&tmp, (1000, 50), (1000, 80));

    let archived = stdout_json(verdict_cmd(&tmp).args([
        "archive",
        "pricing-page",
        "--actor",
        "frank",
    ]));
    assert_eq!(archived["status"], "archived");
    assert_eq!(archived["archivedBy"], "frank");

    let restored = stdout_json(verdict_cmd(&tmp).args(["restore", "pricing-page"]));
    assert_eq!(restored["status"], "active");
    assert!(restored["archivedBy"].is_null());

    verdict_cmd(&tmp)
        .args(["restore", "pricing-page"])
        .assert()
        .failure()
        .stderr(contains("invalid_transition"));
}

#[test]
fn create_rejects_campaign_id_that_escapes_data_dir() {
    let tmp = TempDir::new().unwrap();
    let document = json!({
        "campaign": {
            "id": "../escaped",
            "name": "Escape",
            "status": "draft",
            "createdAt": 1_704_067_200_000_i64
        },
        "variants": []
    });
    let file = tmp.path().join("escape.seed.json");
    std::fs::write(&file, serde_json::to_string(&document).unwrap()).unwrap();

    verdict_cmd(&tmp)
        .arg("create")
        .arg(&file)
        .assert()
        .failure()
        .stderr(contains("invalid_config"));
    assert!(!tmp.path().join("escaped.json").exists());
}
