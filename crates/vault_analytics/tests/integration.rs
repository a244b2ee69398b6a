//! Integration tests over a recorded event log fixture.

use std::path::{Path, PathBuf};
use vault_analytics::analytics::{
    achievement_report, build_cohort_analysis, build_time_series, AchievementType, CohortId,
    Interval, SeriesKind, Tier,
};
use vault_analytics::chain::{DataSource, EventFilter, RecordedAdapter, RetryPolicy};
use vault_analytics::conservation::{calculate_conservation, fold_ghost_variables};
use vault_analytics::events::{EventKind, EventType};
use vault_analytics::indexer::{Indexer, IndexerConfig};
use vault_analytics::verify::{verify_export, ExportEnvelope};
use vault_analytics::{IndexedEvent, VaultClient, VaultQuery};

const TOKEN: &str = "0x00000000000000000000000000000000000000c0";
// 2025-05-11T00:00:00Z
const NOW: u64 = 1_746_921_600;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../testdata")
        .join(name)
}

fn recorded() -> DataSource {
    let path = fixture("events.json");
    let adapter = RecordedAdapter::open(&path, TOKEN)
        .unwrap_or_else(|e| panic!("open {}: {}", path.display(), e));
    DataSource::Recorded(adapter)
}

fn client() -> VaultClient {
    VaultClient::with_source(recorded())
        .with_retry(RetryPolicy::none())
        .with_default_denomination(TOKEN)
}

async fn events() -> Vec<IndexedEvent> {
    client()
        .fetch_events(&EventFilter::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn integration_ingest_fixture_is_idempotent() {
    let indexer = Indexer::new(IndexerConfig {
        block_span: 50_000,
        retry: RetryPolicy::none(),
        ..Default::default()
    });
    let source = recorded();
    let first = indexer.ingest(&source, None).await.unwrap();
    assert_eq!(first.outcome.appended, 19);
    assert!(first.rejected.is_empty());

    let again = indexer.replay_from_genesis(&source).await.unwrap();
    assert_eq!(again.outcome.appended, 0);
    assert_eq!(again.outcome.duplicates, 19);
    assert_eq!(indexer.len(), 19);

    let mints = indexer.query(&EventFilter::default().with_types(&[EventType::VaultMinted]));
    assert_eq!(mints.len(), 11);
}

#[tokio::test]
async fn integration_ranking_over_fixture() {
    let result = client().get_vaults(&VaultQuery::default(), NOW).await.unwrap();
    assert_eq!(result.total, 10);
    assert!(!result.insufficient_sample);

    let top = &result.vaults[0];
    assert_eq!(top.vault.token_id, 3);
    assert_eq!(top.vault.collateral_amount, 1_199_000_000);
    assert_eq!(top.rank, 1);
    assert!((top.percentile - 90.0).abs() < 1e-9);
    assert_eq!(top.tier, Some(Tier::Gold));

    let ids: Vec<u128> = result.vaults.iter().map(|r| r.vault.token_id).collect();
    assert_eq!(ids, vec![3, 7, 1, 6, 9, 11, 5, 8, 4, 10]);
    assert_eq!(result.vaults[2].vault.collateral_amount, 252_000_000);
    assert_eq!(result.vaults[4].tier, Some(Tier::Bronze));
    assert_eq!(result.vaults[5].tier, None);
}

#[tokio::test]
async fn integration_conservation_balances_and_flags_drift() {
    let mut events = events().await;
    let report = calculate_conservation(&fold_ghost_variables(&events, TOKEN));
    assert!(report.balanced, "{:?}", report.violations);
    assert_eq!(report.denominations[TOKEN].discrepancy, 0);

    let mut extra = events[events.len() - 1].clone();
    extra.meta.block_number += 1;
    extra.meta.log_index = 1;
    extra.kind = EventKind::EarlyRedemption {
        token_id: 4,
        owner: "0x000000000000000000000000000000000000a004".into(),
        returned: 8_000_005,
        forfeited: 0,
    };
    events.push(extra);
    let report = calculate_conservation(&fold_ghost_variables(&events, TOKEN));
    assert!(!report.balanced);
    assert_eq!(report.denominations[TOKEN].discrepancy, 5);
    assert_eq!(report.denominations[TOKEN].overdrawn, 5);
}

#[tokio::test]
async fn integration_monthly_growth_and_cohorts() {
    let events = events().await;
    let series = build_time_series(&events, SeriesKind::Growth, Interval::Month);
    let labels: Vec<&str> = series.points.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(labels, vec!["2025-03", "2025-04", "2025-05"]);
    assert_eq!(series.amounts(), vec![1_638_000_000, 700_000_000, 42_000_000]);
    assert_eq!(series.points[2].count, 2);
    assert_eq!(series.points[2].cumulative_amount, 2_380_000_000);

    let analysis = build_cohort_analysis(&events);
    assert_eq!(analysis.cohorts.len(), 3);
    let march = &analysis.cohorts[0];
    assert_eq!(march.cohort, "202503".parse::<CohortId>().unwrap());
    assert_eq!(march.mint_count, 6);
    assert_eq!(march.redeemed_count, 1);
    assert!((march.retention_rate - 500.0 / 6.0).abs() < 1e-9);
    assert_eq!(analysis.best_cohort, Some(march.cohort));
    assert_eq!(analysis.worst_cohort, Some(march.cohort));
}

#[tokio::test]
async fn integration_health_and_achievements() {
    let health = client().get_ecosystem_health(NOW).await.unwrap();
    assert_eq!(health.mint_count, 11);
    assert_eq!(health.redemption_count, 1);
    assert_eq!(health.match_pool_funded, 15_000_000);
    assert_eq!(health.match_pool_claimed, 2_000_000);
    assert_eq!(health.match_pool_balance, 13_000_000);
    assert_eq!(health.unique_holders, 8);
    assert!((health.achievement_adoption_rate - 12.5).abs() < 1e-9);

    let report = achievement_report(&events().await).unwrap();
    let first_month = report
        .distribution
        .iter()
        .find(|s| s.achievement == AchievementType::FirstMonth)
        .unwrap();
    assert_eq!(first_month.unique_holders, 1);
}

#[tokio::test]
async fn integration_exported_log_replays_and_verifies() {
    let events = events().await;
    let envelope =
        ExportEnvelope::new("events", serde_json::to_value(&events).unwrap()).unwrap();
    let bytes = serde_json::to_vec_pretty(&envelope).unwrap();
    assert!(verify_export(&bytes).unwrap().matches);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.export.json");
    std::fs::write(&path, &bytes).unwrap();
    let replayed = RecordedAdapter::open(&path, TOKEN).unwrap();
    let batch = replayed.fetch_events(&EventFilter::default());
    assert!(batch.rejected.is_empty());
    assert_eq!(batch.events, events);

    let mut tampered: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    tampered["data"][0]["collateral"] = serde_json::Value::from("250000001");
    let check = verify_export(&serde_json::to_vec(&tampered).unwrap()).unwrap();
    assert!(!check.matches);
}
