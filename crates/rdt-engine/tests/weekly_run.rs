//! End-to-end runs over real files in a temp directory.

use std::fs;
use std::sync::Arc;

use rdt_core::{Contact, ContactLookup};
use rdt_engine::aggregate::AggregateOptions;
use rdt_engine::{Pipeline, PipelineConfig, RunRequest};

const PRIOR: &str = "\
Elux ID,Dealer ID,Channel,Store_name,WM100,WM200
001,D1,Retail,Alpha,2,1
002,D2,Online,Beta,0,4
";

const RAW: &str = "\
Elux ID,Dealer ID,Channel,Store_name,Model,Value
001,D1,Retail,Alpha,WM100,0
001,D1,Retail,Alpha,WM300,3
";

struct OneContact;

impl ContactLookup for OneContact {
    fn by_entity_id(&self, entity_id: &str) -> Option<Contact> {
        (entity_id == "001").then(|| Contact {
            email: "alpha@example.com".to_string(),
            display_name: "Alpha Crew".to_string(),
        })
    }

    fn by_store_name(&self, _: &str) -> Option<Contact> {
        None
    }
}

fn pipeline(reports_dir: std::path::PathBuf) -> Pipeline {
    Pipeline::new(
        PipelineConfig {
            reports_dir,
            options: AggregateOptions::default(),
        },
        Arc::new(OneContact),
    )
}

#[test]
fn full_week_produces_consistent_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let prior_path = dir.path().join("prior.csv");
    let raw_path = dir.path().join("raw.csv");
    fs::write(&prior_path, PRIOR).unwrap();
    fs::write(&raw_path, RAW).unwrap();

    let reports = dir.path().join("reports");
    let run = pipeline(reports.clone())
        .run_once(&RunRequest {
            raw_path,
            prior_path,
            week: 40,
        })
        .unwrap();

    // Alpha: WM100 2 -> 0 (decrease), WM300 0 -> 3 (increase), WM200 carried.
    // Beta: absent from the snapshot, untouched.
    assert_eq!(run.stores, 2);
    assert_eq!(run.models_tracked, 3);
    assert_eq!(run.total_changes, 2);
    assert_eq!(run.models_increased, 1);
    assert_eq!(run.models_decreased, 1);

    let updated = fs::read_to_string(reports.join("report-week-40.csv")).unwrap();
    assert!(updated.contains("001,D1,Retail,Alpha,0,1,3"));
    assert!(updated.contains("002,D2,Online,Beta,0,4,0"));

    let alerts = fs::read_to_string(reports.join("alerts-week-40.json")).unwrap();
    let summary: rdt_core::AlertSummary = serde_json::from_str(&alerts).unwrap();
    assert_eq!(summary.week, 40);
    assert_eq!(summary.recipients.len(), 1);
    assert_eq!(summary.recipients[0].email, "alpha@example.com");
    assert_eq!(summary.recipients[0].stores[0].decreases[0].model, "WM100");

    let manifest = fs::read_to_string(reports.join("manifest-week-40.json")).unwrap();
    assert!(manifest.contains("report-week-40.csv"));
    assert!(manifest.contains("alerts-week-40.json"));
}

#[test]
fn updated_report_fed_back_with_empty_snapshot_is_a_fixed_point() {
    let dir = tempfile::tempdir().unwrap();
    let prior_path = dir.path().join("prior.csv");
    let raw_path = dir.path().join("raw.csv");
    fs::write(&prior_path, PRIOR).unwrap();
    fs::write(&raw_path, RAW).unwrap();

    let reports = dir.path().join("reports");
    pipeline(reports.clone())
        .run_once(&RunRequest {
            raw_path: raw_path.clone(),
            prior_path,
            week: 40,
        })
        .unwrap();

    // Week 41: no observations at all. Every store carries forward.
    let empty_raw = dir.path().join("raw-41.csv");
    fs::write(
        &empty_raw,
        "Elux ID,Dealer ID,Channel,Store_name,Model,Value\n",
    )
    .unwrap();
    let run = pipeline(reports.clone())
        .run_once(&RunRequest {
            raw_path: empty_raw,
            prior_path: reports.join("report-week-40.csv"),
            week: 41,
        })
        .unwrap();

    assert_eq!(run.total_changes, 0);
    let week_40 = fs::read_to_string(reports.join("report-week-40.csv")).unwrap();
    let week_41 = fs::read_to_string(reports.join("report-week-41.csv")).unwrap();
    assert_eq!(week_40, week_41);
}

#[test]
fn rerunning_the_same_week_overwrites_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let prior_path = dir.path().join("prior.csv");
    let raw_path = dir.path().join("raw.csv");
    fs::write(&prior_path, PRIOR).unwrap();
    fs::write(&raw_path, RAW).unwrap();

    let reports = dir.path().join("reports");
    let p = pipeline(reports.clone());
    let request = RunRequest {
        raw_path,
        prior_path,
        week: 40,
    };
    p.run_once(&request).unwrap();
    let first = fs::read_to_string(reports.join("report-week-40.csv")).unwrap();
    p.run_once(&request).unwrap();
    let second = fs::read_to_string(reports.join("report-week-40.csv")).unwrap();
    assert_eq!(first, second);
}
