//! Event scan and usage report, end to end over the in-memory provider.

use chrono::{DateTime, TimeZone, Utc};
use metal_audit::config::{CostModel, ReconcileOptions, ScanWindow};
use metal_audit::providers::memory::InMemory;
use metal_audit::providers::{Event, EventKind};
use metal_audit::{AverageUptime, EventReconciler, UsageReport};

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
}

fn event(time: DateTime<Utc>, kind: EventKind, device: &str) -> Event {
    Event {
        created_at: time,
        kind,
        interpolated: format!("User ci-bot provisioned \"{device}\""),
    }
}

fn options() -> ReconcileOptions {
    ReconcileOptions {
        window: ScanWindow::LastDays(8),
        ..ReconcileOptions::default()
    }
}

fn cost_model() -> CostModel {
    CostModel {
        hourly_rate: 2.0,
        leak_hours: 4.0,
    }
}

#[tokio::test]
async fn test_creations_without_deletions_have_no_uptime_data() {
    let provider = InMemory::new().with_events(vec![
        event(at(14, 10), EventKind::Created, "ipi-a"),
        event(at(12, 10), EventKind::Created, "ipi-b"),
    ]);
    let options = options();

    let scan = EventReconciler::new(&provider, &options)
        .reconcile_at(at(15, 12))
        .await
        .unwrap();
    let report = UsageReport::from_reconciliation(&scan, cost_model());

    assert_eq!(report.total_instances, 2);
    assert_eq!(report.daily_creations.len(), 2);
    assert!(report.total_cost.abs() < f64::EPSILON);
    assert_eq!(report.leak_count, 0);
    assert_eq!(report.average_uptime, AverageUptime::InsufficientData);
    assert!(report.render().contains("Average instance uptime: no data"));
}

#[tokio::test]
async fn test_mixed_history() {
    let provider = InMemory::new().with_events(vec![
        event(at(15, 11), EventKind::Created, "ipi-today"),
        event(at(14, 20), EventKind::Deleted, "ipi-leak"),
        event(at(14, 15), EventKind::Deleted, "ipi-short"),
        event(at(14, 14), EventKind::Created, "ipi-short"),
        event(at(14, 9), EventKind::Created, "ipi-leak"),
        event(at(13, 8), EventKind::Created, "ipi-open"),
        event(at(13, 7), EventKind::Deleted, "other-device"),
        event(at(1, 7), EventKind::Created, "ipi-ancient"),
    ]);
    let options = ReconcileOptions {
        page_size: 3,
        ..options()
    };

    let scan = EventReconciler::new(&provider, &options)
        .reconcile_at(at(15, 12))
        .await
        .unwrap();
    let report = UsageReport::from_reconciliation(&scan, cost_model());

    assert_eq!(report.total_instances, 3);
    assert_eq!(report.paired_devices, 2);
    // ipi-leak: 11h -> $22, ipi-short: 1h -> $2
    assert!((report.total_cost - 24.0).abs() < f64::EPSILON);
    assert_eq!(report.leaks, vec!["ipi-leak"]);
    assert_eq!(report.max_uptime.as_ref().unwrap().device_id, "ipi-leak");
    assert_eq!(report.max_cost.as_ref().unwrap().device_id, "ipi-leak");
    assert_eq!(
        report.average_uptime,
        AverageUptime::Value(std::time::Duration::from_secs(6 * 3600))
    );
    assert!(report.anomalies.is_empty());
    assert_eq!(scan.foreign_events, 1);
    assert!(!scan.records.contains_key("ipi-ancient"));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["total_instances"], 3);
    assert_eq!(json["leak_count"], 1);
}
