//! Event log reconciliation.
//!
//! Walks the project event log newest-first, page by page, and pairs the
//! `instance.created` / `instance.deleted` events of each device created by
//! this tool into a [`LifecycleRecord`]. The scan stops at the first event
//! older than the window, at an empty page, or at the page limit, whichever
//! comes first. Events already processed are kept when the scan stops.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ReconcileOptions, ScanWindow};
use crate::providers::{Event, EventKind, EventService, MalformedEvent, ProviderError};

/// Creation and deletion time of one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleRecord {
    /// When the device was created, if seen.
    pub created_at: Option<DateTime<Utc>>,
    /// When the device was deleted, if seen.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LifecycleRecord {
    /// Time between creation and deletion.
    ///
    /// `None` unless both timestamps are known and creation is not after
    /// deletion.
    #[must_use]
    pub fn uptime(&self) -> Option<Duration> {
        let (created, deleted) = (self.created_at?, self.deleted_at?);
        (deleted - created).to_std().ok()
    }
}

/// Kind of event or record that cannot be used for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// The event text has no quoted device id.
    MissingDeviceId,
    /// The device was deleted in the window but its creation was not seen.
    OrphanDeletion,
    /// The deletion is timestamped before the creation.
    DeletionBeforeCreation,
    /// The provider returned an event that could not be decoded.
    MalformedEvent,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingDeviceId => write!(f, "missing device id"),
            Self::OrphanDeletion => write!(f, "deletion without creation"),
            Self::DeletionBeforeCreation => write!(f, "deletion before creation"),
            Self::MalformedEvent => write!(f, "malformed event"),
        }
    }
}

/// Data excluded from analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    /// What is wrong.
    pub kind: AnomalyKind,
    /// Device id, empty when it could not be extracted.
    pub device_id: String,
    /// Timestamp of the offending event.
    pub at: Option<DateTime<Utc>>,
}

/// Why the scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// An event older than the window was reached.
    WindowExhausted,
    /// The provider returned an empty page.
    EmptyPage,
    /// `max_pages` pages were fetched.
    PageLimit,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciliation {
    /// Lifecycle per device id.
    pub records: BTreeMap<String, LifecycleRecord>,
    /// Creations per UTC calendar date.
    pub daily_creations: BTreeMap<NaiveDate, u64>,
    /// Excluded events and records.
    pub anomalies: Vec<Anomaly>,
    /// Pages requested.
    pub pages_fetched: u32,
    /// Events received, including ones outside the window.
    pub events_seen: u64,
    /// Events about devices not created by this tool.
    pub foreign_events: u64,
    /// Why the scan ended.
    pub stop_reason: StopReason,
}

impl Reconciliation {
    /// Anomaly counts by kind.
    #[must_use]
    pub fn anomaly_counts(&self) -> BTreeMap<AnomalyKind, usize> {
        let mut counts = BTreeMap::new();
        for anomaly in &self.anomalies {
            *counts.entry(anomaly.kind).or_insert(0) += 1;
        }
        counts
    }
}

/// Return the first double-quoted substring of `text`, or `""` if there is none.
#[must_use]
pub fn extract_device_id(text: &str) -> &str {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    let re = QUOTED.get_or_init(|| Regex::new(r#""([^"]*)""#).expect("valid regex"));

    re.captures(text)
        .and_then(|c| c.get(1))
        .map_or("", |m| m.as_str())
}

/// What to do with an event given its date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Inside the window, `offset` days ago.
    Inside { offset: i64 },
    /// Newer than the window; keep scanning.
    TooNew,
    /// Older than the window; everything after it is older too.
    TooOld,
}

fn place(window: ScanWindow, today: NaiveDate, date: NaiveDate) -> Placement {
    let offset = (today - date).num_days();
    match window {
        ScanWindow::LastDays(days) => {
            if offset > i64::from(days) {
                Placement::TooOld
            } else if offset <= 0 {
                Placement::TooNew
            } else {
                Placement::Inside { offset }
            }
        }
        ScanWindow::Range { from, to } => {
            if date < from {
                Placement::TooOld
            } else if date > to {
                Placement::TooNew
            } else {
                Placement::Inside { offset }
            }
        }
    }
}

/// Scans a project's event log.
pub struct EventReconciler<'a, P: ?Sized> {
    provider: &'a P,
    options: &'a ReconcileOptions,
}

impl<'a, P: EventService + ?Sized> EventReconciler<'a, P> {
    /// Create a reconciler.
    #[must_use]
    pub fn new(provider: &'a P, options: &'a ReconcileOptions) -> Self {
        Self { provider, options }
    }

    /// Reconcile relative to the current time.
    ///
    /// # Errors
    /// Returns the transport error of the first page that fails.
    pub async fn reconcile(&self) -> Result<Reconciliation, ProviderError> {
        self.reconcile_at(Utc::now()).await
    }

    /// Reconcile relative to `now`.
    ///
    /// # Errors
    /// Returns the transport error of the first page that fails.
    pub async fn reconcile_at(&self, now: DateTime<Utc>) -> Result<Reconciliation, ProviderError> {
        let today = now.date_naive();
        let mut scan = Scan::default();
        let mut stop_reason = StopReason::PageLimit;

        match self.options.window {
            ScanWindow::LastDays(days) => info!(days, "Fetching events for the last {days} days"),
            ScanWindow::Range { from, to } => info!(%from, %to, "Fetching events"),
        }

        'pages: for page in 1..=self.options.max_pages {
            let batch = self
                .provider
                .list_events(page, self.options.page_size)
                .await?;
            scan.pages_fetched = page;
            debug!(page, count = batch.len(), "Fetched event page");

            if batch.is_empty() {
                stop_reason = StopReason::EmptyPage;
                break;
            }

            for malformed in &batch.malformed {
                scan.events_seen += 1;
                scan.reject(malformed);
            }

            for event in &batch.events {
                scan.events_seen += 1;
                match place(self.options.window, today, event.created_at.date_naive()) {
                    Placement::TooOld => {
                        stop_reason = StopReason::WindowExhausted;
                        break 'pages;
                    }
                    Placement::TooNew => {}
                    Placement::Inside { offset } => {
                        scan.log_day(event.created_at.date_naive(), offset);
                        scan.apply(event, &self.options.id_prefix);
                    }
                }
            }
        }

        let reconciliation = scan.finish(stop_reason);
        info!(
            pages = reconciliation.pages_fetched,
            events = reconciliation.events_seen,
            devices = reconciliation.records.len(),
            anomalies = reconciliation.anomalies.len(),
            stop_reason = ?reconciliation.stop_reason,
            "Event scan finished"
        );
        Ok(reconciliation)
    }
}

#[derive(Debug, Default)]
struct Scan {
    records: BTreeMap<String, LifecycleRecord>,
    daily_creations: BTreeMap<NaiveDate, u64>,
    anomalies: Vec<Anomaly>,
    pages_fetched: u32,
    events_seen: u64,
    foreign_events: u64,
    last_day: Option<NaiveDate>,
}

impl Scan {
    fn log_day(&mut self, date: NaiveDate, offset: i64) {
        if self.last_day != Some(date) {
            info!("Scanning events for {date} (T-{offset})");
            self.last_day = Some(date);
        }
    }

    fn reject(&mut self, malformed: &MalformedEvent) {
        debug!(reason = %malformed.reason, "Malformed event");
        self.anomalies.push(Anomaly {
            kind: AnomalyKind::MalformedEvent,
            device_id: extract_device_id(&malformed.interpolated).to_string(),
            at: None,
        });
    }

    fn apply(&mut self, event: &Event, prefix: &str) {
        if event.kind == EventKind::Other {
            return;
        }

        let device_id = extract_device_id(&event.interpolated);
        if device_id.is_empty() {
            debug!(text = %event.interpolated, "Event without device id");
            self.anomalies.push(Anomaly {
                kind: AnomalyKind::MissingDeviceId,
                device_id: String::new(),
                at: Some(event.created_at),
            });
            return;
        }
        if !device_id.starts_with(prefix) {
            self.foreign_events += 1;
            return;
        }

        match event.kind {
            EventKind::Created => {
                self.records
                    .entry(device_id.to_string())
                    .or_default()
                    .created_at = Some(event.created_at);
                *self
                    .daily_creations
                    .entry(event.created_at.date_naive())
                    .or_insert(0) += 1;
            }
            EventKind::Deleted => {
                self.records
                    .entry(device_id.to_string())
                    .or_default()
                    .deleted_at = Some(event.created_at);
            }
            EventKind::Other => {}
        }
    }

    fn finish(mut self, stop_reason: StopReason) -> Reconciliation {
        for (device_id, record) in &self.records {
            let kind = match (record.created_at, record.deleted_at) {
                (None, Some(_)) => AnomalyKind::OrphanDeletion,
                (Some(created), Some(deleted)) if deleted < created => {
                    AnomalyKind::DeletionBeforeCreation
                }
                _ => continue,
            };
            self.anomalies.push(Anomaly {
                kind,
                device_id: device_id.clone(),
                at: record.deleted_at,
            });
        }

        Reconciliation {
            records: self.records,
            daily_creations: self.daily_creations,
            anomalies: self.anomalies,
            pages_fetched: self.pages_fetched,
            events_seen: self.events_seen,
            foreign_events: self.foreign_events,
            stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::InMemory;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn event(time: DateTime<Utc>, kind: EventKind, device: &str) -> Event {
        Event {
            created_at: time,
            kind,
            interpolated: format!("ci-bot created \"{device}\" in project"),
        }
    }

    fn options(lookback: u32, page_size: u32) -> ReconcileOptions {
        ReconcileOptions {
            window: ScanWindow::LastDays(lookback),
            page_size,
            ..ReconcileOptions::default()
        }
    }

    #[test]
    fn test_extract_device_id() {
        assert_eq!(
            extract_device_id(r#"Instance "ipi-abc123" was created by "bot""#),
            "ipi-abc123"
        );
        assert_eq!(extract_device_id("no quotes here"), "");
        assert_eq!(extract_device_id(r#"dangling " quote"#), "");
    }

    #[test]
    fn test_placement_last_days() {
        let today = at(20, 0).date_naive();
        let window = ScanWindow::LastDays(8);
        assert_eq!(place(window, today, today), Placement::TooNew);
        assert_eq!(
            place(window, today, at(21, 0).date_naive()),
            Placement::TooNew
        );
        assert_eq!(
            place(window, today, at(12, 0).date_naive()),
            Placement::Inside { offset: 8 }
        );
        assert_eq!(
            place(window, today, at(11, 0).date_naive()),
            Placement::TooOld
        );
    }

    #[test]
    fn test_placement_range() {
        let today = at(20, 0).date_naive();
        let window = ScanWindow::range(at(5, 0).date_naive(), at(10, 0).date_naive()).unwrap();
        assert_eq!(place(window, today, at(11, 0).date_naive()), Placement::TooNew);
        assert_eq!(
            place(window, today, at(10, 0).date_naive()),
            Placement::Inside { offset: 10 }
        );
        assert_eq!(place(window, today, at(4, 0).date_naive()), Placement::TooOld);
    }

    #[test]
    fn test_lifecycle_uptime() {
        let record = LifecycleRecord {
            created_at: Some(at(3, 10)),
            deleted_at: Some(at(3, 15)),
        };
        assert_eq!(record.uptime(), Some(Duration::from_secs(5 * 3600)));

        let reversed = LifecycleRecord {
            created_at: Some(at(3, 15)),
            deleted_at: Some(at(3, 10)),
        };
        assert_eq!(reversed.uptime(), None);

        let open = LifecycleRecord {
            created_at: Some(at(3, 10)),
            deleted_at: None,
        };
        assert_eq!(open.uptime(), None);
    }

    #[tokio::test]
    async fn test_pairs_creation_and_deletion() {
        let provider = InMemory::new().with_events(vec![
            event(at(20, 9), EventKind::Created, "ipi-today"),
            event(at(18, 15), EventKind::Deleted, "ipi-1"),
            event(at(18, 12), EventKind::Other, "ipi-1"),
            event(at(18, 10), EventKind::Created, "ipi-1"),
            event(at(17, 8), EventKind::Created, "ipi-2"),
            event(at(17, 7), EventKind::Created, "someone-else"),
        ]);
        let options = options(8, 500);

        let result = EventReconciler::new(&provider, &options)
            .reconcile_at(at(20, 12))
            .await
            .unwrap();

        assert_eq!(result.records.len(), 2);
        assert_eq!(
            result.records["ipi-1"],
            LifecycleRecord {
                created_at: Some(at(18, 10)),
                deleted_at: Some(at(18, 15)),
            }
        );
        assert_eq!(result.records["ipi-2"].deleted_at, None);
        assert_eq!(result.daily_creations[&at(18, 0).date_naive()], 1);
        assert_eq!(result.daily_creations[&at(17, 0).date_naive()], 1);
        assert!(!result.daily_creations.contains_key(&at(20, 0).date_naive()));
        assert_eq!(result.foreign_events, 1);
        assert!(result.anomalies.is_empty());
        assert_eq!(result.stop_reason, StopReason::EmptyPage);
    }

    #[tokio::test]
    async fn test_halts_mid_page_when_window_exhausted() {
        let provider = InMemory::new().with_events(vec![
            event(at(19, 10), EventKind::Created, "ipi-1"),
            event(at(18, 10), EventKind::Created, "ipi-2"),
            event(at(17, 10), EventKind::Created, "ipi-3"),
            event(at(10, 10), EventKind::Created, "ipi-old"),
            event(at(17, 9), EventKind::Created, "ipi-after-stop"),
            event(at(16, 9), EventKind::Created, "ipi-next-page"),
        ]);
        let options = options(3, 5);

        let result = EventReconciler::new(&provider, &options)
            .reconcile_at(at(20, 12))
            .await
            .unwrap();

        assert_eq!(result.stop_reason, StopReason::WindowExhausted);
        assert_eq!(result.pages_fetched, 1);
        assert_eq!(provider.calls().event_pages, 1);
        assert_eq!(
            result.records.keys().collect::<Vec<_>>(),
            vec!["ipi-1", "ipi-2", "ipi-3"]
        );
    }

    #[tokio::test]
    async fn test_same_day_events_do_not_stop_pagination() {
        let provider = InMemory::new().with_events(vec![
            event(at(20, 11), EventKind::Created, "ipi-a"),
            event(at(20, 10), EventKind::Created, "ipi-b"),
            event(at(19, 10), EventKind::Created, "ipi-c"),
        ]);
        let options = options(8, 2);

        let result = EventReconciler::new(&provider, &options)
            .reconcile_at(at(20, 12))
            .await
            .unwrap();

        assert_eq!(result.pages_fetched, 3);
        assert_eq!(result.records.keys().collect::<Vec<_>>(), vec!["ipi-c"]);
    }

    #[tokio::test]
    async fn test_page_limit_bounds_the_scan() {
        let events = (0..10)
            .map(|i| event(at(19, 23 - i), EventKind::Created, &format!("ipi-{i}")))
            .collect();
        let provider = InMemory::new().with_events(events);
        let options = ReconcileOptions {
            max_pages: 2,
            ..options(8, 3)
        };

        let result = EventReconciler::new(&provider, &options)
            .reconcile_at(at(20, 12))
            .await
            .unwrap();

        assert_eq!(result.stop_reason, StopReason::PageLimit);
        assert_eq!(provider.calls().event_pages, 2);
        assert_eq!(result.records.len(), 6);
    }

    #[tokio::test]
    async fn test_anomalies_are_classified() {
        let provider = InMemory::new().with_events(vec![
            Event {
                created_at: at(19, 10),
                kind: EventKind::Created,
                interpolated: "instance created without id".into(),
            },
            event(at(19, 9), EventKind::Deleted, "ipi-orphan"),
            event(at(18, 9), EventKind::Created, "ipi-skewed"),
            event(at(18, 8), EventKind::Deleted, "ipi-skewed"),
        ]);
        let options = options(8, 500);

        let result = EventReconciler::new(&provider, &options)
            .reconcile_at(at(20, 12))
            .await
            .unwrap();

        let counts = result.anomaly_counts();
        assert_eq!(counts[&AnomalyKind::MissingDeviceId], 1);
        assert_eq!(counts[&AnomalyKind::OrphanDeletion], 1);
        assert_eq!(counts[&AnomalyKind::DeletionBeforeCreation], 1);
        assert!(result.records["ipi-skewed"].uptime().is_none());
        assert_eq!(result.daily_creations.values().sum::<u64>(), 1);
    }

    #[tokio::test]
    async fn test_date_range_window() {
        let provider = InMemory::new().with_events(vec![
            event(at(20, 9), EventKind::Created, "ipi-too-new"),
            event(at(15, 9), EventKind::Created, "ipi-in"),
            event(at(12, 9), EventKind::Created, "ipi-edge"),
            event(at(11, 9), EventKind::Created, "ipi-too-old"),
        ]);
        let options = ReconcileOptions {
            window: ScanWindow::range(at(12, 0).date_naive(), at(15, 0).date_naive()).unwrap(),
            ..ReconcileOptions::default()
        };

        let result = EventReconciler::new(&provider, &options)
            .reconcile_at(at(20, 12))
            .await
            .unwrap();

        assert_eq!(
            result.records.keys().collect::<Vec<_>>(),
            vec!["ipi-edge", "ipi-in"]
        );
        assert_eq!(result.stop_reason, StopReason::WindowExhausted);
    }

    #[tokio::test]
    async fn test_non_instance_events_are_ignored() {
        let provider = InMemory::new().with_events(vec![
            Event {
                created_at: at(19, 10),
                kind: EventKind::Other,
                interpolated: "project renamed".into(),
            },
            Event {
                created_at: at(19, 9),
                kind: EventKind::Other,
                interpolated: "API key created".into(),
            },
            event(at(19, 8), EventKind::Other, "someone-else"),
            event(at(19, 7), EventKind::Created, "ipi-1"),
        ]);
        let options = options(8, 500);

        let result = EventReconciler::new(&provider, &options)
            .reconcile_at(at(20, 12))
            .await
            .unwrap();

        assert!(result.anomalies.is_empty());
        assert_eq!(result.foreign_events, 0);
        assert_eq!(result.events_seen, 4);
        assert_eq!(result.records.keys().collect::<Vec<_>>(), vec!["ipi-1"]);
    }

    #[tokio::test]
    async fn test_failed_page_aborts_the_run() {
        let events = (0..6)
            .map(|i| event(at(19, 23 - i), EventKind::Created, &format!("ipi-{i}")))
            .collect();
        let provider = InMemory::new().with_events(events);
        provider.fail_event_page(2);
        let options = options(8, 3);

        let err = EventReconciler::new(&provider, &options)
            .reconcile_at(at(20, 12))
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(provider.calls().event_pages, 2);
    }

    #[test]
    fn test_malformed_events_become_anomalies() {
        let mut scan = Scan::default();
        scan.reject(&MalformedEvent {
            interpolated: "ci-bot created \"ipi-9\"".into(),
            reason: "invalid timestamp".into(),
        });
        scan.reject(&MalformedEvent {
            interpolated: String::new(),
            reason: "invalid timestamp".into(),
        });

        let result = scan.finish(StopReason::EmptyPage);

        assert_eq!(result.anomaly_counts()[&AnomalyKind::MalformedEvent], 2);
        assert_eq!(result.anomalies[0].device_id, "ipi-9");
        assert!(result.records.is_empty());
    }
}
