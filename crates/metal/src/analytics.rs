//! Usage, cost and leak statistics over reconciled lifecycle records.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::CostModel;
use crate::events::{AnomalyKind, LifecycleRecord, Reconciliation};

const SECS_PER_HOUR: f64 = 3600.0;

/// Average uptime, or the lack of data to compute one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AverageUptime {
    /// No device had both a creation and a deletion.
    InsufficientData,
    /// Mean uptime of paired devices.
    Value(Duration),
}

/// Device holding a maximum, with the value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Extreme<T> {
    /// Device id.
    pub device_id: String,
    /// The maximal value.
    pub value: T,
}

/// Aggregated usage over one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    /// Creations per day, as counted from the event log.
    pub daily_creations: BTreeMap<NaiveDate, u64>,
    /// Sum of daily creations.
    pub total_instances: u64,
    /// Devices with both a creation and a deletion.
    pub paired_devices: usize,
    /// Sum of paired uptimes.
    pub total_uptime: Duration,
    /// Mean of paired uptimes.
    pub average_uptime: AverageUptime,
    /// Longest uptime; ties go to the smallest device id.
    pub max_uptime: Option<Extreme<Duration>>,
    /// Sum of paired costs.
    pub total_cost: f64,
    /// Highest cost; ties go to the smallest device id.
    pub max_cost: Option<Extreme<f64>>,
    /// Number of devices up longer than the leak threshold.
    pub leak_count: usize,
    /// Leaking device ids, sorted.
    pub leaks: Vec<String>,
    /// Pricing used.
    pub cost_model: CostModel,
    /// Excluded data, by kind.
    pub anomalies: BTreeMap<AnomalyKind, usize>,
}

/// Uptime in fractional hours.
#[must_use]
pub fn hours(uptime: Duration) -> f64 {
    uptime.as_secs_f64() / SECS_PER_HOUR
}

/// Every started hour is billed.
#[must_use]
pub fn cost_of(uptime: Duration, hourly_rate: f64) -> f64 {
    hours(uptime).ceil() * hourly_rate
}

/// Replace `current` if `value` is larger, or equal with a smaller id.
fn track_max<T: PartialOrd + Copy>(current: &mut Option<Extreme<T>>, device_id: &str, value: T) {
    let replace = match current {
        None => true,
        Some(best) => {
            value > best.value || (value == best.value && device_id < best.device_id.as_str())
        }
    };
    if replace {
        *current = Some(Extreme {
            device_id: device_id.to_string(),
            value,
        });
    }
}

impl UsageReport {
    /// Compute the report from lifecycle records and daily creation counts.
    ///
    /// Records without both timestamps, or with the deletion before the
    /// creation, only count through `daily_creations`.
    #[must_use]
    pub fn compute(
        records: &BTreeMap<String, LifecycleRecord>,
        daily_creations: &BTreeMap<NaiveDate, u64>,
        cost_model: CostModel,
    ) -> Self {
        let total_instances = daily_creations.values().sum();

        let mut paired_devices = 0usize;
        let mut total_uptime = Duration::ZERO;
        let mut total_cost = 0.0;
        let mut max_uptime = None;
        let mut max_cost = None;
        let mut leaks = Vec::new();

        for (device_id, record) in records {
            let Some(uptime) = record.uptime() else {
                continue;
            };
            let cost = cost_of(uptime, cost_model.hourly_rate);

            paired_devices += 1;
            total_uptime += uptime;
            total_cost += cost;

            track_max(&mut max_uptime, device_id, uptime);
            track_max(&mut max_cost, device_id, cost);

            if hours(uptime) > cost_model.leak_hours {
                leaks.push(device_id.clone());
            }
        }

        let average_uptime = match u32::try_from(paired_devices) {
            Ok(0) => AverageUptime::InsufficientData,
            Ok(n) => AverageUptime::Value(total_uptime / n),
            Err(_) => AverageUptime::Value(Duration::from_secs_f64(
                total_uptime.as_secs_f64() / paired_devices as f64,
            )),
        };

        Self {
            daily_creations: daily_creations.clone(),
            total_instances,
            paired_devices,
            total_uptime,
            average_uptime,
            max_uptime,
            total_cost,
            max_cost,
            leak_count: leaks.len(),
            leaks,
            cost_model,
            anomalies: BTreeMap::new(),
        }
    }

    /// Compute the report for a reconciliation run, including its anomalies.
    #[must_use]
    pub fn from_reconciliation(reconciliation: &Reconciliation, cost_model: CostModel) -> Self {
        Self {
            anomalies: reconciliation.anomaly_counts(),
            ..Self::compute(
                &reconciliation.records,
                &reconciliation.daily_creations,
                cost_model,
            )
        }
    }

    /// Human-readable summary.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();

        for (date, count) in &self.daily_creations {
            let _ = writeln!(out, "{date} num instances: {count}");
        }
        let _ = writeln!(out, "Total instances: {}", self.total_instances);
        out.push('\n');

        let average = match self.average_uptime {
            AverageUptime::InsufficientData => "no data".to_string(),
            AverageUptime::Value(d) => format_duration(d),
        };
        let _ = writeln!(out, "Average instance uptime: {average}");
        let _ = writeln!(
            out,
            "Num leaks (uptime > {}h): {}",
            self.cost_model.leak_hours, self.leak_count
        );
        out.push('\n');

        let _ = writeln!(
            out,
            "Total uptime:            {}",
            format_duration(self.total_uptime)
        );
        match &self.max_uptime {
            Some(max) => {
                let _ = writeln!(
                    out,
                    "Max instance uptime:     {} ({})",
                    format_duration(max.value),
                    max.device_id
                );
            }
            None => {
                let _ = writeln!(out, "Max instance uptime:     no data");
            }
        }
        out.push('\n');

        let _ = writeln!(out, "Total cost:              $ {:.0}", self.total_cost);
        match &self.max_cost {
            Some(max) => {
                let _ = writeln!(
                    out,
                    "Most expensive instance: {} ($ {:.0})",
                    max.device_id, max.value
                );
            }
            None => {
                let _ = writeln!(out, "Most expensive instance: no data");
            }
        }

        if !self.anomalies.is_empty() {
            out.push('\n');
            for (kind, count) in &self.anomalies {
                let _ = writeln!(out, "Excluded ({kind}): {count}");
            }
        }

        out
    }
}

/// Format as `1h2m3s`, dropping leading zero units.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}
