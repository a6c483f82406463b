use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{AttrValue, Attributes, TelemetryEvent};

/// Aggregated timings for one duration name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DurationStat {
    pub count: u64,
    pub total_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
}

impl DurationStat {
    pub(crate) fn from_micros(count: u64, total_us: u64, max_us: u64) -> Self {
        let total_ms = total_us as f64 / 1000.0;
        let avg_ms = if count > 0 {
            total_ms / count as f64
        } else {
            0.0
        };
        Self {
            count,
            total_ms,
            max_ms: max_us as f64 / 1000.0,
            avg_ms,
        }
    }
}

/// Point-in-time copy of all metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub uptime_ms: u64,
    pub counters: BTreeMap<String, u64>,
    pub durations: BTreeMap<String, DurationStat>,
    /// Most recent events, oldest first
    pub recent_events: Vec<TelemetryEvent>,
    pub events_recorded: u64,
    pub events_evicted: u64,
    pub events_filtered: u64,
}

impl MetricsSnapshot {
    /// Counter value, zero when never incremented
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn duration(&self, name: &str) -> Option<&DurationStat> {
        self.durations.get(name)
    }

    /// Flatten into event attributes (`counter.<name>`, `duration.<name>.*`)
    pub fn to_attributes(&self) -> Attributes {
        let mut out = Attributes::new();
        out.insert("taken_at".into(), AttrValue::Time(self.taken_at));
        out.insert("uptime_ms".into(), self.uptime_ms.into());
        out.insert("events_recorded".into(), self.events_recorded.into());
        out.insert("events_evicted".into(), self.events_evicted.into());
        out.insert("events_filtered".into(), self.events_filtered.into());

        for (name, value) in &self.counters {
            out.insert(format!("counter.{}", name), (*value).into());
        }
        for (name, stat) in &self.durations {
            out.insert(format!("duration.{}.count", name), stat.count.into());
            out.insert(format!("duration.{}.avg_ms", name), stat.avg_ms.into());
            out.insert(format!("duration.{}.max_ms", name), stat.max_ms.into());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_stat_average() {
        let stat = DurationStat::from_micros(4, 10_000, 4_000);
        assert_eq!(stat.total_ms, 10.0);
        assert_eq!(stat.avg_ms, 2.5);
        assert_eq!(stat.max_ms, 4.0);

        let empty = DurationStat::from_micros(0, 0, 0);
        assert_eq!(empty.avg_ms, 0.0);
    }

    #[test]
    fn test_to_attributes_flattens() {
        let mut snap = MetricsSnapshot::default();
        snap.counters.insert("cache.hits".into(), 7);
        snap.durations
            .insert("op.lookup".into(), DurationStat::from_micros(2, 3_000, 2_000));

        let attrs = snap.to_attributes();
        assert_eq!(attrs.get("counter.cache.hits"), Some(&AttrValue::Int(7)));
        assert_eq!(
            attrs.get("duration.op.lookup.avg_ms"),
            Some(&AttrValue::Float(1.5))
        );
        assert_eq!(snap.counter("missing"), 0);
    }
}
