//! Response latency statistics for a replay run.

use serde::Serialize;
use std::time::Duration;

/// Aggregated send-to-response latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    #[serde(serialize_with = "as_millis")]
    pub avg: Duration,
    #[serde(serialize_with = "as_millis")]
    pub min: Duration,
    #[serde(serialize_with = "as_millis")]
    pub max: Duration,
    #[serde(serialize_with = "as_millis")]
    pub p50: Duration,
}

/// Collects latencies of matched responses.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    latencies: Vec<Duration>,
}

impl LatencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, latency: Duration) {
        self.latencies.push(latency);
    }

    pub fn count(&self) -> usize {
        self.latencies.len()
    }

    /// `None` until at least one response was matched.
    pub fn stats(&self) -> Option<LatencyStats> {
        if self.latencies.is_empty() {
            return None;
        }

        let mut sorted = self.latencies.clone();
        sorted.sort();

        Some(LatencyStats {
            count: sorted.len(),
            avg: avg_duration(&sorted),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: sorted[(sorted.len() - 1) / 2],
        })
    }
}

/// Formats a duration as a human-friendly string.
/// Under 1s: "450ms", at or above 1s: "1.5s".
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}

fn avg_duration(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    let sum: Duration = durations.iter().sum();
    sum / durations.len() as u32
}

fn as_millis<S: serde::Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(d.as_micros() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_has_no_stats() {
        assert!(LatencyTracker::new().stats().is_none());
    }

    #[test]
    fn stats_over_several_responses() {
        let mut tracker = LatencyTracker::new();
        for ms in [300, 100, 200, 400] {
            tracker.record(Duration::from_millis(ms));
        }

        let stats = tracker.stats().unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.avg, Duration::from_millis(250));
        assert_eq!(stats.min, Duration::from_millis(100));
        assert_eq!(stats.max, Duration::from_millis(400));
        assert_eq!(stats.p50, Duration::from_millis(200));
    }

    #[test]
    fn format_duration_millis() {
        assert_eq!(format_duration(Duration::from_millis(0)), "0ms");
        assert_eq!(format_duration(Duration::from_millis(450)), "450ms");
        assert_eq!(format_duration(Duration::from_millis(999)), "999ms");
    }

    #[test]
    fn format_duration_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1000)), "1.0s");
        assert_eq!(format_duration(Duration::from_millis(3750)), "3.8s");
    }

    #[test]
    fn stats_serialize_as_milliseconds() {
        let mut tracker = LatencyTracker::new();
        tracker.record(Duration::from_millis(1500));
        let json = serde_json::to_value(tracker.stats().unwrap()).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["avg"], 1500.0);
    }
}
