//! Router metrics.
//!
//! Lock-free counters, bumped from the dispatch path and from intent tasks.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by amount.
    pub fn add(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters maintained by the router.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Inbound messages handled
    pub messages: Counter,
    /// Error responses sent
    pub errors: Counter,
    /// Broadcasts accepted
    pub broadcasts: Counter,
    /// Context deliveries to listeners
    pub context_deliveries: Counter,
    /// Outbound messages the transport refused
    pub delivery_failures: Counter,
    /// Intents raised
    pub intents_raised: Counter,
    /// Raises that produced a result
    pub intents_resolved: Counter,
    /// Raises that failed
    pub intents_failed: Counter,
    /// Raises whose result wait expired
    pub intents_timed_out: Counter,
    /// App launches requested
    pub launches: Counter,
}

/// Point-in-time copy of [`RouterMetrics`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub messages: u64,
    pub errors: u64,
    pub broadcasts: u64,
    pub context_deliveries: u64,
    pub delivery_failures: u64,
    pub intents_raised: u64,
    pub intents_resolved: u64,
    pub intents_failed: u64,
    pub intents_timed_out: u64,
    pub launches: u64,
    /// Active instances at snapshot time
    pub active_instances: u64,
    /// Raises in flight at snapshot time
    pub raises_in_flight: u64,
}

impl RouterMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages: self.messages.get(),
            errors: self.errors.get(),
            broadcasts: self.broadcasts.get(),
            context_deliveries: self.context_deliveries.get(),
            delivery_failures: self.delivery_failures.get(),
            intents_raised: self.intents_raised.get(),
            intents_resolved: self.intents_resolved.get(),
            intents_failed: self.intents_failed.get(),
            intents_timed_out: self.intents_timed_out.get(),
            launches: self.launches.get(),
            active_instances: 0,
            raises_in_flight: 0,
        }
    }
}

impl MetricsSnapshot {
    /// Export in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let rows: [(&str, &str, &str, u64); 12] = [
            ("fdc3_messages_total", "counter", "Inbound messages handled", self.messages),
            ("fdc3_errors_total", "counter", "Error responses sent", self.errors),
            ("fdc3_broadcasts_total", "counter", "Broadcasts accepted", self.broadcasts),
            (
                "fdc3_context_deliveries_total",
                "counter",
                "Contexts delivered to listeners",
                self.context_deliveries,
            ),
            (
                "fdc3_delivery_failures_total",
                "counter",
                "Messages the transport refused",
                self.delivery_failures,
            ),
            ("fdc3_intents_raised_total", "counter", "Intents raised", self.intents_raised),
            ("fdc3_intents_resolved_total", "counter", "Intents resolved", self.intents_resolved),
            ("fdc3_intents_failed_total", "counter", "Intents failed", self.intents_failed),
            (
                "fdc3_intents_timed_out_total",
                "counter",
                "Intents timed out",
                self.intents_timed_out,
            ),
            ("fdc3_launches_total", "counter", "App launches requested", self.launches),
            ("fdc3_active_instances", "gauge", "Active instances", self.active_instances),
            ("fdc3_raises_in_flight", "gauge", "Raises in flight", self.raises_in_flight),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in rows {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} {}\n", name, kind));
            output.push_str(&format!("{} {}\n", name, value));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn test_snapshot() {
        let metrics = RouterMetrics::new();
        metrics.messages.inc();
        metrics.intents_raised.add(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages, 1);
        assert_eq!(snapshot.intents_raised, 2);
        assert_eq!(snapshot.errors, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = RouterMetrics::new();
        metrics.broadcasts.inc();
        let output = metrics.snapshot().export_prometheus();
        assert!(output.contains("# TYPE fdc3_broadcasts_total counter"));
        assert!(output.contains("fdc3_broadcasts_total 1"));
        assert!(output.contains("# TYPE fdc3_active_instances gauge"));
    }
}
