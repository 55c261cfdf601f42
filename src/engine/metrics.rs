use crate::binding_set::BindingSet;
use crate::core::Timestamp;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Quantities tracked while performance metrics are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Queries,
    Statements,
    Solutions,
}

/// Write-only counters plus the TSV side channel. Lines go to stdout:
/// one `LOG` line per significant operation and one `SOLUTION` line per
/// emitted answer. In compact mode, `LOG` lines are only written when a
/// logged quantity has changed since the previous line.
pub(crate) struct Metrics {
    enabled: bool,
    compact: bool,
    queries: AtomicU64,
    statements: AtomicU64,
    solutions: AtomicU64,
    changed: AtomicBool,
}

impl Metrics {
    pub fn new(enabled: bool, compact: bool) -> Self {
        Metrics {
            enabled,
            compact,
            queries: AtomicU64::new(0),
            statements: AtomicU64::new(0),
            solutions: AtomicU64::new(0),
            changed: AtomicBool::new(false),
        }
    }

    fn counter(&self, quantity: Quantity) -> &AtomicU64 {
        match quantity {
            Quantity::Queries => &self.queries,
            Quantity::Statements => &self.statements,
            Quantity::Solutions => &self.solutions,
        }
    }

    /// The current value of a counted quantity; `None` while metrics are
    /// disabled, as nothing is counted then.
    pub fn get(&self, quantity: Quantity) -> Option<u64> {
        self.enabled
            .then(|| self.counter(quantity).load(Ordering::Relaxed))
    }

    pub fn increment(&self, quantity: Quantity, log_change: bool) {
        if !self.enabled {
            return;
        }
        self.counter(quantity).fetch_add(1, Ordering::Relaxed);
        if log_change {
            self.changed.store(true, Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        self.queries.store(0, Ordering::Relaxed);
        self.statements.store(0, Ordering::Relaxed);
        self.solutions.store(0, Ordering::Relaxed);
    }

    pub fn log_header(&self) {
        if self.enabled {
            println!("LOG\ttime1,time2,Queries,Statements,Solutions");
        }
    }

    pub fn log_entry(&self, began: Timestamp, now: Timestamp) {
        if !self.enabled {
            return;
        }
        if self.compact && !self.changed.swap(false, Ordering::Relaxed) {
            return;
        }
        println!(
            "LOG\t{},{},{},{},{}",
            began,
            now,
            self.queries.load(Ordering::Relaxed),
            self.statements.load(Ordering::Relaxed),
            self.solutions.load(Ordering::Relaxed)
        );
    }

    pub fn log_solution(&self, now: Timestamp, solution: &BindingSet) {
        if self.enabled {
            println!("SOLUTION\t{now}\t{solution}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_count_nothing() {
        let metrics = Metrics::new(false, false);
        metrics.increment(Quantity::Queries, true);
        assert_eq!(metrics.get(Quantity::Queries), None);
    }

    #[test]
    fn enabled_metrics_count_and_reset() {
        let metrics = Metrics::new(true, false);
        metrics.increment(Quantity::Statements, false);
        metrics.increment(Quantity::Statements, false);
        assert_eq!(metrics.get(Quantity::Statements), Some(2));

        metrics.reset();
        assert_eq!(metrics.get(Quantity::Statements), Some(0));
    }
}
