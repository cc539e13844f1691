//! Scope timing for task bodies and backend calls.
//!
//! Compiled to no-ops unless the `profiler` feature is enabled. Scopes are
//! named statically (e.g. `"linear::forward"`) and aggregated into a global
//! table that tests and tools can drain with [`take_report`].

use std::time::Duration;

#[cfg(feature = "profiler")]
use std::collections::HashMap;
#[cfg(feature = "profiler")]
use std::sync::{Mutex, OnceLock};
#[cfg(feature = "profiler")]
use std::time::Instant;

#[cfg(feature = "profiler")]
use serde::Serialize;

#[cfg(feature = "profiler")]
static TABLE: OnceLock<Mutex<HashMap<&'static str, (u64, Duration)>>> = OnceLock::new();

#[cfg(feature = "profiler")]
fn table() -> &'static Mutex<HashMap<&'static str, (u64, Duration)>> {
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Guard that records the elapsed time of one named scope on drop.
pub struct ScopeGuard {
    #[cfg(feature = "profiler")]
    scope: Option<(&'static str, Instant)>,
}

/// Opens a named timing scope; the measurement ends when the guard drops.
pub fn scope(name: &'static str) -> ScopeGuard {
    #[cfg(feature = "profiler")]
    {
        ScopeGuard {
            scope: Some((name, Instant::now())),
        }
    }
    #[cfg(not(feature = "profiler"))]
    {
        let _ = name;
        ScopeGuard {}
    }
}

#[cfg(feature = "profiler")]
impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some((name, start)) = self.scope.take() {
            let elapsed = start.elapsed();
            let mut table = table().lock().expect("profiling table poisoned");
            let entry = table.entry(name).or_insert((0, Duration::ZERO));
            entry.0 += 1;
            entry.1 += elapsed;
        }
    }
}

/// One aggregated row of the profiling report.
#[cfg_attr(feature = "profiler", derive(Serialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRow {
    pub name: &'static str,
    pub calls: u64,
    pub total: Duration,
}

/// Drains the aggregate table, returning rows sorted by scope name.
///
/// Always empty when the `profiler` feature is disabled.
pub fn take_report() -> Vec<ScopeRow> {
    #[cfg(feature = "profiler")]
    {
        let mut table = table().lock().expect("profiling table poisoned");
        let mut rows: Vec<ScopeRow> = table
            .drain()
            .map(|(name, (calls, total))| ScopeRow { name, calls, total })
            .collect();
        rows.sort_by_key(|row| row.name);
        rows
    }
    #[cfg(not(feature = "profiler"))]
    {
        Vec::new()
    }
}

#[cfg(all(test, feature = "profiler"))]
mod tests {
    use super::{scope, take_report};

    #[test]
    fn scopes_aggregate_by_name() {
        let _ = take_report();
        {
            let _a = scope("unit.alpha");
        }
        {
            let _a = scope("unit.alpha");
        }
        {
            let _b = scope("unit.beta");
        }
        let report = take_report();
        let alpha = report
            .iter()
            .find(|row| row.name == "unit.alpha")
            .expect("alpha row");
        assert_eq!(alpha.calls, 2);
        assert!(report.iter().any(|row| row.name == "unit.beta"));
    }
}
