// ABOUTME: Lightweight per-query timing/row-count tracking, opt-in via ExtractConfig::profile
// ABOUTME: Flags N+1-shaped usage (many small fetch_fk_values/fetch_referencing_pks calls)

use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct QueryStats {
    pub table: String,
    pub operation: String,
    pub duration: Duration,
    pub rows_returned: usize,
}

#[derive(Debug, Default)]
struct ProfilerState {
    stats: Vec<QueryStats>,
    enabled: bool,
}

/// Collects query statistics across an extraction run. Cheap to hold
/// everywhere (an `Arc<QueryProfiler>`) since it's a no-op when disabled.
#[derive(Debug, Default)]
pub struct QueryProfiler {
    state: Mutex<ProfilerState>,
}

impl QueryProfiler {
    pub fn new(enabled: bool) -> Self {
        QueryProfiler {
            state: Mutex::new(ProfilerState {
                stats: Vec::new(),
                enabled,
            }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    pub fn record(&self, table: &str, operation: &str, duration: Duration, rows_returned: usize) {
        let mut state = self.state.lock().unwrap();
        if !state.enabled {
            return;
        }
        state.stats.push(QueryStats {
            table: table.to_string(),
            operation: operation.to_string(),
            duration,
            rows_returned,
        });
    }

    pub fn reset(&self) {
        self.state.lock().unwrap().stats.clear();
    }

    pub fn summary(&self) -> ProfileSummary {
        let state = self.state.lock().unwrap();
        ProfileSummary::from_stats(state.stats.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableStats {
    pub query_count: usize,
    pub total_duration: Duration,
    pub total_rows: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileSummary {
    pub total_queries: usize,
    pub total_duration: Duration,
    pub total_rows: usize,
    by_table: std::collections::HashMap<String, TableStats>,
    by_operation: std::collections::HashMap<String, TableStats>,
    slowest: Vec<QueryStats>,
}

impl ProfileSummary {
    fn from_stats(stats: Vec<QueryStats>) -> Self {
        let mut summary = ProfileSummary {
            total_queries: stats.len(),
            ..Default::default()
        };

        for stat in &stats {
            summary.total_duration += stat.duration;
            summary.total_rows += stat.rows_returned;

            let table_entry = summary.by_table.entry(stat.table.clone()).or_default();
            table_entry.query_count += 1;
            table_entry.total_duration += stat.duration;
            table_entry.total_rows += stat.rows_returned;

            let op_entry = summary.by_operation.entry(stat.operation.clone()).or_default();
            op_entry.query_count += 1;
            op_entry.total_duration += stat.duration;
            op_entry.total_rows += stat.rows_returned;
        }

        let mut sorted = stats;
        sorted.sort_by(|a, b| b.duration.cmp(&a.duration));
        summary.slowest = sorted;
        summary
    }

    pub fn avg_duration(&self) -> Duration {
        if self.total_queries == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.total_queries as u32
        }
    }

    pub fn slowest_queries(&self, n: usize) -> &[QueryStats] {
        &self.slowest[..n.min(self.slowest.len())]
    }

    pub fn table_stats(&self, table: &str) -> Option<&TableStats> {
        self.by_table.get(table)
    }

    pub fn operation_stats(&self, operation: &str) -> Option<&TableStats> {
        self.by_operation.get(operation)
    }

    /// Renders a human-readable report, including a warning for any
    /// fetch-style operation called more than 10 times (an N+1 smell).
    pub fn format_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "queries: {} total, {:.2}ms elapsed, {} rows fetched, {:.2}ms avg\n",
            self.total_queries,
            self.total_duration.as_secs_f64() * 1000.0,
            self.total_rows,
            self.avg_duration().as_secs_f64() * 1000.0,
        ));

        for (op, stats) in &self.by_operation {
            if matches!(op.as_str(), "fetch_fk_values" | "fetch_referencing_pks") && stats.query_count > 10 {
                out.push_str(&format!(
                    "  warning: {} called {} times, consider batching (possible N+1)\n",
                    op, stats.query_count
                ));
            }
        }

        for stat in self.slowest_queries(5) {
            out.push_str(&format!(
                "  slow: {}.{} took {:.2}ms ({} rows)\n",
                stat.table,
                stat.operation,
                stat.duration.as_secs_f64() * 1000.0,
                stat.rows_returned
            ));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_profiler_records_nothing() {
        let profiler = QueryProfiler::new(false);
        profiler.record("users", "fetch_by_pk", Duration::from_millis(5), 1);
        assert_eq!(profiler.summary().total_queries, 0);
    }

    #[test]
    fn enabled_profiler_aggregates_by_table() {
        let profiler = QueryProfiler::new(true);
        profiler.record("users", "fetch_by_pk", Duration::from_millis(5), 1);
        profiler.record("users", "fetch_by_pk", Duration::from_millis(15), 2);
        let summary = profiler.summary();
        assert_eq!(summary.total_queries, 2);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.table_stats("users").unwrap().query_count, 2);
    }

    #[test]
    fn flags_n_plus_one_pattern() {
        let profiler = QueryProfiler::new(true);
        for _ in 0..11 {
            profiler.record("orders", "fetch_fk_values", Duration::from_micros(100), 1);
        }
        let summary = profiler.summary();
        assert!(summary.format_summary().contains("possible N+1"));
    }
}
