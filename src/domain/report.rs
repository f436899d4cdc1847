//! Per-calendar-day aggregate produced by the Orchestrator (§3, §4.11).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub count: usize,
}

impl PriceStats {
    /// Open Question (spec.md §9) resolved: exact median over the prices
    /// collected in the run. Runs are bounded by a daily batch of a single
    /// metro, so an exact sort is cheap; no streaming digest is needed
    /// (see DESIGN.md).
    pub fn from_amounts(amounts: &[f64]) -> Self {
        if amounts.is_empty() {
            return Self::default();
        }
        let mut sorted = amounts.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };
        Self {
            min: sorted[0],
            max: sorted[count - 1],
            avg: sum / count as f64,
            median,
            count,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total_processed: u64,
    pub new_properties: u64,
    pub updated_properties: u64,
    pub by_source: HashMap<String, u64>,
    pub by_zipcode: HashMap<String, u64>,
    pub price_stats: PriceStats,
    pub data_quality_score: f32,
    pub error_count: u64,
    pub warning_count: u64,
    pub duration_seconds: f64,
    pub api_requests: u64,
    pub rate_limit_hits: u64,
    pub raw_metrics: HashMap<String, f64>,
}

impl DailyReport {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            ..Default::default()
        }
    }

    pub fn record_source(&mut self, source: &str) {
        *self.by_source.entry(source.to_string()).or_insert(0) += 1;
    }

    pub fn record_zipcode(&mut self, zip: &str) {
        *self.by_zipcode.entry(zip.to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_count_is_middle_element() {
        let stats = PriceStats::from_amounts(&[100.0, 300.0, 200.0]);
        assert_eq!(stats.median, 200.0);
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 300.0);
    }

    #[test]
    fn median_of_even_count_is_averaged() {
        let stats = PriceStats::from_amounts(&[100.0, 200.0, 300.0, 400.0]);
        assert_eq!(stats.median, 250.0);
    }

    #[test]
    fn empty_amounts_yield_default_stats() {
        let stats = PriceStats::from_amounts(&[]);
        assert_eq!(stats.count, 0);
    }
}
