use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-(guard, date) performance row maintained by the aggregator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub guard_id: String,
    pub date: NaiveDate,
    pub total_points: u64,
    pub scanned_points: u64,
    pub missed_points: u64,
    pub performance_score: f64,
}

impl PerformanceMetric {
    pub fn empty(guard_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            guard_id: guard_id.into(),
            date,
            total_points: 0,
            scanned_points: 0,
            missed_points: 0,
            performance_score: 0.0,
        }
    }

    pub fn refresh_score(&mut self) {
        self.performance_score = performance_score(self.scanned_points, self.total_points);
    }
}

/// `scanned / total`, clamped to `[0, 1]`; 0 when `total == 0`.
pub fn performance_score(scanned: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (scanned as f64 / total as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bounds() {
        assert_eq!(performance_score(0, 0), 0.0);
        assert_eq!(performance_score(5, 0), 0.0);
        assert_eq!(performance_score(3, 4), 0.75);
        assert_eq!(performance_score(9, 4), 1.0);
    }
}
