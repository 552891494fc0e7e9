//! Partial aggregates — mergeable summaries of a measure over a group.

use crate::schema::AggregateFunction;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Mergeable per-group summary of one measure.
///
/// Sums are exact decimals, so folding records one by one, merging index rows
/// in any order, or mixing both gives the same summary. `avg` is derived as
/// `sum / count` only when finalized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialAggregate {
    /// Records that carried a value for the measure
    pub count: u64,
    pub sum: Decimal,
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    /// Earliest record timestamp seen (epoch ms)
    pub first_ts: i64,
    /// Latest record timestamp seen (epoch ms)
    pub last_ts: i64,
}

impl Default for PartialAggregate {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialAggregate {
    pub const fn empty() -> Self {
        Self {
            count: 0,
            sum: Decimal::ZERO,
            min: None,
            max: None,
            first_ts: i64::MAX,
            last_ts: i64::MIN,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Folds one measure value observed at `ts`.
    pub fn observe(&mut self, value: Decimal, ts: i64) {
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.first_ts = self.first_ts.min(ts);
        self.last_ts = self.last_ts.max(ts);
    }

    pub fn merge(&mut self, other: &PartialAggregate) {
        if other.is_empty() {
            return;
        }
        self.count += other.count;
        self.sum = self.sum.saturating_add(other.sum);
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.first_ts = self.first_ts.min(other.first_ts);
        self.last_ts = self.last_ts.max(other.last_ts);
    }

    /// Exact value under `function`. `avg` has none; `None` also when no value
    /// was observed and the function has no natural zero.
    pub fn exact(&self, function: AggregateFunction) -> Option<Decimal> {
        match function {
            AggregateFunction::Count => Some(Decimal::from(self.count)),
            AggregateFunction::Sum => Some(self.sum),
            AggregateFunction::Avg => None,
            AggregateFunction::Min => self.min,
            AggregateFunction::Max => self.max,
        }
    }

    /// Final value under `function` as a float for the transform pipeline.
    pub fn finalize(&self, function: AggregateFunction) -> Option<f64> {
        match function {
            AggregateFunction::Avg if self.is_empty() => None,
            AggregateFunction::Avg => Some(self.sum.to_f64()? / self.count as f64),
            other => self.exact(other)?.to_f64(),
        }
    }

    /// Elapsed time between the first and last observation.
    pub fn span_ms(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.last_ts.saturating_sub(self.first_ts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::prelude::FromPrimitive;

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64(v).unwrap()
    }

    #[test]
    fn test_observe_and_finalize() {
        let mut agg = PartialAggregate::empty();
        for (v, ts) in [(3, 30), (1, 10), (8, 20)] {
            agg.observe(Decimal::from(v), ts);
        }
        assert_eq!(agg.finalize(AggregateFunction::Count), Some(3.0));
        assert_eq!(agg.finalize(AggregateFunction::Sum), Some(12.0));
        assert_eq!(agg.finalize(AggregateFunction::Avg), Some(4.0));
        assert_eq!(agg.finalize(AggregateFunction::Min), Some(1.0));
        assert_eq!(agg.finalize(AggregateFunction::Max), Some(8.0));
        assert_eq!(agg.exact(AggregateFunction::Avg), None);
        assert_eq!(agg.span_ms(), 20);
    }

    #[test]
    fn test_merge_matches_single_fold() {
        let values = [(dec(0.1), 1), (dec(0.2), 2), (dec(-1.5), 3), (dec(0.3), 4)];
        let mut whole = PartialAggregate::empty();
        values.iter().for_each(|(v, t)| whole.observe(*v, *t));

        let mut left = PartialAggregate::empty();
        let mut right = PartialAggregate::empty();
        values[..1].iter().for_each(|(v, t)| left.observe(*v, *t));
        values[1..].iter().for_each(|(v, t)| right.observe(*v, *t));

        // merge order must not matter
        let mut lr = left;
        lr.merge(&right);
        let mut rl = right;
        rl.merge(&left);
        assert_eq!(lr, whole);
        assert_eq!(rl, whole);
    }

    #[test]
    fn test_decimal_sum_is_order_independent() {
        // 0.1 + (0.2 + 0.3) != (0.1 + 0.2) + 0.3 in f64
        let mut sequential = PartialAggregate::empty();
        for v in [0.1, 0.2, 0.3] {
            sequential.observe(dec(v), 0);
        }
        let mut first = PartialAggregate::empty();
        first.observe(dec(0.1), 0);
        let mut rest = PartialAggregate::empty();
        rest.observe(dec(0.2), 0);
        rest.observe(dec(0.3), 0);
        rest.merge(&first);

        assert_eq!(sequential.sum, rest.sum);
        assert_eq!(sequential.finalize(AggregateFunction::Sum), Some(0.6));
        assert_eq!(rest.finalize(AggregateFunction::Sum), Some(0.6));
    }

    #[test]
    fn test_large_integer_sum_stays_exact() {
        let mut agg = PartialAggregate::empty();
        agg.observe(Decimal::from(i64::MAX / 2), 0);
        agg.observe(Decimal::from(i64::MAX / 2), 0);
        agg.observe(Decimal::ONE, 0);
        assert_eq!(agg.exact(AggregateFunction::Sum), Some(Decimal::from(i64::MAX)));
    }

    #[test]
    fn test_empty_finalize() {
        let agg = PartialAggregate::empty();
        assert_eq!(agg.finalize(AggregateFunction::Sum), Some(0.0));
        assert_eq!(agg.finalize(AggregateFunction::Avg), None);
        assert_eq!(agg.finalize(AggregateFunction::Max), None);
        assert_eq!(agg.span_ms(), 0);

        let mut merged = PartialAggregate::empty();
        merged.merge(&agg);
        assert!(merged.is_empty());
    }
}
