//! Post-aggregation transforms.

use crate::error::{MelvinError, MelvinResult};
use crate::query::{RollingFunction, SortOrder, Transform};
use crate::schema::DomainSchema;
use crate::time::{Granularity, RateUnit, Span};
use crate::value::{GroupKey, Value};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// One finalized group on its way through the transform pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub key: GroupKey,
    pub value: Option<f64>,
    /// Exact aggregate; cleared once a transform rewrites `value`
    pub exact: Option<Decimal>,
    /// `last_ts - first_ts` of the group's records
    pub span_ms: i64,
}

/// Temporal grouping column: position in the key and its granularity.
#[derive(Debug, Clone, Copy)]
pub struct TimeAxis {
    pub position: usize,
    pub granularity: Granularity,
}

impl TimeAxis {
    /// First temporal dimension of the grouping, if any.
    pub fn of(schema: &DomainSchema, dimensions: &[String]) -> Option<Self> {
        dimensions.iter().enumerate().find_map(|(position, name)| {
            let dim = schema.dimension(name)?;
            Some(TimeAxis {
                position,
                granularity: dim.granularity.filter(|_| dim.is_temporal())?,
            })
        })
    }

    fn period<'a>(&self, key: &'a GroupKey) -> Option<&'a str> {
        key.get(self.position)?.as_str()
    }

    fn start(&self, key: &GroupKey) -> Option<i64> {
        self.granularity.period_start(self.period(key)?)
    }
}

/// Applies `transforms` in order.
pub fn apply(buckets: Vec<Bucket>, transforms: &[Transform], axis: Option<TimeAxis>) -> MelvinResult<Vec<Bucket>> {
    let mut buckets = buckets;
    let mut sorted: Option<SortOrder> = None;
    for transform in transforms {
        match *transform {
            Transform::Sort(order) => {
                sort(&mut buckets, order);
                sorted = Some(order);
            }
            Transform::Top(n) | Transform::Bottom(n) if n == 0 => {
                return Err(MelvinError::InvalidArgument(format!(
                    "{} requires a positive count",
                    transform.name()
                )));
            }
            Transform::Top(n) => {
                if sorted.is_none() {
                    sort(&mut buckets, SortOrder::Desc);
                    sorted = Some(SortOrder::Desc);
                }
                buckets.truncate(n);
            }
            Transform::Bottom(n) => {
                if sorted.is_none() {
                    sort(&mut buckets, SortOrder::Asc);
                    sorted = Some(SortOrder::Asc);
                    buckets.truncate(n);
                } else {
                    let skip = buckets.len().saturating_sub(n);
                    buckets.drain(..skip);
                }
            }
            Transform::Rolling { window, function } => {
                let axis = axis.ok_or_else(|| MelvinError::TransformRequiresTemporalGrouping {
                    transform: transform.to_string(),
                })?;
                rolling(&mut buckets, axis, window, function);
            }
            Transform::Rate(unit) => rate(&mut buckets, axis, unit),
            Transform::Percent => {
                let total: f64 = buckets.iter().filter_map(|b| b.value).sum();
                scale(&mut buckets, total, 100.0);
            }
            Transform::Normalize => {
                let max = buckets
                    .iter()
                    .filter_map(|b| b.value)
                    .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
                    .unwrap_or(0.0);
                scale(&mut buckets, max, 1.0);
            }
        }
    }
    Ok(buckets)
}

/// Stable sort by value; ties by group key ascending. Missing values rank lowest.
fn sort(buckets: &mut [Bucket], order: SortOrder) {
    buckets.sort_by(|a, b| {
        let by_value = match (a.value, b.value) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        };
        let by_value = match order {
            SortOrder::Asc => by_value,
            SortOrder::Desc => by_value.reverse(),
        };
        by_value.then_with(|| a.key.cmp(&b.key))
    });
}

/// Windowed aggregate per series over periods starting in `(t - window, t]`.
fn rolling(buckets: &mut [Bucket], axis: TimeAxis, window: Span, function: RollingFunction) {
    let width = window.millis();
    let series_of = |key: &GroupKey| -> Vec<Value> {
        key.iter()
            .enumerate()
            .filter(|(i, _)| *i != axis.position)
            .map(|(_, v)| v.clone())
            .collect()
    };

    let mut by_series: ahash::AHashMap<Vec<Value>, Vec<(i64, usize)>> = ahash::AHashMap::new();
    for (i, bucket) in buckets.iter().enumerate() {
        if let Some(start) = axis.start(&bucket.key) {
            by_series.entry(series_of(&bucket.key)).or_default().push((start, i));
        }
    }

    let mut results: Vec<(usize, Option<f64>)> = Vec::with_capacity(buckets.len());
    for points in by_series.values_mut() {
        points.sort_unstable();
        let mut lo = 0;
        for hi in 0..points.len() {
            let t = points[hi].0;
            while lo < hi && points[lo].0 <= t.saturating_sub(width) {
                lo += 1;
            }
            let values: Vec<f64> = points[lo..=hi]
                .iter()
                .filter_map(|&(_, idx)| buckets[idx].value)
                .collect();
            let value = match (function, values.len()) {
                (RollingFunction::Avg, 0) => None,
                (RollingFunction::Avg, n) => Some(values.iter().sum::<f64>() / n as f64),
                (RollingFunction::Sum, _) => Some(values.iter().sum()),
            };
            results.push((points[hi].1, value));
        }
    }
    for (idx, value) in results {
        buckets[idx].value = value;
        buckets[idx].exact = None;
    }
}

/// Divides by elapsed time in `unit`: the period length when grouped by time,
/// otherwise the group's observed span. A zero span leaves the value as is.
fn rate(buckets: &mut [Bucket], axis: Option<TimeAxis>, unit: RateUnit) {
    let unit_ms = unit.millis() as f64;
    for bucket in buckets.iter_mut() {
        let elapsed = match axis {
            Some(axis) => axis
                .period(&bucket.key)
                .and_then(|p| axis.granularity.period_length(p))
                .unwrap_or(0),
            None => bucket.span_ms,
        };
        if elapsed > 0
            && let Some(v) = bucket.value
        {
            bucket.value = Some(v / (elapsed as f64 / unit_ms));
            bucket.exact = None;
        }
    }
}

fn scale(buckets: &mut [Bucket], denominator: f64, factor: f64) {
    for bucket in buckets.iter_mut() {
        bucket.exact = None;
        bucket.value = bucket.value.map(|v| {
            if denominator == 0.0 {
                0.0
            } else {
                v / denominator * factor
            }
        });
    }
}
