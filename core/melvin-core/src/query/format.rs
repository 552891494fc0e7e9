//! Canonical query text.
//!
//! Output always carries the domain prefix, the explicit aggregation and
//! quoted literals, so parsing it again yields an equal [`Query`] (given the
//! same `now`, relative times having been resolved already).

use super::ast::{FieldRef, Predicate, Query};
use crate::time::datetime_from_millis;
use crate::value::Value;
use std::fmt::{self, Write};

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.domain, self.aggregate, self.measure)?;
        for dimension in &self.dimensions {
            write!(f, " by {dimension}")?;
        }
        if let Some(filter) = &self.filter {
            write!(f, " where {filter}")?;
        }
        for transform in &self.transforms {
            write!(f, " | {transform}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // the parser builds left-deep trees; bracket anything else
            Predicate::And(left, right) => {
                write_operand(f, left, matches!(**left, Predicate::Or(..)))?;
                f.write_str(" and ")?;
                write_operand(f, right, matches!(**right, Predicate::Or(..) | Predicate::And(..)))
            }
            Predicate::Or(left, right) => {
                write_operand(f, left, false)?;
                f.write_str(" or ")?;
                write_operand(f, right, matches!(**right, Predicate::Or(..)))
            }
            Predicate::Not(inner) => {
                f.write_str("not ")?;
                write_operand(f, inner, matches!(**inner, Predicate::Or(..) | Predicate::And(..)))
            }
            Predicate::Compare { field, op, value } => {
                write!(f, "{} {} {}", field.name(), op.as_str(), literal(field, value))
            }
            Predicate::In { field, values } => {
                let items: Vec<String> = values.iter().map(|v| literal(field, v)).collect();
                write!(f, "{} in [{}]", field.name(), items.join(", "))
            }
            Predicate::Contains { field, value } => {
                write!(f, "{} contains {}", field.name(), literal(field, value))
            }
            Predicate::Matches { field, pattern } => {
                write!(f, "{} matches {}", field.name(), quote(pattern.as_str()))
            }
            Predicate::Between { field, low, high } => write!(
                f,
                "{} between {} and {}",
                field.name(),
                literal(field, low),
                literal(field, high)
            ),
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, predicate: &Predicate, bracket: bool) -> fmt::Result {
    if bracket {
        write!(f, "({predicate})")
    } else {
        write!(f, "{predicate}")
    }
}

/// Literal text that re-parses to `value` for `field`.
fn literal(field: &FieldRef, value: &Value) -> String {
    match (field, value) {
        (FieldRef::Time, Value::Int(ms)) => {
            quote(&datetime_from_millis(*ms).format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        }
        (_, Value::Int(i)) => i.to_string(),
        // keep full precision and the decimal point
        (_, Value::Decimal(d)) if d.fract() == 0.0 => format!("{d:.1}"),
        (_, Value::Decimal(d)) => format!("{d}"),
        (_, Value::Bool(b)) => b.to_string(),
        (_, Value::Str(s)) => quote(s),
        (_, other) => quote(&other.to_string()),
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Canonical text of `query`.
pub fn format_query(query: &Query) -> String {
    let mut out = String::new();
    // writing into a String cannot fail
    let _ = write!(out, "{query}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryParser;
    use crate::schema::{DimensionDef, DomainSchema, MeasureDef, SchemaRegistry};
    use crate::time::Granularity;
    use chrono::{TimeZone, Utc};

    fn registry() -> SchemaRegistry {
        let registry = SchemaRegistry::new();
        registry
            .register(
                DomainSchema::new("qa")
                    .with_measure(MeasureDef::integer("tokens"))
                    .with_measure(MeasureDef::decimal("cost"))
                    .with_measure(MeasureDef::count("queries"))
                    .with_dimension(DimensionDef::categorical("engine"))
                    .with_dimension(DimensionDef::multi_categorical("tags"))
                    .with_dimension(DimensionDef::boolean("cached"))
                    .with_dimension(DimensionDef::date("week", Granularity::Week)),
            )
            .unwrap();
        registry
    }

    fn round_trip(text: &str) {
        let registry = registry();
        let parser = QueryParser::new(&registry).with_now(Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap());
        let first = parser.parse(text).unwrap();
        let canonical = format_query(&first);
        let second = parser
            .parse(&canonical)
            .unwrap_or_else(|e| panic!("canonical text {canonical:?} failed: {e}"));
        assert_eq!(first, second, "canonical text: {canonical}");
    }

    #[test]
    fn test_simple_round_trip() {
        round_trip("tokens by engine");
        round_trip("qa.avg(cost) by engine by week | sort asc | top 3");
        round_trip("queries by week | rolling 14d sum | rate per_day | percent | normalize");
    }

    #[test]
    fn test_predicate_round_trip() {
        round_trip("tokens where engine = 'say \"hi\"' or not (cached = true and tokens >= 3)");
        round_trip("tokens where (engine = a or engine = b) and time between -7d and now");
        round_trip("cost where cost > 1.0 and cost < 2.75 and tags contains red");
        round_trip("tokens where engine in [a, b, 'c d'] and engine matches '^gpt-\\d'");
        round_trip("tokens where week >= 2024-W10 and week != -3w");
    }

    #[test]
    fn test_canonical_text() {
        let registry = registry();
        let q = QueryParser::new(&registry)
            .parse("tokens by engine where tokens > 5 | top 2")
            .unwrap();
        assert_eq!(
            format_query(&q),
            "qa.sum(tokens) by engine where tokens > 5 | top 2"
        );
    }
}
