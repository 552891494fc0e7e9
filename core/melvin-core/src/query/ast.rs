//! Structured query representation.

use crate::schema::AggregateFunction;
use crate::time::{RateUnit, Span};
use crate::value::Value;
use regex::Regex;
use std::fmt;

/// A validated dimensional query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub domain: String,
    pub measure: String,
    pub aggregate: AggregateFunction,
    /// Grouping dimensions, in output order
    pub dimensions: Vec<String>,
    pub filter: Option<Predicate>,
    /// Applied in order after aggregation
    pub transforms: Vec<Transform>,
}

impl Query {
    /// Every field name the filter references.
    pub fn filter_fields(&self) -> Vec<&FieldRef> {
        let mut fields = Vec::new();
        if let Some(filter) = &self.filter {
            filter.collect_fields(&mut fields);
        }
        fields
    }
}

/// A filter field resolved against the schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    Measure(String),
    Dimension(String),
    /// The record timestamp
    Time,
}

impl FieldRef {
    pub fn name(&self) -> &str {
        match self {
            FieldRef::Measure(n) | FieldRef::Dimension(n) => n,
            FieldRef::Time => crate::schema::TIME_FIELD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Ge => ">=",
            CompareOp::Le => "<=",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            ">" => Some(CompareOp::Gt),
            "<" => Some(CompareOp::Lt),
            ">=" => Some(CompareOp::Ge),
            "<=" => Some(CompareOp::Le),
            _ => None,
        }
    }
}

/// Compiled `matches` pattern; equality follows the pattern text.
#[derive(Debug, Clone)]
pub struct Pattern(pub Regex);

impl Pattern {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

/// Filter predicate tree. Literals are already typed for their field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Compare {
        field: FieldRef,
        op: CompareOp,
        value: Value,
    },
    In {
        field: FieldRef,
        values: Vec<Value>,
    },
    Contains {
        field: FieldRef,
        value: Value,
    },
    Matches {
        field: FieldRef,
        pattern: Pattern,
    },
    /// Inclusive on both ends
    Between {
        field: FieldRef,
        low: Value,
        high: Value,
    },
}

impl Predicate {
    pub fn and(left: Predicate, right: Predicate) -> Self {
        Predicate::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Predicate, right: Predicate) -> Self {
        Predicate::Or(Box::new(left), Box::new(right))
    }

    pub fn negate(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldRef>) {
        match self {
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_fields(out);
                r.collect_fields(out);
            }
            Predicate::Not(p) => p.collect_fields(out),
            Predicate::Compare { field, .. }
            | Predicate::In { field, .. }
            | Predicate::Contains { field, .. }
            | Predicate::Matches { field, .. }
            | Predicate::Between { field, .. } => out.push(field),
        }
    }

    /// Top-level conjuncts (`a and b and c` → `[a, b, c]`).
    pub fn conjuncts(&self) -> Vec<&Predicate> {
        match self {
            Predicate::And(l, r) => {
                let mut parts = l.conjuncts();
                parts.extend(r.conjuncts());
                parts
            }
            other => vec![other],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RollingFunction {
    Avg,
    Sum,
}

impl RollingFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RollingFunction::Avg => "avg",
            RollingFunction::Sum => "sum",
        }
    }
}

/// Post-aggregation pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Sort(SortOrder),
    /// Always positive
    Top(usize),
    Bottom(usize),
    Rolling {
        window: Span,
        function: RollingFunction,
    },
    Rate(RateUnit),
    Percent,
    Normalize,
}

impl Transform {
    /// Keyword the transform is written with.
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Sort(_) => "sort",
            Transform::Top(_) => "top",
            Transform::Bottom(_) => "bottom",
            Transform::Rolling { .. } => "rolling",
            Transform::Rate(_) => "rate",
            Transform::Percent => "percent",
            Transform::Normalize => "normalize",
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Sort(order) => write!(f, "sort {}", order.as_str()),
            Transform::Top(n) => write!(f, "top {n}"),
            Transform::Bottom(n) => write!(f, "bottom {n}"),
            Transform::Rolling { window, function } => {
                write!(f, "rolling {window} {}", function.as_str())
            }
            Transform::Rate(unit) => write!(f, "rate per_{}", unit.as_str()),
            Transform::Percent => f.write_str("percent"),
            Transform::Normalize => f.write_str("normalize"),
        }
    }
}
