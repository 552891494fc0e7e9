//! Query Parser — text → validated [`Query`].
//!
//! ```text
//! [domain.]measure | [domain.]agg(measure)  [by dim[, dim]]*  [where predicate]  [| transform]*
//! ```
//!
//! Names are resolved against the schema registry while parsing, literals are
//! typed for the field they are compared with, and transform arguments are
//! checked here so that an accepted query always plans and runs.

use super::ast::{
    CompareOp, FieldRef, Pattern, Predicate, Query, RollingFunction, SortOrder, Transform,
};
use super::lexer::{Token, TokenKind, tokenize};
use crate::error::{FieldKind, MelvinError, MelvinResult};
use crate::schema::{AggregateFunction, DomainSchema, FieldType, SchemaRegistry, TIME_FIELD};
use crate::suggest::closest_match;
use crate::time::{Granularity, RateUnit, Span, parse_time_literal};
use crate::value::Value;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;

const CLAUSE_KEYWORDS: &[&str] = &["by", "where", "and", "or"];
const OPERATOR_KEYWORDS: &[&str] = &["in", "contains", "matches", "between"];
const TRANSFORMS: &[&str] = &["sort", "top", "bottom", "rolling", "rate", "percent", "normalize"];
const AGGREGATES: &[&str] = &["count", "sum", "avg", "min", "max"];
const RATE_UNITS: &[&str] = &["per_second", "per_minute", "per_hour", "per_day", "per_week"];

/// Parser bound to a registry and a reference time for relative literals.
pub struct QueryParser<'a> {
    registry: &'a SchemaRegistry,
    default_domain: Option<&'a str>,
    now: DateTime<Utc>,
}

impl<'a> QueryParser<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            default_domain: None,
            now: Utc::now(),
        }
    }

    /// Domain assumed when the query text has no `domain.` prefix.
    pub fn with_default_domain(mut self, domain: Option<&'a str>) -> Self {
        self.default_domain = domain;
        self
    }

    /// Time `now` and relative literals (`-7d`) resolve against.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn parse(&self, text: &str) -> MelvinResult<Query> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(MelvinError::syntax("empty query", 0));
        }
        let mut state = ParseState {
            parser: self,
            tokens,
            pos: 0,
            end: text.len(),
        };
        state.query()
    }
}

struct ParseState<'p, 'a> {
    parser: &'p QueryParser<'a>,
    tokens: Vec<Token>,
    pos: usize,
    /// Position reported for errors at end of input
    end: usize,
}

impl ParseState<'_, '_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_word(&self) -> Option<&str> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Word(w)) => Some(w.as_str()),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn threshold(&self) -> f64 {
        self.parser.registry.suggestion_threshold()
    }

    fn expected(&self, what: &str) -> MelvinError {
        match self.peek() {
            Some(token) => MelvinError::syntax(
                format!("expected {what}, found {}", token.describe()),
                token.position,
            ),
            None => MelvinError::syntax(format!("expected {what} at end of query"), self.end),
        }
    }

    fn unexpected(&self, token: &Token, keywords: &[&str]) -> MelvinError {
        let suggestion = match &token.kind {
            TokenKind::Word(w) => closest_match(w, keywords.iter().copied(), self.threshold()),
            _ => None,
        };
        MelvinError::SyntaxError {
            message: format!("unexpected {}", token.describe()),
            position: token.position,
            suggestion,
        }
    }

    fn unknown_keyword(&self, what: &str, word: &str, position: usize, keywords: &[&str]) -> MelvinError {
        MelvinError::SyntaxError {
            message: format!("unknown {what} '{word}'"),
            position,
            suggestion: closest_match(word, keywords.iter().copied(), self.threshold()),
        }
    }

    fn expect_word(&mut self, what: &str) -> MelvinResult<(String, usize)> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Word(w),
                position,
            }) => {
                let found = (w.clone(), *position);
                self.pos += 1;
                Ok(found)
            }
            _ => Err(self.expected(what)),
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> MelvinResult<()> {
        if self.peek().is_some_and(|t| t.kind == kind) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.expected(what))
        }
    }

    fn query(&mut self) -> MelvinResult<Query> {
        let (head, head_pos) = self.expect_word("a measure")?;
        let (prefix, head_name) = match head.split_once('.') {
            Some((domain, rest)) => (Some(domain), rest),
            None => (None, head.as_str()),
        };

        let (aggregate_word, measure_name) =
            if self.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
                self.advance();
                let (measure, _) = self.expect_word("a measure name")?;
                self.expect(TokenKind::RParen, "')'")?;
                (Some(head_name.to_string()), measure)
            } else {
                (None, head_name.to_string())
            };

        let schema = self.resolve_domain(prefix, &measure_name, head_pos)?;
        let Some(measure) = schema.measure(&measure_name) else {
            return Err(self
                .parser
                .registry
                .unknown_field(&schema, FieldKind::Measure, &measure_name));
        };

        let aggregate = match aggregate_word {
            Some(word) => {
                let function = AggregateFunction::parse(&word).ok_or_else(|| {
                    self.unknown_keyword("aggregation", &word, head_pos, AGGREGATES)
                })?;
                if !measure.permits(function) {
                    return Err(MelvinError::InvalidArgument(format!(
                        "aggregation '{function}' is not permitted for measure '{measure_name}'"
                    )));
                }
                function
            }
            None => measure.default_aggregation,
        };

        let mut dimensions: Vec<String> = Vec::new();
        let mut filter = None;
        let mut transforms = Vec::new();

        while let Some(token) = self.peek().cloned() {
            match &token.kind {
                TokenKind::Word(w) if w == "by" => {
                    if !transforms.is_empty() {
                        return Err(MelvinError::syntax("'by' must come before transforms", token.position));
                    }
                    self.advance();
                    self.dimension_list(&schema, &mut dimensions)?;
                }
                TokenKind::Word(w) if w == "where" => {
                    if filter.is_some() {
                        return Err(MelvinError::syntax("duplicate 'where' clause", token.position));
                    }
                    if !transforms.is_empty() {
                        return Err(MelvinError::syntax("'where' must come before transforms", token.position));
                    }
                    self.advance();
                    filter = Some(self.predicate(&schema)?);
                }
                TokenKind::Pipe => {
                    self.advance();
                    transforms.push(self.transform(&schema, &dimensions)?);
                }
                TokenKind::Word(_) if !transforms.is_empty() => {
                    return Err(self.unexpected(&token, &["|"]));
                }
                _ => return Err(self.unexpected(&token, CLAUSE_KEYWORDS)),
            }
        }

        Ok(Query {
            domain: schema.domain.clone(),
            measure: measure_name,
            aggregate,
            dimensions,
            filter,
            transforms,
        })
    }

    /// Picks the schema a query runs against.
    ///
    /// An explicit prefix must name a registered domain. Without one, the
    /// configured default wins, then the only domain declaring the measure.
    fn resolve_domain(
        &self,
        prefix: Option<&str>,
        measure: &str,
        position: usize,
    ) -> MelvinResult<Arc<DomainSchema>> {
        let registry = self.parser.registry;
        if let Some(domain) = prefix {
            if registry.contains(domain) {
                return registry.get(domain);
            }
            let domains = registry.domains();
            return Err(MelvinError::SyntaxError {
                message: format!("unknown domain '{domain}'; queries cover exactly one registered domain"),
                position,
                suggestion: closest_match(domain, domains.iter().map(String::as_str), self.threshold()),
            });
        }
        if let Some(domain) = self.parser.default_domain
            && registry.contains(domain)
        {
            return registry.get(domain);
        }

        let domains = registry.domains();
        let schemas: Vec<Arc<DomainSchema>> = domains
            .iter()
            .filter_map(|d| registry.get(d).ok())
            .collect();
        let owners: Vec<&Arc<DomainSchema>> = schemas
            .iter()
            .filter(|s| s.measure(measure).is_some())
            .collect();

        match (owners.as_slice(), schemas.as_slice()) {
            ([only], _) => Ok(Arc::clone(only)),
            ([], [only]) => Ok(Arc::clone(only)),
            ([], []) => Err(MelvinError::UnknownDomain(
                self.parser.default_domain.unwrap_or("(none registered)").to_string(),
            )),
            ([], all) => {
                let names: Vec<&str> = all
                    .iter()
                    .flat_map(|s| s.measures.keys().map(String::as_str))
                    .collect();
                Err(MelvinError::UnknownField {
                    kind: FieldKind::Measure,
                    name: measure.to_string(),
                    domain: domains.join(", "),
                    suggestion: closest_match(measure, names, self.threshold()),
                })
            }
            (many, _) => {
                let names: Vec<&str> = many.iter().map(|s| s.domain.as_str()).collect();
                Err(MelvinError::syntax(
                    format!(
                        "measure '{measure}' exists in several domains ({}); prefix it with one",
                        names.join(", ")
                    ),
                    position,
                ))
            }
        }
    }

    fn dimension_list(&mut self, schema: &DomainSchema, dimensions: &mut Vec<String>) -> MelvinResult<()> {
        loop {
            let (name, position) = self.expect_word("a dimension")?;
            if schema.dimension(&name).is_none() {
                return Err(self
                    .parser
                    .registry
                    .unknown_field(schema, FieldKind::Dimension, &name));
            }
            if dimensions.contains(&name) {
                return Err(MelvinError::syntax(format!("dimension '{name}' listed twice"), position));
            }
            dimensions.push(name);
            if self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                self.advance();
            } else {
                return Ok(());
            }
        }
    }

    fn predicate(&mut self, schema: &DomainSchema) -> MelvinResult<Predicate> {
        let mut left = self.conjunction(schema)?;
        while self.peek_word() == Some("or") {
            self.advance();
            let right = self.conjunction(schema)?;
            left = Predicate::or(left, right);
        }
        Ok(left)
    }

    fn conjunction(&mut self, schema: &DomainSchema) -> MelvinResult<Predicate> {
        let mut left = self.unary(schema)?;
        while self.peek_word() == Some("and") {
            self.advance();
            let right = self.unary(schema)?;
            left = Predicate::and(left, right);
        }
        Ok(left)
    }

    fn unary(&mut self, schema: &DomainSchema) -> MelvinResult<Predicate> {
        if self.peek_word() == Some("not") {
            self.advance();
            return Ok(Predicate::negate(self.unary(schema)?));
        }
        if self.peek().is_some_and(|t| t.kind == TokenKind::LParen) {
            self.advance();
            let inner = self.predicate(schema)?;
            self.expect(TokenKind::RParen, "')'")?;
            return Ok(inner);
        }
        self.comparison(schema)
    }

    fn comparison(&mut self, schema: &DomainSchema) -> MelvinResult<Predicate> {
        let (name, _) = self.expect_word("a field name")?;
        let field = self.field_ref(schema, &name)?;

        let Some(token) = self.advance() else {
            return Err(self.expected("a comparison operator"));
        };
        match token.kind {
            TokenKind::Op(op) => {
                let op = CompareOp::parse(&op)
                    .ok_or_else(|| MelvinError::syntax(format!("unknown operator '{op}'"), token.position))?;
                let value = self.literal(schema, &field)?;
                Ok(Predicate::Compare { field, op, value })
            }
            TokenKind::Word(w) if w == "in" => {
                self.expect(TokenKind::LBracket, "'['")?;
                let mut values = vec![self.literal(schema, &field)?];
                while self.peek().is_some_and(|t| t.kind == TokenKind::Comma) {
                    self.advance();
                    values.push(self.literal(schema, &field)?);
                }
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(Predicate::In { field, values })
            }
            TokenKind::Word(w) if w == "contains" => {
                require_dimension(&field, "contains")?;
                let value = self.literal(schema, &field)?;
                Ok(Predicate::Contains { field, value })
            }
            TokenKind::Word(w) if w == "matches" => {
                require_dimension(&field, "matches")?;
                let (text, _) = self.raw_literal()?;
                let regex = Regex::new(&text)
                    .map_err(|e| MelvinError::InvalidArgument(format!("invalid pattern '{text}': {e}")))?;
                Ok(Predicate::Matches {
                    field,
                    pattern: Pattern(regex),
                })
            }
            TokenKind::Word(w) if w == "between" => {
                let low = self.literal(schema, &field)?;
                if self.peek_word() != Some("and") {
                    return Err(self.expected("'and'"));
                }
                self.advance();
                let high = self.literal(schema, &field)?;
                Ok(Predicate::Between { field, low, high })
            }
            TokenKind::Word(w) => Err(self.unknown_keyword("operator", &w, token.position, OPERATOR_KEYWORDS)),
            _ => Err(MelvinError::syntax(
                format!("expected a comparison operator, found {}", token.describe()),
                token.position,
            )),
        }
    }

    fn field_ref(&self, schema: &DomainSchema, name: &str) -> MelvinResult<FieldRef> {
        if schema.measure(name).is_some() {
            Ok(FieldRef::Measure(name.to_string()))
        } else if schema.dimension(name).is_some() {
            Ok(FieldRef::Dimension(name.to_string()))
        } else if name == TIME_FIELD {
            Ok(FieldRef::Time)
        } else {
            Err(self.parser.registry.unknown_field(schema, FieldKind::Field, name))
        }
    }

    fn raw_literal(&mut self) -> MelvinResult<(String, usize)> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Word(text) | TokenKind::Str(text),
                position,
            }) => {
                let found = (text.clone(), *position);
                self.pos += 1;
                Ok(found)
            }
            _ => Err(self.expected("a value")),
        }
    }

    /// Reads a literal and types it for `field`.
    fn literal(&mut self, schema: &DomainSchema, field: &FieldRef) -> MelvinResult<Value> {
        let (text, position) = self.raw_literal()?;
        match field {
            FieldRef::Time => parse_time_literal(&text, self.parser.now)
                .map(Value::Int)
                .ok_or_else(|| MelvinError::syntax(format!("expected a time, found '{text}'"), position)),
            FieldRef::Measure(name) => parse_number(&text).ok_or_else(|| MelvinError::TypeMismatch {
                field: name.clone(),
                expected: "number".into(),
                actual: format!("'{text}'"),
            }),
            FieldRef::Dimension(name) => {
                let Some(dimension) = schema.dimension(name) else {
                    return Err(self.parser.registry.unknown_field(schema, FieldKind::Dimension, name));
                };
                match dimension.field_type {
                    FieldType::Boolean => match text.as_str() {
                        "true" | "yes" => Ok(Value::Bool(true)),
                        "false" | "no" => Ok(Value::Bool(false)),
                        _ => Err(MelvinError::TypeMismatch {
                            field: name.clone(),
                            expected: "boolean".into(),
                            actual: format!("'{text}'"),
                        }),
                    },
                    FieldType::Date | FieldType::Datetime => {
                        let granularity = dimension.granularity.unwrap_or(Granularity::Day);
                        self.period_literal(granularity, &text).ok_or_else(|| {
                            MelvinError::syntax(format!("expected a time, found '{text}'"), position)
                        })
                    }
                    _ => Ok(Value::Str(text)),
                }
            }
        }
    }

    /// Temporal dimension literal as a period key (`2024-W03`, `-7d`, ...).
    fn period_literal(&self, granularity: Granularity, text: &str) -> Option<Value> {
        if granularity
            .period_start(text)
            .is_some_and(|start| granularity.period_key(start) == text)
        {
            return Some(Value::Str(text.to_string()));
        }
        parse_time_literal(text, self.parser.now).map(|ms| Value::Str(granularity.period_key(ms)))
    }

    fn transform(&mut self, schema: &DomainSchema, dimensions: &[String]) -> MelvinResult<Transform> {
        let (name, position) = self.expect_word("a transform")?;
        let transform = match name.as_str() {
            "sort" => {
                let order = match self.peek_word() {
                    Some("asc") => SortOrder::Asc,
                    Some("desc") => SortOrder::Desc,
                    _ => return Ok(Transform::Sort(SortOrder::Desc)),
                };
                self.advance();
                Transform::Sort(order)
            }
            "top" | "bottom" => {
                let (count, count_pos) = self.expect_word("a row count")?;
                let n: i64 = count.parse().map_err(|_| {
                    MelvinError::syntax(format!("expected a row count, found '{count}'"), count_pos)
                })?;
                if n <= 0 {
                    return Err(MelvinError::InvalidArgument(format!(
                        "'{name}' needs a positive row count, got {n}"
                    )));
                }
                let n = usize::try_from(n).unwrap_or(usize::MAX);
                if name == "top" { Transform::Top(n) } else { Transform::Bottom(n) }
            }
            "rolling" => {
                let (window, window_pos) = self.expect_word("a window such as 7d")?;
                let window = Span::parse(&window).filter(|s| s.amount > 0).ok_or_else(|| {
                    MelvinError::syntax(format!("invalid window '{window}'"), window_pos)
                })?;
                let (function, function_pos) = self.expect_word("'avg' or 'sum'")?;
                let function = match function.as_str() {
                    "avg" => RollingFunction::Avg,
                    "sum" => RollingFunction::Sum,
                    other => {
                        return Err(self.unknown_keyword("rolling function", other, function_pos, &["avg", "sum"]));
                    }
                };
                let transform = Transform::Rolling { window, function };
                if !has_temporal_dimension(schema, dimensions) {
                    return Err(MelvinError::TransformRequiresTemporalGrouping {
                        transform: transform.to_string(),
                    });
                }
                transform
            }
            "rate" => {
                let (unit, unit_pos) = self.expect_word("a unit such as per_hour")?;
                let parsed = unit.strip_prefix("per_").and_then(RateUnit::parse);
                match parsed {
                    Some(u) => Transform::Rate(u),
                    None => return Err(self.unknown_keyword("rate unit", &unit, unit_pos, RATE_UNITS)),
                }
            }
            "percent" => Transform::Percent,
            "normalize" => Transform::Normalize,
            other => return Err(self.unknown_keyword("transform", other, position, TRANSFORMS)),
        };
        Ok(transform)
    }
}

fn require_dimension(field: &FieldRef, operator: &str) -> MelvinResult<()> {
    match field {
        FieldRef::Dimension(_) => Ok(()),
        other => Err(MelvinError::InvalidArgument(format!(
            "'{operator}' applies to dimensions, not '{}'",
            other.name()
        ))),
    }
}

pub(crate) fn has_temporal_dimension(schema: &DomainSchema, dimensions: &[String]) -> bool {
    dimensions
        .iter()
        .any(|d| schema.dimension(d).is_some_and(|def| def.is_temporal()))
}

/// Integer unless the text carries a fraction or exponent.
fn parse_number(text: &str) -> Option<Value> {
    if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().filter(|v| v.is_finite()).map(Value::Decimal)
    } else {
        text.parse::<i64>().ok().map(Value::Int)
    }
}
