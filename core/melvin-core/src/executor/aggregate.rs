//! Group-by accumulation from a raw scan or an index snapshot.

use super::filter::{RecordFields, RowFields, evaluate};
use crate::error::{FieldKind, MelvinError, MelvinResult};
use crate::index::{DimProjection, IndexSnapshot, PartialAggregate, project};
use crate::query::{FieldRef, Query};
use crate::record::Record;
use crate::schema::{DimensionDef, DomainSchema};
use crate::value::GroupKey;
use ahash::AHashMap;

pub type Groups = AHashMap<GroupKey, PartialAggregate>;

/// Folds scanned records into per-group partial aggregates.
pub fn fold_records<I>(schema: &DomainSchema, query: &Query, records: I) -> MelvinResult<Groups>
where
    I: IntoIterator<Item = MelvinResult<Record>>,
{
    let measure = schema
        .measure(&query.measure)
        .ok_or_else(|| unknown(schema, FieldKind::Measure, &query.measure))?;
    let dims: Vec<&DimensionDef> = query
        .dimensions
        .iter()
        .map(|d| schema.dimension(d).ok_or_else(|| unknown(schema, FieldKind::Dimension, d)))
        .collect::<MelvinResult<_>>()?;

    let mut groups = Groups::new();
    for record in records {
        let record = record?;
        if let Some(filter) = &query.filter
            && !evaluate(filter, &RecordFields { schema, record: &record })
        {
            continue;
        }
        let value = schema.measure_value(measure, &record);
        for key in schema.group_keys(&dims, &record) {
            let agg = groups.entry(key).or_default();
            if let Some(v) = value {
                agg.observe(v, record.timestamp);
            }
        }
    }
    Ok(groups)
}

/// Projects index rows onto the query's grouping and merges them.
pub fn fold_index(schema: &DomainSchema, query: &Query, snapshot: &IndexSnapshot) -> MelvinResult<Groups> {
    let slot = snapshot.measure_index(&query.measure).ok_or_else(|| {
        MelvinError::Storage(format!(
            "index {} of '{}' has no measure '{}'",
            snapshot.shape, snapshot.domain, query.measure
        ))
    })?;
    let projections = project(&query.dimensions, &snapshot.shape, schema).ok_or_else(|| {
        MelvinError::InvalidArgument(format!(
            "index {} cannot answer a grouping by [{}]",
            snapshot.shape,
            query.dimensions.join(", ")
        ))
    })?;
    let columns = filter_columns(schema, query, snapshot)?;

    let mut groups = Groups::new();
    for (key, aggregates) in &snapshot.rows {
        if let Some(filter) = &query.filter
            && !evaluate(filter, &RowFields { key, columns: &columns })
        {
            continue;
        }
        let Some(partial) = aggregates.get(slot) else {
            continue;
        };
        let grouped: GroupKey = projections.iter().map(|p| p.apply(key)).collect();
        groups.entry(grouped).or_default().merge(partial);
    }
    Ok(groups)
}

fn unknown(schema: &DomainSchema, kind: FieldKind, name: &str) -> MelvinError {
    MelvinError::UnknownField {
        kind,
        name: name.to_string(),
        domain: schema.domain.clone(),
        suggestion: None,
    }
}

fn filter_columns(
    schema: &DomainSchema,
    query: &Query,
    snapshot: &IndexSnapshot,
) -> MelvinResult<Vec<(String, DimProjection)>> {
    let mut columns: Vec<(String, DimProjection)> = Vec::new();
    for field in query.filter_fields() {
        let FieldRef::Dimension(name) = field else {
            return Err(MelvinError::InvalidArgument(format!(
                "index rows carry no '{}' values",
                field.name()
            )));
        };
        if columns.iter().any(|(n, _)| n == name) {
            continue;
        }
        let projection = project(std::slice::from_ref(name), &snapshot.shape, schema)
            .and_then(|mut p| p.pop())
            .ok_or_else(|| {
                MelvinError::InvalidArgument(format!(
                    "dimension '{name}' is not derivable from index {}",
                    snapshot.shape
                ))
            })?;
        columns.push((name.clone(), projection));
    }
    Ok(columns)
}
