//! 쿼리 결과 — 행 집합, 스칼라 접근, 테이블/JSON 출력

use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 결과 한 행: 쿼리 순서의 dimension 값과 measure 값
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub dimensions: Vec<Value>,
    pub value: Value,
}

/// 실행이 끝난 쿼리의 결과 행들
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    /// 그룹핑 dimension 이름 (쿼리 순서)
    pub dimensions: Vec<String>,
    pub measure: String,
    pub rows: Vec<ResultRow>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// dimension 없는 쿼리의 단일 값
    pub fn scalar(&self) -> Option<&Value> {
        match self.rows.as_slice() {
            [row] if self.dimensions.is_empty() => Some(&row.value),
            _ => None,
        }
    }

    /// `index` 행의 `name` 컬럼 값 (dimension 또는 measure)
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        let row = self.rows.get(index)?;
        if name == self.measure {
            return Some(&row.value);
        }
        let column = self.dimensions.iter().position(|d| d == name)?;
        row.dimensions.get(column)
    }

    /// 각 행을 `컬럼 이름 → 값` 맵으로 변환
    pub fn records(&self) -> Vec<BTreeMap<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                let mut map: BTreeMap<String, Value> = self
                    .dimensions
                    .iter()
                    .cloned()
                    .zip(row.dimensions.iter().cloned())
                    .collect();
                map.insert(self.measure.clone(), row.value.clone());
                map
            })
            .collect()
    }

    /// 객체들의 JSON 배열
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.records()
                .iter()
                .map(|record| {
                    serde_json::Value::Object(
                        record
                            .iter()
                            .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                            .collect(),
                    )
                })
                .collect(),
        )
    }

    fn header(&self) -> Vec<&str> {
        self.dimensions
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.measure.as_str()))
            .collect()
    }
}

/// 정렬된 텍스트 테이블 (숫자는 오른쪽 정렬)
impl fmt::Display for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header();
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| {
                row.dimensions
                    .iter()
                    .chain(std::iter::once(&row.value))
                    .map(ToString::to_string)
                    .collect()
            })
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let last = widths.len() - 1;
        for (i, (name, width)) in header.iter().zip(&widths).enumerate() {
            if i > 0 {
                f.write_str("  ")?;
            }
            if i == last {
                write!(f, "{name:>width$}")?;
            } else {
                write!(f, "{name:<width$}")?;
            }
        }
        writeln!(f)?;
        for row in &cells {
            for (i, (cell, width)) in row.iter().zip(&widths).enumerate() {
                if i > 0 {
                    f.write_str("  ")?;
                }
                if i == last {
                    write!(f, "{cell:>width$}")?;
                } else {
                    write!(f, "{cell:<width$}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
