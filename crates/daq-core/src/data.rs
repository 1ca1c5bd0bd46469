//! Column-oriented tables handed from drivers to storage backends.
//!
//! A [`ColumnTable`] is one named group of equally long columns plus
//! group-level attributes. The leading dimension of every column is the
//! record index, so a table of K records holds exactly K entries per column
//! in capture order. Higher-rank columns (vectors or 2-D maps per record)
//! carry their full shape.

use crate::error::DaqError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Typed column payload, flattened row-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    F64 { shape: Vec<usize>, values: Vec<f64> },
    U32 { shape: Vec<usize>, values: Vec<u32> },
    Text(Vec<String>),
}

impl ColumnData {
    /// Shape including the leading record dimension.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ColumnData::F64 { shape, .. } | ColumnData::U32 { shape, .. } => shape.clone(),
            ColumnData::Text(values) => vec![values.len()],
        }
    }

    /// Number of records (leading dimension).
    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            ColumnData::F64 { values, .. } => Some(values),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            ColumnData::U32 { values, .. } => Some(values),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            ColumnData::Text(values) => Some(values),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub units: Option<String>,
    pub data: ColumnData,
}

/// Scalar attribute attached to a table's group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::I64(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::I64(i64::from(v))
    }
}

impl From<u32> for AttrValue {
    fn from(v: u32) -> Self {
        AttrValue::I64(i64::from(v))
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::F64(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

/// A named group of equally long columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnTable {
    group: String,
    rows: usize,
    columns: Vec<Column>,
    attrs: BTreeMap<String, AttrValue>,
}

impl ColumnTable {
    /// Create an empty table with `rows` records under `group`.
    pub fn new(group: impl Into<String>, rows: usize) -> Self {
        Self {
            group: group.into(),
            rows,
            columns: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Record count every column must match.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn attrs(&self) -> &BTreeMap<String, AttrValue> {
        &self.attrs
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.insert(name.into(), value.into());
    }

    /// One f64 per record.
    pub fn push_f64(
        &mut self,
        name: impl Into<String>,
        units: Option<&str>,
        values: Vec<f64>,
    ) -> Result<(), DaqError> {
        let shape = vec![values.len()];
        self.push(name.into(), units, ColumnData::F64 { shape, values })
    }

    /// A fixed-shape f64 block per record; `inner` excludes the record dimension.
    pub fn push_f64_array(
        &mut self,
        name: impl Into<String>,
        units: Option<&str>,
        inner: &[usize],
        values: Vec<f64>,
    ) -> Result<(), DaqError> {
        let mut shape = Vec::with_capacity(inner.len() + 1);
        shape.push(self.rows);
        shape.extend_from_slice(inner);
        self.push(name.into(), units, ColumnData::F64 { shape, values })
    }

    pub fn push_u32(&mut self, name: impl Into<String>, values: Vec<u32>) -> Result<(), DaqError> {
        let shape = vec![values.len()];
        self.push(name.into(), None, ColumnData::U32 { shape, values })
    }

    pub fn push_text(&mut self, name: impl Into<String>, values: Vec<String>) -> Result<(), DaqError> {
        self.push(name.into(), None, ColumnData::Text(values))
    }

    fn push(&mut self, name: String, units: Option<&str>, data: ColumnData) -> Result<(), DaqError> {
        let shape = data.shape();
        if shape.first().copied() != Some(self.rows) {
            return Err(DaqError::Storage(format!(
                "column '{}' has {} rows, table '{}' has {}",
                name,
                shape.first().copied().unwrap_or(0),
                self.group,
                self.rows
            )));
        }
        let expected: usize = shape.iter().product();
        let actual = match &data {
            ColumnData::F64 { values, .. } => values.len(),
            ColumnData::U32 { values, .. } => values.len(),
            ColumnData::Text(values) => values.len(),
        };
        if expected != actual {
            return Err(DaqError::Storage(format!(
                "column '{}' shape {:?} needs {} values, got {}",
                name, shape, expected, actual
            )));
        }
        if self.column(&name).is_some() {
            return Err(DaqError::Storage(format!(
                "duplicate column '{}' in table '{}'",
                name, self.group
            )));
        }
        self.columns.push(Column {
            name,
            units: units.map(str::to_string),
            data,
        });
        Ok(())
    }
}
