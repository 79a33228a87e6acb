//! Column types, runtime values, and rows

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Declared type of a table column.
///
/// All integer widths share the `i64` runtime representation; the width only
/// matters to the planner and to clients. `Decimal` carries its declared
/// `(precision, scale)` because the key and row codecs need the scale to
/// produce a fixed-width encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    TinyInt,
    Int,
    BigInt,
    Double,
    Varchar,
    Decimal { precision: u8, scale: u8 },
    /// Milliseconds since the Unix epoch.
    Timestamp,
}

impl ColumnType {
    /// Parse a type name as it appears in DDL, e.g. `bigint` or
    /// `decimal(10, 2)`.
    pub fn parse(s: &str) -> Result<ColumnType> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "tinyint" => return Ok(ColumnType::TinyInt),
            "int" | "integer" => return Ok(ColumnType::Int),
            "bigint" => return Ok(ColumnType::BigInt),
            "double" | "float64" => return Ok(ColumnType::Double),
            "varchar" | "string" | "text" => return Ok(ColumnType::Varchar),
            "timestamp" => return Ok(ColumnType::Timestamp),
            _ => {}
        }
        if let Some(args) = lower
            .strip_prefix("decimal(")
            .and_then(|r| r.strip_suffix(')'))
        {
            let mut parts = args.split(',').map(str::trim);
            let precision = parts
                .next()
                .and_then(|p| p.parse::<u8>().ok())
                .ok_or_else(|| CoreError::Corrupt(format!("bad decimal precision in {s:?}")))?;
            let scale = parts
                .next()
                .and_then(|p| p.parse::<u8>().ok())
                .unwrap_or(0);
            // rust_decimal carries at most 28 significant decimal digits.
            if parts.next().is_some() || precision == 0 || precision > 28 || scale > precision {
                return Err(CoreError::Corrupt(format!("bad decimal type {s:?}")));
            }
            return Ok(ColumnType::Decimal { precision, scale });
        }
        Err(CoreError::Corrupt(format!("unknown column type {s:?}")))
    }

    /// Short lowercase name used in error messages and result metadata.
    pub fn name(&self) -> String {
        match self {
            ColumnType::TinyInt => "tinyint".to_string(),
            ColumnType::Int => "int".to_string(),
            ColumnType::BigInt => "bigint".to_string(),
            ColumnType::Double => "double".to_string(),
            ColumnType::Varchar => "varchar".to_string(),
            ColumnType::Decimal { precision, scale } => format!("decimal({precision},{scale})"),
            ColumnType::Timestamp => "timestamp".to_string(),
        }
    }
}

/// A single runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    BigInt(i64),
    Double(f64),
    Varchar(String),
    Decimal(Decimal),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the value's dynamic kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::BigInt(_) => "bigint",
            Value::Double(_) => "double",
            Value::Varchar(_) => "varchar",
            Value::Decimal(_) => "decimal",
            Value::Timestamp(_) => "timestamp",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::BigInt(v) | Value::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            Value::Double(v) => Some(*v),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(s) => Some(s),
            _ => None,
        }
    }

    /// SQL comparison. `NULL` sorts before every non-null value, mirroring
    /// the key codec's null marker.
    pub fn sql_cmp(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            (Value::Decimal(a), Value::Decimal(b)) => a.cmp(b),
            // Mixed numeric comparisons go through f64.
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            },
        }
    }
}

/// One row of values, in column declaration order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, col: usize) -> &Value {
        &self.values[col]
    }

    pub fn col_count(&self) -> usize {
        self.values.len()
    }

    pub fn is_null(&self, col: usize) -> bool {
        self.values[col].is_null()
    }

    /// Project the row down to the given column offsets.
    pub fn project(&self, cols: &[usize]) -> Row {
        Row::new(cols.iter().map(|&c| self.values[c].clone()).collect())
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Row::new(values)
    }
}

/// Wire encoding of one scope (headers, key, or value) of a bus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusEncoding {
    Json,
    Int16Be,
    Int32Be,
    Int64Be,
    Float32Be,
    Float64Be,
    /// Raw UTF-8 bytes.
    String,
    /// Protobuf message, resolved by fully-qualified name against a
    /// descriptor registry.
    Protobuf(String),
}

impl BusEncoding {
    /// Parse an encoding name as it appears in `CREATE SOURCE`.
    pub fn parse(s: &str) -> Result<BusEncoding> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "json" => return Ok(BusEncoding::Json),
            "int16be" => return Ok(BusEncoding::Int16Be),
            "int32be" => return Ok(BusEncoding::Int32Be),
            "int64be" => return Ok(BusEncoding::Int64Be),
            "float32be" => return Ok(BusEncoding::Float32Be),
            "float64be" => return Ok(BusEncoding::Float64Be),
            "string" => return Ok(BusEncoding::String),
            _ => {}
        }
        // Case-sensitive tail: protobuf message names are case-sensitive.
        if let Some(fqn) = trimmed.strip_prefix("protobuf:") {
            if fqn.is_empty() {
                return Err(CoreError::UnknownTopicEncoding(trimmed.to_string()));
            }
            return Ok(BusEncoding::Protobuf(fqn.to_string()));
        }
        Err(CoreError::UnknownTopicEncoding(trimmed.to_string()))
    }
}
