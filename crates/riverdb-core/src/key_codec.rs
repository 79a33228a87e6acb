//! Order-preserving key encoding
//!
//! Every persisted key is `be(shard_id) ‖ be(table_id) ‖ encoded key
//! columns`, and the whole point of this module is that comparing two
//! encoded keys byte-by-byte gives the same answer as comparing the values
//! they encode. The per-type tricks:
//!
//! - signed integers: flip the sign bit, then big-endian. Negative values
//!   land below positives.
//! - doubles: flip the sign bit for non-negatives; invert *all* bits for
//!   negatives (reversing their magnitude order). NaN is canonicalized to a
//!   single bit pattern first.
//! - varchar: raw UTF-8, NUL-terminated so that a shorter string sorts
//!   before any extension of it even when another column follows.
//! - decimal: mantissa at the column's declared scale as a sign-flipped
//!   16-byte big-endian i128. Fixed width, so all decimals in one column
//!   compare digit-aligned.
//!
//! Each composite column is preceded by a null marker byte (0 = null,
//! 1 = present), which makes `NULL` sort strictly below every value.

use bytes::BufMut;
use rust_decimal::Decimal;

use crate::buffer::append_u64_be;
use crate::error::{CoreError, Result};
use crate::types::{ColumnType, Row, Value};

const NULL_MARKER: u8 = 0;
const PRESENT_MARKER: u8 = 1;

const SIGN_BIT_64: u64 = 1 << 63;
const SIGN_BIT_128: u128 = 1 << 127;

/// Append `be(shard_id) ‖ be(table_id)`, the prefix of every key in a table.
pub fn encode_table_key_prefix(table_id: u64, shard_id: u64, capacity: usize) -> Vec<u8> {
    let mut buf = Vec::with_capacity(capacity);
    append_u64_be(&mut buf, shard_id);
    append_u64_be(&mut buf, table_id);
    buf
}

/// Append the order-preserving encoding of the row's key columns to `buf`.
pub fn encode_key_cols(
    row: &Row,
    key_col_indexes: &[usize],
    col_types: &[ColumnType],
    buf: &mut Vec<u8>,
) -> Result<()> {
    for &col in key_col_indexes {
        let col_type = col_types.get(col).ok_or_else(|| {
            CoreError::Internal(format!("key column {col} out of range ({})", col_types.len()))
        })?;
        encode_key_value(row.get(col), col_type, buf)?;
    }
    Ok(())
}

/// Append the order-preserving encoding of bare key values to `buf`.
///
/// `values` holds one value per key column, in key order; `key_col_indexes`
/// names the columns those values belong to. Used by point-get routing and
/// primary-key lookups, where no full row exists.
pub fn encode_key_values(
    values: &[Value],
    col_types: &[ColumnType],
    key_col_indexes: &[usize],
    buf: &mut Vec<u8>,
) -> Result<()> {
    if values.len() != key_col_indexes.len() {
        return Err(CoreError::Internal(format!(
            "{} key values for {} key columns",
            values.len(),
            key_col_indexes.len()
        )));
    }
    for (value, &col) in values.iter().zip(key_col_indexes) {
        let col_type = col_types.get(col).ok_or_else(|| {
            CoreError::Internal(format!("key column {col} out of range ({})", col_types.len()))
        })?;
        encode_key_value(value, col_type, buf)?;
    }
    Ok(())
}

fn encode_key_value(value: &Value, col_type: &ColumnType, buf: &mut Vec<u8>) -> Result<()> {
    if value.is_null() {
        buf.put_u8(NULL_MARKER);
        return Ok(());
    }
    buf.put_u8(PRESENT_MARKER);
    match (col_type, value) {
        (
            ColumnType::TinyInt | ColumnType::Int | ColumnType::BigInt,
            Value::BigInt(v),
        ) => {
            buf.put_slice(&((*v as u64) ^ SIGN_BIT_64).to_be_bytes());
        }
        (ColumnType::Timestamp, Value::Timestamp(v)) => {
            buf.put_slice(&((*v as u64) ^ SIGN_BIT_64).to_be_bytes());
        }
        (ColumnType::Double, Value::Double(v)) => {
            let canonical = if v.is_nan() { f64::NAN } else { *v };
            let bits = canonical.to_bits();
            let ordered = if bits & SIGN_BIT_64 != 0 {
                !bits
            } else {
                bits ^ SIGN_BIT_64
            };
            buf.put_slice(&ordered.to_be_bytes());
        }
        (ColumnType::Varchar, Value::Varchar(s)) => {
            buf.put_slice(s.as_bytes());
            buf.put_u8(0);
        }
        (ColumnType::Decimal { scale, .. }, Value::Decimal(d)) => {
            let mantissa = decimal_mantissa(d, *scale);
            buf.put_slice(&((mantissa as u128) ^ SIGN_BIT_128).to_be_bytes());
        }
        (expected, actual) => {
            return Err(CoreError::type_mismatch(expected.name(), actual.kind()));
        }
    }
    Ok(())
}

/// Mantissa of `d` rescaled to `scale` decimal places, rounding half-up the
/// way `rust_decimal` does. All values in a column share a scale, so the
/// mantissa order equals the numeric order.
pub(crate) fn decimal_mantissa(d: &Decimal, scale: u8) -> i128 {
    let mut rescaled = *d;
    rescaled.rescale(scale as u32);
    rescaled.mantissa()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn encode_one(value: Value, col_type: ColumnType) -> Vec<u8> {
        let mut buf = Vec::new();
        encode_key_value(&value, &col_type, &mut buf).unwrap();
        buf
    }

    fn assert_ordered(col_type: ColumnType, values: &[Value]) {
        // Every adjacent pair must be strictly increasing byte-wise.
        let encoded: Vec<Vec<u8>> = values
            .iter()
            .map(|v| encode_one(v.clone(), col_type))
            .collect();
        for window in encoded.windows(2) {
            assert!(
                window[0] < window[1],
                "expected {:?} < {:?}",
                window[0],
                window[1]
            );
        }
    }

    #[test]
    fn test_int_key_ordering() {
        assert_ordered(
            ColumnType::BigInt,
            &[
                Value::Null,
                Value::BigInt(i64::MIN),
                Value::BigInt(-10),
                Value::BigInt(-1),
                Value::BigInt(0),
                Value::BigInt(1),
                Value::BigInt(10),
                Value::BigInt(i64::MAX),
            ],
        );
    }

    #[test]
    fn test_double_key_ordering() {
        assert_ordered(
            ColumnType::Double,
            &[
                Value::Null,
                Value::Double(f64::NEG_INFINITY),
                Value::Double(-1234.5678),
                Value::Double(-1.0),
                Value::Double(-f64::MIN_POSITIVE),
                Value::Double(0.0),
                Value::Double(f64::MIN_POSITIVE),
                Value::Double(1.0),
                Value::Double(1234.5678),
                Value::Double(f64::MAX),
                Value::Double(f64::INFINITY),
            ],
        );
    }

    #[test]
    fn test_varchar_key_ordering() {
        assert_ordered(
            ColumnType::Varchar,
            &[
                Value::Null,
                Value::Varchar("".to_string()),
                Value::Varchar("a".to_string()),
                Value::Varchar("ab".to_string()),
                Value::Varchar("b".to_string()),
                Value::Varchar("\u{2318}".to_string()),
            ],
        );
    }

    #[test]
    fn test_decimal_key_ordering() {
        let col = ColumnType::Decimal {
            precision: 10,
            scale: 2,
        };
        let dec = |s: &str| Value::Decimal(Decimal::from_str(s).unwrap());
        assert_ordered(
            col,
            &[
                Value::Null,
                dec("-12345678.12"),
                dec("-1.01"),
                dec("-1.00"),
                dec("0.00"),
                dec("0.01"),
                dec("1.5"),
                dec("12345678.12"),
            ],
        );
    }

    #[test]
    fn test_decimal_fixed_width() {
        let col = ColumnType::Decimal {
            precision: 10,
            scale: 2,
        };
        let small = encode_one(Value::Decimal(Decimal::from_str("0.01").unwrap()), col);
        let large = encode_one(
            Value::Decimal(Decimal::from_str("12345678.12").unwrap()),
            col,
        );
        assert_eq!(small.len(), large.len());
        assert_eq!(small.len(), 1 + 16);
    }

    #[test]
    fn test_composite_string_termination() {
        // "ab" ‖ x must sort before "b" ‖ y for every x, y: the NUL
        // terminator keeps the first column's comparison decisive.
        let types = [ColumnType::Varchar, ColumnType::BigInt];
        let row_a = Row::new(vec![Value::Varchar("ab".into()), Value::BigInt(i64::MAX)]);
        let row_b = Row::new(vec![Value::Varchar("b".into()), Value::BigInt(i64::MIN)]);
        let mut key_a = Vec::new();
        let mut key_b = Vec::new();
        encode_key_cols(&row_a, &[0, 1], &types, &mut key_a).unwrap();
        encode_key_cols(&row_b, &[0, 1], &types, &mut key_b).unwrap();
        assert!(key_a < key_b);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut buf = Vec::new();
        let err = encode_key_value(
            &Value::Varchar("1".to_string()),
            &ColumnType::BigInt,
            &mut buf,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
    }

    #[test]
    fn test_table_key_prefix_layout() {
        let prefix = encode_table_key_prefix(7, 1000, 32);
        assert_eq!(prefix.len(), 16);
        assert_eq!(crate::buffer::read_u64_be(&prefix, 0).unwrap(), 1000);
        assert_eq!(crate::buffer::read_u64_be(&prefix, 8).unwrap(), 7);
    }

    #[test]
    fn test_encode_key_values_matches_row_encoding() {
        let types = [ColumnType::BigInt, ColumnType::Varchar];
        let row = Row::new(vec![Value::BigInt(42), Value::Varchar("x".into())]);
        let mut from_row = Vec::new();
        encode_key_cols(&row, &[0], &types, &mut from_row).unwrap();
        let mut from_values = Vec::new();
        encode_key_values(&[Value::BigInt(42)], &types, &[0], &mut from_values).unwrap();
        assert_eq!(from_row, from_values);
    }
}
