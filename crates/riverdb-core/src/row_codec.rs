//! Typed row value encoding
//!
//! A row is stored as `null bitmap ‖ per-column payloads` in column
//! declaration order. Unlike the key codec this format is not
//! order-preserving; it is decoded with the table's column types in hand.
//! Fixed-width payloads are canonical little-endian on the wire.

use bytes::BufMut;
use rust_decimal::Decimal;

use crate::buffer::{append_u32_le, read_u32_le, read_u64_le};
use crate::error::{CoreError, Result};
use crate::key_codec::decimal_mantissa;
use crate::types::{ColumnType, Row, Value};

/// Append the encoding of `row` to `buf`.
pub fn encode_row(row: &Row, col_types: &[ColumnType], buf: &mut Vec<u8>) -> Result<()> {
    if row.col_count() != col_types.len() {
        return Err(CoreError::Internal(format!(
            "row has {} columns, table has {}",
            row.col_count(),
            col_types.len()
        )));
    }
    // Null bitmap: bit set = column is null.
    let bitmap_len = (col_types.len() + 7) / 8;
    let mut bitmap = vec![0u8; bitmap_len];
    for (i, value) in row.values().iter().enumerate() {
        if value.is_null() {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    buf.put_slice(&bitmap);

    for (value, col_type) in row.values().iter().zip(col_types) {
        match (col_type, value) {
            (_, Value::Null) => {}
            (
                ColumnType::TinyInt | ColumnType::Int | ColumnType::BigInt,
                Value::BigInt(v),
            ) => buf.put_slice(&v.to_le_bytes()),
            (ColumnType::Timestamp, Value::Timestamp(v)) => buf.put_slice(&v.to_le_bytes()),
            (ColumnType::Double, Value::Double(v)) => buf.put_slice(&v.to_bits().to_le_bytes()),
            (ColumnType::Varchar, Value::Varchar(s)) => {
                append_u32_le(buf, s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            (ColumnType::Decimal { scale, .. }, Value::Decimal(d)) => {
                buf.put_slice(&decimal_mantissa(d, *scale).to_le_bytes());
            }
            (expected, actual) => {
                return Err(CoreError::type_mismatch(expected.name(), actual.kind()));
            }
        }
    }
    Ok(())
}

/// Decode one row from `buf`.
pub fn decode_row(buf: &[u8], col_types: &[ColumnType]) -> Result<Row> {
    let bitmap_len = (col_types.len() + 7) / 8;
    let bitmap = buf
        .get(..bitmap_len)
        .ok_or_else(|| CoreError::Corrupt("row shorter than null bitmap".to_string()))?;
    let mut offset = bitmap_len;
    let mut values = Vec::with_capacity(col_types.len());
    for (i, col_type) in col_types.iter().enumerate() {
        if bitmap[i / 8] & (1 << (i % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }
        let value = match col_type {
            ColumnType::TinyInt | ColumnType::Int | ColumnType::BigInt => {
                let v = read_u64_le(buf, offset)? as i64;
                offset += 8;
                Value::BigInt(v)
            }
            ColumnType::Timestamp => {
                let v = read_u64_le(buf, offset)? as i64;
                offset += 8;
                Value::Timestamp(v)
            }
            ColumnType::Double => {
                let bits = read_u64_le(buf, offset)?;
                offset += 8;
                Value::Double(f64::from_bits(bits))
            }
            ColumnType::Varchar => {
                let len = read_u32_le(buf, offset)? as usize;
                offset += 4;
                let bytes = buf
                    .get(offset..offset + len)
                    .ok_or_else(|| CoreError::Corrupt("varchar payload truncated".to_string()))?;
                offset += len;
                Value::Varchar(
                    String::from_utf8(bytes.to_vec())
                        .map_err(|e| CoreError::Corrupt(format!("invalid utf-8 varchar: {e}")))?,
                )
            }
            ColumnType::Decimal { scale, .. } => {
                let bytes = buf
                    .get(offset..offset + 16)
                    .ok_or_else(|| CoreError::Corrupt("decimal payload truncated".to_string()))?;
                offset += 16;
                let mut mantissa = [0u8; 16];
                mantissa.copy_from_slice(bytes);
                let d = Decimal::try_from_i128_with_scale(
                    i128::from_le_bytes(mantissa),
                    *scale as u32,
                )
                .map_err(|e| CoreError::Corrupt(format!("decimal out of range: {e}")))?;
                Value::Decimal(d)
            }
        };
        values.push(value);
    }
    Ok(Row::new(values))
}

/// Decode one row and append it to `sink`.
pub fn decode_row_into(buf: &[u8], col_types: &[ColumnType], sink: &mut Vec<Row>) -> Result<()> {
    sink.push(decode_row(buf, col_types)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn roundtrip(row: Row, col_types: &[ColumnType]) {
        let mut buf = Vec::new();
        encode_row(&row, col_types, &mut buf).unwrap();
        let decoded = decode_row(&buf, col_types).unwrap();
        assert_eq!(row, decoded);
    }

    #[test]
    fn test_roundtrip_ints() {
        for v in [0, i64::MIN, i64::MAX, -1, 1, -10, 10] {
            roundtrip(Row::new(vec![Value::BigInt(v)]), &[ColumnType::BigInt]);
        }
    }

    #[test]
    fn test_roundtrip_strings() {
        for s in ["", "zxy123", "\u{2318}"] {
            roundtrip(
                Row::new(vec![Value::Varchar(s.to_string())]),
                &[ColumnType::Varchar],
            );
        }
    }

    #[test]
    fn test_roundtrip_floats() {
        for v in [0.0, -1234.5678, 1234.5678, f64::MAX] {
            roundtrip(Row::new(vec![Value::Double(v)]), &[ColumnType::Double]);
        }
    }

    #[test]
    fn test_roundtrip_full_row() {
        let col_types = [
            ColumnType::TinyInt,
            ColumnType::Int,
            ColumnType::BigInt,
            ColumnType::Double,
            ColumnType::Varchar,
            ColumnType::Decimal {
                precision: 10,
                scale: 2,
            },
            ColumnType::Timestamp,
        ];
        roundtrip(
            Row::new(vec![
                Value::BigInt(255),
                Value::BigInt(i32::MAX as i64),
                Value::BigInt(i64::MAX),
                Value::Double(f64::MAX),
                Value::Varchar("somestringxyz".to_string()),
                Value::Decimal(Decimal::from_str("12345678.32").unwrap()),
                Value::Timestamp(1_700_000_000_000),
            ]),
            &col_types,
        );
    }

    #[test]
    fn test_roundtrip_with_nulls() {
        // Alternate value/null over every type; exercises bitmap bits past
        // the first byte.
        let dec = ColumnType::Decimal {
            precision: 10,
            scale: 2,
        };
        let col_types = [
            ColumnType::TinyInt,
            ColumnType::TinyInt,
            ColumnType::Int,
            ColumnType::Int,
            ColumnType::BigInt,
            ColumnType::BigInt,
            ColumnType::Double,
            ColumnType::Double,
            ColumnType::Varchar,
            ColumnType::Varchar,
            dec,
            dec,
        ];
        roundtrip(
            Row::new(vec![
                Value::BigInt(255),
                Value::Null,
                Value::BigInt(i32::MAX as i64),
                Value::Null,
                Value::BigInt(i64::MAX),
                Value::Null,
                Value::Double(f64::MAX),
                Value::Null,
                Value::Varchar("somestringxyz".to_string()),
                Value::Null,
                Value::Decimal(Decimal::from_str("12345678.32").unwrap()),
                Value::Null,
            ]),
            &col_types,
        );
    }

    #[test]
    fn test_roundtrip_all_null() {
        roundtrip(
            Row::new(vec![Value::Null, Value::Null]),
            &[ColumnType::BigInt, ColumnType::Varchar],
        );
    }

    #[test]
    fn test_roundtrip_decimals() {
        let col = [ColumnType::Decimal {
            precision: 10,
            scale: 2,
        }];
        for s in ["0.00", "-12345678.12", "12345678.12"] {
            roundtrip(
                Row::new(vec![Value::Decimal(Decimal::from_str(s).unwrap())]),
                &col,
            );
        }
    }

    #[test]
    fn test_decimal_normalized_to_column_scale() {
        // "1.5" stored in a scale-2 column decodes as "1.50".
        let col = [ColumnType::Decimal {
            precision: 10,
            scale: 2,
        }];
        let mut buf = Vec::new();
        encode_row(
            &Row::new(vec![Value::Decimal(Decimal::from_str("1.5").unwrap())]),
            &col,
            &mut buf,
        )
        .unwrap();
        let decoded = decode_row(&buf, &col).unwrap();
        assert_eq!(
            decoded.get(0),
            &Value::Decimal(Decimal::from_str("1.50").unwrap())
        );
    }

    #[test]
    fn test_decode_into_sink_appends() {
        let col_types = [ColumnType::BigInt];
        let mut buf = Vec::new();
        encode_row(&Row::new(vec![Value::BigInt(7)]), &col_types, &mut buf).unwrap();
        let mut sink = vec![Row::new(vec![Value::BigInt(1)])];
        decode_row_into(&buf, &col_types, &mut sink).unwrap();
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1].get(0), &Value::BigInt(7));
    }

    #[test]
    fn test_truncated_payload_errors() {
        let col_types = [ColumnType::Varchar];
        let mut buf = Vec::new();
        encode_row(
            &Row::new(vec![Value::Varchar("hello".to_string())]),
            &col_types,
            &mut buf,
        )
        .unwrap();
        buf.truncate(buf.len() - 1);
        assert!(decode_row(&buf, &col_types).is_err());
    }

    #[test]
    fn test_column_count_mismatch_errors() {
        let mut buf = Vec::new();
        let err = encode_row(
            &Row::new(vec![Value::BigInt(1)]),
            &[ColumnType::BigInt, ColumnType::Varchar],
            &mut buf,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::Internal(_)));
    }
}
