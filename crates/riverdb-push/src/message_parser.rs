//! Bus message decoding
//!
//! Turns an inbound message `{headers, key, value, timestamp}` into a row
//! of the source's declared column types. Each column has a selector whose
//! first token picks a scope — `h` (headers), `k` (key), `v` (value), `t`
//! (timestamp) — and whose remainder is a path into the decoded scope:
//! `.field`, `["name"]`, `[index]`.
//!
//! Scopes are decoded lazily per the topic's declared encodings: JSON to a
//! map, fixed-width big-endian numerics to scalars, strings to UTF-8, and
//! protobuf through a [`DescriptorRegistry`] (the registry and the wire
//! decoder behind it are provided by the host, not this crate). A selector
//! that evaluates to nothing maps to SQL `NULL`; a value that will not
//! coerce to the column type fails the message, and the failing offset is
//! reported so the source does not advance past it.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use riverdb_core::{
    read_f32_be, read_f64_be, read_u16_be, read_u32_be, read_u64_be, BusEncoding, ColumnType,
    Row, SourceInfo, Value,
};

use crate::error::{PushError, Result};

/// One message as handed over by the bus consumer.
#[derive(Debug, Clone, Default)]
pub struct BusMessage {
    pub headers: Vec<(String, Vec<u8>)>,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Offset within the topic partition, for error reporting and
    /// at-least-once redelivery.
    pub offset: i64,
}

/// Resolves a protobuf fully-qualified name and decodes message bytes into
/// a JSON-shaped value. Implemented by the host against its descriptor
/// store.
pub trait DescriptorRegistry: Send + Sync {
    fn decode(&self, full_name: &str, bytes: &[u8]) -> Result<JsonValue>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Headers,
    Key,
    Value,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    Field(String),
    Index(usize),
}

#[derive(Debug, Clone)]
struct Selector {
    scope: Scope,
    path: Vec<PathSegment>,
}

impl Selector {
    fn parse(selector: &str) -> Result<Selector> {
        let invalid = |reason: &str| PushError::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        };
        let mut chars = selector.trim().char_indices().peekable();
        let scope = match chars.next() {
            Some((_, 'h')) => Scope::Headers,
            Some((_, 'k')) => Scope::Key,
            Some((_, 'v')) => Scope::Value,
            Some((_, 't')) => Scope::Timestamp,
            _ => return Err(invalid("selector must start with h, k, v or t")),
        };
        let rest: String = chars.map(|(_, c)| c).collect();
        let path = parse_path(&rest).map_err(|reason| invalid(&reason))?;
        if scope == Scope::Timestamp && !path.is_empty() {
            return Err(invalid("the timestamp scope takes no path"));
        }
        Ok(Selector { scope, path })
    }
}

fn parse_path(mut rest: &str) -> std::result::Result<Vec<PathSegment>, String> {
    let mut path = Vec::new();
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('.') {
            let end = tail
                .find(['.', '['])
                .unwrap_or(tail.len());
            let field = &tail[..end];
            if field.is_empty() {
                return Err("empty field name".to_string());
            }
            path.push(PathSegment::Field(field.to_string()));
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let close = tail.find(']').ok_or("unterminated [")?;
            let inside = &tail[..close];
            if let Some(quoted) = inside
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
            {
                path.push(PathSegment::Field(quoted.to_string()));
            } else {
                let index = inside
                    .parse::<usize>()
                    .map_err(|_| format!("bad index {inside:?}"))?;
                path.push(PathSegment::Index(index));
            }
            rest = &tail[close + 1..];
        } else {
            return Err(format!("unexpected input {rest:?}"));
        }
    }
    Ok(path)
}

/// Decodes one scope's bytes per its declared encoding.
enum Decoder {
    Json,
    Primitive(BusEncoding),
    Protobuf {
        full_name: String,
        registry: Arc<dyn DescriptorRegistry>,
    },
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decoder::Json => f.debug_tuple("Json").finish(),
            Decoder::Primitive(encoding) => f.debug_tuple("Primitive").field(encoding).finish(),
            Decoder::Protobuf { full_name, .. } => {
                f.debug_struct("Protobuf").field("full_name", full_name).finish()
            }
        }
    }
}

impl Decoder {
    fn for_encoding(
        encoding: &BusEncoding,
        registry: Option<&Arc<dyn DescriptorRegistry>>,
    ) -> Result<Decoder> {
        Ok(match encoding {
            BusEncoding::Json => Decoder::Json,
            BusEncoding::Protobuf(full_name) => Decoder::Protobuf {
                full_name: full_name.clone(),
                registry: registry
                    .cloned()
                    .ok_or_else(|| PushError::MissingDescriptorRegistry(full_name.clone()))?,
            },
            primitive => Decoder::Primitive(primitive.clone()),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<JsonValue> {
        if bytes.is_empty() {
            return Ok(JsonValue::Null);
        }
        match self {
            Decoder::Json => serde_json::from_slice(bytes).map_err(|e| PushError::Internal(
                format!("invalid JSON payload: {e}"),
            )),
            Decoder::Protobuf {
                full_name,
                registry,
            } => registry.decode(full_name, bytes),
            Decoder::Primitive(encoding) => decode_primitive(encoding, bytes),
        }
    }
}

fn decode_primitive(encoding: &BusEncoding, bytes: &[u8]) -> Result<JsonValue> {
    let corrupt = |e: riverdb_core::CoreError| PushError::Internal(e.to_string());
    Ok(match encoding {
        BusEncoding::Int16Be => JsonValue::from(read_u16_be(bytes, 0).map_err(corrupt)? as i16),
        BusEncoding::Int32Be => JsonValue::from(read_u32_be(bytes, 0).map_err(corrupt)? as i32),
        BusEncoding::Int64Be => JsonValue::from(read_u64_be(bytes, 0).map_err(corrupt)? as i64),
        BusEncoding::Float32Be => JsonValue::from(read_f32_be(bytes, 0).map_err(corrupt)? as f64),
        BusEncoding::Float64Be => JsonValue::from(read_f64_be(bytes, 0).map_err(corrupt)?),
        BusEncoding::String => JsonValue::String(
            String::from_utf8(bytes.to_vec())
                .map_err(|e| PushError::Internal(format!("invalid UTF-8 string payload: {e}")))?,
        ),
        BusEncoding::Json | BusEncoding::Protobuf(_) => {
            return Err(PushError::Internal(
                "not a primitive encoding".to_string(),
            ))
        }
    })
}

/// Parses batches of bus messages into typed rows for one source.
#[derive(Debug)]
pub struct MessageParser {
    column_types: Vec<ColumnType>,
    selectors: Vec<Selector>,
    // Decoders are only instantiated for scopes some selector touches.
    header_decoder: Option<Decoder>,
    key_decoder: Option<Decoder>,
    value_decoder: Option<Decoder>,
}

impl MessageParser {
    pub fn new(
        source_info: &SourceInfo,
        registry: Option<Arc<dyn DescriptorRegistry>>,
    ) -> Result<MessageParser> {
        let topic = &source_info.topic_info;
        let selectors = topic
            .col_selectors
            .iter()
            .map(|s| Selector::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let mut header_decoder = None;
        let mut key_decoder = None;
        let mut value_decoder = None;
        for selector in &selectors {
            match selector.scope {
                Scope::Headers if header_decoder.is_none() => {
                    header_decoder =
                        Some(Decoder::for_encoding(&topic.header_encoding, registry.as_ref())?);
                }
                Scope::Key if key_decoder.is_none() => {
                    key_decoder =
                        Some(Decoder::for_encoding(&topic.key_encoding, registry.as_ref())?);
                }
                Scope::Value if value_decoder.is_none() => {
                    value_decoder =
                        Some(Decoder::for_encoding(&topic.value_encoding, registry.as_ref())?);
                }
                _ => {}
            }
        }

        Ok(MessageParser {
            column_types: source_info.table_info.column_types.clone(),
            selectors,
            header_decoder,
            key_decoder,
            value_decoder,
        })
    }

    /// Parse a batch. Fails at the first bad message; the error names its
    /// offset and nothing before it is lost (the caller retries the batch).
    pub fn parse_messages(&self, messages: &[BusMessage]) -> Result<Vec<Row>> {
        messages.iter().map(|m| self.parse_message(m)).collect()
    }

    fn parse_message(&self, message: &BusMessage) -> Result<Row> {
        let headers = match &self.header_decoder {
            Some(decoder) if !message.headers.is_empty() => {
                let mut map = serde_json::Map::new();
                for (name, bytes) in &message.headers {
                    map.insert(name.clone(), decoder.decode(bytes)?);
                }
                JsonValue::Object(map)
            }
            _ => JsonValue::Null,
        };
        let key = match (&self.key_decoder, &message.key) {
            (Some(decoder), Some(bytes)) => decoder.decode(bytes)?,
            _ => JsonValue::Null,
        };
        let value = match (&self.value_decoder, &message.value) {
            (Some(decoder), Some(bytes)) => decoder.decode(bytes)?,
            _ => JsonValue::Null,
        };

        let mut values = Vec::with_capacity(self.selectors.len());
        for (selector, col_type) in self.selectors.iter().zip(&self.column_types) {
            let extracted = match selector.scope {
                Scope::Timestamp => JsonValue::from(message.timestamp),
                Scope::Headers => walk_path(&headers, &selector.path),
                Scope::Key => walk_path(&key, &selector.path),
                Scope::Value => walk_path(&value, &selector.path),
            };
            values.push(coerce(&extracted, col_type).map_err(|reason| {
                PushError::MessageTypeMismatch {
                    offset: message.offset,
                    reason,
                }
            })?);
        }
        Ok(Row::new(values))
    }
}

fn walk_path(value: &JsonValue, path: &[PathSegment]) -> JsonValue {
    let mut current = value;
    for segment in path {
        current = match (segment, current) {
            (PathSegment::Field(name), JsonValue::Object(map)) => {
                map.get(name).unwrap_or(&JsonValue::Null)
            }
            (PathSegment::Index(index), JsonValue::Array(items)) => {
                items.get(*index).unwrap_or(&JsonValue::Null)
            }
            _ => return JsonValue::Null,
        };
    }
    current.clone()
}

/// Coerce a selector result to the column type. `null` maps to SQL `NULL`.
fn coerce(value: &JsonValue, col_type: &ColumnType) -> std::result::Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || format!("cannot coerce {value} to {}", col_type.name());
    match col_type {
        ColumnType::TinyInt | ColumnType::Int | ColumnType::BigInt => match value {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Value::BigInt)
                .ok_or_else(mismatch),
            JsonValue::String(s) => s.parse::<i64>().map(Value::BigInt).map_err(|_| mismatch()),
            JsonValue::Bool(b) => Ok(Value::BigInt(*b as i64)),
            _ => Err(mismatch()),
        },
        ColumnType::Double => match value {
            JsonValue::Number(n) => n.as_f64().map(Value::Double).ok_or_else(mismatch),
            JsonValue::String(s) => s.parse::<f64>().map(Value::Double).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ColumnType::Varchar => match value {
            JsonValue::String(s) => Ok(Value::Varchar(s.clone())),
            _ => Err(mismatch()),
        },
        ColumnType::Decimal { .. } => match value {
            JsonValue::Number(n) => Decimal::from_str(&n.to_string())
                .map(Value::Decimal)
                .map_err(|_| mismatch()),
            JsonValue::String(s) => Decimal::from_str(s).map(Value::Decimal).map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ColumnType::Timestamp => match value {
            JsonValue::Number(n) => n.as_i64().map(Value::Timestamp).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
    }
}
