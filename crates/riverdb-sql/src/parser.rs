//! Statement classification and the DDL option grammar
//!
//! `SELECT` text is passed through untouched (the translator owns it).
//! Everything else is matched on its leading keywords before `sqlparser`
//! ever gets involved — these statements are not standard SQL.

use std::collections::BTreeMap;

use riverdb_core::{BusEncoding, ColumnType};

use crate::ast::{ColumnDef, CreateMaterializedView, CreateSource, Statement};
use crate::error::{Result, SqlError};

/// Classify one SQL statement.
pub fn parse_statement(sql: &str) -> Result<Statement> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(SqlError::InvalidStatement("empty statement".to_string()));
    }
    let lower = trimmed.to_lowercase();

    if lower.starts_with("select ") || lower == "select" {
        return Ok(Statement::Select(trimmed.to_string()));
    }
    if let Some(rest) = strip_keyword(trimmed, "prepare") {
        if rest.is_empty() {
            return Err(SqlError::InvalidStatement(
                "prepare requires a statement".to_string(),
            ));
        }
        return Ok(Statement::Prepare(rest.to_string()));
    }
    if let Some(rest) = strip_keyword(trimmed, "execute") {
        return parse_execute(rest);
    }
    if let Some(rest) = strip_keyword(trimmed, "drop") {
        return parse_drop(rest);
    }
    if let Some(rest) = strip_keyword(trimmed, "create") {
        if let Some(rest) = strip_keyword(rest, "source") {
            return parse_create_source(rest);
        }
        if let Some(rest) = strip_keyword(rest, "materialized") {
            if let Some(rest) = strip_keyword(rest, "view") {
                return parse_create_materialized_view(rest);
            }
        }
        return Err(SqlError::InvalidStatement(format!(
            "create must be followed by source or materialized view: {trimmed}"
        )));
    }
    Err(SqlError::InvalidStatement(format!(
        "unsupported statement: {trimmed}"
    )))
}

/// Strip a leading keyword (case-insensitive) followed by whitespace or end
/// of input; returns the rest, trimmed.
fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let s = s.trim_start();
    if s.len() < keyword.len() || !s[..keyword.len()].eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &s[keyword.len()..];
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn parse_execute(rest: &str) -> Result<Statement> {
    // Space-separated: prepared statement id, then positional args.
    let mut parts = rest.split_whitespace();
    let ps_id = parts
        .next()
        .and_then(|p| p.parse::<i64>().ok())
        .ok_or_else(|| {
            SqlError::InvalidStatement(format!(
                "execute requires a prepared statement id: {rest}"
            ))
        })?;
    Ok(Statement::Execute {
        ps_id,
        args: parts.map(str::to_string).collect(),
    })
}

fn parse_drop(rest: &str) -> Result<Statement> {
    if let Some(name) = strip_keyword(rest, "source") {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(SqlError::InvalidStatement(format!(
                "drop source requires a single source name: {rest}"
            )));
        }
        return Ok(Statement::DropSource(name.to_string()));
    }
    if let Some(rest) = strip_keyword(rest, "materialized") {
        if let Some(name) = strip_keyword(rest, "view") {
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(SqlError::InvalidStatement(format!(
                    "drop materialized view requires a single view name: {rest}"
                )));
            }
            return Ok(Statement::DropMaterializedView(name.to_string()));
        }
    }
    Err(SqlError::InvalidStatement(format!(
        "drop must be one of: drop source <name>, drop materialized view <name>: {rest}"
    )))
}

fn parse_create_materialized_view(rest: &str) -> Result<Statement> {
    // `<name> as <select …>`
    let mut parts = rest.splitn(2, char::is_whitespace);
    let name = parts
        .next()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            SqlError::InvalidStatement("materialized view requires a name".to_string())
        })?;
    let tail = parts.next().unwrap_or("").trim_start();
    let query = strip_keyword(tail, "as").ok_or_else(|| {
        SqlError::InvalidStatement(format!(
            "materialized view {name} requires 'as <query>'"
        ))
    })?;
    if query.is_empty() {
        return Err(SqlError::InvalidStatement(format!(
            "materialized view {name} has an empty query"
        )));
    }
    Ok(Statement::CreateMaterializedView(CreateMaterializedView {
        name: name.to_string(),
        query: query.to_string(),
    }))
}

fn parse_create_source(rest: &str) -> Result<Statement> {
    let rest = rest.trim();
    let open = rest.find('(').ok_or_else(|| {
        SqlError::InvalidStatement("create source requires an option list".to_string())
    })?;
    let name = rest[..open].trim();
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(SqlError::InvalidStatement(format!(
            "invalid source name: {:?}",
            &rest[..open]
        )));
    }
    let close = rest.rfind(')').ok_or_else(|| {
        SqlError::InvalidStatement(format!("unterminated option list for source {name}"))
    })?;
    if !rest[close + 1..].trim().is_empty() {
        return Err(SqlError::InvalidStatement(format!(
            "trailing input after option list for source {name}"
        )));
    }
    let body = &rest[open + 1..close];

    let mut columns: Vec<ColumnDef> = Vec::new();
    let mut primary_key: Vec<String> = Vec::new();
    let mut broker_name: Option<String> = None;
    let mut topic_name: Option<String> = None;
    let mut header_encoding: Option<BusEncoding> = None;
    let mut key_encoding: Option<BusEncoding> = None;
    let mut value_encoding: Option<BusEncoding> = None;
    let mut col_selectors: Vec<String> = Vec::new();
    let mut properties: BTreeMap<String, String> = BTreeMap::new();

    for option in split_top_level(body) {
        let option = option.trim();
        if option.is_empty() {
            continue;
        }
        if let Some(rest) = strip_keyword(option, "column") {
            if let Some(list) = strip_keyword(rest, "selector") {
                col_selectors = parse_selector_list(list)?;
                continue;
            }
            columns.push(parse_column_def(rest)?);
        } else if let Some(rest) = strip_keyword(option, "primary") {
            let col = strip_keyword(rest, "key").ok_or_else(|| {
                SqlError::InvalidStatement(format!("expected 'primary key <col>': {option}"))
            })?;
            if col.is_empty() {
                return Err(SqlError::InvalidStatement(
                    "primary key requires a column name".to_string(),
                ));
            }
            primary_key.push(col.to_string());
        } else if let Some(name) = strip_keyword(option, "broker") {
            broker_name = Some(name.to_string());
        } else if let Some(name) = strip_keyword(option, "topic") {
            topic_name = Some(name.to_string());
        } else if let Some(rest) = strip_keyword(option, "header") {
            header_encoding = Some(parse_encoding_option(rest, option)?);
        } else if let Some(rest) = strip_keyword(option, "key") {
            key_encoding = Some(parse_encoding_option(rest, option)?);
        } else if let Some(rest) = strip_keyword(option, "value") {
            value_encoding = Some(parse_encoding_option(rest, option)?);
        } else if let Some(rest) = strip_keyword(option, "properties") {
            properties = parse_properties(rest)?;
        } else {
            return Err(SqlError::InvalidStatement(format!(
                "unknown create source option: {option}"
            )));
        }
    }

    let source = CreateSource {
        name: name.to_string(),
        columns,
        primary_key,
        broker_name: broker_name
            .ok_or_else(|| SqlError::InvalidStatement("broker is required".to_string()))?,
        topic_name: topic_name
            .ok_or_else(|| SqlError::InvalidStatement("topic is required".to_string()))?,
        header_encoding: header_encoding
            .ok_or_else(|| SqlError::InvalidStatement("header encoding is required".to_string()))?,
        key_encoding: key_encoding
            .ok_or_else(|| SqlError::InvalidStatement("key encoding is required".to_string()))?,
        value_encoding: value_encoding
            .ok_or_else(|| SqlError::InvalidStatement("value encoding is required".to_string()))?,
        col_selectors,
        properties,
    };
    if source.columns.is_empty() {
        return Err(SqlError::InvalidStatement(format!(
            "source {name} has no columns"
        )));
    }
    if source.primary_key.is_empty() {
        return Err(SqlError::InvalidStatement(format!(
            "source {name} has no primary key"
        )));
    }
    if !source.col_selectors.is_empty() && source.col_selectors.len() != source.columns.len() {
        return Err(SqlError::WrongNumberColumnSelectors {
            selectors: source.col_selectors.len(),
            columns: source.columns.len(),
        });
    }
    Ok(Statement::CreateSource(source))
}

/// Split on commas at bracket depth zero; `(`, `[` and `{` nest.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_column_def(rest: &str) -> Result<ColumnDef> {
    // `<name> <type> [not null]`
    let mut parts = rest.split_whitespace();
    let name = parts
        .next()
        .ok_or_else(|| SqlError::InvalidStatement("column requires a name".to_string()))?;
    let type_str = parts
        .next()
        .ok_or_else(|| SqlError::InvalidStatement(format!("column {name} requires a type")))?;
    let tail: Vec<&str> = parts.collect();
    let not_null = match tail.as_slice() {
        [] => false,
        [a, b] if a.eq_ignore_ascii_case("not") && b.eq_ignore_ascii_case("null") => true,
        _ => {
            return Err(SqlError::InvalidStatement(format!(
                "unexpected tokens after column {name}: {}",
                tail.join(" ")
            )))
        }
    };
    Ok(ColumnDef {
        name: name.to_string(),
        column_type: ColumnType::parse(type_str)?,
        not_null,
    })
}

fn parse_encoding_option(rest: &str, option: &str) -> Result<BusEncoding> {
    let enc = strip_keyword(rest, "encoding").ok_or_else(|| {
        SqlError::InvalidStatement(format!("expected '… encoding <name>': {option}"))
    })?;
    Ok(BusEncoding::parse(enc)?)
}

fn parse_selector_list(list: &str) -> Result<Vec<String>> {
    let list = list.trim();
    let inner = list
        .strip_prefix('[')
        .and_then(|r| r.strip_suffix(']'))
        .ok_or_else(|| {
            SqlError::InvalidStatement(format!("column selector requires [ … ]: {list}"))
        })?;
    let selectors: Vec<String> = split_top_level(inner)
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if selectors.is_empty() {
        return Err(SqlError::InvalidStatement(
            "column selector list is empty".to_string(),
        ));
    }
    Ok(selectors)
}

fn parse_properties(rest: &str) -> Result<BTreeMap<String, String>> {
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .ok_or_else(|| {
            SqlError::InvalidStatement(format!("properties requires {{ … }}: {rest}"))
        })?;
    let mut properties = BTreeMap::new();
    for pair in inner.split_whitespace() {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            SqlError::InvalidStatement(format!("property must be key=value: {pair}"))
        })?;
        properties.insert(key.to_string(), value.to_string());
    }
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENSOR_SOURCE: &str = "create source sensor_readings (
        column sensor_id bigint,
        column location varchar,
        column temperature double,
        primary key sensor_id,
        broker default,
        topic sensor-readings,
        header encoding json,
        key encoding json,
        value encoding json,
        column selector [v.sensor_id, v.location, v.temperature],
        properties {fetch.size=1024 group.id=riverdb}
    )";

    #[test]
    fn test_select_passthrough() {
        let stmt = parse_statement("SELECT * FROM test.readings;").unwrap();
        assert_eq!(
            stmt,
            Statement::Select("SELECT * FROM test.readings".to_string())
        );
    }

    #[test]
    fn test_create_source_full() {
        let Statement::CreateSource(source) = parse_statement(SENSOR_SOURCE).unwrap() else {
            panic!("expected create source");
        };
        assert_eq!(source.name, "sensor_readings");
        assert_eq!(source.columns.len(), 3);
        assert_eq!(source.columns[0].name, "sensor_id");
        assert_eq!(source.columns[0].column_type, ColumnType::BigInt);
        assert_eq!(source.columns[1].column_type, ColumnType::Varchar);
        assert_eq!(source.columns[2].column_type, ColumnType::Double);
        assert_eq!(source.primary_key, vec!["sensor_id".to_string()]);
        assert_eq!(source.broker_name, "default");
        assert_eq!(source.topic_name, "sensor-readings");
        assert_eq!(source.value_encoding, BusEncoding::Json);
        assert_eq!(
            source.col_selectors,
            vec!["v.sensor_id", "v.location", "v.temperature"]
        );
        assert_eq!(source.properties.get("group.id"), Some(&"riverdb".to_string()));
        assert_eq!(source.properties.get("fetch.size"), Some(&"1024".to_string()));
    }

    #[test]
    fn test_create_source_not_null_and_protobuf() {
        let sql = "create source pay (
            column id bigint not null,
            column amount decimal(10, 2),
            primary key id,
            broker default,
            topic payments,
            header encoding json,
            key encoding int64be,
            value encoding protobuf:acme.payments.Payment
        )";
        let Statement::CreateSource(source) = parse_statement(sql).unwrap() else {
            panic!("expected create source");
        };
        assert!(source.columns[0].not_null);
        assert_eq!(
            source.columns[1].column_type,
            ColumnType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(source.key_encoding, BusEncoding::Int64Be);
        assert_eq!(
            source.value_encoding,
            BusEncoding::Protobuf("acme.payments.Payment".to_string())
        );
        assert!(source.col_selectors.is_empty());
    }

    #[test]
    fn test_create_source_selector_count_mismatch() {
        let sql = "create source s (
            column a bigint,
            column b bigint,
            primary key a,
            broker default,
            topic t,
            header encoding json,
            key encoding json,
            value encoding json,
            column selector [v.a]
        )";
        let err = parse_statement(sql).unwrap_err();
        assert!(matches!(
            err,
            SqlError::WrongNumberColumnSelectors {
                selectors: 1,
                columns: 2
            }
        ));
    }

    #[test]
    fn test_create_source_unknown_encoding() {
        let sql = "create source s (
            column a bigint,
            primary key a,
            broker default,
            topic t,
            header encoding json,
            key encoding json,
            value encoding avro
        )";
        let err = parse_statement(sql).unwrap_err();
        assert!(matches!(
            err,
            SqlError::Core(riverdb_core::CoreError::UnknownTopicEncoding(_))
        ));
    }

    #[test]
    fn test_create_source_missing_topic() {
        let sql = "create source s (
            column a bigint,
            primary key a,
            broker default,
            header encoding json,
            key encoding json,
            value encoding json
        )";
        assert!(parse_statement(sql).is_err());
    }

    #[test]
    fn test_create_source_missing_pk() {
        let sql = "create source s (
            column a bigint,
            broker default,
            topic t,
            header encoding json,
            key encoding json,
            value encoding json
        )";
        assert!(parse_statement(sql).is_err());
    }

    #[test]
    fn test_create_materialized_view() {
        let stmt = parse_statement(
            "create materialized view max_readings as select sensor_id, max(temperature) \
             from sensor_readings group by sensor_id",
        )
        .unwrap();
        let Statement::CreateMaterializedView(mv) = stmt else {
            panic!("expected create mv");
        };
        assert_eq!(mv.name, "max_readings");
        assert!(mv.query.starts_with("select sensor_id"));
    }

    #[test]
    fn test_create_materialized_view_requires_as() {
        assert!(parse_statement("create materialized view v select 1").is_err());
    }

    #[test]
    fn test_drop_statements() {
        assert_eq!(
            parse_statement("drop source readings").unwrap(),
            Statement::DropSource("readings".to_string())
        );
        assert_eq!(
            parse_statement("DROP MATERIALIZED VIEW max_readings").unwrap(),
            Statement::DropMaterializedView("max_readings".to_string())
        );
        assert!(parse_statement("drop table x").is_err());
        assert!(parse_statement("drop source").is_err());
    }

    #[test]
    fn test_prepare_and_execute() {
        assert_eq!(
            parse_statement("prepare select * from t where id = ?").unwrap(),
            Statement::Prepare("select * from t where id = ?".to_string())
        );
        assert_eq!(
            parse_statement("execute 3 42 london").unwrap(),
            Statement::Execute {
                ps_id: 3,
                args: vec!["42".to_string(), "london".to_string()]
            }
        );
        assert!(parse_statement("execute notanumber").is_err());
    }

    #[test]
    fn test_unknown_statement() {
        let err = parse_statement("insert into t values (1)").unwrap_err();
        assert!(matches!(err, SqlError::InvalidStatement(_)));
    }
}
