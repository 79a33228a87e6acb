//! SELECT-to-plan translation
//!
//! Resolves a parsed SELECT against the schema registry and emits the plan
//! shape the engines execute: scan → selection → aggregate → projection →
//! sort/limit. Single table, no joins, no subqueries; aggregates must be
//! grouped. Point ranges are extracted from `pk = literal` conjuncts so the
//! pull engine can route point gets.

use sqlparser::ast::{
    BinaryOperator, Expr as SqlExpr, Function, FunctionArg, FunctionArgExpr, GroupByExpr, Ident,
    ObjectName, Offset, OrderByExpr, Select, SelectItem, SetExpr, Statement as SqlStatement,
    TableFactor, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use riverdb_core::{ColumnType, TableInfo, Value};
use riverdb_meta::MetaController;

use crate::error::{Result, SqlError};
use crate::expr::{BinaryOp, Expr};
use crate::plan::{AggFunction, AggregateItem, PhysicalPlan, ScanRange};

/// Translate one SELECT statement into a physical plan.
pub fn translate_select(
    meta: &MetaController,
    default_schema: &str,
    sql: &str,
) -> Result<PhysicalPlan> {
    let statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|e| SqlError::ParseError(e.to_string()))?;
    let [statement] = statements.as_slice() else {
        return Err(SqlError::UnsupportedOperation(
            "expected exactly one statement".to_string(),
        ));
    };
    let SqlStatement::Query(query) = statement else {
        return Err(SqlError::UnsupportedOperation(format!(
            "not a query: {statement}"
        )));
    };
    let SetExpr::Select(select) = &*query.body else {
        return Err(SqlError::UnsupportedOperation(
            "only plain SELECT is supported".to_string(),
        ));
    };

    let table = resolve_table(meta, default_schema, select)?;
    let table_col_names = table.column_names.clone();
    let table_col_types = table.column_types.clone();

    // WHERE clause, resolved against the scan output.
    let predicates = match &select.selection {
        Some(selection) => split_conjuncts(selection)
            .into_iter()
            .map(|e| translate_expr(e, &table_col_names))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    let ranges = extract_point_range(&predicates, &table);

    let mut plan = PhysicalPlan::TableScan {
        table,
        ranges,
    };
    if !predicates.is_empty() {
        plan = PhysicalPlan::Selection {
            predicates,
            child: Box::new(plan),
        };
    }

    let group_by = group_by_offsets(select, &table_col_names)?;
    let has_aggregates = select.projection.iter().any(|item| {
        matches!(
            item,
            SelectItem::UnnamedExpr(SqlExpr::Function(f))
            | SelectItem::ExprWithAlias { expr: SqlExpr::Function(f), .. }
            if aggregate_function(f).is_some()
        )
    });

    if !group_by.is_empty() || has_aggregates {
        plan = translate_aggregate(select, group_by, plan, &table_col_names, &table_col_types)?;
    } else {
        plan = translate_projection(select, plan, &table_col_names, &table_col_types)?;
    }

    plan = translate_order_limit(query.order_by.as_slice(), &query.limit, &query.offset, plan)?;
    Ok(plan)
}

fn resolve_table(
    meta: &MetaController,
    default_schema: &str,
    select: &Select,
) -> Result<TableInfo> {
    let [table_with_joins] = select.from.as_slice() else {
        return Err(SqlError::UnsupportedOperation(
            "exactly one FROM table is required".to_string(),
        ));
    };
    if !table_with_joins.joins.is_empty() {
        return Err(SqlError::UnsupportedOperation(
            "joins are not supported".to_string(),
        ));
    }
    let TableFactor::Table {
        name: ObjectName(idents),
        ..
    } = &table_with_joins.relation
    else {
        return Err(SqlError::UnsupportedOperation(
            "FROM must name a table".to_string(),
        ));
    };
    let (schema_name, table_name) = match idents.as_slice() {
        [table] => (default_schema.to_string(), table.value.clone()),
        [schema, table] => (schema.value.clone(), table.value.clone()),
        _ => {
            return Err(SqlError::UnsupportedOperation(format!(
                "bad table reference: {}",
                ObjectName(idents.clone())
            )))
        }
    };
    meta.get_table(&schema_name, &table_name)
        .map(|t| t.table_info().clone())
        .ok_or(SqlError::UnknownTable {
            schema_name,
            name: table_name,
        })
}

fn split_conjuncts(expr: &SqlExpr) -> Vec<&SqlExpr> {
    match expr {
        SqlExpr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            let mut parts = split_conjuncts(left);
            parts.extend(split_conjuncts(right));
            parts
        }
        SqlExpr::Nested(inner) => split_conjuncts(inner),
        other => vec![other],
    }
}

fn translate_expr(expr: &SqlExpr, col_names: &[String]) -> Result<Expr> {
    match expr {
        SqlExpr::Identifier(ident) => Ok(Expr::column(resolve_column(ident, col_names)?)),
        SqlExpr::CompoundIdentifier(idents) => {
            let ident = idents.last().ok_or_else(|| {
                SqlError::ParseError("empty compound identifier".to_string())
            })?;
            Ok(Expr::column(resolve_column(ident, col_names)?))
        }
        SqlExpr::Value(value) => Ok(Expr::literal(translate_literal(value)?)),
        SqlExpr::Nested(inner) => translate_expr(inner, col_names),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => Ok(Expr::Not(Box::new(translate_expr(expr, col_names)?))),
        SqlExpr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match translate_expr(expr, col_names)? {
            Expr::Literal(Value::BigInt(v)) => Ok(Expr::literal(Value::BigInt(-v))),
            Expr::Literal(Value::Double(v)) => Ok(Expr::literal(Value::Double(-v))),
            other => Ok(Expr::binary(
                BinaryOp::Minus,
                Expr::literal(Value::BigInt(0)),
                other,
            )),
        },
        SqlExpr::BinaryOp { left, op, right } => {
            let op = translate_operator(op)?;
            Ok(Expr::binary(
                op,
                translate_expr(left, col_names)?,
                translate_expr(right, col_names)?,
            ))
        }
        other => Err(SqlError::UnsupportedOperation(format!(
            "unsupported expression: {other}"
        ))),
    }
}

fn translate_operator(op: &BinaryOperator) -> Result<BinaryOp> {
    Ok(match op {
        BinaryOperator::Eq => BinaryOp::Eq,
        BinaryOperator::NotEq => BinaryOp::NotEq,
        BinaryOperator::Lt => BinaryOp::Lt,
        BinaryOperator::LtEq => BinaryOp::LtEq,
        BinaryOperator::Gt => BinaryOp::Gt,
        BinaryOperator::GtEq => BinaryOp::GtEq,
        BinaryOperator::And => BinaryOp::And,
        BinaryOperator::Or => BinaryOp::Or,
        BinaryOperator::Plus => BinaryOp::Plus,
        BinaryOperator::Minus => BinaryOp::Minus,
        BinaryOperator::Multiply => BinaryOp::Multiply,
        BinaryOperator::Divide => BinaryOp::Divide,
        other => {
            return Err(SqlError::UnsupportedOperation(format!(
                "unsupported operator: {other}"
            )))
        }
    })
}

fn translate_literal(value: &SqlValue) -> Result<Value> {
    match value {
        SqlValue::Number(text, _) => {
            if text.contains(['.', 'e', 'E']) {
                text.parse::<f64>()
                    .map(Value::Double)
                    .map_err(|_| SqlError::ParseError(format!("bad number literal: {text}")))
            } else {
                text.parse::<i64>()
                    .map(Value::BigInt)
                    .map_err(|_| SqlError::ParseError(format!("bad number literal: {text}")))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Ok(Value::Varchar(s.clone()))
        }
        SqlValue::Boolean(b) => Ok(Value::BigInt(if *b { 1 } else { 0 })),
        SqlValue::Null => Ok(Value::Null),
        other => Err(SqlError::UnsupportedOperation(format!(
            "unsupported literal: {other}"
        ))),
    }
}

fn resolve_column(ident: &Ident, col_names: &[String]) -> Result<usize> {
    col_names
        .iter()
        .position(|name| name == &ident.value)
        .ok_or_else(|| SqlError::UnknownColumn(ident.value.clone()))
}

/// Pull a `pk = literal` conjunct into a point scan range. Only single
/// column primary keys route; anything else scans.
fn extract_point_range(predicates: &[Expr], table: &TableInfo) -> Vec<ScanRange> {
    let [pk_col] = table.primary_key_cols.as_slice() else {
        return Vec::new();
    };
    for predicate in predicates {
        let Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } = predicate
        else {
            continue;
        };
        let literal = match (left.as_ref(), right.as_ref()) {
            (Expr::ColumnRef(col), Expr::Literal(lit)) if col == pk_col => lit,
            (Expr::Literal(lit), Expr::ColumnRef(col)) if col == pk_col => lit,
            _ => continue,
        };
        if let Some(value) = coerce_literal(literal, &table.column_types[*pk_col]) {
            return vec![ScanRange::point(vec![value])];
        }
    }
    Vec::new()
}

/// Coerce a literal to a key column's type for range construction.
fn coerce_literal(literal: &Value, col_type: &ColumnType) -> Option<Value> {
    match (col_type, literal) {
        (ColumnType::TinyInt | ColumnType::Int | ColumnType::BigInt, Value::BigInt(_)) => {
            Some(literal.clone())
        }
        (ColumnType::Timestamp, Value::BigInt(v)) => Some(Value::Timestamp(*v)),
        (ColumnType::Double, Value::Double(_)) => Some(literal.clone()),
        (ColumnType::Double, Value::BigInt(v)) => Some(Value::Double(*v as f64)),
        (ColumnType::Varchar, Value::Varchar(_)) => Some(literal.clone()),
        _ => None,
    }
}

fn group_by_offsets(select: &Select, col_names: &[String]) -> Result<Vec<usize>> {
    let exprs = match &select.group_by {
        GroupByExpr::Expressions(exprs) => exprs,
        GroupByExpr::All => {
            return Err(SqlError::UnsupportedOperation(
                "GROUP BY ALL is not supported".to_string(),
            ))
        }
    };
    exprs
        .iter()
        .map(|expr| match expr {
            SqlExpr::Identifier(ident) => resolve_column(ident, col_names),
            other => Err(SqlError::UnsupportedOperation(format!(
                "GROUP BY must name columns: {other}"
            ))),
        })
        .collect()
}

fn aggregate_function(function: &Function) -> Option<AggFunction> {
    AggFunction::parse(&function.name.to_string())
}

fn translate_aggregate(
    select: &Select,
    group_by_cols: Vec<usize>,
    child: PhysicalPlan,
    child_col_names: &[String],
    child_col_types: &[ColumnType],
) -> Result<PhysicalPlan> {
    if group_by_cols.is_empty() {
        return Err(SqlError::UnsupportedOperation(
            "aggregates require GROUP BY".to_string(),
        ));
    }
    let mut items = Vec::new();
    let mut col_names = Vec::new();
    let mut col_types = Vec::new();

    for item in &select.projection {
        let (expr, alias) = match item {
            SelectItem::UnnamedExpr(expr) => (expr, None),
            SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
            other => {
                return Err(SqlError::UnsupportedOperation(format!(
                    "unsupported aggregate projection: {other}"
                )))
            }
        };
        match expr {
            SqlExpr::Identifier(ident) => {
                let offset = resolve_column(ident, child_col_names)?;
                if !group_by_cols.contains(&offset) {
                    return Err(SqlError::UnsupportedOperation(format!(
                        "column {} is neither grouped nor aggregated",
                        ident.value
                    )));
                }
                items.push(AggregateItem::GroupColumn(offset));
                col_names.push(alias.unwrap_or_else(|| ident.value.clone()));
                col_types.push(child_col_types[offset]);
            }
            SqlExpr::Function(function) => {
                let agg = aggregate_function(function).ok_or_else(|| {
                    SqlError::UnsupportedOperation(format!(
                        "unsupported function in aggregate: {}",
                        function.name
                    ))
                })?;
                let (arg, arg_name) = aggregate_arg(function, child_col_names)?;
                let output_type = match (agg, arg) {
                    (AggFunction::Count, _) => ColumnType::BigInt,
                    (_, Some(offset)) => child_col_types[offset],
                    (_, None) => {
                        return Err(SqlError::UnsupportedOperation(format!(
                            "{}(*) is only valid for count",
                            function.name
                        )))
                    }
                };
                items.push(AggregateItem::Aggregate { function: agg, arg });
                col_names.push(alias.unwrap_or_else(|| match &arg_name {
                    Some(name) => format!("{}({name})", function.name).to_lowercase(),
                    None => format!("{}(*)", function.name).to_lowercase(),
                }));
                col_types.push(output_type);
            }
            other => {
                return Err(SqlError::UnsupportedOperation(format!(
                    "unsupported aggregate projection expression: {other}"
                )))
            }
        }
    }

    // Every grouping column must appear in the output: it becomes the
    // primary key of the aggregate's sink table.
    for &group_col in &group_by_cols {
        if !items.contains(&AggregateItem::GroupColumn(group_col)) {
            return Err(SqlError::UnsupportedOperation(format!(
                "grouping column {} must be selected",
                child_col_names[group_col]
            )));
        }
    }

    Ok(PhysicalPlan::Aggregate {
        group_by_cols,
        items,
        col_names,
        col_types,
        child: Box::new(child),
    })
}

fn aggregate_arg(
    function: &Function,
    col_names: &[String],
) -> Result<(Option<usize>, Option<String>)> {
    match function.args.as_slice() {
        [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)] => Ok((None, None)),
        [FunctionArg::Unnamed(FunctionArgExpr::Expr(SqlExpr::Identifier(ident)))] => Ok((
            Some(resolve_column(ident, col_names)?),
            Some(ident.value.clone()),
        )),
        _ => Err(SqlError::UnsupportedOperation(format!(
            "aggregate argument must be a column or *: {}",
            function.name
        ))),
    }
}

fn translate_projection(
    select: &Select,
    child: PhysicalPlan,
    child_col_names: &[String],
    child_col_types: &[ColumnType],
) -> Result<PhysicalPlan> {
    if let [SelectItem::Wildcard(_)] = select.projection.as_slice() {
        return Ok(child);
    }
    let mut exprs = Vec::new();
    let mut col_names = Vec::new();
    let mut col_types = Vec::new();
    for (i, item) in select.projection.iter().enumerate() {
        let (sql_expr, alias) = match item {
            SelectItem::UnnamedExpr(expr) => (expr, None),
            SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.clone())),
            other => {
                return Err(SqlError::UnsupportedOperation(format!(
                    "unsupported projection item: {other}"
                )))
            }
        };
        let expr = translate_expr(sql_expr, child_col_names)?;
        col_names.push(alias.unwrap_or_else(|| match sql_expr {
            SqlExpr::Identifier(ident) => ident.value.clone(),
            _ => format!("col{i}"),
        }));
        col_types.push(infer_type(&expr, child_col_types));
        exprs.push(expr);
    }
    Ok(PhysicalPlan::Projection {
        exprs,
        col_names,
        col_types,
        child: Box::new(child),
    })
}

fn infer_type(expr: &Expr, child_types: &[ColumnType]) -> ColumnType {
    match expr {
        Expr::ColumnRef(offset) => child_types
            .get(*offset)
            .copied()
            .unwrap_or(ColumnType::BigInt),
        Expr::Literal(value) => match value {
            Value::Double(_) => ColumnType::Double,
            Value::Varchar(_) => ColumnType::Varchar,
            Value::Decimal(d) => ColumnType::Decimal {
                precision: 28,
                scale: d.scale() as u8,
            },
            Value::Timestamp(_) => ColumnType::Timestamp,
            _ => ColumnType::BigInt,
        },
        Expr::Not(_) => ColumnType::BigInt,
        Expr::BinaryOp { op, left, right } => match op {
            BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
                promote(infer_type(left, child_types), infer_type(right, child_types))
            }
            _ => ColumnType::BigInt,
        },
    }
}

fn promote(a: ColumnType, b: ColumnType) -> ColumnType {
    match (a, b) {
        (d @ ColumnType::Decimal { .. }, _) | (_, d @ ColumnType::Decimal { .. }) => d,
        (ColumnType::Double, _) | (_, ColumnType::Double) => ColumnType::Double,
        _ => ColumnType::BigInt,
    }
}

fn translate_order_limit(
    order_by: &[OrderByExpr],
    limit: &Option<SqlExpr>,
    offset: &Option<Offset>,
    mut plan: PhysicalPlan,
) -> Result<PhysicalPlan> {
    let output_names = plan.col_names();
    let mut sort_exprs = Vec::new();
    let mut descending = Vec::new();
    for item in order_by {
        sort_exprs.push(translate_expr(&item.expr, &output_names)?);
        descending.push(item.asc == Some(false));
    }

    let limit_count = match limit {
        Some(expr) => Some(numeric_literal(expr)?),
        None => None,
    };
    let offset_count = match offset {
        Some(offset) => numeric_literal(&offset.value)?,
        None => 0,
    };

    plan = match (sort_exprs.is_empty(), limit_count) {
        (false, Some(count)) => PhysicalPlan::TopN {
            count,
            offset: offset_count,
            sort_exprs,
            descending,
            child: Box::new(plan),
        },
        (false, None) => PhysicalPlan::Sort {
            sort_exprs,
            descending,
            child: Box::new(plan),
        },
        (true, Some(count)) => PhysicalPlan::Limit {
            count,
            offset: offset_count,
            child: Box::new(plan),
        },
        (true, None) => plan,
    };
    Ok(plan)
}

fn numeric_literal(expr: &SqlExpr) -> Result<u64> {
    match expr {
        SqlExpr::Value(SqlValue::Number(text, _)) => text
            .parse::<u64>()
            .map_err(|_| SqlError::ParseError(format!("bad limit/offset: {text}"))),
        other => Err(SqlError::ParseError(format!(
            "limit/offset must be a number: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riverdb_core::{BusEncoding, SourceInfo, TopicInfo};

    fn meta_with_readings() -> MetaController {
        let meta = MetaController::new();
        meta.register_source(SourceInfo {
            table_info: TableInfo {
                id: 100,
                schema_name: "test".to_string(),
                name: "sensor_readings".to_string(),
                column_names: vec![
                    "sensor_id".to_string(),
                    "location".to_string(),
                    "temperature".to_string(),
                ],
                column_types: vec![ColumnType::BigInt, ColumnType::Varchar, ColumnType::Double],
                primary_key_cols: vec![0],
                index_infos: vec![],
            },
            topic_info: TopicInfo {
                broker_name: "default".to_string(),
                topic_name: "readings".to_string(),
                header_encoding: BusEncoding::Json,
                key_encoding: BusEncoding::Json,
                value_encoding: BusEncoding::Json,
                col_selectors: vec![
                    "v.sensor_id".to_string(),
                    "v.location".to_string(),
                    "v.temperature".to_string(),
                ],
                properties: Default::default(),
            },
        })
        .unwrap();
        meta
    }

    #[test]
    fn test_select_star_is_bare_scan() {
        let meta = meta_with_readings();
        let plan = translate_select(&meta, "test", "select * from sensor_readings").unwrap();
        assert!(matches!(plan, PhysicalPlan::TableScan { .. }));
        assert_eq!(plan.col_names()[1], "location");
    }

    #[test]
    fn test_qualified_table_name() {
        let meta = meta_with_readings();
        let plan = translate_select(&meta, "other", "select * from test.sensor_readings").unwrap();
        assert_eq!(plan.scanned_table().unwrap().id, 100);
    }

    #[test]
    fn test_unknown_table() {
        let meta = meta_with_readings();
        let err = translate_select(&meta, "test", "select * from missing").unwrap_err();
        assert!(matches!(err, SqlError::UnknownTable { .. }));
    }

    #[test]
    fn test_where_becomes_selection() {
        let meta = meta_with_readings();
        let plan = translate_select(
            &meta,
            "test",
            "select * from sensor_readings where temperature > 20 and location = 'london'",
        )
        .unwrap();
        let PhysicalPlan::Selection { predicates, .. } = plan else {
            panic!("expected selection");
        };
        assert_eq!(predicates.len(), 2);
    }

    #[test]
    fn test_point_get_range_extraction() {
        let meta = meta_with_readings();
        let plan = translate_select(
            &meta,
            "test",
            "select * from sensor_readings where sensor_id = 3",
        )
        .unwrap();
        let PhysicalPlan::Selection { child, .. } = plan else {
            panic!("expected selection");
        };
        let PhysicalPlan::TableScan { ranges, .. } = *child else {
            panic!("expected scan");
        };
        assert_eq!(ranges.len(), 1);
        assert!(ranges[0].is_point());
        assert_eq!(ranges[0].low, vec![Value::BigInt(3)]);
    }

    #[test]
    fn test_non_pk_equality_does_not_route() {
        let meta = meta_with_readings();
        let plan = translate_select(
            &meta,
            "test",
            "select * from sensor_readings where location = 'london'",
        )
        .unwrap();
        let PhysicalPlan::Selection { child, .. } = plan else {
            panic!("expected selection");
        };
        let PhysicalPlan::TableScan { ranges, .. } = *child else {
            panic!("expected scan");
        };
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_projection_names_and_types() {
        let meta = meta_with_readings();
        let plan = translate_select(
            &meta,
            "test",
            "select location, temperature + 1 as bumped from sensor_readings",
        )
        .unwrap();
        assert_eq!(plan.col_names(), vec!["location", "bumped"]);
        assert_eq!(
            plan.col_types(),
            vec![ColumnType::Varchar, ColumnType::Double]
        );
    }

    #[test]
    fn test_group_by_max() {
        let meta = meta_with_readings();
        let plan = translate_select(
            &meta,
            "test",
            "select sensor_id, max(temperature) from sensor_readings \
             where location = 'wincanton' group by sensor_id",
        )
        .unwrap();
        let PhysicalPlan::Aggregate {
            group_by_cols,
            items,
            col_names,
            col_types,
            ..
        } = plan
        else {
            panic!("expected aggregate");
        };
        assert_eq!(group_by_cols, vec![0]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], AggregateItem::GroupColumn(0));
        assert_eq!(
            items[1],
            AggregateItem::Aggregate {
                function: AggFunction::Max,
                arg: Some(2)
            }
        );
        assert_eq!(col_names, vec!["sensor_id", "max(temperature)"]);
        assert_eq!(col_types, vec![ColumnType::BigInt, ColumnType::Double]);
    }

    #[test]
    fn test_count_star() {
        let meta = meta_with_readings();
        let plan = translate_select(
            &meta,
            "test",
            "select location, count(*) as n from sensor_readings group by location",
        )
        .unwrap();
        let PhysicalPlan::Aggregate { items, col_names, .. } = plan else {
            panic!("expected aggregate");
        };
        assert_eq!(
            items[1],
            AggregateItem::Aggregate {
                function: AggFunction::Count,
                arg: None
            }
        );
        assert_eq!(col_names[1], "n");
    }

    #[test]
    fn test_ungrouped_aggregate_rejected() {
        let meta = meta_with_readings();
        assert!(translate_select(
            &meta,
            "test",
            "select max(temperature) from sensor_readings"
        )
        .is_err());
    }

    #[test]
    fn test_unselected_group_column_rejected() {
        let meta = meta_with_readings();
        assert!(translate_select(
            &meta,
            "test",
            "select max(temperature) from sensor_readings group by sensor_id"
        )
        .is_err());
    }

    #[test]
    fn test_order_by_and_limit_fuse_to_topn() {
        let meta = meta_with_readings();
        let plan = translate_select(
            &meta,
            "test",
            "select * from sensor_readings order by temperature desc limit 5",
        )
        .unwrap();
        let PhysicalPlan::TopN {
            count,
            descending,
            ..
        } = plan
        else {
            panic!("expected topn");
        };
        assert_eq!(count, 5);
        assert_eq!(descending, vec![true]);
    }

    #[test]
    fn test_limit_with_offset() {
        let meta = meta_with_readings();
        let plan = translate_select(
            &meta,
            "test",
            "select * from sensor_readings limit 10 offset 20",
        )
        .unwrap();
        let PhysicalPlan::Limit { count, offset, .. } = plan else {
            panic!("expected limit");
        };
        assert_eq!((count, offset), (10, 20));
    }

    #[test]
    fn test_joins_rejected() {
        let meta = meta_with_readings();
        assert!(translate_select(
            &meta,
            "test",
            "select * from sensor_readings a join sensor_readings b on a.sensor_id = b.sensor_id"
        )
        .is_err());
    }
}
