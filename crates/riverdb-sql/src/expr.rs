//! Scalar expressions evaluated against rows

use rust_decimal::Decimal;

use riverdb_core::{Row, Value};

use crate::error::{Result, SqlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
}

/// A scalar expression over one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column offset into the input row.
    ColumnRef(usize),
    Literal(Value),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
}

impl Expr {
    pub fn column(offset: usize) -> Expr {
        Expr::ColumnRef(offset)
    }

    pub fn literal(value: Value) -> Expr {
        Expr::Literal(value)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Evaluate against `row`. SQL three-valued logic: comparisons and
    /// arithmetic with a `NULL` operand yield `NULL`.
    pub fn eval(&self, row: &Row) -> Result<Value> {
        match self {
            Expr::ColumnRef(offset) => {
                row.values().get(*offset).cloned().ok_or_else(|| {
                    SqlError::UnknownColumn(format!("column offset {offset} out of range"))
                })
            }
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Not(inner) => match inner.eval(row)? {
                Value::Null => Ok(Value::Null),
                value => Ok(bool_value(!is_true(&value))),
            },
            Expr::BinaryOp { op, left, right } => {
                let lhs = left.eval(row)?;
                let rhs = right.eval(row)?;
                match op {
                    BinaryOp::And => eval_and(&lhs, &rhs),
                    BinaryOp::Or => eval_or(&lhs, &rhs),
                    BinaryOp::Eq
                    | BinaryOp::NotEq
                    | BinaryOp::Lt
                    | BinaryOp::LtEq
                    | BinaryOp::Gt
                    | BinaryOp::GtEq => eval_comparison(*op, &lhs, &rhs),
                    BinaryOp::Plus | BinaryOp::Minus | BinaryOp::Multiply | BinaryOp::Divide => {
                        eval_arithmetic(*op, &lhs, &rhs)
                    }
                }
            }
        }
    }

    /// Evaluate as a predicate; `NULL` counts as false.
    pub fn eval_bool(&self, row: &Row) -> Result<bool> {
        Ok(is_true(&self.eval(row)?))
    }
}

fn bool_value(b: bool) -> Value {
    Value::BigInt(if b { 1 } else { 0 })
}

fn is_true(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::BigInt(v) => *v != 0,
        Value::Double(v) => *v != 0.0,
        Value::Varchar(s) => !s.is_empty(),
        Value::Decimal(d) => !d.is_zero(),
        Value::Timestamp(v) => *v != 0,
    }
}

fn eval_and(lhs: &Value, rhs: &Value) -> Result<Value> {
    // false AND NULL is false; true AND NULL is NULL.
    match (lhs, rhs) {
        (v, _) if !v.is_null() && !is_true(v) => Ok(bool_value(false)),
        (_, v) if !v.is_null() && !is_true(v) => Ok(bool_value(false)),
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        _ => Ok(bool_value(true)),
    }
}

fn eval_or(lhs: &Value, rhs: &Value) -> Result<Value> {
    match (lhs, rhs) {
        (v, _) if is_true(v) => Ok(bool_value(true)),
        (_, v) if is_true(v) => Ok(bool_value(true)),
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        _ => Ok(bool_value(false)),
    }
}

fn eval_comparison(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    let ordering = lhs.sql_cmp(rhs);
    let result = match op {
        BinaryOp::Eq => ordering.is_eq(),
        BinaryOp::NotEq => !ordering.is_eq(),
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::LtEq => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::GtEq => ordering.is_ge(),
        _ => unreachable!("not a comparison: {op:?}"),
    };
    Ok(bool_value(result))
}

fn eval_arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    if lhs.is_null() || rhs.is_null() {
        return Ok(Value::Null);
    }
    // Decimal beats double beats int for result type.
    match (lhs, rhs) {
        (Value::Decimal(a), Value::Decimal(b)) => decimal_arithmetic(op, *a, *b),
        (Value::Decimal(a), Value::BigInt(b)) => decimal_arithmetic(op, *a, Decimal::from(*b)),
        (Value::BigInt(a), Value::Decimal(b)) => decimal_arithmetic(op, Decimal::from(*a), *b),
        (Value::BigInt(a), Value::BigInt(b)) => int_arithmetic(op, *a, *b),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => double_arithmetic(op, x, y),
            _ => Err(SqlError::UnsupportedOperation(format!(
                "cannot apply {op:?} to {} and {}",
                a.kind(),
                b.kind()
            ))),
        },
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value> {
    let result = match op {
        BinaryOp::Plus => a.checked_add(b),
        BinaryOp::Minus => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide => {
            if b == 0 {
                return Ok(Value::Null);
            }
            a.checked_div(b)
        }
        _ => unreachable!(),
    };
    result
        .map(Value::BigInt)
        .ok_or_else(|| SqlError::UnsupportedOperation(format!("integer overflow in {op:?}")))
}

fn double_arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<Value> {
    Ok(Value::Double(match op {
        BinaryOp::Plus => a + b,
        BinaryOp::Minus => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        _ => unreachable!(),
    }))
}

fn decimal_arithmetic(op: BinaryOp, a: Decimal, b: Decimal) -> Result<Value> {
    let result = match op {
        BinaryOp::Plus => a.checked_add(b),
        BinaryOp::Minus => a.checked_sub(b),
        BinaryOp::Multiply => a.checked_mul(b),
        BinaryOp::Divide => {
            if b.is_zero() {
                return Ok(Value::Null);
            }
            a.checked_div(b)
        }
        _ => unreachable!(),
    };
    result
        .map(Value::Decimal)
        .ok_or_else(|| SqlError::UnsupportedOperation(format!("decimal overflow in {op:?}")))
}
