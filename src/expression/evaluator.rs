/// Expression evaluator
///
/// Evaluates parsed expressions against a fixed set of JSON bindings.

use crate::expression::parser::{BinaryOp, Expr, ExprParser, UnaryOp};
use crate::expression::ExpressionError;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Evaluates expressions against name → value bindings
///
/// Nothing outside the bindings is reachable: there are no function calls,
/// no assignment and no access to the host environment.
pub struct Evaluator<'a> {
    bindings: &'a Map<String, Value>,
}

impl<'a> Evaluator<'a> {
    pub fn new(bindings: &'a Map<String, Value>) -> Self {
        Self { bindings }
    }

    /// Parse and evaluate an expression string
    pub fn eval_str(&self, input: &str) -> Result<Value, ExpressionError> {
        let expr = ExprParser::parse_str(input)?;
        self.eval(&expr)
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => number(*n),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Identifier(name) => self
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnknownIdentifier(name.clone())),
            Expr::Member { object, property } => {
                let object = self.eval(object)?;
                Ok(member(&object, property))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                Ok(index_value(&object, &index))
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => number(-as_number(&value, "unary '-'")?),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right),
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
            } => {
                if truthy(&self.eval(condition)?) {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, ExpressionError> {
        // Short-circuit logical operators
        match op {
            BinaryOp::And => {
                let result = truthy(&self.eval(left)?) && truthy(&self.eval(right)?);
                return Ok(Value::Bool(result));
            }
            BinaryOp::Or => {
                let result = truthy(&self.eval(left)?) || truthy(&self.eval(right)?);
                return Ok(Value::Bool(result));
            }
            _ => {}
        }

        let left = self.eval(left)?;
        let right = self.eval(right)?;

        match op {
            BinaryOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
            BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
            BinaryOp::Lt => compare(&left, &right).map(|o| Value::Bool(o == Ordering::Less)),
            BinaryOp::Le => compare(&left, &right).map(|o| Value::Bool(o != Ordering::Greater)),
            BinaryOp::Gt => compare(&left, &right).map(|o| Value::Bool(o == Ordering::Greater)),
            BinaryOp::Ge => compare(&left, &right).map(|o| Value::Bool(o != Ordering::Less)),
            BinaryOp::Add if left.is_string() || right.is_string() => {
                Ok(Value::String(format!("{}{}", render(&left), render(&right))))
            }
            BinaryOp::Add => number(as_number(&left, "+")? + as_number(&right, "+")?),
            BinaryOp::Sub => number(as_number(&left, "-")? - as_number(&right, "-")?),
            BinaryOp::Mul => number(as_number(&left, "*")? * as_number(&right, "*")?),
            BinaryOp::Div | BinaryOp::Mod => {
                let divisor = as_number(&right, "/")?;
                if divisor == 0.0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                let dividend = as_number(&left, "/")?;
                if op == BinaryOp::Div {
                    number(dividend / divisor)
                } else {
                    number(dividend % divisor)
                }
            }
            BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        }
    }
}

/// Truthiness: null, false, 0 and "" are false; everything else is true
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value for string concatenation and template substitution
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn member(object: &Value, property: &str) -> Value {
    match (object, property) {
        (Value::Object(map), _) => map.get(property).cloned().unwrap_or(Value::Null),
        (Value::Array(items), "length") => Value::from(items.len()),
        (Value::String(s), "length") => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

fn index_value(object: &Value, index: &Value) -> Value {
    match (object, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(map), Value::String(key)) => map.get(key).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn as_number(value: &Value, op: &str) -> Result<f64, ExpressionError> {
    value
        .as_f64()
        .ok_or_else(|| ExpressionError::TypeMismatch(format!("'{}' expects numbers, got {}", op, value)))
}

/// Convert an f64 into a JSON number, keeping integral values as integers
fn number(n: f64) -> Result<Value, ExpressionError> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::TypeMismatch(format!("{} is not a finite number", n)))
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            let (l, r) = (as_number(left, "compare")?, as_number(right, "compare")?);
            l.partial_cmp(&r)
                .ok_or_else(|| ExpressionError::TypeMismatch("incomparable numbers".to_string()))
        }
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        _ => Err(ExpressionError::TypeMismatch(format!(
            "cannot compare {} with {}",
            left, right
        ))),
    }
}
