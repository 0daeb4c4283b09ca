//! Binary and comparison operations on values.
//!
//! The dispatch mirrors a (left type, right type, op) matrix: numbers
//! widen to float, strings concatenate and repeat, paths join with `/`.

use std::path::PathBuf;
use std::sync::Arc;

use eiko_parser::ast::BinaryOp;

use crate::value::Value;

/// Apply a non-logical binary operator. `And`/`Or`/`In` short-circuit in
/// the evaluator and never reach this table.
pub fn apply_binary(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, String> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(a == b)),
        BinaryOp::Ne => return Ok(Value::Bool(a != b)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => return compare(op, a, b),
        _ => {}
    }

    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_op(op, *x, *y),
        (Value::Int(x), Value::Float(y)) => float_op(op, *x as f64, *y),
        (Value::Float(x), Value::Int(y)) => float_op(op, *x, *y as f64),
        (Value::Float(x), Value::Float(y)) => float_op(op, *x, *y),
        (Value::Str(x), Value::Str(y)) if op == BinaryOp::Add => {
            Ok(Value::str(format!("{x}{y}")))
        }
        (Value::Str(x), Value::Int(y)) if op == BinaryOp::Mul => {
            let count = usize::try_from(*y).unwrap_or(0);
            Ok(Value::str(x.repeat(count)))
        }
        (Value::Path(x), Value::Str(y)) if op == BinaryOp::Div => {
            Ok(Value::Path(Arc::new(x.join(y.as_ref()))))
        }
        (Value::Path(x), Value::Path(y)) if op == BinaryOp::Div => {
            let joined: PathBuf = x.join(y.as_ref());
            Ok(Value::Path(Arc::new(joined)))
        }
        _ => Err(format!(
            "cannot perform '{}' for '{}' and '{}'",
            op.symbol(),
            a.type_of(),
            b.type_of()
        )),
    }
}

fn int_op(op: BinaryOp, x: i64, y: i64) -> Result<Value, String> {
    match op {
        BinaryOp::Add => Ok(Value::Int(x.wrapping_add(y))),
        BinaryOp::Sub => Ok(Value::Int(x.wrapping_sub(y))),
        BinaryOp::Mul => Ok(Value::Int(x.wrapping_mul(y))),
        // `/` on integers promotes to float; `//` stays integral.
        BinaryOp::Div => {
            if y == 0 {
                return Err("division by zero".to_string());
            }
            let result = x as f64 / y as f64;
            if result.fract() == 0.0 {
                Ok(Value::Int(result as i64))
            } else {
                Ok(Value::Float(result))
            }
        }
        BinaryOp::IntDiv => {
            if y == 0 {
                return Err("division by zero".to_string());
            }
            Ok(Value::Int(x.div_euclid(y)))
        }
        BinaryOp::Pow => {
            if y < 0 {
                Ok(Value::Float((x as f64).powi(y as i32)))
            } else {
                Ok(Value::Int(x.wrapping_pow(y.min(u32::MAX as i64) as u32)))
            }
        }
        _ => Err(format!("cannot perform '{}' on integers", op.symbol())),
    }
}

fn float_op(op: BinaryOp, x: f64, y: f64) -> Result<Value, String> {
    match op {
        BinaryOp::Add => Ok(Value::Float(x + y)),
        BinaryOp::Sub => Ok(Value::Float(x - y)),
        BinaryOp::Mul => Ok(Value::Float(x * y)),
        BinaryOp::Div | BinaryOp::IntDiv => {
            if y == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(Value::Float(x / y))
        }
        BinaryOp::Pow => Ok(Value::Float(x.powf(y))),
        _ => Err(format!("cannot perform '{}' on floats", op.symbol())),
    }
}

fn compare(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, String> {
    let ordering = match (a, b) {
        (Value::Int(x), Value::Int(y)) => (*x as f64).partial_cmp(&(*y as f64)),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => {
            return Err(format!(
                "cannot perform '{}' for '{}' and '{}'",
                op.symbol(),
                a.type_of(),
                b.type_of()
            ));
        }
    };
    let Some(ordering) = ordering else {
        return Ok(Value::Bool(false));
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => unreachable!("compare only handles ordering operators"),
    };
    Ok(Value::Bool(result))
}
