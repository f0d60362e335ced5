use regex::Regex;
use serde_json::Value as Json;

use warden_types::ActionContext;

use super::ast::{BinOp, Expr, FuncKind, Literal, MethodKind, VarRef};
use crate::{Error, Result};

/// Runtime value. `Json` carries data pulled out of `action.params`.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    List(Vec<Value>),
    Json(Json),
    Null,
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Json(_) => "json",
            Value::Null => "null",
        }
    }

    fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Json(Json::Bool(b)) => Ok(*b),
            other => Err(Error::Eval(format!(
                "expected bool, got {}",
                other.type_name()
            ))),
        }
    }

    fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            Value::Json(Json::String(s)) => Ok(s),
            other => Err(Error::Eval(format!(
                "expected string, got {}",
                other.type_name()
            ))),
        }
    }

    fn as_number(&self) -> Result<f64> {
        match self {
            Value::Int(i) => Ok(*i as f64),
            Value::Double(f) => Ok(*f),
            Value::Json(Json::Number(n)) => n
                .as_f64()
                .ok_or_else(|| Error::Eval("non-finite number".into())),
            other => Err(Error::Eval(format!(
                "expected number, got {}",
                other.type_name()
            ))),
        }
    }

    fn from_json(json: &Json) -> Value {
        match json {
            Json::Bool(b) => Value::Bool(*b),
            Json::String(s) => Value::Str(s.clone()),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::Null => Value::Null,
            other => Value::Json(other.clone()),
        }
    }

    /// Loose equality: numeric values compare numerically, strings by
    /// content, anything against Null is false unless both Null.
    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => {
                if let (Ok(a), Ok(b)) = (self.as_number(), other.as_number()) {
                    return a == b;
                }
                if let (Ok(a), Ok(b)) = (self.as_str(), other.as_str()) {
                    return a == b;
                }
                if let (Value::Json(a), Value::Json(b)) = (self, other) {
                    return a == b;
                }
                false
            }
        }
    }
}

/// Evaluate one expression against an activation. Errors degrade to the
/// engine's fail mode; they never panic.
pub fn eval(expr: &Expr, ctx: &ActionContext) -> Result<Value> {
    match expr {
        Expr::Literal(Literal::Str(s)) => Ok(Value::Str(s.clone())),
        Expr::Literal(Literal::Int(i)) => Ok(Value::Int(*i)),
        Expr::Literal(Literal::Float(f)) => Ok(Value::Double(*f)),
        Expr::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),

        Expr::Var(var) => Ok(load_var(*var, ctx)),

        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, ctx)?);
            }
            Ok(Value::List(values))
        }

        Expr::Not(operand) => Ok(Value::Bool(!eval(operand, ctx)?.as_bool()?)),

        Expr::Binary { op, left, right } => eval_binary(*op, left, right, ctx),

        Expr::Method {
            receiver,
            method,
            args,
        } => eval_method(receiver, *method, args, ctx),

        Expr::MatchesLit { receiver, regex } => {
            let value = eval(receiver, ctx)?;
            Ok(Value::Bool(regex.is_match(value.as_str()?)))
        }

        Expr::Call { func, args } => {
            let value = eval(&args[0], ctx)?;
            match func {
                FuncKind::Size => {
                    let size = match &value {
                        Value::Str(s) => s.chars().count(),
                        Value::List(items) => items.len(),
                        Value::Json(Json::Array(items)) => items.len(),
                        Value::Json(Json::Object(map)) => map.len(),
                        Value::Json(Json::String(s)) => s.chars().count(),
                        other => {
                            return Err(Error::Eval(format!(
                                "size() cannot measure {}",
                                other.type_name()
                            )))
                        }
                    };
                    Ok(Value::Int(size as i64))
                }
                FuncKind::Double => match &value {
                    Value::Str(s) => s
                        .trim()
                        .parse::<f64>()
                        .map(Value::Double)
                        .map_err(|_| Error::Eval(format!("double() cannot parse '{}'", s))),
                    Value::Json(Json::String(s)) => s
                        .trim()
                        .parse::<f64>()
                        .map(Value::Double)
                        .map_err(|_| Error::Eval(format!("double() cannot parse '{}'", s))),
                    other => Ok(Value::Double(other.as_number()?)),
                },
                FuncKind::Int => match &value {
                    Value::Str(s) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| Error::Eval(format!("int() cannot parse '{}'", s))),
                    Value::Json(Json::String(s)) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| Error::Eval(format!("int() cannot parse '{}'", s))),
                    other => Ok(Value::Int(other.as_number()? as i64)),
                },
            }
        }
    }
}

fn load_var(var: VarRef, ctx: &ActionContext) -> Value {
    match var {
        VarRef::ActionType => Value::Str(ctx.action_type.as_str().to_string()),
        VarRef::ActionName => Value::Str(ctx.action_name.clone()),
        VarRef::ActionTarget => Value::Str(ctx.action_target.clone()),
        VarRef::ActionParams => Value::Json(ctx.params.clone()),
        VarRef::SessionId => Value::Str(ctx.session_id.clone()),
        VarRef::SessionAgentId => Value::Str(ctx.agent_id.clone()),
        VarRef::SessionCost => Value::Double(ctx.session_cost),
        VarRef::SessionActionCount => Value::Int(ctx.session_action_count as i64),
        VarRef::AgentId => Value::Str(ctx.agent_id.clone()),
        VarRef::AgentName => Value::Str(ctx.agent_name.clone()),
        VarRef::AgentDailyCost => Value::Double(ctx.agent_daily_cost),
    }
}

fn eval_binary(op: BinOp, left: &Expr, right: &Expr, ctx: &ActionContext) -> Result<Value> {
    match op {
        // Short-circuit before evaluating the right side.
        BinOp::And => {
            if !eval(left, ctx)?.as_bool()? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval(right, ctx)?.as_bool()?))
        }
        BinOp::Or => {
            if eval(left, ctx)?.as_bool()? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval(right, ctx)?.as_bool()?))
        }
        BinOp::Eq => {
            let l = eval(left, ctx)?;
            let r = eval(right, ctx)?;
            Ok(Value::Bool(l.loose_eq(&r)))
        }
        BinOp::Ne => {
            let l = eval(left, ctx)?;
            let r = eval(right, ctx)?;
            Ok(Value::Bool(!l.loose_eq(&r)))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let l = eval(left, ctx)?;
            let r = eval(right, ctx)?;
            // Numeric ordering preferred, string ordering as fallback.
            let ordering = match (l.as_number(), r.as_number()) {
                (Ok(a), Ok(b)) => a.partial_cmp(&b),
                _ => Some(l.as_str()?.cmp(r.as_str()?)),
            };
            let ordering = ordering
                .ok_or_else(|| Error::Eval("incomparable values (NaN)".into()))?;
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::In => {
            let needle = eval(left, ctx)?;
            let haystack = eval(right, ctx)?;
            let found = match &haystack {
                Value::List(items) => items.iter().any(|item| needle.loose_eq(item)),
                Value::Json(Json::Array(items)) => items
                    .iter()
                    .any(|item| needle.loose_eq(&Value::from_json(item))),
                Value::Json(Json::Object(map)) => {
                    map.contains_key(needle.as_str()?)
                }
                other => {
                    return Err(Error::Eval(format!(
                        "'in' needs a list or map, got {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Bool(found))
        }
    }
}

fn eval_method(
    receiver: &Expr,
    method: MethodKind,
    args: &[Expr],
    ctx: &ActionContext,
) -> Result<Value> {
    let value = eval(receiver, ctx)?;
    match method {
        MethodKind::Contains => {
            let arg = eval(&args[0], ctx)?;
            Ok(Value::Bool(value.as_str()?.contains(arg.as_str()?)))
        }
        MethodKind::StartsWith => {
            let arg = eval(&args[0], ctx)?;
            Ok(Value::Bool(value.as_str()?.starts_with(arg.as_str()?)))
        }
        MethodKind::EndsWith => {
            let arg = eval(&args[0], ctx)?;
            Ok(Value::Bool(value.as_str()?.ends_with(arg.as_str()?)))
        }
        MethodKind::Matches => {
            // Non-literal pattern: compiled per evaluation.
            let pattern = eval(&args[0], ctx)?;
            let regex = Regex::new(pattern.as_str()?)
                .map_err(|e| Error::Eval(format!("bad regex at eval time: {}", e)))?;
            Ok(Value::Bool(regex.is_match(value.as_str()?)))
        }
        MethodKind::Has => {
            let key = eval(&args[0], ctx)?;
            let key = key.as_str()?;
            let present = match &value {
                Value::Json(Json::Object(map)) => map.contains_key(key),
                Value::Json(_) | Value::Null => false,
                other => {
                    return Err(Error::Eval(format!(
                        "has() needs a map, got {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Bool(present))
        }
        MethodKind::Get => {
            let key = eval(&args[0], ctx)?;
            let key = key.as_str()?.to_string();
            match &value {
                Value::Json(Json::Object(map)) => match map.get(&key) {
                    Some(found) => Ok(Value::from_json(found)),
                    None => eval(&args[1], ctx),
                },
                Value::Json(_) | Value::Null => eval(&args[1], ctx),
                other => Err(Error::Eval(format!(
                    "get() needs a map, got {}",
                    other.type_name()
                ))),
            }
        }
    }
}
