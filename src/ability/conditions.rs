//! Field matchers for conditional permission rules.
//!
//! A rule's conditions are a JSON object mapping instance fields to
//! matchers. Every field must match for the rule to apply.
//!
//! Supported forms:
//! - Plain value: `{"ownerId": 42}` — the field must equal the value
//! - Operator object: `{"ownerId": {"$ne": 42}}` — every operator in the
//!   object must hold
//! - Dot-path access into nested objects: `{"author.id": 42}`
//!
//! Supported operators: `$eq`, `$ne`, `$in`, `$nin`, `$gt`, `$gte`, `$lt`,
//! `$lte`. Integer and float representations of the same number compare
//! equal. `$ne` and `$nin` match when the field is absent; every other
//! matcher requires the field to be present. Unknown operators never match,
//! so a rule carrying one cannot grant anything.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::ability::errors::AbilityError;

// ─── Matching ───────────────────────────────────────────────────────────

/// Whether `instance` satisfies every field matcher in `conditions`.
pub fn matches(conditions: &Map<String, Value>, instance: &Value) -> bool {
    conditions
        .iter()
        .all(|(field, expected)| field_matches(expected, lookup(instance, field)))
}

fn lookup<'a>(instance: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = instance;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn field_matches(expected: &Value, actual: Option<&Value>) -> bool {
    match expected {
        Value::Object(map) if is_operator_object(map) => map
            .iter()
            .all(|(op, operand)| apply_operator(op, operand, actual)),
        _ => match actual {
            Some(actual) => values_equal(expected, actual),
            None => false,
        },
    }
}

fn apply_operator(op: &str, operand: &Value, actual: Option<&Value>) -> bool {
    match op {
        "$eq" => actual.is_some_and(|a| values_equal(operand, a)),
        "$ne" => actual.map(|a| !values_equal(operand, a)).unwrap_or(true),
        "$in" => match (operand, actual) {
            (Value::Array(options), Some(a)) => options.iter().any(|o| values_equal(o, a)),
            _ => false,
        },
        "$nin" => match operand {
            Value::Array(options) => actual
                .map(|a| !options.iter().any(|o| values_equal(o, a)))
                .unwrap_or(true),
            _ => false,
        },
        "$gt" => matches!(ordering(actual, operand), Some(Ordering::Greater)),
        "$gte" => matches!(
            ordering(actual, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "$lt" => matches!(ordering(actual, operand), Some(Ordering::Less)),
        "$lte" => matches!(
            ordering(actual, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        _ => false,
    }
}

/// An object whose keys all start with `$` holds operators; anything else
/// is a plain value compared by equality.
fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

/// Deep equality with numeric coercion, so `42` and `42.0` compare equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(xi), Some(yi)) => xi == yi,
            _ => match (x.as_f64(), y.as_f64()) {
                (Some(xf), Some(yf)) => xf == yf,
                _ => false,
            },
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| values_equal(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn ordering(actual: Option<&Value>, operand: &Value) -> Option<Ordering> {
    compare_values(actual?, operand)
}

/// Numbers compare numerically, strings lexicographically. Mixed or
/// non-scalar types have no ordering.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ─── Validation ─────────────────────────────────────────────────────────

/// Reject condition maps that could never be evaluated as written.
///
/// Matching is fail-closed either way; validation exists so that a broken
/// matcher is reported when the rule is stored instead of silently denying
/// at query time.
pub fn validate(conditions: &Map<String, Value>) -> Result<(), AbilityError> {
    for (field, expected) in conditions {
        let Value::Object(map) = expected else {
            continue;
        };
        if !map.keys().any(|k| k.starts_with('$')) {
            // Plain nested object, compared by equality
            continue;
        }
        if !map.keys().all(|k| k.starts_with('$')) {
            return Err(AbilityError::InvalidConditions(format!(
                "field `{field}` mixes operators with plain keys"
            )));
        }
        for (op, operand) in map {
            match op.as_str() {
                "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {}
                "$in" | "$nin" => {
                    if !operand.is_array() {
                        return Err(AbilityError::InvalidConditions(format!(
                            "`{op}` on field `{field}` requires an array operand"
                        )));
                    }
                }
                other => {
                    return Err(AbilityError::InvalidConditions(format!(
                        "unsupported operator `{other}` on field `{field}`"
                    )));
                }
            }
        }
    }
    Ok(())
}
