//! Tagged-union polymorphic value, its canonical-string normalization, and
//! the comparison operators used by trigger predicates and conditions.
//!
//! This replaces the "JSON everywhere" approach the source platform used
//! with an explicit, testable type, per the re-architecture note on
//! polymorphic values.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Numeric comparisons tolerate floating point noise within this bound.
pub const NUMERIC_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Json(Json),
}

impl Value {
    pub fn from_json(v: Json) -> Self {
        match v {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Value::String(s),
            other => Value::Json(other),
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Json(v) => v.clone(),
        }
    }

    /// Reduce to a canonical string form: bare scalars and quoted JSON
    /// strings that carry the same text compare equal (`"ON"` vs `ON`).
    pub fn canonical_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Json(v) => canonical_json_string(v),
        }
    }

    /// Lenient numeric parse: numbers parse directly, strings are trimmed
    /// and parsed, everything else fails.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            Value::Json(Json::Number(n)) => n.as_f64(),
            Value::Json(Json::String(s)) => s.trim().parse::<f64>().ok(),
            Value::Null | Value::Json(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "on" => Some(true),
                "false" | "off" => Some(false),
                _ => None,
            },
            Value::Json(Json::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

fn canonical_json_string(v: &Json) -> String {
    match v {
        Json::Null => String::new(),
        Json::Bool(b) => b.to_string(),
        Json::Number(n) => format_number(n.as_f64().unwrap_or(0.0)),
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Formats a float the way a JSON integer would render: no trailing `.0`.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let mut s = format!("{n}");
        if !s.contains('.') && !s.contains('e') {
            s.push_str(".0");
        }
        s
    }
}

fn string_or_numeric_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() <= NUMERIC_TOLERANCE,
        _ => a.canonical_string().eq_ignore_ascii_case(&b.canonical_string()),
    }
}

/// Comparison operators shared by `AutomationTrigger` and
/// `AutomationCondition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Between,
    Contains,
    StartsWith,
    EndsWith,
    ChangesTo,
    ChangesFrom,
    AnyChange,
}

impl Operator {
    /// Evaluate the operator against `new` (and `old`, when the caller has
    /// one), comparing against a configured `target` (and `target2` for
    /// `Between`). Callers with no "old" value (condition evaluation against
    /// ambient state) pass `None`; `ChangesTo`/`ChangesFrom`/`AnyChange` then
    /// degrade to "never matches" except `ChangesTo`, which only needs `new`.
    pub fn evaluate(
        &self,
        old: Option<&Value>,
        new: &Value,
        target: Option<&Value>,
        target2: Option<&Value>,
    ) -> bool {
        match self {
            Operator::AnyChange => match old {
                Some(old) => old.canonical_string() != new.canonical_string(),
                None => false,
            },
            Operator::ChangesTo => match target {
                Some(target) => new
                    .canonical_string()
                    .eq_ignore_ascii_case(&target.canonical_string()),
                None => false,
            },
            Operator::ChangesFrom => match (old, target) {
                (Some(old), Some(target)) => old
                    .canonical_string()
                    .eq_ignore_ascii_case(&target.canonical_string()),
                _ => false,
            },
            Operator::Equals => target.map(|t| string_or_numeric_eq(new, t)).unwrap_or(false),
            Operator::NotEquals => target
                .map(|t| !string_or_numeric_eq(new, t))
                .unwrap_or(false),
            Operator::GreaterThan
            | Operator::GreaterThanOrEqual
            | Operator::LessThan
            | Operator::LessThanOrEqual => {
                let (Some(a), Some(b)) = (new.as_f64(), target.and_then(Value::as_f64)) else {
                    return false;
                };
                match self {
                    Operator::GreaterThan => a > b + NUMERIC_TOLERANCE,
                    Operator::GreaterThanOrEqual => a >= b - NUMERIC_TOLERANCE,
                    Operator::LessThan => a < b - NUMERIC_TOLERANCE,
                    Operator::LessThanOrEqual => a <= b + NUMERIC_TOLERANCE,
                    _ => unreachable!(),
                }
            }
            Operator::Between => {
                let (Some(a), Some(x), Some(y)) = (
                    new.as_f64(),
                    target.and_then(Value::as_f64),
                    target2.and_then(Value::as_f64),
                ) else {
                    return false;
                };
                let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
                a >= lo - NUMERIC_TOLERANCE && a <= hi + NUMERIC_TOLERANCE
            }
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                let Some(target) = target else {
                    return false;
                };
                let haystack = new.canonical_string().to_ascii_lowercase();
                let needle = target.canonical_string().to_ascii_lowercase();
                match self {
                    Operator::Contains => haystack.contains(&needle),
                    Operator::StartsWith => haystack.starts_with(&needle),
                    Operator::EndsWith => haystack.ends_with(&needle),
                    _ => unreachable!(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_matches_quoted_and_bare() {
        let quoted = Value::String("ON".to_string());
        let json_string = Value::from_json(Json::String("ON".to_string()));
        assert_eq!(quoted.canonical_string(), json_string.canonical_string());
    }

    #[test]
    fn changes_to_is_case_insensitive() {
        let target = Value::String("on".to_string());
        assert!(Operator::ChangesTo.evaluate(None, &Value::String("ON".into()), Some(&target), None));
    }

    #[test]
    fn any_change_requires_old() {
        let new = Value::Bool(true);
        assert!(!Operator::AnyChange.evaluate(None, &new, None, None));
        assert!(Operator::AnyChange.evaluate(Some(&Value::Bool(false)), &new, None, None));
        assert!(!Operator::AnyChange.evaluate(Some(&Value::Bool(true)), &new, None, None));
    }

    #[test]
    fn numeric_strings_compare_within_tolerance() {
        let new = Value::String(" 23.0 ".to_string());
        let target = Value::String("23".to_string());
        assert!(Operator::Equals.evaluate(None, &new, Some(&target), None));
    }

    #[test]
    fn between_tolerates_swapped_bounds() {
        let new = Value::Number(5.0);
        let a = Value::Number(10.0);
        let b = Value::Number(0.0);
        assert!(Operator::Between.evaluate(None, &new, Some(&a), Some(&b)));
    }

    #[test]
    fn greater_than_requires_numeric_sides() {
        let new = Value::String("not-a-number".to_string());
        let target = Value::Number(1.0);
        assert!(!Operator::GreaterThan.evaluate(None, &new, Some(&target), None));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let new = Value::String("Hallway Motion".to_string());
        let target = Value::String("motion".to_string());
        assert!(Operator::Contains.evaluate(None, &new, Some(&target), None));
    }

    #[test]
    fn format_number_strips_trailing_zero() {
        assert_eq!(format_number(23.0), "23");
        assert_eq!(format_number(23.5), "23.5");
    }
}
