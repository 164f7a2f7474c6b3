//! Conversions between JSON and primitive values.
//!
//! Every function here is total: input that cannot be coerced becomes
//! [`Value::Null`] and a warning names the offending property.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value as Json};
use tether_model::{Decimal, PrimitiveCheck, Value};
use tracing::warn;

/// Read a primitive, applying `check` when one is declared.
pub fn primitive_from_json(check: Option<&PrimitiveCheck>, json: &Json, property: &str) -> Value {
    if json.is_null() {
        return Value::Null;
    }
    let value = match check {
        None => Some(plain_from_json(json)),
        Some(PrimitiveCheck::Boolean) => json.as_bool().map(Value::Bool),
        Some(PrimitiveCheck::Integer) => integer_from_json(json).map(Value::Integer),
        Some(PrimitiveCheck::Number) => json
            .as_f64()
            .or_else(|| json.as_str().and_then(|s| s.trim().parse().ok()))
            .filter(|f: &f64| f.is_finite())
            .map(Value::Number),
        Some(PrimitiveCheck::Text) => match json {
            Json::String(s) => Some(Value::Text(s.clone())),
            Json::Number(n) => Some(Value::Text(n.to_string())),
            Json::Bool(b) => Some(Value::Text(b.to_string())),
            _ => None,
        },
        Some(PrimitiveCheck::Decimal) => match json {
            Json::String(s) => s.parse::<Decimal>().ok().map(Value::Decimal),
            Json::Number(n) => n
                .to_string()
                .parse::<Decimal>()
                .ok()
                .map(Value::Decimal),
            _ => None,
        },
        Some(PrimitiveCheck::Enum(members)) => json
            .as_str()
            .filter(|s| members.iter().any(|m| m == s))
            .map(|s| Value::Text(s.to_string())),
    };
    value.unwrap_or_else(|| {
        warn!(property, value = %json, "value does not match declared type, using null");
        Value::Null
    })
}

fn integer_from_json(json: &Json) -> Option<i64> {
    match json {
        Json::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read an undeclared value by its JSON shape.
pub fn plain_from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(_) | Json::Object(_) => Value::Json(json.clone()),
    }
}

/// Write a primitive. Values with no JSON form become `null`.
pub fn primitive_to_json(value: &Value, property: &str) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Integer(i) => Json::from(*i),
        Value::Number(f) => Number::from_f64(*f).map(Json::Number).unwrap_or_else(|| {
            warn!(property, value = f, "non-finite number, using null");
            Json::Null
        }),
        Value::Text(s) => Json::String(s.clone()),
        Value::Decimal(d) => Json::String(d.as_str().to_string()),
        Value::Date(d) => date_json(d),
        Value::Json(j) => j.clone(),
        other => {
            warn!(property, found = other.type_name(), "value has no primitive form, using null");
            Json::Null
        }
    }
}

/// Read a date from RFC 3339 text or epoch milliseconds.
pub fn date_from_json(json: &Json, property: &str) -> Value {
    let parsed = match json {
        Json::Null => return Value::Null,
        Json::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|d| d.with_timezone(&Utc)),
        Json::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    };
    match parsed {
        Some(date) => Value::Date(date),
        None => {
            warn!(property, value = %json, "invalid date, using null");
            Value::Null
        }
    }
}

pub fn date_to_json(value: &Value, property: &str) -> Json {
    match value {
        Value::Date(d) => date_json(d),
        Value::Null => Json::Null,
        other => {
            warn!(property, found = other.type_name(), "expected a date, using null");
            Json::Null
        }
    }
}

fn date_json(date: &DateTime<Utc>) -> Json {
    Json::String(date.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Whether a JSON object key passes the declared key check.
pub fn key_is_valid(check: Option<&PrimitiveCheck>, key: &str) -> bool {
    match check {
        None | Some(PrimitiveCheck::Text) => true,
        Some(PrimitiveCheck::Integer) => key.parse::<i64>().is_ok(),
        Some(PrimitiveCheck::Number) => key.parse::<f64>().is_ok_and(f64::is_finite),
        Some(PrimitiveCheck::Decimal) => key.parse::<Decimal>().is_ok(),
        Some(PrimitiveCheck::Boolean) => key == "true" || key == "false",
        Some(PrimitiveCheck::Enum(members)) => members.iter().any(|m| m == key),
    }
}
