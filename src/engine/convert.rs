//! JSON <-> QuickJS value conversion

use rquickjs::{Array, Ctx, IntoJs, Object, Value};
use serde_json::Value as JsonValue;

/// Nesting depth past which values are cut off as `null` (guards cycles).
const MAX_DEPTH: usize = 64;

/// Largest integer a double represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Convert a JSON value into a QuickJS value.
pub(crate) fn json_to_js<'js>(
    ctx: &Ctx<'js>,
    value: &JsonValue,
) -> rquickjs::Result<Value<'js>> {
    match value {
        JsonValue::Null => Ok(Value::new_null(ctx.clone())),
        JsonValue::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        JsonValue::Number(n) => match n.as_i64().and_then(|i| i32::try_from(i).ok()) {
            Some(i) => Ok(Value::new_int(ctx.clone(), i)),
            None => Ok(n
                .as_f64()
                .map(|f| Value::new_float(ctx.clone(), f))
                .unwrap_or_else(|| Value::new_null(ctx.clone()))),
        },
        JsonValue::String(s) => s.as_str().into_js(ctx),
        JsonValue::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, json_to_js(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        JsonValue::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), json_to_js(ctx, item)?)?;
            }
            Ok(object.into_value())
        }
    }
}

/// Convert a QuickJS value into JSON.
///
/// Functions, symbols and other non-data values become `null`.
pub(crate) fn js_to_json(value: &Value<'_>) -> rquickjs::Result<JsonValue> {
    to_json(value, 0)
}

fn to_json(
    value: &Value<'_>,
    depth: usize,
) -> rquickjs::Result<JsonValue> {
    if depth > MAX_DEPTH || value.is_null() || value.is_undefined() || value.is_function() {
        return Ok(JsonValue::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(JsonValue::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(JsonValue::from(i));
    }
    if let Some(f) = value.as_float() {
        return Ok(float_to_json(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(JsonValue::String(s.to_string()?));
    }
    if let Some(array) = value.as_array() {
        let mut items = Vec::with_capacity(array.len());
        for i in 0..array.len() {
            let item: Value<'_> = array.get(i)?;
            items.push(to_json(&item, depth + 1)?);
        }
        return Ok(JsonValue::Array(items));
    }
    if let Some(object) = value.as_object() {
        let mut map = serde_json::Map::new();
        for prop in object.props::<String, Value<'_>>() {
            let (key, item) = prop?;
            map.insert(key, to_json(&item, depth + 1)?);
        }
        return Ok(JsonValue::Object(map));
    }
    Ok(JsonValue::Null)
}

/// Integral doubles come back as JSON integers so `2 * 2.5` compares equal to `5`.
fn float_to_json(f: f64) -> JsonValue {
    if !f.is_finite() {
        return JsonValue::Null;
    }
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
        return JsonValue::from(f as i64);
    }
    serde_json::Number::from_f64(f)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

#[cfg(test)]
mod tests {
    use super::float_to_json;
    use serde_json::json;

    #[test]
    fn test_integral_floats_become_integers() {
        assert_eq!(float_to_json(5.0), json!(5));
        assert_eq!(float_to_json(-12.0), json!(-12));
        assert_eq!(float_to_json(1e10), json!(10_000_000_000i64));
    }

    #[test]
    fn test_fractional_and_special_floats() {
        assert_eq!(float_to_json(2.5), json!(2.5));
        assert_eq!(float_to_json(f64::NAN), json!(null));
        assert_eq!(float_to_json(f64::INFINITY), json!(null));
        assert_eq!(float_to_json(1e300), json!(1e300));
    }
}
