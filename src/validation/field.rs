//! Field descriptors and lossless coercion from untyped JSON.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Largest integer magnitude an `f64` represents exactly (2^53).
const F64_EXACT_INT: i64 = 9_007_199_254_740_992;

/// A rule closure: may transform the value or reject it with a message.
pub type Rule = Arc<dyn Fn(FieldValue) -> Result<FieldValue, String> + Send + Sync>;

/// Produces a default when the field is absent.
pub type DefaultFn = Arc<dyn Fn() -> FieldValue + Send + Sync>;

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Int,
    Float,
    /// RFC 3339 string or integer unix seconds.
    Timestamp,
    /// Object whose values are all strings.
    Map,
}

/// A typed field value after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Map(BTreeMap<String, String>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl FieldType {
    /// Convert a raw JSON value into this type without losing information.
    ///
    /// Anything that would need truncation or rounding is an error.
    pub fn coerce(&self, raw: &Value) -> Result<FieldValue, String> {
        match self {
            FieldType::Str => match raw {
                Value::String(s) => Ok(FieldValue::Str(s.clone())),
                _ => Err("must be a string".to_string()),
            },
            FieldType::Int => coerce_int(raw).map(FieldValue::Int),
            FieldType::Float => coerce_float(raw).map(FieldValue::Float),
            FieldType::Timestamp => coerce_timestamp(raw).map(FieldValue::Timestamp),
            FieldType::Map => coerce_map(raw).map(FieldValue::Map),
        }
    }
}

fn whole_f64_to_i64(f: f64) -> Result<i64, String> {
    if !f.is_finite() {
        return Err("must be a finite integer".to_string());
    }
    if f.fract() != 0.0 {
        return Err(format!("must be a whole number, got {}", f));
    }
    if f.abs() > F64_EXACT_INT as f64 {
        return Err("is out of range".to_string());
    }
    Ok(f as i64)
}

fn coerce_int(raw: &Value) -> Result<i64, String> {
    match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if n.is_u64() {
                Err("is out of range".to_string())
            } else {
                whole_f64_to_i64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Ok(i);
            }
            match s.parse::<f64>() {
                Ok(f) => whole_f64_to_i64(f),
                Err(_) => Err("must be an integer".to_string()),
            }
        }
        _ => Err("must be an integer".to_string()),
    }
}

fn coerce_float(raw: &Value) -> Result<f64, String> {
    let f = match raw {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i.unsigned_abs() > F64_EXACT_INT as u64 {
                    return Err("cannot be represented exactly as a number".to_string());
                }
                i as f64
            } else if n.is_u64() {
                return Err("cannot be represented exactly as a number".to_string());
            } else {
                n.as_f64().unwrap_or(f64::NAN)
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| "must be a number".to_string())?,
        _ => return Err("must be a number".to_string()),
    };
    if !f.is_finite() {
        return Err("must be a finite number".to_string());
    }
    Ok(f)
}

fn coerce_timestamp(raw: &Value) -> Result<DateTime<Utc>, String> {
    match raw {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| "must be an RFC 3339 timestamp".to_string()),
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or_else(|| "must be whole unix seconds".to_string()),
        _ => Err("must be a timestamp".to_string()),
    }
}

fn coerce_map(raw: &Value) -> Result<BTreeMap<String, String>, String> {
    let obj = raw
        .as_object()
        .ok_or_else(|| "must be an object".to_string())?;
    obj.iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k.clone(), s.clone())),
            _ => Err(format!("value for '{}' must be a string", k)),
        })
        .collect()
}

/// Descriptor for one request field: type, presence, default, and rules.
///
/// # Example
///
/// ```
/// use codegen_pipeline::validation::{FieldSpec, FieldType, FieldValue, rules};
///
/// let spec = FieldSpec::new("max_tokens", FieldType::Int)
///     .with_default(FieldValue::Int(1500))
///     .rule(rules::int_range(1, 4000));
/// assert_eq!(spec.name(), "max_tokens");
/// ```
#[derive(Clone)]
pub struct FieldSpec {
    name: String,
    field_type: FieldType,
    required: bool,
    default: Option<DefaultFn>,
    rules: Vec<Rule>,
}

impl std::fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSpec")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("has_default", &self.default.is_some())
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl FieldSpec {
    /// An optional field with no default.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default: None,
            rules: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: FieldValue) -> Self {
        self.default = Some(Arc::new(move || value.clone()));
        self
    }

    /// Default computed at validation time (e.g. the current time).
    pub fn with_default_fn(mut self, f: impl Fn() -> FieldValue + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(f));
        self
    }

    /// Append a rule. Rules run in the order they were added.
    pub fn rule(
        mut self,
        f: impl Fn(FieldValue) -> Result<FieldValue, String> + Send + Sync + 'static,
    ) -> Self {
        self.rules.push(Arc::new(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Check one raw value. `Ok(None)` means absent, optional, no default.
    ///
    /// JSON `null` counts as absent.
    pub fn check(&self, raw: Option<&Value>) -> Result<Option<FieldValue>, String> {
        let value = match raw.filter(|v| !v.is_null()) {
            Some(v) => self.field_type.coerce(v)?,
            None => match (&self.default, self.required) {
                (_, true) => return Err("field required".to_string()),
                (Some(default), false) => default(),
                (None, false) => return Ok(None),
            },
        };
        self.rules
            .iter()
            .try_fold(value, |value, rule| rule(value))
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_int_from_numeric_string() {
        assert_eq!(FieldType::Int.coerce(&json!("1500")), Ok(FieldValue::Int(1500)));
        assert_eq!(FieldType::Int.coerce(&json!(" 42 ")), Ok(FieldValue::Int(42)));
    }

    #[test]
    fn test_int_accepts_whole_floats_only() {
        assert_eq!(FieldType::Int.coerce(&json!(1500.0)), Ok(FieldValue::Int(1500)));
        assert_eq!(FieldType::Int.coerce(&json!("1500.0")), Ok(FieldValue::Int(1500)));
        assert!(FieldType::Int.coerce(&json!(1500.5)).is_err());
        assert!(FieldType::Int.coerce(&json!("1500.5")).is_err());
    }

    #[test]
    fn test_int_rejects_non_numbers() {
        assert!(FieldType::Int.coerce(&json!("many")).is_err());
        assert!(FieldType::Int.coerce(&json!(true)).is_err());
        assert!(FieldType::Int.coerce(&json!(u64::MAX)).is_err());
    }

    #[test]
    fn test_float_coercion() {
        assert_eq!(FieldType::Float.coerce(&json!(0.5)), Ok(FieldValue::Float(0.5)));
        assert_eq!(FieldType::Float.coerce(&json!("0.25")), Ok(FieldValue::Float(0.25)));
        assert_eq!(FieldType::Float.coerce(&json!(1)), Ok(FieldValue::Float(1.0)));
        assert!(FieldType::Float.coerce(&json!("inf")).is_err());
        assert!(FieldType::Float.coerce(&json!("NaN")).is_err());
        assert!(FieldType::Float.coerce(&json!(i64::MAX)).is_err());
    }

    #[test]
    fn test_str_is_strict() {
        assert_eq!(
            FieldType::Str.coerce(&json!("python")),
            Ok(FieldValue::Str("python".into()))
        );
        assert!(FieldType::Str.coerce(&json!(3)).is_err());
    }

    #[test]
    fn test_timestamp_forms() {
        let t = FieldType::Timestamp
            .coerce(&json!("2024-05-01T12:00:00+02:00"))
            .unwrap();
        assert_eq!(
            t.as_timestamp().unwrap().to_rfc3339(),
            "2024-05-01T10:00:00+00:00"
        );
        let t = FieldType::Timestamp.coerce(&json!(0)).unwrap();
        assert_eq!(t.as_timestamp().unwrap().timestamp(), 0);
        assert!(FieldType::Timestamp.coerce(&json!("yesterday")).is_err());
    }

    #[test]
    fn test_map_requires_string_values() {
        let m = FieldType::Map.coerce(&json!({"framework": "flask"})).unwrap();
        assert_eq!(m.as_map().unwrap()["framework"], "flask");
        let err = FieldType::Map.coerce(&json!({"n": 1})).unwrap_err();
        assert!(err.contains("'n'"));
    }

    #[test]
    fn test_check_presence_and_defaults() {
        let required = FieldSpec::new("prompt", FieldType::Str).required();
        assert_eq!(required.check(None), Err("field required".to_string()));
        assert_eq!(
            required.check(Some(&Value::Null)),
            Err("field required".to_string())
        );

        let defaulted = FieldSpec::new("language", FieldType::Str)
            .with_default(FieldValue::Str("auto".into()));
        assert_eq!(defaulted.check(None), Ok(Some(FieldValue::Str("auto".into()))));

        let optional = FieldSpec::new("note", FieldType::Str);
        assert_eq!(optional.check(None), Ok(None));
    }

    #[test]
    fn test_rules_run_in_order_and_transform() {
        let spec = FieldSpec::new("language", FieldType::Str)
            .rule(|v| match v {
                FieldValue::Str(s) => Ok(FieldValue::Str(s.to_lowercase())),
                other => Ok(other),
            })
            .rule(|v| match v.as_str() {
                Some("python") => Ok(v),
                _ => Err("unsupported".into()),
            });
        assert_eq!(
            spec.check(Some(&json!("PYTHON"))),
            Ok(Some(FieldValue::Str("python".into())))
        );
        assert_eq!(spec.check(Some(&json!("cobol"))), Err("unsupported".into()));
    }
}
