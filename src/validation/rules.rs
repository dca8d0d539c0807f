//! Reusable rule closures for [`FieldSpec::rule`](super::FieldSpec::rule).
//!
//! Numeric bounds are inclusive on both ends.

use super::field::FieldValue;

/// Reject empty or whitespace-only strings.
pub fn non_blank() -> impl Fn(FieldValue) -> Result<FieldValue, String> + Send + Sync {
    |value| match &value {
        FieldValue::Str(s) if s.trim().is_empty() => Err("must not be empty".to_string()),
        _ => Ok(value),
    }
}

/// Reject strings longer than `max` characters.
pub fn max_chars(max: usize) -> impl Fn(FieldValue) -> Result<FieldValue, String> + Send + Sync {
    move |value| match &value {
        FieldValue::Str(s) if s.chars().count() > max => {
            Err(format!("must be at most {} characters", max))
        }
        _ => Ok(value),
    }
}

pub fn int_range(min: i64, max: i64) -> impl Fn(FieldValue) -> Result<FieldValue, String> + Send + Sync {
    move |value| match value {
        FieldValue::Int(i) if (min..=max).contains(&i) => Ok(value),
        FieldValue::Int(i) => Err(format!("must be between {} and {}, got {}", min, max, i)),
        other => Ok(other),
    }
}

pub fn float_range(min: f64, max: f64) -> impl Fn(FieldValue) -> Result<FieldValue, String> + Send + Sync {
    move |value| match value {
        FieldValue::Float(f) if (min..=max).contains(&f) => Ok(value),
        FieldValue::Float(f) => Err(format!("must be between {} and {}, got {}", min, max, f)),
        other => Ok(other),
    }
}
