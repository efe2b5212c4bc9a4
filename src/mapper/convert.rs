//! Lossless conversions from raw values to primitive Rust types.

use chrono::{DateTime, Utc};

use super::{FromRaw, MapContext};
use crate::error::{Error, Result};
use crate::value::Value;

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_EXACT_F64_INT: i64 = 1 << 53;

fn mismatch(raw: &Value, target: &str) -> Error {
    Error::mapping(format!("cannot convert {} {} to {}", raw.kind(), raw, target))
}

fn to_i64(raw: &Value, target: &str) -> Result<i64> {
    match raw {
        Value::Int(i) => Ok(*i),
        Value::Float(x) if x.fract() == 0.0 && *x >= i64::MIN as f64 && *x < i64::MAX as f64 => {
            Ok(*x as i64)
        }
        Value::Str(s) => s.trim().parse().map_err(|_| mismatch(raw, target)),
        _ => Err(mismatch(raw, target)),
    }
}

fn to_f64(raw: &Value, target: &str) -> Result<f64> {
    match raw {
        Value::Float(x) => Ok(*x),
        Value::Int(i) if i.unsigned_abs() <= MAX_EXACT_F64_INT as u64 => Ok(*i as f64),
        Value::Str(s) => s.trim().parse().map_err(|_| mismatch(raw, target)),
        _ => Err(mismatch(raw, target)),
    }
}

macro_rules! integer_from_raw {
    ($($ty:ty),+) => {
        $(
            impl FromRaw for $ty {
                fn from_raw<'a>(raw: &'a Value, _ctx: &mut MapContext<'a>) -> Result<Self> {
                    let wide = to_i64(raw, stringify!($ty))?;
                    <$ty>::try_from(wide).map_err(|_| mismatch(raw, stringify!($ty)))
                }

                fn missing() -> Option<Self> {
                    Some(0)
                }
            }
        )+
    };
}

integer_from_raw!(i8, i16, i32, u8, u16, u32, u64, usize);

impl FromRaw for i64 {
    fn from_raw<'a>(raw: &'a Value, _ctx: &mut MapContext<'a>) -> Result<Self> {
        to_i64(raw, "i64")
    }

    fn missing() -> Option<Self> {
        Some(0)
    }
}

impl FromRaw for f64 {
    fn from_raw<'a>(raw: &'a Value, _ctx: &mut MapContext<'a>) -> Result<Self> {
        to_f64(raw, "f64")
    }

    fn missing() -> Option<Self> {
        Some(0.0)
    }
}

impl FromRaw for f32 {
    fn from_raw<'a>(raw: &'a Value, _ctx: &mut MapContext<'a>) -> Result<Self> {
        let wide = to_f64(raw, "f32")?;
        let narrow = wide as f32;
        if narrow as f64 == wide || wide.is_nan() {
            Ok(narrow)
        } else {
            Err(mismatch(raw, "f32"))
        }
    }

    fn missing() -> Option<Self> {
        Some(0.0)
    }
}

impl FromRaw for bool {
    fn from_raw<'a>(raw: &'a Value, _ctx: &mut MapContext<'a>) -> Result<Self> {
        match raw {
            Value::Bool(b) => Ok(*b),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(mismatch(raw, "bool")),
        }
    }

    fn missing() -> Option<Self> {
        Some(false)
    }
}

impl FromRaw for String {
    fn from_raw<'a>(raw: &'a Value, _ctx: &mut MapContext<'a>) -> Result<Self> {
        match raw {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(x) => Ok(x.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            Value::Timestamp(t) => Ok(t.to_rfc3339()),
            _ => Err(mismatch(raw, "String")),
        }
    }

    fn missing() -> Option<Self> {
        Some(String::new())
    }
}

impl FromRaw for DateTime<Utc> {
    fn from_raw<'a>(raw: &'a Value, _ctx: &mut MapContext<'a>) -> Result<Self> {
        match raw {
            Value::Timestamp(t) => Ok(*t),
            Value::Str(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| mismatch(raw, "DateTime")),
            _ => Err(mismatch(raw, "DateTime")),
        }
    }
}

/// Resolve an enum variant by name (exact, then case-insensitive) or by
/// ordinal.
pub fn enum_from_raw<T: Clone>(raw: &Value, name: &str, variants: &[(&str, T)]) -> Result<T> {
    let found = match raw {
        Value::Str(s) => variants
            .iter()
            .find(|(v, _)| *v == s.as_str())
            .or_else(|| variants.iter().find(|(v, _)| v.eq_ignore_ascii_case(s))),
        Value::Int(i) => usize::try_from(*i).ok().and_then(|i| variants.get(i)),
        _ => None,
    };
    found
        .map(|(_, variant)| variant.clone())
        .ok_or_else(|| mismatch(raw, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::map;

    #[test]
    fn test_integer_narrowing_is_checked() {
        assert_eq!(map::<i32>(&Value::Int(42)).unwrap(), 42);
        assert!(map::<i32>(&Value::Int(i64::from(i32::MAX) + 1)).is_err());
        assert!(map::<u8>(&Value::Int(-1)).is_err());
        assert_eq!(map::<i64>(&Value::Float(7.0)).unwrap(), 7);
        assert!(map::<i64>(&Value::Float(7.5)).is_err());
        assert_eq!(map::<u16>(&Value::from("65535")).unwrap(), 65535);
    }

    #[test]
    fn test_float_conversions_are_exact() {
        assert_eq!(map::<f64>(&Value::Int(3)).unwrap(), 3.0);
        assert!(map::<f64>(&Value::Int(i64::MAX)).is_err());
        assert_eq!(map::<f32>(&Value::Float(0.5)).unwrap(), 0.5);
        assert!(map::<f32>(&Value::Float(0.1)).is_err());
    }

    #[test]
    fn test_text_conversions() {
        assert_eq!(map::<String>(&Value::Int(12)).unwrap(), "12");
        assert!(map::<bool>(&Value::from("TRUE")).unwrap());
        assert!(map::<bool>(&Value::from("yes")).is_err());
        let t = map::<DateTime<Utc>>(&Value::from("2024-03-01T10:00:00Z")).unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    }

    #[test]
    fn test_null_is_not_a_primitive() {
        assert!(map::<i64>(&Value::Null).is_err());
        assert_eq!(map::<Option<i64>>(&Value::Null).unwrap(), None);
    }
}
