// src/claims/numeric.rs

//! Coercion of loosely typed numeric claim values into `i64`.
//!
//! Claims decoded from the wire may carry the same instant as an integer, a
//! float or a decimal string depending on who produced the token. Everything
//! is normalized here, once, at the deserialization boundary.

use crate::error::NilaTokenError;
use serde::de::{self, Deserializer, Visitor};
use serde_json::Value;
use std::fmt;

/// A numeric claim value in any of the encodings seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericClaim<'a> {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(&'a str),
}

impl From<i32> for NumericClaim<'_> {
    fn from(v: i32) -> Self {
        NumericClaim::I32(v)
    }
}

impl From<i64> for NumericClaim<'_> {
    fn from(v: i64) -> Self {
        NumericClaim::I64(v)
    }
}

impl From<f32> for NumericClaim<'_> {
    fn from(v: f32) -> Self {
        NumericClaim::F32(v)
    }
}

impl From<f64> for NumericClaim<'_> {
    fn from(v: f64) -> Self {
        NumericClaim::F64(v)
    }
}

impl<'a> From<&'a str> for NumericClaim<'a> {
    fn from(v: &'a str) -> Self {
        NumericClaim::Str(v)
    }
}

/// Converts a numeric claim value into its canonical integer form.
///
/// Strings must parse completely as a base-10 integer. Floats are truncated
/// toward zero. Anything that does not fit in an `i64` is rejected.
pub fn to_integer<'a>(value: impl Into<NumericClaim<'a>>) -> Result<i64, NilaTokenError> {
    match value.into() {
        NumericClaim::I32(v) => Ok(i64::from(v)),
        NumericClaim::I64(v) => Ok(v),
        NumericClaim::F32(v) => float_to_integer(f64::from(v)),
        NumericClaim::F64(v) => float_to_integer(v),
        NumericClaim::Str(v) => str_to_integer(v),
    }
}

/// Converts a decoded JSON claim into its canonical integer form.
pub fn json_to_integer(value: &Value) -> Result<i64, NilaTokenError> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if let Some(u) = n.as_u64() {
                i64::try_from(u).map_err(|_| NilaTokenError::Conversion(format!("{} is out of range", u)))
            } else {
                n.as_f64()
                    .ok_or_else(|| NilaTokenError::Conversion(format!("{} is not a number", n)))
                    .and_then(float_to_integer)
            }
        }
        Value::String(s) => str_to_integer(s),
        other => Err(NilaTokenError::Conversion(format!("{} is not numeric", other))),
    }
}

fn float_to_integer(v: f64) -> Result<i64, NilaTokenError> {
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if !v.is_finite() || v >= i64::MAX as f64 || v < i64::MIN as f64 {
        return Err(NilaTokenError::Conversion(format!("{} is out of range", v)));
    }
    Ok(v.trunc() as i64)
}

fn str_to_integer(v: &str) -> Result<i64, NilaTokenError> {
    v.parse::<i64>()
        .map_err(|e| NilaTokenError::Conversion(format!("'{}' is not a base-10 integer: {}", v, e)))
}

struct IntegerClaimVisitor;

impl<'de> Visitor<'de> for IntegerClaimVisitor {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an integer, a float or a base-10 integer string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
        i64::try_from(v).map_err(|_| E::custom(format!("{} is out of range", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
        float_to_integer(v).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
        str_to_integer(v).map_err(E::custom)
    }
}

struct OptionalIntegerClaimVisitor;

impl<'de> Visitor<'de> for OptionalIntegerClaimVisitor {
    type Value = Option<i64>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("null or a numeric claim")
    }

    fn visit_none<E: de::Error>(self) -> Result<Option<i64>, E> {
        Ok(None)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Option<i64>, E> {
        Ok(None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Option<i64>, D::Error> {
        deserializer.deserialize_any(IntegerClaimVisitor).map(Some)
    }
}

/// `deserialize_with` helper for required numeric claims.
pub fn deserialize_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    deserializer.deserialize_any(IntegerClaimVisitor)
}

/// `deserialize_with` helper for optional numeric claims.
pub fn deserialize_optional_integer<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    deserializer.deserialize_option(OptionalIntegerClaimVisitor)
}
