//! Unbounded on-chain quantities.
//!
//! Amounts and token ids are held as `u128` and cross every external boundary
//! as decimal strings. Parsing is checked: a value that does not fit is a
//! [`SchemaError::Overflow`], never a truncated number.

use super::normalize::SchemaError;
use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};
use std::fmt;
use std::num::IntErrorKind;

/// Parse a decimal or `0x`-prefixed hex string into `u128`.
pub fn parse_u128(field: &str, raw: &str) -> Result<u128, SchemaError> {
    let s = raw.trim();
    let invalid = || SchemaError::InvalidInteger {
        field: field.to_string(),
        value: raw.to_string(),
    };
    if let Some(digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let digits = digits.trim_start_matches('0');
        if digits.is_empty() {
            return Ok(0);
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        if digits.len() > 32 {
            return Err(SchemaError::Overflow {
                field: field.to_string(),
                value: raw.to_string(),
            });
        }
        return u128::from_str_radix(digits, 16).map_err(|_| invalid());
    }
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    s.parse::<u128>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow => SchemaError::Overflow {
            field: field.to_string(),
            value: raw.to_string(),
        },
        _ => invalid(),
    })
}

/// Parse into `u64` (block numbers, timestamps).
pub fn parse_u64(field: &str, raw: &str) -> Result<u64, SchemaError> {
    let v = parse_u128(field, raw)?;
    u64::try_from(v).map_err(|_| SchemaError::Overflow {
        field: field.to_string(),
        value: raw.to_string(),
    })
}

/// Render an integer amount with `decimals` fractional digits, e.g. sats as BTC.
pub fn format_units(amount: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = amount / scale;
    let frac = amount % scale;
    if decimals == 0 {
        return whole.to_string();
    }
    format!("{}.{:0width$}", whole, frac, width = decimals as usize)
}

struct U128Visitor;

impl<'de> Visitor<'de> for U128Visitor {
    type Value = u128;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an unsigned integer or a decimal/hex string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
        Ok(u128::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
        u128::try_from(v).map_err(|_| E::custom(format!("negative quantity {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
        parse_u128("value", v).map_err(E::custom)
    }
}

/// `#[serde(with = "decimal")]` for `u128`: written as a decimal string.
pub mod decimal {
    use super::*;

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        d.deserialize_any(U128Visitor)
    }

    /// `Option<u128>`: a decimal string or `null`.
    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(v: &Option<u128>, s: S) -> Result<S::Ok, S::Error> {
            match v {
                Some(v) => s.collect_str(v),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u128>, D::Error> {
            let raw: Option<serde_json::Value> = serde::Deserialize::deserialize(d)?;
            match raw {
                None | Some(serde_json::Value::Null) => Ok(None),
                Some(serde_json::Value::String(s)) => {
                    parse_u128("value", &s).map(Some).map_err(de::Error::custom)
                }
                Some(serde_json::Value::Number(n)) => n
                    .as_u64()
                    .map(|v| Some(u128::from(v)))
                    .ok_or_else(|| de::Error::custom(format!("invalid amount {n}"))),
                Some(other) => Err(de::Error::custom(format!("invalid amount {other}"))),
            }
        }
    }
}

/// `#[serde(with = "signed")]` for `i128` discrepancies.
pub mod signed {
    use super::*;

    pub fn serialize<S: Serializer>(v: &i128, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i128, D::Error> {
        struct I128Visitor;
        impl<'de> Visitor<'de> for I128Visitor {
            type Value = i128;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a signed integer or decimal string")
            }
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<i128, E> {
                Ok(i128::from(v))
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<i128, E> {
                Ok(i128::from(v))
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<i128, E> {
                v.trim().parse::<i128>().map_err(E::custom)
            }
        }
        d.deserialize_any(I128Visitor)
    }
}

/// `#[serde(with = "seconds")]` for `u64` timestamps: numbers on output,
/// numbers or strings on input.
pub mod seconds {
    use super::*;

    pub fn serialize<S: Serializer>(v: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(*v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let v = d.deserialize_any(U128Visitor)?;
        u64::try_from(v).map_err(|_| de::Error::custom(format!("timestamp {v} out of range")))
    }
}
