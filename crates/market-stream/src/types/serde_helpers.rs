/*
[INPUT]:  Loosely typed JSON scalars (numbers sent as strings and vice versa)
[OUTPUT]: Decimal, DateTime<Utc> and String field values
[POS]:    Data layer - shared serde adapters for streamed payloads
[UPDATE]: When a feed changes how it encodes numbers or timestamps
*/

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

fn decimal_from_value<E: serde::de::Error>(value: &Value) -> Result<Decimal, E> {
    match value {
        Value::String(raw) => Decimal::from_str(raw.trim()).map_err(E::custom),
        Value::Number(number) => {
            let raw = number.to_string();
            Decimal::from_str(&raw)
                .or_else(|_| Decimal::from_scientific(&raw))
                .map_err(E::custom)
        }
        other => Err(E::custom(format!("invalid decimal value: {other}"))),
    }
}

fn millis_from_value<E: serde::de::Error>(value: &Value) -> Result<DateTime<Utc>, E> {
    let millis = match value {
        Value::String(raw) => raw.trim().parse::<i64>().map_err(E::custom)?,
        Value::Number(number) => number
            .as_i64()
            .ok_or_else(|| E::custom(format!("invalid millisecond timestamp: {number}")))?,
        other => return Err(E::custom(format!("invalid millisecond timestamp: {other}"))),
    };
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| E::custom(format!("timestamp out of range: {millis}")))
}

/// Decimal sent either as `"0.48"` or `0.48`; serialized back as a string.
pub mod decimal {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        decimal_from_value(&value)
    }

    pub fn serialize<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_string())
    }
}

/// Like [`decimal`], with null, `""` and a missing field all mapping to `None`.
pub mod option_decimal {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Null => Ok(None),
            Value::String(raw) if raw.trim().is_empty() => Ok(None),
            other => decimal_from_value(other).map(Some),
        }
    }

    pub fn serialize<S>(value: &Option<Decimal>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_str(&value.to_string()),
            None => serializer.serialize_none(),
        }
    }
}

/// Unix milliseconds, as a number or a numeric string.
pub mod timestamp_ms {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        millis_from_value(&value)
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.timestamp_millis().to_string())
    }
}

pub mod option_timestamp_ms {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        match &value {
            Value::Null => Ok(None),
            Value::String(raw) if raw.trim().is_empty() => Ok(None),
            other => millis_from_value(other).map(Some),
        }
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_str(&value.timestamp_millis().to_string()),
            None => serializer.serialize_none(),
        }
    }
}

/// Identifier that may arrive as a JSON number or string.
pub mod id_string {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(raw) => Ok(raw),
            Value::Number(number) => Ok(number.to_string()),
            other => Err(serde::de::Error::custom(format!("invalid identifier: {other}"))),
        }
    }

    pub fn serialize<S>(value: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }
}
