//! Lenient field readers for raw items and JSON Schema hooks for the wire
//! types.
use crate::codec::BodyEncoding;
use crate::event::value_to_string;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Strings and numbers become strings; anything else is absent.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(match value {
    Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(value_to_string(&value)),
    _ => None,
  })
}

/// Only a JSON string counts as a body.
pub(crate) fn string_only<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(match value {
    Value::String(s) => Some(s),
    _ => None,
  })
}

/// A numeric status that fits in `u16`.
pub(crate) fn lenient_status<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(value.as_u64().and_then(|n| u16::try_from(n).ok()))
}

/// A non-negative integral timestamp.
pub(crate) fn lenient_ts<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(value.as_u64().or_else(|| {
    value
      .as_f64()
      .filter(|f| f.is_finite() && *f >= 0.0)
      .map(|f| f as u64)
  }))
}

/// `"text"` or `"base64"`; anything else is absent.
pub(crate) fn lenient_encoding<'de, D>(deserializer: D) -> Result<Option<BodyEncoding>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Value::deserialize(deserializer)?;
  Ok(match value.as_str() {
    Some("text") => Some(BodyEncoding::Text),
    Some("base64") => Some(BodyEncoding::Base64),
    _ => None,
  })
}

#[cfg(feature = "schema")]
pub(crate) fn http_method_schema(_gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
  schemars::json_schema!({
      "type": "string",
      "enum": ["GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH"],
      "title": "HTTP method",
      "description": "Methods accepted by the ingestion endpoint",
      "example": "GET"
  })
}
