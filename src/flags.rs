//! Live capture configuration ("flags").
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default per-body byte cap (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Capture families that can be toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTypes {
  /// promise-based and legacy HTTP calls
  pub http: bool,
  /// beacon sends
  pub beacon: bool,
  /// server-sent event streams
  pub sse: bool,
  /// websocket frames
  pub websocket: bool,
}

impl Default for CaptureTypes {
  fn default() -> Self {
    CaptureTypes {
      http: true,
      beacon: false,
      sse: false,
      websocket: false,
    }
  }
}

/// The effective flags held by the interception controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureFlags {
  /// which families are captured
  pub types: CaptureTypes,
  /// per-body byte cap, always greater than zero
  pub max_body_bytes: usize,
}

impl Default for CaptureFlags {
  fn default() -> Self {
    CaptureFlags {
      types: CaptureTypes::default(),
      max_body_bytes: DEFAULT_MAX_BODY_BYTES,
    }
  }
}

impl CaptureFlags {
  /// Merges an update into these flags.
  ///
  /// Booleans missing from the update become `false`; a missing or invalid
  /// byte cap keeps the current one.
  pub fn merged(&self, update: &FlagsUpdate) -> CaptureFlags {
    let types = update.types.unwrap_or_default();
    CaptureFlags {
      types: CaptureTypes {
        http: types.http.unwrap_or(false),
        beacon: types.beacon.unwrap_or(false),
        sse: types.sse.unwrap_or(false),
        websocket: types.websocket.unwrap_or(false),
      },
      max_body_bytes: update.max_body_bytes.unwrap_or(self.max_body_bytes),
    }
  }
}

/// Partial type toggles as handed over by the tool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TypesUpdate {
  /// http family
  #[serde(default, deserialize_with = "truthy")]
  pub http: Option<bool>,
  /// beacon family
  #[serde(default, deserialize_with = "truthy")]
  pub beacon: Option<bool>,
  /// sse family
  #[serde(default, deserialize_with = "truthy")]
  pub sse: Option<bool>,
  /// websocket family
  #[serde(default, deserialize_with = "truthy")]
  pub websocket: Option<bool>,
}

/// A flags object as handed over by the tool, possibly partial or malformed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagsUpdate {
  /// family toggles
  #[serde(default, deserialize_with = "lenient_types")]
  pub types: Option<TypesUpdate>,
  /// byte cap, `None` when missing or not a positive number
  #[serde(default, deserialize_with = "positive_bytes")]
  pub max_body_bytes: Option<usize>,
}

impl FlagsUpdate {
  /// Parses an update leniently; anything unreadable counts as missing.
  ///
  /// ```
  /// let update = pagetap::FlagsUpdate::from_json(r#"{"types":{"http":1},"maxBodyBytes":"big"}"#);
  /// assert_eq!(update.types.and_then(|t| t.http), Some(true));
  /// assert_eq!(update.max_body_bytes, None);
  /// ```
  pub fn from_json(raw: &str) -> FlagsUpdate {
    serde_json::from_str(raw).unwrap_or_default()
  }
}

impl From<CaptureFlags> for FlagsUpdate {
  fn from(value: CaptureFlags) -> Self {
    FlagsUpdate {
      types: Some(TypesUpdate {
        http: Some(value.types.http),
        beacon: Some(value.types.beacon),
        sse: Some(value.types.sse),
        websocket: Some(value.types.websocket),
      }),
      max_body_bytes: Some(value.max_body_bytes),
    }
  }
}

fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
    Value::String(s) => !s.is_empty(),
    Value::Array(_) | Value::Object(_) => true,
  }
}

fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
  let value = Value::deserialize(deserializer)?;
  Ok(Some(is_truthy(&value)))
}

fn lenient_types<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<TypesUpdate>, D::Error> {
  let value = Value::deserialize(deserializer)?;
  Ok(serde_json::from_value(value).ok())
}

fn positive_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
  let value = Value::deserialize(deserializer)?;
  let bytes = match &value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse::<f64>().ok(),
    _ => None,
  };
  Ok(bytes.filter(|b| b.is_finite() && *b >= 1.0).map(|b| b as usize))
}
