//! Captured events: one request/response pair per intercepted network call.
use crate::codec::{BodyCapture, BodyEncoding};
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

/// Ordered header pairs.
///
/// Serializes as a JSON object; deserializes from either an object or a list
/// of `{name, value}` entries. Non-string values are stringified and the
/// document order is kept.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderPairs(pub Vec<(String, String)>);

impl HeaderPairs {
  /// Creates an empty list.
  pub fn new() -> HeaderPairs {
    HeaderPairs(Vec::new())
  }

  /// Appends a pair.
  pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.push((name.into(), value.into()));
  }

  /// Sets `name`, replacing an existing entry with the same name
  /// (case-insensitive) in place.
  pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
      Some(entry) => entry.1 = value,
      None => self.0.push((name, value)),
    }
  }

  /// Case-insensitive lookup of the first value for `name`.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Iterates the pairs in order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  /// Number of pairs.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Whether there are no pairs.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderPairs {
  fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
    HeaderPairs(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

pub(crate) fn value_to_string(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

impl Serialize for HeaderPairs {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut map = serializer.serialize_map(Some(self.0.len()))?;
    for (k, v) in &self.0 {
      map.serialize_entry(k, v)?;
    }
    map.end()
  }
}

impl<'de> Deserialize<'de> for HeaderPairs {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
      type Value = HeaderPairs;

      fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a header object or a list of {name, value}")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<HeaderPairs, A::Error> {
        let mut pairs = HeaderPairs::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
          pairs.push(k, value_to_string(&v));
        }
        Ok(pairs)
      }

      fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<HeaderPairs, A::Error> {
        let mut pairs = HeaderPairs::new();
        while let Some(entry) = seq.next_element::<Value>()? {
          if let Some(name) = entry.get("name") {
            let value = entry.get("value").map(value_to_string).unwrap_or_default();
            pairs.push(value_to_string(name), value);
          }
        }
        Ok(pairs)
      }

      fn visit_unit<E>(self) -> Result<HeaderPairs, E> {
        Ok(HeaderPairs::new())
      }

      fn visit_none<E>(self) -> Result<HeaderPairs, E> {
        Ok(HeaderPairs::new())
      }
    }

    deserializer.deserialize_any(PairsVisitor)
  }
}

/// The request half of a captured event.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRequest {
  /// absolute request url
  pub url: String,
  /// upper-cased method
  pub method: String,
  /// request headers as set by the page
  #[serde(default)]
  pub headers: HeaderPairs,
  /// encoded body prefix
  pub body: Option<String>,
  /// encoding of `body`
  #[serde(default)]
  pub body_encoding: BodyEncoding,
  /// original body length
  #[serde(default)]
  pub body_size: u64,
  /// whether `body` was cut at the byte cap
  #[serde(default)]
  pub truncated: bool,
}

impl CapturedRequest {
  /// Builds the request half from a codec result.
  pub fn new(
    url: impl Into<String>,
    method: impl Into<String>,
    headers: HeaderPairs,
    body: BodyCapture,
  ) -> CapturedRequest {
    CapturedRequest {
      url: url.into(),
      method: method.into(),
      headers,
      body: body.body,
      body_encoding: body.encoding,
      body_size: body.body_size,
      truncated: body.truncated,
    }
  }
}

/// A completed response.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCapture {
  /// numeric status
  pub status: u16,
  /// status text, possibly empty
  #[serde(default)]
  pub status_text: String,
  /// response headers
  #[serde(default)]
  pub headers: HeaderPairs,
  /// encoded body prefix
  pub body: Option<String>,
  /// encoding of `body`
  #[serde(default)]
  pub body_encoding: BodyEncoding,
  /// original body length
  #[serde(default)]
  pub body_size: u64,
  /// whether `body` was cut at the byte cap
  #[serde(default)]
  pub truncated: bool,
}

impl ResponseCapture {
  /// Builds the response half from a codec result.
  pub fn new(
    status: u16,
    status_text: impl Into<String>,
    headers: HeaderPairs,
    body: BodyCapture,
  ) -> ResponseCapture {
    ResponseCapture {
      status,
      status_text: status_text.into(),
      headers,
      body: body.body,
      body_encoding: body.encoding,
      body_size: body.body_size,
      truncated: body.truncated,
    }
  }
}

/// The response half of a captured event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapturedResponse {
  /// the call was rejected before a response arrived
  Failed {
    /// rejection message
    #[serde(rename = "networkError")]
    network_error: String,
  },
  /// a response arrived
  Completed(ResponseCapture),
}

impl CapturedResponse {
  /// The transport failure message, if the call failed.
  pub fn network_error(&self) -> Option<&str> {
    match self {
      CapturedResponse::Failed { network_error } => Some(network_error),
      CapturedResponse::Completed(_) => None,
    }
  }

  /// Original response body length, zero for failures.
  pub fn body_size(&self) -> u64 {
    match self {
      CapturedResponse::Failed { .. } => 0,
      CapturedResponse::Completed(r) => r.body_size,
    }
  }
}

/// One intercepted network call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedEvent {
  /// capture time, ms since epoch
  pub ts: u64,
  /// hosting page url at capture time
  pub page_url: String,
  /// request half
  pub request: CapturedRequest,
  /// response half
  pub response: CapturedResponse,
}
