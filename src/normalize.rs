//! Reshapes raw captured items into validated wire items.
//!
//! Normalization is pure and keeps input order. Items that cannot be
//! expressed on the wire (no absolute http/https URL, a method outside the
//! allowed set, a URL too long even without its query) are left out without
//! an error.
use crate::codec::BodyEncoding;
use crate::event::{CapturedEvent, CapturedResponse, HeaderPairs};
use crate::serde_schema::{lenient_encoding, lenient_status, lenient_string, lenient_ts, string_only};
use crate::validate::{is_header_token, is_valid_id, normalize_method, resolve_http_url, truncate_chars};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Destination graph used when none is configured.
pub const DEFAULT_GRAPH: &str = "http://localhost/graphs/http-requests";

/// Request half of a raw item. Every field is optional and read leniently.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawRequest {
  /// possibly relative url
  #[serde(deserialize_with = "lenient_string")]
  pub url: Option<String>,
  /// method, `GET` when absent
  #[serde(deserialize_with = "lenient_string")]
  pub method: Option<String>,
  /// headers as a map or a `{name, value}` list
  pub headers: HeaderPairs,
  /// body as captured
  #[serde(deserialize_with = "string_only")]
  pub body: Option<String>,
  /// encoding of `body`; anything but text/base64 means no usable body
  #[serde(deserialize_with = "lenient_encoding")]
  pub body_encoding: Option<BodyEncoding>,
}

/// Response half of a raw item.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawResponse {
  /// numeric status
  #[serde(deserialize_with = "lenient_status")]
  pub status: Option<u16>,
  /// reason text
  #[serde(deserialize_with = "lenient_string")]
  pub status_text: Option<String>,
  /// headers as a map or a `{name, value}` list
  pub headers: HeaderPairs,
  /// body as captured
  #[serde(deserialize_with = "string_only")]
  pub body: Option<String>,
  /// encoding of `body`
  #[serde(deserialize_with = "lenient_encoding")]
  pub body_encoding: Option<BodyEncoding>,
  /// transport failure message
  #[serde(deserialize_with = "lenient_string")]
  pub network_error: Option<String>,
}

/// Where and when a raw item was captured.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMeta {
  /// capture time, ms since epoch
  #[serde(deserialize_with = "lenient_ts")]
  pub ts: Option<u64>,
  /// base for relative request urls
  #[serde(deserialize_with = "lenient_string")]
  pub page_url: Option<String>,
}

/// One captured or imported exchange before normalization.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawItem {
  /// caller supplied id, replaced when absent or invalid
  #[serde(deserialize_with = "lenient_string")]
  pub id: Option<String>,
  /// request half
  pub request: RawRequest,
  /// response half
  pub response: Option<RawResponse>,
  /// capture metadata
  pub meta: RawMeta,
}

impl From<CapturedEvent> for RawItem {
  fn from(event: CapturedEvent) -> Self {
    let request = event.request;
    let response = match event.response {
      CapturedResponse::Failed { network_error } => RawResponse {
        network_error: Some(network_error),
        ..RawResponse::default()
      },
      CapturedResponse::Completed(r) => RawResponse {
        status: Some(r.status),
        status_text: Some(r.status_text),
        headers: r.headers,
        body: r.body,
        body_encoding: Some(r.body_encoding),
        network_error: None,
      },
    };
    RawItem {
      id: None,
      request: RawRequest {
        url: Some(request.url),
        method: Some(request.method),
        headers: request.headers,
        body: request.body,
        body_encoding: Some(request.body_encoding),
      },
      response: Some(response),
      meta: RawMeta {
        ts: Some(event.ts),
        page_url: Some(event.page_url),
      },
    }
  }
}

/// Field caps applied during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
  /// id length
  pub id: usize,
  /// full url length
  pub url: usize,
  /// path length
  pub path: usize,
  /// raw query length
  pub query_raw: usize,
  /// fragment length
  pub fragment: usize,
  /// header value length
  pub header_value: usize,
  /// query parameter name length
  pub param_name: usize,
  /// query parameter value length
  pub param_value: usize,
  /// number of query parameters
  pub params: usize,
  /// reason phrase length
  pub reason: usize,
  /// decoded request body bytes
  pub request_body: usize,
  /// decoded response body bytes
  pub response_body: usize,
}

impl Default for Limits {
  fn default() -> Self {
    Limits {
      id: 256,
      url: 4000,
      path: 2000,
      query_raw: 4000,
      fragment: 200,
      header_value: 8000,
      param_name: 256,
      param_value: 2000,
      params: 200,
      reason: 256,
      request_body: 10 * 1024 * 1024,
      response_body: 20 * 1024 * 1024,
    }
  }
}

/// Replacement id generator: called with the raw item and its index.
pub type IdFn = Arc<dyn Fn(&RawItem, usize) -> String + Send + Sync>;

/// Normalization settings.
#[derive(Clone)]
pub struct NormalizeOptions {
  /// destination graph stamped on every item
  pub graph: String,
  /// id generator for items without a valid id
  pub id_fn: Option<IdFn>,
  /// http version stamped on every item and response
  pub force_http_version: Option<String>,
  /// field caps
  pub limits: Limits,
}

impl Default for NormalizeOptions {
  fn default() -> Self {
    NormalizeOptions {
      graph: DEFAULT_GRAPH.to_string(),
      id_fn: None,
      force_http_version: None,
      limits: Limits::default(),
    }
  }
}

impl fmt::Debug for NormalizeOptions {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NormalizeOptions")
      .field("graph", &self.graph)
      .field("id_fn", &self.id_fn.as_ref().map(|_| "<fn>"))
      .field("force_http_version", &self.force_http_version)
      .field("limits", &self.limits)
      .finish()
  }
}

impl NormalizeOptions {
  /// Sets the destination graph.
  pub fn graph(mut self, graph: impl Into<String>) -> Self {
    self.graph = graph.into();
    self
  }

  /// Sets the id generator.
  pub fn id_fn<F>(mut self, id_fn: F) -> Self
  where
    F: Fn(&RawItem, usize) -> String + Send + Sync + 'static,
  {
    self.id_fn = Some(Arc::new(id_fn));
    self
  }

  /// Stamps `version` on every item and response.
  pub fn force_http_version(mut self, version: impl Into<String>) -> Self {
    self.force_http_version = Some(version.into());
    self
  }

  /// Replaces the field caps.
  pub fn limits(mut self, limits: Limits) -> Self {
    self.limits = limits;
    self
  }
}

/// A decomposed query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Param {
  /// decoded name
  pub name: String,
  /// decoded value
  pub value: String,
}

/// A header entry with a lower-cased token name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Header {
  /// lower-cased name
  pub name: String,
  /// value, possibly truncated
  pub value: String,
}

/// The parsed request target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct WireUri {
  /// absolute url, possibly shortened to scheme, host and path
  pub full: String,
  /// `http` or `https`
  pub scheme: String,
  /// lower-cased host with non-default port
  pub authority: String,
  /// path starting with `/`
  pub path: String,
  /// fragment without `#`
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub fragment: Option<String>,
  /// raw query without `?`
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub query_raw: Option<String>,
  /// decomposed query
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub params: Option<Vec<Param>>,
}

/// The connection an item was exchanged over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct Connection {
  /// same as the uri authority
  pub authority: String,
}

/// Response sub-object of a wire item.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
  /// forced http version
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub http_version: Option<String>,
  /// numeric status
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<u16>,
  /// reason phrase
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub reason: Option<String>,
  /// base64 body
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body_base64: Option<String>,
  /// response headers
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub headers: Option<Vec<Header>>,
}

impl WireResponse {
  fn is_meaningful(&self) -> bool {
    self.http_version.is_some()
      || self.status.is_some()
      || self.reason.is_some()
      || self.body_base64.is_some()
      || self.headers.is_some()
  }
}

/// A validated item as the ingestion endpoint expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct WireItem {
  /// matches `^[\w.\-:@/]+$`, at most 256 characters
  pub id: String,
  /// one of the allowed methods
  #[serde(with = "http_serde::method")]
  #[cfg_attr(feature = "schema", schemars(schema_with = "crate::serde_schema::http_method_schema"))]
  pub method: Method,
  /// forced http version
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub http_version: Option<String>,
  /// destination graph
  pub graph: String,
  /// request target
  pub uri: WireUri,
  /// request headers in capture order
  pub request_headers: Vec<Header>,
  /// connection details
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub connection: Option<Connection>,
  /// base64 request body
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body_base64: Option<String>,
  /// response, when anything about it is known
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub response: Option<WireResponse>,
}

/// Output of [`normalize`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedBatch {
  /// surviving items in input order
  pub items: Vec<WireItem>,
}

/// Normalizes `raw` in order, leaving out items that cannot be expressed.
pub fn normalize(raw: &[RawItem], options: &NormalizeOptions) -> NormalizedBatch {
  let items = raw
    .iter()
    .enumerate()
    .filter_map(|(index, item)| normalize_item(item, index, options))
    .collect::<Vec<_>>();
  if items.len() < raw.len() {
    tracing::debug!("normalize kept {} of {} items", items.len(), raw.len());
  }
  NormalizedBatch { items }
}

fn normalize_item(item: &RawItem, index: usize, options: &NormalizeOptions) -> Option<WireItem> {
  let limits = &options.limits;
  let request = &item.request;
  let url = resolve_http_url(
    request.url.as_deref().unwrap_or_default(),
    item.meta.page_url.as_deref().filter(|base| !base.is_empty()),
  )?;
  let uri = parse_uri(&url, limits)?;
  let method = normalize_method(request.method.as_deref().unwrap_or("GET"))?;
  let id = item
    .id
    .as_deref()
    .map(str::trim)
    .filter(|id| is_valid_id(id, limits.id))
    .map(String::from)
    .unwrap_or_else(|| match &options.id_fn {
      Some(id_fn) => id_fn(item, index),
      None => default_id(item, index),
    });

  let response = item
    .response
    .as_ref()
    .map(|raw| wire_response(raw, options))
    .unwrap_or_else(|| WireResponse {
      http_version: options.force_http_version.clone(),
      ..WireResponse::default()
    });

  Some(WireItem {
    id,
    method,
    http_version: options.force_http_version.clone(),
    graph: options.graph.clone(),
    request_headers: header_list(&request.headers, limits),
    connection: (!uri.authority.is_empty()).then(|| Connection {
      authority: uri.authority.clone(),
    }),
    uri,
    body_base64: body_base64(request.body.as_deref(), request.body_encoding, limits.request_body),
    response: response.is_meaningful().then_some(response),
  })
}

fn wire_response(raw: &RawResponse, options: &NormalizeOptions) -> WireResponse {
  let limits = &options.limits;
  let reason = match raw.status_text.as_deref().filter(|text| !text.is_empty()) {
    Some(text) => Some(truncate_chars(text, limits.reason).to_string()),
    None => raw.status.and_then(reason_phrase).map(String::from),
  };
  let headers = header_list(&raw.headers, limits);
  WireResponse {
    http_version: options.force_http_version.clone(),
    status: raw.status,
    reason,
    body_base64: body_base64(raw.body.as_deref(), raw.body_encoding, limits.response_body),
    headers: (!headers.is_empty()).then_some(headers),
  }
}

fn default_id(item: &RawItem, index: usize) -> String {
  match item.meta.ts {
    Some(ts) => format!("req-{ts}-{index}"),
    None => format!("req-{index}"),
  }
}

fn authority(url: &Url) -> String {
  let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
  match url.port() {
    Some(port) => format!("{host}:{port}"),
    None => host,
  }
}

fn parse_uri(url: &Url, limits: &Limits) -> Option<WireUri> {
  let scheme = url.scheme().to_ascii_lowercase();
  let authority = authority(url);
  let raw_path = match url.path() {
    "" => "/",
    path => path,
  };
  let mut full = url.as_str().to_string();
  if full.len() > limits.url {
    let short = format!("{scheme}://{authority}{raw_path}");
    if short.len() > limits.url {
      tracing::debug!("url too long even without query: {} chars", short.len());
      return None;
    }
    full = short;
  }

  let path = if raw_path.starts_with('/') {
    raw_path.to_string()
  } else {
    format!("/{raw_path}")
  };
  let path = truncate_chars(&path, limits.path).to_string();

  let query_raw = url
    .query()
    .filter(|query| !query.is_empty())
    .map(|query| truncate_chars(query, limits.query_raw).to_string());
  let params = query_raw.as_deref().map(|query| {
    url::form_urlencoded::parse(query.as_bytes())
      .take(limits.params)
      .map(|(name, value)| Param {
        name: truncate_chars(&name, limits.param_name).to_string(),
        value: truncate_chars(&value, limits.param_value).to_string(),
      })
      .collect::<Vec<_>>()
  });
  let fragment = url
    .fragment()
    .filter(|fragment| !fragment.is_empty())
    .map(|fragment| truncate_chars(fragment, limits.fragment).to_string());

  Some(WireUri {
    full,
    scheme,
    authority,
    path,
    fragment,
    query_raw,
    params: params.filter(|params| !params.is_empty()),
  })
}

fn header_list(headers: &HeaderPairs, limits: &Limits) -> Vec<Header> {
  headers
    .iter()
    .filter_map(|(name, value)| {
      let name = name.trim().to_ascii_lowercase();
      is_header_token(&name).then(|| Header {
        name,
        value: truncate_chars(value, limits.header_value).to_string(),
      })
    })
    .collect()
}

/// Decoded length of a padded base64 string, computed from its length.
fn base64_decoded_len(b64: &str) -> usize {
  let padding = if b64.ends_with("==") {
    2
  } else if b64.ends_with('=') {
    1
  } else {
    0
  };
  (b64.len() * 3 / 4).saturating_sub(padding)
}

fn body_base64(body: Option<&str>, encoding: Option<BodyEncoding>, max_decoded: usize) -> Option<String> {
  let body = body.filter(|body| !body.is_empty())?;
  match encoding? {
    BodyEncoding::Base64 => {
      if base64_decoded_len(body) > max_decoded || STANDARD.decode(body).is_err() {
        return None;
      }
      Some(body.to_string())
    }
    BodyEncoding::Text => (body.len() <= max_decoded).then(|| STANDARD.encode(body)),
    BodyEncoding::None => None,
  }
}

/// Reason phrase used when a raw response carries none.
pub fn reason_phrase(status: u16) -> Option<&'static str> {
  Some(match status {
    100 => "Continue",
    101 => "Switching Protocols",
    102 => "Processing",
    103 => "Early Hints",
    200 => "OK",
    201 => "Created",
    202 => "Accepted",
    203 => "Non-Authoritative Information",
    204 => "No Content",
    205 => "Reset Content",
    206 => "Partial Content",
    207 => "Multi-Status",
    300 => "Multiple Choices",
    301 => "Moved Permanently",
    302 => "Found",
    303 => "See Other",
    304 => "Not Modified",
    307 => "Temporary Redirect",
    308 => "Permanent Redirect",
    400 => "Bad Request",
    401 => "Unauthorized",
    402 => "Payment Required",
    403 => "Forbidden",
    404 => "Not Found",
    405 => "Method Not Allowed",
    406 => "Not Acceptable",
    407 => "Proxy Authentication Required",
    408 => "Request Timeout",
    409 => "Conflict",
    410 => "Gone",
    411 => "Length Required",
    412 => "Precondition Failed",
    413 => "Payload Too Large",
    414 => "URI Too Long",
    415 => "Unsupported Media Type",
    416 => "Range Not Satisfiable",
    417 => "Expectation Failed",
    418 => "I'm a teapot",
    422 => "Unprocessable Entity",
    425 => "Too Early",
    426 => "Upgrade Required",
    428 => "Precondition Required",
    429 => "Too Many Requests",
    431 => "Request Header Fields Too Large",
    451 => "Unavailable For Legal Reasons",
    500 => "Internal Server Error",
    501 => "Not Implemented",
    502 => "Bad Gateway",
    503 => "Service Unavailable",
    504 => "Gateway Timeout",
    505 => "HTTP Version Not Supported",
    507 => "Insufficient Storage",
    511 => "Network Authentication Required",
    _ => return None,
  })
}
