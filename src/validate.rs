//! Field rules shared by the interception hooks and the normalizer.
use http::Method;
use url::Url;

/// Methods accepted for capture and ingestion; anything else is skipped.
pub const ALLOWED_METHODS: [Method; 9] = [
  Method::GET,
  Method::HEAD,
  Method::POST,
  Method::PUT,
  Method::DELETE,
  Method::CONNECT,
  Method::OPTIONS,
  Method::TRACE,
  Method::PATCH,
];

/// Upper-cases `raw` (empty means `GET`) and checks it against the allowed set.
///
/// ```
/// assert_eq!(pagetap::normalize_method("post"), Some(http::Method::POST));
/// assert_eq!(pagetap::normalize_method(""), Some(http::Method::GET));
/// assert_eq!(pagetap::normalize_method("TRACK"), None);
/// ```
pub fn normalize_method(raw: &str) -> Option<Method> {
  let upper = raw.to_ascii_uppercase();
  let upper = if upper.is_empty() { "GET".to_string() } else { upper };
  ALLOWED_METHODS.iter().find(|m| m.as_str() == upper).cloned()
}

/// Whether `method` carries no request body worth capturing.
pub(crate) fn is_bodyless(method: &Method) -> bool {
  matches!(*method, Method::GET | Method::HEAD)
}

/// Resolves `input` against an optional base and keeps it only when the
/// result is an absolute http/https URL.
///
/// An unparsable base is ignored rather than failing the resolution.
pub fn resolve_http_url(input: &str, base: Option<&str>) -> Option<Url> {
  let base = base.and_then(|b| Url::parse(b).ok());
  let url = Url::options().base_url(base.as_ref()).parse(input).ok()?;
  matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Whether `name` is a valid header field name token.
pub(crate) fn is_header_token(name: &str) -> bool {
  !name.is_empty() && http::HeaderName::from_bytes(name.as_bytes()).is_ok()
}

/// Whether `id` is usable as an ingestion id: word characters and `.-:@/`
/// only, at most `max_len` characters.
pub(crate) fn is_valid_id(id: &str, max_len: usize) -> bool {
  !id.is_empty()
    && id.chars().count() <= max_len
    && id
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ':' | '@' | '/'))
}

/// Cuts `s` to at most `max` characters.
pub(crate) fn truncate_chars(s: &str, max: usize) -> &str {
  match s.char_indices().nth(max) {
    Some((idx, _)) => &s[..idx],
    None => s,
  }
}
