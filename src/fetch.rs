//! The promise-based call primitive and its capturing wrapper.
use crate::body::Body;
use crate::codec::{read_body, BodyCapture};
use crate::controller::CaptureContext;
use crate::event::{now_millis, CapturedEvent, CapturedRequest, CapturedResponse, HeaderPairs, ResponseCapture};
use crate::validate::{is_bodyless, normalize_method, resolve_http_url};
use std::sync::Arc;
use thiserror::Error as ThisError;

/// The arguments of a promise-based call: a possibly relative input URL and
/// the init options.
#[derive(Debug, Clone, Default)]
pub struct FetchArgs {
  /// request target, resolved against the page location
  pub input: String,
  /// method override, `GET` when absent
  pub method: Option<String>,
  /// request headers
  pub headers: HeaderPairs,
  /// request body
  pub body: Option<Body>,
}

impl FetchArgs {
  /// A `GET` of `input`.
  pub fn new(input: impl Into<String>) -> FetchArgs {
    FetchArgs {
      input: input.into(),
      ..FetchArgs::default()
    }
  }

  /// Sets the method.
  pub fn method(mut self, method: impl Into<String>) -> FetchArgs {
    self.method = Some(method.into());
    self
  }

  /// Adds a header.
  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> FetchArgs {
    self.headers.push(name, value);
    self
  }

  /// Sets the body.
  pub fn body<B: Into<Body>>(mut self, body: B) -> FetchArgs {
    self.body = Some(body.into());
    self
  }
}

/// A resolved promise-based call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
  /// numeric status
  pub status: u16,
  /// status text
  pub status_text: String,
  /// response headers
  pub headers: HeaderPairs,
  /// response body
  pub body: Body,
}

impl FetchResponse {
  /// A response with `status` and nothing else.
  pub fn new(status: u16) -> FetchResponse {
    FetchResponse {
      status,
      ..FetchResponse::default()
    }
  }

  /// Sets the status text.
  pub fn status_text(mut self, text: impl Into<String>) -> FetchResponse {
    self.status_text = text.into();
    self
  }

  /// Adds a header.
  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> FetchResponse {
    self.headers.push(name, value);
    self
  }

  /// Sets the body.
  pub fn body<B: Into<Body>>(mut self, body: B) -> FetchResponse {
    self.body = body.into();
    self
  }
}

/// A rejected promise-based call.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct NetworkError(pub String);

/// The promise-based call primitive of a page.
#[async_trait::async_trait]
pub trait Fetch: Send + Sync {
  /// Performs the call.
  async fn fetch(&self, args: FetchArgs) -> Result<FetchResponse, NetworkError>;
}

/// What the hook learns about a call before it proceeds.
struct CallSnapshot {
  url: String,
  method: String,
  headers: HeaderPairs,
  content_type: String,
  body: Option<Body>,
}

impl CallSnapshot {
  /// Rebuilds the request from call arguments; `None` when the call must not
  /// be instrumented.
  fn take(args: &FetchArgs, page_url: &str) -> Option<CallSnapshot> {
    let method = normalize_method(args.method.as_deref().unwrap_or("GET"))?;
    let url = resolve_http_url(&args.input, Some(page_url))?;
    let body = if is_bodyless(&method) {
      None
    } else {
      args.body.clone()
    };
    Some(CallSnapshot {
      url: url.into(),
      method: method.to_string(),
      content_type: args.headers.get("content-type").unwrap_or_default().to_string(),
      headers: args.headers.clone(),
      body,
    })
  }

  fn into_request(self, max_body_bytes: usize) -> CapturedRequest {
    let body = match &self.body {
      Some(body) => read_body(body, &self.content_type, max_body_bytes),
      None => BodyCapture::empty(),
    };
    CapturedRequest::new(self.url, self.method, self.headers, body)
  }
}

/// Wraps the native primitive; every instrumented call yields one event.
pub(crate) struct CapturingFetch {
  original: Arc<dyn Fetch>,
  ctx: CaptureContext,
}

impl CapturingFetch {
  pub(crate) fn new(original: Arc<dyn Fetch>, ctx: CaptureContext) -> CapturingFetch {
    CapturingFetch { original, ctx }
  }
}

#[async_trait::async_trait]
impl Fetch for CapturingFetch {
  async fn fetch(&self, args: FetchArgs) -> Result<FetchResponse, NetworkError> {
    let started = now_millis();
    let Some(snapshot) = CallSnapshot::take(&args, &self.ctx.page_url()) else {
      tracing::debug!(input = %args.input, "fetch passed through uninstrumented");
      return self.original.fetch(args).await;
    };
    let max_body_bytes = self.ctx.max_body_bytes();
    match self.original.fetch(args).await {
      Err(err) => {
        let network_error = err.to_string();
        self.ctx.emit_later("fetch", move |ctx| {
          Ok(CapturedEvent {
            ts: started,
            page_url: ctx.page_url(),
            request: snapshot.into_request(max_body_bytes),
            response: CapturedResponse::Failed { network_error },
          })
        });
        Err(err)
      }
      Ok(response) => {
        let cloned = response.clone();
        self.ctx.emit_later("fetch", move |ctx| {
          let content_type = cloned.headers.get("content-type").unwrap_or_default();
          let body = read_body(&cloned.body, content_type, max_body_bytes);
          let response = ResponseCapture::new(
            cloned.status,
            cloned.status_text.clone(),
            cloned.headers.clone(),
            body,
          );
          Ok(CapturedEvent {
            ts: started,
            page_url: ctx.page_url(),
            request: snapshot.into_request(max_body_bytes),
            response: CapturedResponse::Completed(response),
          })
        });
        Ok(response)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_resolves_relative_input() {
    let args = FetchArgs::new("/api?q=1").method("post").body("x=1");
    let snapshot = CallSnapshot::take(&args, "https://example.com/app/").unwrap();
    assert_eq!(snapshot.url, "https://example.com/api?q=1");
    assert_eq!(snapshot.method, "POST");
    assert!(snapshot.body.is_some());
  }

  #[test]
  fn snapshot_skips_bodies_for_get() {
    let args = FetchArgs::new("https://example.com/").body("ignored");
    let snapshot = CallSnapshot::take(&args, "https://example.com/").unwrap();
    assert!(snapshot.body.is_none());
  }

  #[test]
  fn snapshot_refuses_foreign_calls() {
    assert!(CallSnapshot::take(&FetchArgs::new("ws://example.com/"), "https://example.com/").is_none());
    let track = FetchArgs::new("https://example.com/").method("TRACK");
    assert!(CallSnapshot::take(&track, "https://example.com/").is_none());
  }
}
