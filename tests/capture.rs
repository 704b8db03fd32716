use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pagetap::{
  bridge, BodyEncoding, CapturedResponse, Fetch, FetchArgs, FetchResponse, FlagsUpdate, HookFamily,
  InterceptionController, LoadListener, NetworkError, Page, Xhr, XhrBody, XhrCompletion, XhrFactory,
  XhrResponseBody,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Native fetch answering every call with a JSON document, or failing for
/// urls containing `offline`.
struct NativeFetch;

#[async_trait::async_trait]
impl Fetch for NativeFetch {
  async fn fetch(&self, args: FetchArgs) -> Result<FetchResponse, NetworkError> {
    if args.input.contains("offline") {
      return Err(NetworkError("Failed to fetch".into()));
    }
    Ok(
      FetchResponse::new(200)
        .status_text("OK")
        .header("content-type", "application/json")
        .body(r#"{"ok":true}"#),
    )
  }
}

/// Legacy call object that completes synchronously inside `send`.
#[derive(Default)]
struct NativeXhr {
  sent: Arc<Mutex<Vec<Option<XhrBody>>>>,
  listeners: Vec<LoadListener>,
}

impl Xhr for NativeXhr {
  fn open(&mut self, _method: &str, _url: &str) {}
  fn set_request_header(&mut self, _name: &str, _value: &str) {}
  fn add_load_listener(&mut self, listener: LoadListener) {
    self.listeners.push(listener);
  }
  fn send(&mut self, body: Option<XhrBody>) {
    if let Ok(mut sent) = self.sent.lock() {
      sent.push(body);
    }
    let completion = XhrCompletion {
      status: 201,
      status_text: "Created".into(),
      raw_headers: "Content-Type: text/plain\r\nX-Trace: abc\r\n".into(),
      response: XhrResponseBody::Text("created".into()),
    };
    for listener in self.listeners.drain(..) {
      listener(&completion);
    }
  }
}

#[derive(Default)]
struct NativeXhrFactory {
  sent: Arc<Mutex<Vec<Option<XhrBody>>>>,
}

impl XhrFactory for NativeXhrFactory {
  fn create(&self) -> Box<dyn Xhr> {
    Box::new(NativeXhr {
      sent: self.sent.clone(),
      listeners: Vec::new(),
    })
  }
}

fn page() -> (Arc<Page>, Arc<NativeFetch>, Arc<NativeXhrFactory>) {
  let fetch = Arc::new(NativeFetch);
  let xhr = Arc::new(NativeXhrFactory::default());
  let page = Arc::new(Page::new("https://example.com/", fetch.clone(), xhr.clone()));
  (page, fetch, xhr)
}

#[tokio::test]
async fn test_get_with_json_response() {
  let (page, _, _) = page();
  let (emitter, mut receiver) = bridge();
  let controller = InterceptionController::new(page.clone(), emitter);
  controller.install(None);

  let response = page.fetch(FetchArgs::new("https://example.com/a?x=1")).await.unwrap();
  assert_eq!(response.status, 200);

  let event = receiver.recv().await.unwrap();
  assert_eq!(event.page_url, "https://example.com/");
  assert_eq!(event.request.url, "https://example.com/a?x=1");
  assert_eq!(event.request.method, "GET");
  assert_eq!(event.request.body_encoding, BodyEncoding::None);
  assert!(event.request.body.is_none());
  match event.response {
    CapturedResponse::Completed(response) => {
      assert_eq!(response.status, 200);
      assert_eq!(response.body_encoding, BodyEncoding::Text);
      assert_eq!(response.body.as_deref(), Some(r#"{"ok":true}"#));
      assert!(!response.truncated);
    }
    other => panic!("unexpected {other:?}"),
  }
}

#[tokio::test]
async fn test_large_binary_request_is_truncated() {
  let (page, _, _) = page();
  let (emitter, mut receiver) = bridge();
  let controller = InterceptionController::new(page.clone(), emitter);
  let update = FlagsUpdate::from_json(r#"{"types":{"http":true},"maxBodyBytes":1048576}"#);
  let flags = controller.install(Some(&update));
  assert_eq!(flags.max_body_bytes, 1048576);

  let payload = vec![0xabu8; 2 * 1024 * 1024];
  page
    .fetch(
      FetchArgs::new("https://example.com/upload")
        .method("POST")
        .header("content-type", "application/octet-stream")
        .body(payload),
    )
    .await
    .unwrap();

  let event = receiver.recv().await.unwrap();
  assert_eq!(event.request.method, "POST");
  assert!(event.request.truncated);
  assert_eq!(event.request.body_size, 2097152);
  assert_eq!(event.request.body_encoding, BodyEncoding::Base64);
  let decoded = STANDARD.decode(event.request.body.unwrap()).unwrap();
  assert_eq!(decoded.len(), 1048576);
}

#[tokio::test]
async fn test_network_error_still_reaches_page() {
  let (page, _, _) = page();
  let (emitter, mut receiver) = bridge();
  let controller = InterceptionController::new(page.clone(), emitter);
  controller.install(None);

  let err = page.fetch(FetchArgs::new("https://offline.example/")).await.unwrap_err();
  assert_eq!(err.0, "Failed to fetch");

  let event = receiver.recv().await.unwrap();
  assert_eq!(event.response.network_error(), Some("Failed to fetch"));
  assert_eq!(event.request.url, "https://offline.example/");
}

#[tokio::test]
async fn test_foreign_scheme_is_not_captured() {
  let (page, _, _) = page();
  let (emitter, mut receiver) = bridge();
  let controller = InterceptionController::new(page.clone(), emitter);
  controller.install(None);

  page.fetch(FetchArgs::new("data:text/plain,hi")).await.unwrap();
  page.fetch(FetchArgs::new("/after")).await.unwrap();

  let event = receiver.recv().await.unwrap();
  assert_eq!(event.request.url, "https://example.com/after");
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert!(receiver.try_recv().is_none());
}

#[tokio::test]
async fn test_xhr_call_is_captured() {
  let (page, _, native) = page();
  let (emitter, mut receiver) = bridge();
  let controller = InterceptionController::new(page.clone(), emitter);
  controller.install(None);

  let mut xhr = page.new_xhr();
  xhr.open("put", "/items/7");
  xhr.set_request_header("Content-Type", "application/json");
  xhr.send(Some(XhrBody::Text(r#"{"name":"x"}"#.into())));

  let event = receiver.recv().await.unwrap();
  assert_eq!(event.request.method, "PUT");
  assert_eq!(event.request.url, "https://example.com/items/7");
  assert_eq!(event.request.body.as_deref(), Some(r#"{"name":"x"}"#));
  match event.response {
    CapturedResponse::Completed(response) => {
      assert_eq!(response.status, 201);
      assert_eq!(response.status_text, "Created");
      assert_eq!(response.headers.get("x-trace"), Some("abc"));
      assert_eq!(response.body.as_deref(), Some("created"));
    }
    other => panic!("unexpected {other:?}"),
  }
  assert_eq!(native.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_xhr_outside_capture_rules_passes_through() {
  let (page, _, native) = page();
  let (emitter, mut receiver) = bridge();
  let controller = InterceptionController::new(page.clone(), emitter);
  controller.install(None);

  let mut track = page.new_xhr();
  track.open("TRACK", "/items");
  track.send(Some(XhrBody::Text("x".into())));
  let mut socket = page.new_xhr();
  socket.open("GET", "ws://example.com/live");
  socket.send(None);
  assert_eq!(native.sent.lock().unwrap().len(), 2);

  let mut plain = page.new_xhr();
  plain.open("GET", "/items");
  plain.send(None);
  let event = receiver.recv().await.unwrap();
  assert_eq!(event.request.url, "https://example.com/items");
  assert_eq!(event.request.method, "GET");
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert!(receiver.try_recv().is_none());
}

#[tokio::test]
async fn test_uninstall_restores_natives() {
  let (page, fetch, xhr) = page();
  let native_fetch: Arc<dyn Fetch> = fetch;
  let native_xhr: Arc<dyn XhrFactory> = xhr;
  let (emitter, mut receiver) = bridge();
  let controller = InterceptionController::new(page.clone(), emitter);
  controller.install(None);
  assert!(controller.is_hooked(HookFamily::Xhr));

  controller.uninstall();
  assert!(!controller.is_hooked(HookFamily::Fetch));
  assert!(Arc::ptr_eq(&page.fetch_slot().get(), &native_fetch));
  assert!(Arc::ptr_eq(&page.xhr_slot().get(), &native_xhr));

  page.fetch(FetchArgs::new("/quiet")).await.unwrap();
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert!(receiver.try_recv().is_none());

  controller.install(None);
  assert!(controller.is_hooked(HookFamily::Fetch));
}

#[tokio::test]
async fn test_watched_updates_toggle_hooks() {
  let (page, _, _) = page();
  let (emitter, _receiver) = bridge();
  let controller = Arc::new(InterceptionController::new(page.clone(), emitter));
  controller.install(None);

  let (tx, rx) = tokio::sync::watch::channel(FlagsUpdate::default());
  let task = controller.watch_updates(rx);
  tx.send(FlagsUpdate::from_json(r#"{"types":{"http":false},"maxBodyBytes":64}"#))
    .unwrap();

  for _ in 0..50 {
    if !controller.is_hooked(HookFamily::Fetch) {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert!(!controller.is_hooked(HookFamily::Fetch));
  assert_eq!(controller.flags().max_body_bytes, 64);

  drop(tx);
  task.await.unwrap();
}

#[tokio::test]
async fn test_location_changes_are_reported() {
  let (page, _, _) = page();
  let (emitter, mut receiver) = bridge();
  let controller = InterceptionController::new(page.clone(), emitter);
  controller.install(None);

  page.location().set_href("https://example.com/next/");
  page.fetch(FetchArgs::new("data.json")).await.unwrap();
  let event = receiver.recv().await.unwrap();
  assert_eq!(event.page_url, "https://example.com/next/");
  assert_eq!(event.request.url, "https://example.com/next/data.json");
}
