use bytes::Bytes;
use pagetap::{
  ingest_endpoint, make_batches, normalize, pack, BatchSender, Envelope, Error, HttpTransport, IngestResponse,
  IngestTransport, Method, NormalizeOptions, PackOptions, RawItem, StatusCode, WireItem, WireUri, DEFAULT_GRAPH,
};
use serde_json::json;
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

/// A wire item whose serialized JSON is exactly `size` bytes.
fn sized_item(id: &str, size: usize) -> WireItem {
  let mut item = WireItem {
    id: id.to_string(),
    method: Method::POST,
    http_version: None,
    graph: DEFAULT_GRAPH.to_string(),
    uri: WireUri {
      full: "https://example.com/upload".into(),
      scheme: "https".into(),
      authority: "example.com".into(),
      path: "/upload".into(),
      fragment: None,
      query_raw: None,
      params: None,
    },
    request_headers: Vec::new(),
    connection: None,
    body_base64: Some(String::new()),
    response: None,
  };
  let base = serde_json::to_vec(&item).unwrap().len();
  item.body_base64 = Some("A".repeat(size - base));
  assert_eq!(serde_json::to_vec(&item).unwrap().len(), size);
  item
}

fn raw_items() -> Vec<RawItem> {
  serde_json::from_value(json!([
    {
      "id": "login-1",
      "request": {"url": "/login", "method": "post", "headers": {"Content-Type": "application/x-www-form-urlencoded"}, "body": "u=a&p=b", "bodyEncoding": "text"},
      "response": {"status": 302, "headers": {"Location": "/home"}},
      "meta": {"ts": 1700000000000u64, "pageUrl": "https://target.example/"}
    },
    {
      "request": {"url": "https://target.example/trace", "method": "TRACK"},
      "meta": {"ts": 1700000000001u64}
    },
    {
      "request": {"url": "https://target.example/api?id=3", "method": "GET"},
      "response": {"status": 200, "statusText": "OK", "body": "{}", "bodyEncoding": "text", "headers": {"content-type": "application/json"}},
      "meta": {"ts": 1700000000002u64}
    },
    {
      "request": {"url": "https://target.example/offline"},
      "response": {"networkError": "Failed to fetch"},
      "meta": {"ts": 1700000000003u64}
    }
  ]))
  .unwrap()
}

#[test]
fn test_unlisted_method_is_dropped_silently() {
  let batch = normalize(&raw_items(), &NormalizeOptions::default());
  let ids = batch.items.iter().map(|item| item.id.as_str()).collect::<Vec<_>>();
  assert_eq!(ids, vec!["login-1", "req-1700000000002-2", "req-1700000000003-3"]);
  assert!(batch.items.iter().all(|item| item.method != Method::from_bytes(b"TRACK").unwrap()));
  assert_eq!(batch.items[0].uri.full, "https://target.example/login");
  assert_eq!(batch.items[0].body_base64.as_deref(), Some("dT1hJnA9Yg=="));
  assert!(batch.items[2].response.is_none());
}

#[test]
fn test_normalization_is_idempotent() {
  let options = NormalizeOptions::default().force_http_version("HTTP/1.1");
  let first = normalize(&raw_items(), &options);
  let second = normalize(&raw_items(), &options);
  assert_eq!(first, second);
  assert_eq!(
    serde_json::to_string(&first.items).unwrap(),
    serde_json::to_string(&second.items).unwrap()
  );
  let response = first.items[2].response.as_ref().unwrap();
  assert_eq!(response.http_version.as_deref(), Some("HTTP/1.1"));
  assert_eq!(response.status, None);
}

#[test]
fn test_ten_items_of_300kb_fill_two_envelopes() {
  let options = PackOptions {
    max_bytes: 2 * 1024 * 1024,
    safety_margin: 8 * 1024,
  };
  let items = (0..10)
    .map(|index| sized_item(&format!("big-{index}"), 300 * 1024))
    .collect::<Vec<_>>();
  let envelopes = pack(items, &options).unwrap();
  assert_eq!(envelopes.len(), 2);
  assert_eq!(envelopes[0].len(), 6);
  assert_eq!(envelopes[1].len(), 4);
  for envelope in &envelopes {
    assert!(envelope.to_bytes().unwrap().len() <= options.limit());
  }
}

#[test]
fn test_oversized_item_is_named_in_error() {
  let items = vec![sized_item("huge-upload", 3 * 1024 * 1024)];
  match pack(items, &PackOptions::interactive()) {
    Err(Error::ItemTooLarge { id, size, limit }) => {
      assert_eq!(id, "huge-upload");
      assert!(size > limit);
    }
    other => panic!("unexpected {other:?}"),
  }

  let items = vec![sized_item("small", 1000), sized_item("huge-upload", 3 * 1024 * 1024)];
  let err = pack(items, &PackOptions::interactive()).unwrap_err();
  assert!(err.to_string().contains("id=huge-upload"), "{err}");
}

#[test]
fn test_packing_keeps_every_item_in_order() {
  let options = PackOptions {
    max_bytes: 64 * 1024,
    safety_margin: 4 * 1024,
  };
  let items = (0..40)
    .map(|index| sized_item(&format!("item-{index}"), 1024 + (index * 977) % 20_000))
    .collect::<Vec<_>>();
  let envelopes = pack(items.clone(), &options).unwrap();
  assert!(envelopes.len() > 1);
  let packed = envelopes.into_iter().flat_map(|envelope| envelope.items).collect::<Vec<_>>();
  assert_eq!(packed, items);
}

#[test]
fn test_envelope_bytes_match_wire_shape() {
  let envelopes = make_batches(&raw_items(), &NormalizeOptions::default(), &PackOptions::default()).unwrap();
  assert_eq!(envelopes.len(), 1);
  let body: serde_json::Value = serde_json::from_slice(&envelopes[0].to_bytes().unwrap()).unwrap();
  let items = body["items"].as_array().unwrap();
  assert_eq!(items.len(), 3);
  assert_eq!(items[0]["method"], "POST");
  assert_eq!(items[0]["graph"], DEFAULT_GRAPH);
  assert_eq!(items[0]["requestHeaders"][0]["name"], "content-type");
  assert_eq!(items[0]["response"]["reason"], "Found");
  assert_eq!(items[1]["uri"]["params"][0]["name"], "id");
}

/// Answers with the queued statuses in order and records every body.
struct ScriptedTransport {
  statuses: Mutex<Vec<StatusCode>>,
  bodies: Mutex<Vec<Bytes>>,
}

impl ScriptedTransport {
  fn new(mut statuses: Vec<StatusCode>) -> ScriptedTransport {
    statuses.reverse();
    ScriptedTransport {
      statuses: Mutex::new(statuses),
      bodies: Mutex::new(Vec::new()),
    }
  }
}

#[async_trait::async_trait]
impl IngestTransport for ScriptedTransport {
  async fn post_json(&self, _endpoint: &Url, body: Bytes) -> pagetap::Result<IngestResponse> {
    self.bodies.lock().unwrap().push(body);
    let status = self.statuses.lock().unwrap().pop().unwrap_or(StatusCode::OK);
    Ok(IngestResponse::new(status, ""))
  }
}

fn envelopes(count: usize) -> Vec<Envelope> {
  (0..count)
    .map(|index| Envelope {
      items: vec![sized_item(&format!("e-{index}"), 400)],
    })
    .collect()
}

#[tokio::test]
async fn test_sender_stops_at_first_rejection() {
  let transport = ScriptedTransport::new(vec![StatusCode::OK, StatusCode::INTERNAL_SERVER_ERROR, StatusCode::OK]);
  let sender = BatchSender::new(transport, ingest_endpoint("http://localhost:3000").unwrap());
  let err = sender.send_all(&envelopes(3)).await.unwrap_err();
  match &err {
    Error::IngestRejected {
      dispatched,
      status,
      detail,
    } => {
      assert_eq!(*dispatched, 1);
      assert_eq!(*status, StatusCode::INTERNAL_SERVER_ERROR);
      assert_eq!(detail, "Internal Server Error");
    }
    other => panic!("unexpected {other:?}"),
  }
  assert_eq!(err.to_string(), "POST failed (500): Internal Server Error");
}

#[tokio::test]
async fn test_sender_skips_empty_envelopes() {
  let transport = ScriptedTransport::new(Vec::new());
  let sender = BatchSender::new(transport, ingest_endpoint("http://localhost:3000").unwrap());
  let mut batch = envelopes(2);
  batch.insert(1, Envelope { items: Vec::new() });
  assert_eq!(sender.send_all(&batch).await.unwrap(), 2);
  assert_eq!(sender.ship(&[], &NormalizeOptions::default(), &PackOptions::default()).await.unwrap(), 0);
}

/// Serves one connection: reads a full request and writes `reply`.
async fn serve_once(listener: TcpListener, reply: &'static str) -> Vec<u8> {
  let (mut stream, _) = listener.accept().await.unwrap();
  let mut request = Vec::new();
  let mut chunk = [0u8; 4096];
  loop {
    let n = stream.read(&mut chunk).await.unwrap();
    if n == 0 {
      break;
    }
    request.extend_from_slice(&chunk[..n]);
    let text = String::from_utf8_lossy(&request);
    if let Some(end) = text.find("\r\n\r\n") {
      let length = text[..end]
        .lines()
        .find_map(|line| {
          let (name, value) = line.split_once(':')?;
          name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
      if request.len() >= end + 4 + length {
        break;
      }
    }
  }
  stream.write_all(reply.as_bytes()).await.unwrap();
  let _ = stream.shutdown().await;
  request
}

#[tokio::test]
async fn test_http_transport_posts_json() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let server = tokio::spawn(serve_once(
    listener,
    "HTTP/1.1 202 Accepted\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"ok\":true}",
  ));

  let endpoint = ingest_endpoint(&format!("http://{addr}")).unwrap();
  let sender = BatchSender::new(HttpTransport::new().unwrap(), endpoint);
  let sent = sender
    .ship(&raw_items(), &NormalizeOptions::default(), &PackOptions::default())
    .await
    .unwrap();
  assert_eq!(sent, 1);

  let request = String::from_utf8(server.await.unwrap()).unwrap();
  assert!(request.starts_with("POST /http-requests/ingest-http HTTP/1.1\r\n"), "{request}");
  assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
  let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
  let body: serde_json::Value = serde_json::from_str(body).unwrap();
  assert_eq!(body["items"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_http_transport_reports_rejection_body() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let server = tokio::spawn(serve_once(
    listener,
    "HTTP/1.1 413 Payload Too Large\r\nContent-Length: 7\r\n\r\ntoo big",
  ));

  let endpoint = ingest_endpoint(&format!("http://{addr}")).unwrap();
  let sender = BatchSender::new(HttpTransport::new().unwrap(), endpoint);
  let err = sender.send_all(&envelopes(1)).await.unwrap_err();
  assert_eq!(err.to_string(), "POST failed (413): too big");
  server.await.unwrap();
}

#[tokio::test]
async fn test_http_transport_rejects_hostile_lengths() {
  for reply in [
    "HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\n{}",
    "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nabcd\r\nffffffffffffffff\r\nx\r\n0\r\n\r\n",
  ] {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_once(listener, reply));

    let endpoint = ingest_endpoint(&format!("http://{addr}")).unwrap();
    let sender = BatchSender::new(HttpTransport::new().unwrap(), endpoint);
    match sender.send_all(&envelopes(1)).await {
      Err(Error::IO(err)) => assert_eq!(err.kind(), std::io::ErrorKind::InvalidData),
      other => panic!("unexpected {other:?}"),
    }
    server.await.unwrap();
  }
}
