//! Raw items from the packet-capture extraction step.
use crate::codec::BodyEncoding;
use crate::event::HeaderPairs;
use crate::normalize::{RawItem, RawMeta, RawRequest, RawResponse};
use crate::serde_schema::{lenient_status, lenient_string, string_only};
use serde::{Deserialize, Serialize};

/// The `uri` object of an extracted record.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcapUri {
  /// absolute url
  #[serde(deserialize_with = "lenient_string")]
  pub full: Option<String>,
}

/// The response part of an extracted record.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PcapResponse {
  /// numeric status
  #[serde(deserialize_with = "lenient_status")]
  pub status_code: Option<u16>,
  /// reason phrase from the wire
  #[serde(deserialize_with = "lenient_string")]
  pub reason_phrase: Option<String>,
  /// `{name, value}` list
  pub response_headers: HeaderPairs,
  /// base64 body
  #[serde(deserialize_with = "string_only")]
  pub body: Option<String>,
}

/// One HTTP exchange as extracted from a packet capture.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PcapRecord {
  /// extractor id
  #[serde(deserialize_with = "lenient_string")]
  pub id: Option<String>,
  /// request method
  #[serde(deserialize_with = "lenient_string")]
  pub method: Option<String>,
  /// request target
  pub uri: PcapUri,
  /// `{name, value}` list
  pub request_headers: HeaderPairs,
  /// response, when one was seen
  pub response: Option<PcapResponse>,
}

impl PcapRecord {
  /// Maps the record at `index` to a raw item.
  ///
  /// Records carry no request body; the response body is base64 when present.
  /// The request url doubles as the page url.
  pub fn into_raw_item(self, index: usize) -> RawItem {
    let url = self.uri.full.unwrap_or_default();
    let response = self.response.map(|r| RawResponse {
      status: r.status_code,
      status_text: r.reason_phrase,
      headers: r.response_headers,
      body_encoding: r.body.as_ref().map(|_| BodyEncoding::Base64),
      body: r.body,
      network_error: None,
    });
    RawItem {
      id: Some(self.id.unwrap_or_else(|| format!("pcap-{index}"))),
      request: RawRequest {
        url: Some(url.clone()),
        method: self.method,
        headers: self.request_headers,
        body: None,
        body_encoding: None,
      },
      response,
      meta: RawMeta {
        ts: None,
        page_url: Some(url),
      },
    }
  }
}

/// Maps a list of extracted records, numbering ids by position.
pub fn raw_items_from_pcap(records: Vec<PcapRecord>) -> Vec<RawItem> {
  records
    .into_iter()
    .enumerate()
    .map(|(index, record)| record.into_raw_item(index))
    .collect()
}
