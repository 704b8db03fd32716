//! Greedy packing of wire items into byte-bounded envelopes.
use crate::normalize::{normalize, NormalizeOptions, RawItem, WireItem};
use crate::{Error, Result};
use serde::Serialize;

const WRAP_PREFIX: &[u8] = br#"{"items":["#;
const WRAP_SUFFIX: &[u8] = b"]}";
const SEPARATOR: &[u8] = b",";
const MIN_LIMIT: usize = 1024;

/// Envelope size settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
  /// transport body ceiling
  pub max_bytes: usize,
  /// headroom kept below `max_bytes`
  pub safety_margin: usize,
}

impl PackOptions {
  /// Profile for captures shipped from the live page: 2 MiB with 8 KiB
  /// headroom.
  pub const fn interactive() -> PackOptions {
    PackOptions {
      max_bytes: 2 * 1024 * 1024,
      safety_margin: 8 * 1024,
    }
  }

  /// Profile for large imports such as packet captures: 10 MiB with
  /// 600 KiB headroom.
  pub const fn bulk() -> PackOptions {
    PackOptions {
      max_bytes: 10 * 1024 * 1024,
      safety_margin: 600 * 1024,
    }
  }

  /// The usable byte limit of one envelope, never below 1 KiB.
  pub fn limit(&self) -> usize {
    self.max_bytes.saturating_sub(self.safety_margin).max(MIN_LIMIT)
  }
}

impl Default for PackOptions {
  fn default() -> Self {
    PackOptions::interactive()
  }
}

/// One transmission unit: `{"items":[...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Envelope {
  /// items in packing order
  pub items: Vec<WireItem>,
}

impl Envelope {
  /// The JSON body as transmitted.
  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(self)?)
  }

  /// Number of items.
  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// Whether the envelope holds nothing.
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

/// Packs `items` in order into as few envelopes as the greedy pass yields.
///
/// An item too large for an envelope on its own is an error naming its id;
/// no input yields no envelopes.
pub fn pack(items: Vec<WireItem>, options: &PackOptions) -> Result<Vec<Envelope>> {
  let limit = options.limit();
  let wrap = WRAP_PREFIX.len() + WRAP_SUFFIX.len();
  let mut envelopes = Vec::new();
  let mut current: Vec<WireItem> = Vec::new();
  let mut current_bytes = wrap;
  for item in items {
    let size = serde_json::to_vec(&item)?.len();
    let separator = if current.is_empty() { 0 } else { SEPARATOR.len() };
    let next = current_bytes + size + separator;
    if next <= limit {
      current.push(item);
      current_bytes = next;
      continue;
    }
    if current.is_empty() {
      return Err(Error::ItemTooLarge {
        id: item.id,
        size: wrap + size,
        limit,
      });
    }
    envelopes.push(Envelope {
      items: std::mem::take(&mut current),
    });
    if wrap + size > limit {
      return Err(Error::ItemTooLarge {
        id: item.id,
        size: wrap + size,
        limit,
      });
    }
    current.push(item);
    current_bytes = wrap + size;
  }
  if !current.is_empty() {
    envelopes.push(Envelope { items: current });
  }
  tracing::debug!(envelopes = envelopes.len(), limit, "packed");
  Ok(envelopes)
}

/// Normalizes `raw` and packs the survivors.
pub fn make_batches(raw: &[RawItem], normalize_options: &NormalizeOptions, pack_options: &PackOptions) -> Result<Vec<Envelope>> {
  let batch = normalize(raw, normalize_options);
  pack(batch.items, pack_options)
}
