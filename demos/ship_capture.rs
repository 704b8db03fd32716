//! Ships a file of captured items to an ingestion backend.
//!
//! ```text
//! cargo run --example ship_capture -- items.json http://localhost:3000
//! cargo run --example ship_capture -- --pcap records.json http://localhost:3000
//! ```
use pagetap::{raw_items_from_pcap, BatchSender, HttpTransport, NormalizeOptions, PackOptions, PcapRecord, RawItem};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt().with_env_filter("pagetap=debug").init();
  let mut args = std::env::args().skip(1).collect::<Vec<_>>();
  let pcap = args.first().is_some_and(|a| a == "--pcap");
  if pcap {
    args.remove(0);
  }
  let (Some(path), Some(base)) = (args.first(), args.get(1)) else {
    eprintln!("usage: ship_capture [--pcap] <items.json> <backend-url>");
    return Ok(());
  };
  let text = std::fs::read_to_string(path)?;
  let (raw, profile) = if pcap {
    let records: Vec<PcapRecord> = serde_json::from_str(&text)?;
    (raw_items_from_pcap(records), PackOptions::bulk())
  } else {
    let items: Vec<RawItem> = serde_json::from_str(&text)?;
    (items, PackOptions::interactive())
  };
  let sender = BatchSender::new(HttpTransport::new()?, pagetap::ingest_endpoint(base)?);
  let sent = sender.ship(&raw, &NormalizeOptions::default(), &profile).await?;
  println!("{} items in {} envelopes -> {}", raw.len(), sent, sender.endpoint());
  Ok(())
}
