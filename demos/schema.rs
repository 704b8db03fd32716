fn main() -> Result<(), Box<dyn std::error::Error>> {
  #[cfg(feature = "schema")]
  {
    use schemars::schema_for;
    let schema = schema_for!(pagetap::WireItem);
    println!("{}", serde_json::to_string_pretty(&schema)?);
  }
  let envelope = pagetap::make_batches(
    &[serde_json::from_str(r#"{"request":{"url":"https://example.com/a?x=1"}}"#)?],
    &pagetap::NormalizeOptions::default(),
    &pagetap::PackOptions::default(),
  )?;
  println!("{}", String::from_utf8(envelope[0].to_bytes()?)?);
  Ok(())
}
