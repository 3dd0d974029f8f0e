use trafficrouter::router::GatewayAPITrafficRouting;

fn main() -> anyhow::Result<()> {
    // Use: cargo run --bin gen-schema > gatewayapi-trafficrouting.schema.json
    let schema = schemars::schema_for!(GatewayAPITrafficRouting);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
