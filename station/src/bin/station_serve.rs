//! Telemetry station server: samples, fuses, persists and streams.

use clap::Parser;
use station::config::StationArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = StationArgs::parse();
    station::station::run_station(args).await
}
