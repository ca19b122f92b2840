use std::path::PathBuf;

use tracing::{error, info};

use pcap_stats::{PacketEvent, Pipeline, StatsConfig, StatsError};
use pcap_stats::rows::write_report;
use pcap_stats::sink::CsvSink;

const USAGE: &str = "usage: get_stats <events.csv> [output dir] [config.ron]";

fn main() -> Result<(), Box<dyn ::std::error::Error>> {
    let format = tracing_subscriber::fmt::format()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339());
    tracing_subscriber::fmt()
        .event_format(format)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let events_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            eprintln!("{}", USAGE);
            return Err(StatsError::InvalidConfig("missing events file".to_string()).into());
        }
    };
    let output = args.get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("stats"));
    let config = match args.get(3) {
        Some(path) => StatsConfig::load(path)?,
        None => StatsConfig::default(),
    };
    info!(?config, "loaded config");

    let mut pipeline = Pipeline::new(config)?;
    let mut reader = csv::Reader::from_path(&events_path)?;
    for event in reader.deserialize::<PacketEvent>() {
        pipeline.process(&event?);
    }
    pipeline.finish();

    let mut sink = CsvSink::create(&output)?;
    if let Err(e) = write_report(&pipeline, &mut sink) {
        error!("{}", e);
        return Err(e.into());
    }
    info!("STATS WRITTEN TO {}", output.display());
    Ok(())
}
