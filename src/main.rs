use std::{env, fs::File, io::BufWriter, path::PathBuf};

use anyhow::{Context, Result};
use log::info;

use split_learning::{
    Orchestrator,
    config::RunConfig,
    data::SyntheticBlobs,
    registry::SegmentRegistry,
    sink::{JsonLinesSink, LogSink, Sinks},
};

const CONFIG_VAR: &str = "SPLIT_CONFIG";

fn main() -> Result<()> {
    env_logger::init();

    let config = match env::args().nth(1).or_else(|| env::var(CONFIG_VAR).ok()) {
        Some(path) => {
            let path = PathBuf::from(path);
            RunConfig::from_file(&path)
                .with_context(|| format!("reading config from {}", path.display()))?
        }
        None => {
            info!("no config given, running with the defaults");
            RunConfig::default()
        }
    };

    let provider = SyntheticBlobs::new(config.data.blob_spec(config.seed))?;
    let registry = SegmentRegistry::new();

    let mut sinks = Sinks::new().with(LogSink);
    if let Some(path) = &config.metrics_file {
        let file = File::create(path)
            .with_context(|| format!("creating metrics file {}", path.display()))?;
        sinks = sinks.with(JsonLinesSink::new(BufWriter::new(file)));
    }

    info!(
        "training {} participants on {} with {}",
        config.participant_count(),
        config.data.name,
        config.segments
    );

    let mut orchestrator = Orchestrator::setup(config, &provider, &registry, Box::new(sinks))?;
    let summary = orchestrator.fit()?;

    if let Some(f1) = summary.best_test_f1 {
        println!("best mean test f1: {f1:.4}");
    }

    if let Some(accuracy) = summary.mean_evaluation() {
        println!("mean evaluation accuracy: {accuracy:.4}");
    }

    Ok(())
}
