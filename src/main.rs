use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vigia::{
    attach::{DiagnosticChannel, HotSpotChannel},
    cli::Cli,
    model::CallGraphModel,
    sampler::Sampler,
    server::ExpositionServer,
};

/// Initialize tracing subscriber for debug output
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let model = Arc::new(CallGraphModel::new());
    let channel: Arc<dyn DiagnosticChannel> = Arc::new(HotSpotChannel::new());

    // Bind failure is the one fatal condition: without the exposition
    // surface the agent serves no purpose
    let server = ExpositionServer::bind(cli.port, Arc::clone(&model), Arc::clone(&channel))?;

    let sampler = Sampler::new(model, channel, Duration::from_millis(cli.interval_ms));
    std::thread::spawn(move || sampler.run());

    server.run()
}
