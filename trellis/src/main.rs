use anyhow::Result;
use clap::Parser;
use log::info;
use trellis::{run, Topology, TrellisConfig};
use trellis_core::{dummy::DummyParams, record::BufferedRecorder};

/// Train policies with simulated actors
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the YAML configuration
    #[arg(long)]
    config: Option<String>,

    /// Topology of policies: local, multi_process or multi_node
    #[arg(long)]
    topology: Option<Topology>,

    /// Number of actors
    #[arg(long)]
    num_actors: Option<usize>,

    /// Maximum version lag of accepted roll-out information
    #[arg(long)]
    max_lag: Option<usize>,

    /// Number of episodes of each actor
    #[arg(long)]
    episodes: Option<usize>,

    /// Save the effective configuration to this path
    #[arg(long)]
    save_config: Option<String>,
}

fn load_config(args: &Args) -> Result<TrellisConfig> {
    let mut config = match &args.config {
        Some(path) => TrellisConfig::load(path)?,
        None => TrellisConfig::default(),
    };
    if let Some(topology) = args.topology {
        config.topology = topology;
    }
    if let Some(num_actors) = args.num_actors {
        config.server.num_actors = num_actors;
    }
    if let Some(max_lag) = args.max_lag {
        config.server.max_lag = max_lag;
    }
    if let Some(episodes) = args.episodes {
        config.demo.episodes = episodes;
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;
    if let Some(path) = &args.save_config {
        config.save(path)?;
    }

    let recorder = BufferedRecorder::new();
    let summary = run(&config, Box::new(recorder.clone()))?;
    info!(
        "Final version: {}, {} update record(s)",
        summary.version,
        recorder.len()
    );
    for (name, state) in summary.states.iter() {
        let params = DummyParams::decode(state)?;
        info!(
            "{}: weight {:.3}, {} update(s)",
            name,
            params.weight,
            params.n_learn + params.n_update
        );
    }
    Ok(())
}
