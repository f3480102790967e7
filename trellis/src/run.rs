use crate::{DemoConfig, Topology, TrellisConfig};
use anyhow::Result;
use log::{debug, info, warn};
use std::thread::{self, JoinHandle};
use trellis_core::{
    dummy::{trajectory, DummyPolicy},
    error::TrellisError,
    record::Recorder,
    PolicyName, PolicyRegistry, RolloutInfo, RolloutInfoMap, StateMap, Version,
};
use trellis_dist::{
    DistributedPolicyManager, Fabric, GradWorker, MultiProcessPolicyManager, PolicyClient,
    PolicyHost, PolicyManager, PolicyServer, SimplePolicyManager,
};

/// Outcome of [`run`].
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Version of the policies when all actors were done.
    pub version: Version,

    /// Latest states of all policies.
    pub states: StateMap,

    /// Number of `SAMPLE_DONE` requests sent by the actors.
    pub num_samples: usize,
}

/// Runs training as configured by `config`, writing per-update records to `recorder`.
pub fn run(config: &TrellisConfig, recorder: Box<dyn Recorder + Send>) -> Result<RunSummary> {
    if config.policies.is_empty() {
        return Err(TrellisError::InvalidConfig("no policies to train".to_string()).into());
    }
    info!(
        "Starting {} training of {:?} with {} actor(s)",
        config.topology, config.policies, config.server.num_actors
    );
    let fabric = Fabric::new();
    let registry = DummyPolicy::registry(&config.policies);
    let workers = match config.manager.data_parallel {
        true => spawn_workers(&fabric, config.manager.num_grad_workers, &registry)?,
        false => vec![],
    };

    let summary = match config.topology {
        Topology::Local => {
            let manager =
                SimplePolicyManager::build(&registry, &config.manager, Some(&fabric), recorder)?;
            let (mut manager, num_samples) = serve(config, &fabric, manager)?;
            manager.exit();
            summarize(&manager, num_samples)
        }
        Topology::MultiProcess => {
            let manager = MultiProcessPolicyManager::build(
                &registry,
                &config.manager,
                Some(&fabric),
                recorder,
            )?;
            let (mut manager, num_samples) = serve(config, &fabric, manager)?;
            manager.join()?;
            summarize(&manager, num_samples)
        }
        Topology::MultiNode => {
            let hosts = spawn_hosts(&fabric, config.manager.num_hosts, &registry)?;
            let manager = DistributedPolicyManager::build(
                &config.policies,
                &config.manager,
                &fabric,
                recorder,
            )?;
            let (mut manager, num_samples) = serve(config, &fabric, manager)?;
            manager.exit();
            join_all(hosts)?;
            summarize(&manager, num_samples)
        }
    };

    join_all(workers)?;
    info!(
        "Training finished at version {} after {} sample(s)",
        summary.version, summary.num_samples
    );
    Ok(summary)
}

fn summarize<M: PolicyManager>(manager: &M, num_samples: usize) -> RunSummary {
    RunSummary {
        version: manager.get_version(),
        states: manager.get_all_states(),
        num_samples,
    }
}

/// Serves the actors until all of them are done and returns the manager.
fn serve<M: PolicyManager>(
    config: &TrellisConfig,
    fabric: &Fabric,
    manager: M,
) -> Result<(M, usize)> {
    let mut server = PolicyServer::build(&config.server, manager, fabric)?;
    let mut actors = vec![];
    for idx in 0..config.server.num_actors {
        let client = PolicyClient::connect(fabric, &format!("actor.{}", idx))?;
        actors.push(spawn_actor(
            idx,
            client,
            config.policies.clone(),
            config.demo.clone(),
        )?);
    }
    server.run()?;
    let num_samples = join_all(actors)?.into_iter().sum();
    Ok((server.into_manager(), num_samples))
}

fn spawn_actor(
    idx: usize,
    mut client: PolicyClient,
    policies: Vec<PolicyName>,
    demo: DemoConfig,
) -> Result<JoinHandle<Result<usize>>> {
    let handle = thread::Builder::new()
        .name(format!("actor.{}", idx))
        .spawn(move || -> Result<usize> {
            let (_, mut version) = client.get_initial_policy_state()?;
            for episode in 0..demo.episodes {
                let rollout_info = rollout(idx, episode, &policies, &demo);
                let (states, v) = client.sample_done(rollout_info, version)?;
                debug!(
                    "actor.{} received {} state(s) at version {}",
                    idx,
                    states.len(),
                    v
                );
                version = v;
            }
            client.done()?;
            Ok(demo.episodes)
        })?;
    Ok(handle)
}

/// Synthetic roll-out of an actor in an episode.
fn rollout(
    idx: usize,
    episode: usize,
    policies: &[PolicyName],
    demo: &DemoConfig,
) -> RolloutInfoMap {
    policies
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let reward = ((idx + i + episode) % 4) as f32 * 0.25;
            let trajectories = (0..demo.trajectories)
                .map(|_| trajectory(demo.steps, reward))
                .collect();
            (name.clone(), RolloutInfo::Trajectories(trajectories))
        })
        .collect()
}

fn spawn_workers(
    fabric: &Fabric,
    n: usize,
    registry: &PolicyRegistry,
) -> Result<Vec<JoinHandle<Result<()>>>> {
    let mut handles = vec![];
    for idx in 0..n {
        let mut worker = GradWorker::connect(fabric, idx, registry.clone())?;
        let handle = thread::Builder::new()
            .name(worker.name().to_string())
            .spawn(move || worker.run())?;
        handles.push(handle);
    }
    Ok(handles)
}

fn spawn_hosts(
    fabric: &Fabric,
    n: usize,
    registry: &PolicyRegistry,
) -> Result<Vec<JoinHandle<Result<()>>>> {
    let mut handles = vec![];
    for idx in 0..n {
        let mut host = PolicyHost::connect(fabric, idx, registry.clone())?;
        let handle = thread::Builder::new()
            .name(host.name().to_string())
            .spawn(move || host.run())?;
        handles.push(handle);
    }
    Ok(handles)
}

/// Joins the threads, returning their results or the first error.
fn join_all<T>(handles: Vec<JoinHandle<Result<T>>>) -> Result<Vec<T>> {
    let mut results = vec![];
    for handle in handles {
        let name = handle.thread().name().unwrap_or("unnamed").to_string();
        match handle.join() {
            Ok(r) => results.push(r?),
            Err(_) => {
                warn!("Thread {} panicked", name);
                return Err(TrellisError::Disconnected(name).into());
            }
        }
    }
    Ok(results)
}
