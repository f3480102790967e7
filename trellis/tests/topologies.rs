use anyhow::Result;
use test_log::test;
use trellis::{run, DemoConfig, Topology, TrellisConfig};
use trellis_core::{
    dummy::DummyParams,
    error::TrellisError,
    record::{BufferedRecorder, NullRecorder},
};
use trellis_dist::{PolicyManagerConfig, ServerConfig};

fn config(topology: Topology, manager: PolicyManagerConfig) -> TrellisConfig {
    TrellisConfig::default()
        .topology(topology)
        .policies(vec!["p1", "p2"])
        .manager(manager)
        .server(ServerConfig::default().num_actors(2).max_lag(100))
        .demo(DemoConfig {
            episodes: 3,
            trajectories: 2,
            steps: 4,
        })
}

fn n_learn_and_update(summary: &trellis::RunSummary) -> Result<Vec<(usize, usize)>> {
    summary
        .states
        .values()
        .map(|state| DummyParams::decode(state).map(|p| (p.n_learn, p.n_update)))
        .collect()
}

#[test]
fn test_local() -> Result<()> {
    let recorder = BufferedRecorder::new();
    let config = config(Topology::Local, PolicyManagerConfig::default());
    let summary = run(&config, Box::new(recorder.clone()))?;

    // every sample is accepted and updates both policies
    assert_eq!(summary.num_samples, 6);
    assert_eq!(summary.version, 6);
    assert_eq!(n_learn_and_update(&summary)?, vec![(6, 0), (6, 0)]);

    let records = recorder.records();
    assert_eq!(records.len(), 6);
    assert_eq!(records[5].get_scalar("version")?, 6.0);
    assert_eq!(records[0].get_string("updated_policies")?, "p1,p2");
    Ok(())
}

#[test]
fn test_local_data_parallel() -> Result<()> {
    let config = config(Topology::Local, PolicyManagerConfig::default().data_parallel(3));
    let summary = run(&config, Box::new(NullRecorder::new()))?;
    assert_eq!(summary.version, 6);
    assert_eq!(n_learn_and_update(&summary)?, vec![(0, 6), (0, 6)]);
    Ok(())
}

#[test]
fn test_multi_process() -> Result<()> {
    let config = config(
        Topology::MultiProcess,
        PolicyManagerConfig::default().num_hosts(2),
    );
    let summary = run(&config, Box::new(NullRecorder::new()))?;
    assert_eq!(summary.version, 6);
    assert_eq!(n_learn_and_update(&summary)?, vec![(6, 0), (6, 0)]);
    Ok(())
}

#[test]
fn test_multi_process_data_parallel() -> Result<()> {
    let config = config(
        Topology::MultiProcess,
        PolicyManagerConfig::default().num_hosts(2).data_parallel(2),
    );
    let summary = run(&config, Box::new(NullRecorder::new()))?;
    assert_eq!(summary.version, 6);
    assert_eq!(n_learn_and_update(&summary)?, vec![(0, 6), (0, 6)]);
    Ok(())
}

#[test]
fn test_multi_node() -> Result<()> {
    // three hosts, one of them without policies
    let config = config(
        Topology::MultiNode,
        PolicyManagerConfig::default().num_hosts(3),
    );
    let summary = run(&config, Box::new(NullRecorder::new()))?;
    assert_eq!(summary.version, 6);
    assert_eq!(n_learn_and_update(&summary)?, vec![(6, 0), (6, 0)]);
    Ok(())
}

#[test]
fn test_multi_node_data_parallel() -> Result<()> {
    let config = config(
        Topology::MultiNode,
        PolicyManagerConfig::default().num_hosts(2).data_parallel(4),
    );
    let summary = run(&config, Box::new(NullRecorder::new()))?;
    assert_eq!(summary.version, 6);
    assert_eq!(n_learn_and_update(&summary)?, vec![(0, 6), (0, 6)]);
    Ok(())
}

#[test]
fn test_stale_samples_are_dropped() -> Result<()> {
    let recorder = BufferedRecorder::new();
    let config = config(Topology::Local, PolicyManagerConfig::default())
        .server(ServerConfig::default().num_actors(4).max_lag(0));
    let summary = run(&config, Box::new(recorder.clone()))?;

    // the first sample is always fresh, later ones depend on the interleaving of actors
    assert_eq!(summary.num_samples, 12);
    assert!(summary.version >= 1);
    assert!(summary.version <= 12);
    assert_eq!(recorder.len(), summary.version);
    Ok(())
}

#[test]
fn test_no_policies() {
    let config = TrellisConfig::default().policies(Vec::<String>::new());
    let err = run(&config, Box::new(NullRecorder::new())).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<TrellisError>(),
        Some(TrellisError::InvalidConfig(_))
    ));
}

#[test]
fn test_no_actors() {
    let config = TrellisConfig::default().server(ServerConfig::default().num_actors(0));
    let err = run(&config, Box::new(NullRecorder::new())).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<TrellisError>(),
        Some(TrellisError::InvalidConfig(_))
    ));
}
