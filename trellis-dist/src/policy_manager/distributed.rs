use super::{ManagerCore, PolicyManager, PolicyManagerConfig};
use crate::{
    data_parallel::init_workers,
    messages::{policy_host_name, LearnTask, Message, GRAD_WORKER, POLICY_HOST, POLICY_MANAGER},
    proxy::{Fabric, Proxy},
};
use anyhow::Result;
use log::info;
use std::{collections::BTreeMap, time::Instant};
use trellis_core::{
    error::TrellisError, record::Recorder, PolicyName, RolloutInfoMap, StateMap, Version,
};

/// Policy manager with policies owned by [`PolicyHost`](crate::PolicyHost)s on the fabric.
///
/// Policy `i` is assigned to host `POLICY_HOST.{i mod num_hosts}` for the lifetime
/// of the manager. The hosts must be connected before the manager is built.
pub struct DistributedPolicyManager {
    core: ManagerCore,
    proxy: Proxy,
    policy2host: BTreeMap<PolicyName, String>,
    data_parallel: bool,
    exited: bool,
}

impl DistributedPolicyManager {
    /// Initializes the policies on their hosts and caches their states.
    pub fn build(
        policy_names: &[PolicyName],
        config: &PolicyManagerConfig,
        fabric: &Fabric,
        recorder: Box<dyn Recorder + Send>,
    ) -> Result<Self> {
        if config.num_hosts == 0 {
            return Err(TrellisError::InvalidConfig("num_hosts must be positive".to_string()).into());
        }
        let policy2host: BTreeMap<_, _> = policy_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), policy_host_name(i % config.num_hosts)))
            .collect();

        let mut proxy = fabric.connect(POLICY_MANAGER, POLICY_MANAGER)?;
        let mut groups: BTreeMap<String, Vec<PolicyName>> = BTreeMap::new();
        for (name, host) in policy2host.iter() {
            groups.entry(host.clone()).or_default().push(name.clone());
        }
        let requests = groups
            .into_iter()
            .map(|(host, policy_names)| (host, Message::InitPolicies { policy_names }))
            .collect();

        let mut initial_states = StateMap::new();
        for reply in proxy.scatter(requests)? {
            match reply.message {
                Message::InitPoliciesDone { policy_state } => initial_states.extend(policy_state),
                msg => return Err(unexpected(msg)),
            }
        }
        info!("Initialized policies on hosts: {:?}", policy2host);

        let core = ManagerCore::new(initial_states, config, recorder)?;
        if let Some(allocation) = core.initial_allocation()? {
            init_workers(&mut proxy, &allocation)?;
        }

        Ok(Self {
            core,
            proxy,
            policy2host,
            data_parallel: config.data_parallel,
            exited: false,
        })
    }

    /// Name of the host owning each policy.
    pub fn policy2host(&self) -> &BTreeMap<PolicyName, String> {
        &self.policy2host
    }
}

impl PolicyManager for DistributedPolicyManager {
    fn update(&mut self, rollout_info: RolloutInfoMap) -> Result<()> {
        let start = Instant::now();
        let due = self.core.admit(rollout_info)?;
        if due.is_empty() {
            return Ok(());
        }
        let allocation = self.core.allocate(&due)?;

        let mut groups: BTreeMap<String, BTreeMap<PolicyName, LearnTask>> = BTreeMap::new();
        for (name, task) in self.core.tasks(due, allocation.as_ref()).into_iter() {
            let host = self.policy2host[&name].clone();
            groups.entry(host).or_default().insert(name, task);
        }
        let requests = groups
            .into_iter()
            .map(|(host, tasks)| (host, Message::Learn { tasks }))
            .collect();

        let mut updated = StateMap::new();
        for reply in self.proxy.scatter(requests)? {
            match reply.message {
                Message::LearnDone { policy_state } => updated.extend(policy_state),
                msg => return Err(unexpected(msg)),
            }
        }
        self.core.commit(updated, start);
        Ok(())
    }

    fn get_state(&self, since: Option<Version>) -> StateMap {
        self.core.get_state(since)
    }

    fn get_all_states(&self) -> StateMap {
        self.core.all_states().clone()
    }

    fn get_version(&self) -> Version {
        self.core.version()
    }

    fn exit(&mut self) {
        if self.exited {
            return;
        }
        let hosts = self.proxy.ibroadcast(POLICY_HOST, Message::Exit);
        info!("Sent EXIT to {:?}", hosts);
        if self.data_parallel {
            self.proxy.ibroadcast(GRAD_WORKER, Message::Exit);
        }
        self.proxy.close();
        self.exited = true;
    }
}

fn unexpected(msg: Message) -> anyhow::Error {
    TrellisError::UnexpectedMessage {
        component: POLICY_MANAGER.to_string(),
        tag: msg.tag().to_string(),
    }
    .into()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{grad_worker::GradWorker, policy_host::PolicyHost};
    use std::thread::{self, JoinHandle};
    use test_log::test;
    use trellis_core::{
        dummy::{trajectory, DummyParams, DummyPolicy},
        record::NullRecorder,
        PolicyRegistry, RolloutInfo,
    };

    fn names(v: &[&str]) -> Vec<PolicyName> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn spawn_hosts(
        fabric: &Fabric,
        n: usize,
        registry: &PolicyRegistry,
    ) -> Vec<JoinHandle<Result<Vec<PolicyName>>>> {
        (0..n)
            .map(|i| {
                let mut host = PolicyHost::connect(fabric, i, registry.clone()).unwrap();
                thread::spawn(move || {
                    host.run()?;
                    Ok(host.policy_names())
                })
            })
            .collect()
    }

    fn trajs(names: &[&str]) -> RolloutInfoMap {
        names
            .iter()
            .map(|name| {
                let v = vec![trajectory(3, 1.0)];
                (name.to_string(), RolloutInfo::Trajectories(v))
            })
            .collect()
    }

    #[test]
    fn test_fixed_round_robin_and_partial_gather() -> Result<()> {
        let fabric = Fabric::new();
        let registry = DummyPolicy::registry(&["p1", "p2", "p3"]);
        let hosts = spawn_hosts(&fabric, 3, &registry);

        let config = PolicyManagerConfig::default().num_hosts(3);
        let mut m = DistributedPolicyManager::build(
            &names(&["p1", "p2", "p3"]),
            &config,
            &fabric,
            Box::new(NullRecorder::new()),
        )?;
        assert_eq!(m.policy2host()["p3"], "POLICY_HOST.2");
        assert_eq!(m.get_state(None).len(), 3);

        // hosts 0 and 2 are contacted, host 1 is neither contacted nor awaited
        m.update(trajs(&["p1", "p3"]))?;
        assert_eq!(m.get_version(), 1);
        assert_eq!(
            m.get_state(Some(0)).into_keys().collect::<Vec<_>>(),
            vec!["p1", "p3"]
        );
        assert_eq!(DummyParams::decode(&m.get_state(None)["p3"])?.weight, 0.5);

        m.exit();
        m.exit();
        let owned: Vec<_> = hosts
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Result<_>>()?;
        assert_eq!(owned, vec![names(&["p1"]), names(&["p2"]), names(&["p3"])]);
        Ok(())
    }

    #[test]
    fn test_hosts_without_policies_are_not_initialized() -> Result<()> {
        let fabric = Fabric::new();
        let registry = DummyPolicy::registry(&["p1", "p2"]);
        let hosts = spawn_hosts(&fabric, 3, &registry);

        let config = PolicyManagerConfig::default().num_hosts(3);
        let mut m = DistributedPolicyManager::build(
            &names(&["p1", "p2"]),
            &config,
            &fabric,
            Box::new(NullRecorder::new()),
        )?;
        m.update(trajs(&["p2"]))?;
        m.exit();

        let owned: Vec<_> = hosts
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Result<_>>()?;
        assert!(owned[2].is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_host() {
        let fabric = Fabric::new();
        let config = PolicyManagerConfig::default().num_hosts(2);
        let err = DistributedPolicyManager::build(
            &names(&["p1"]),
            &config,
            &fabric,
            Box::new(NullRecorder::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::PeerNotFound(host)) if host == "POLICY_HOST.0"
        ));
    }

    #[test]
    fn test_data_parallel_hosts() -> Result<()> {
        let fabric = Fabric::new();
        let registry = DummyPolicy::registry(&["p1", "p2", "p3"]);
        let workers: Vec<_> = (0..4)
            .map(|i| {
                let mut worker = GradWorker::connect(&fabric, i, registry.clone()).unwrap();
                thread::spawn(move || worker.run())
            })
            .collect();
        let hosts = spawn_hosts(&fabric, 2, &registry);

        let config = PolicyManagerConfig::default().num_hosts(2).data_parallel(4);
        let mut m = DistributedPolicyManager::build(
            &names(&["p1", "p2", "p3"]),
            &config,
            &fabric,
            Box::new(NullRecorder::new()),
        )?;
        for version in 1..=3 {
            m.update(trajs(&["p1", "p2", "p3"]))?;
            assert_eq!(m.get_version(), version);
        }
        let params = DummyParams::decode(&m.get_state(None)["p2"])?;
        assert_eq!(params.n_update, 3);
        assert_eq!(params.weight, 0.875);

        m.exit();
        for h in hosts {
            h.join().unwrap()?;
        }
        for w in workers {
            w.join().unwrap()?;
        }
        Ok(())
    }
}
