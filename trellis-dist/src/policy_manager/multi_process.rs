use super::{ManagerCore, PolicyManager, PolicyManagerConfig};
use crate::{
    data_parallel::init_workers,
    messages::{policy_host_name, LearnTask, Message, GRAD_WORKER, POLICY_HOST, POLICY_MANAGER},
    policy_host::HostedPolicies,
    proxy::{Fabric, Proxy},
};
use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{info, warn};
use std::{
    collections::{BTreeMap, BTreeSet},
    thread::JoinHandle,
    time::Instant,
};
use trellis_core::{
    error::TrellisError, record::Recorder, PolicyName, PolicyRegistry, RolloutInfoMap, StateMap,
    Version,
};

/// The manager's end of the channel pair dedicated to a host thread.
struct HostHandle {
    name: String,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl HostHandle {
    fn send(&self, msg: Message) -> Result<()> {
        self.sender
            .send(msg)
            .map_err(|_| TrellisError::Disconnected(self.name.clone()).into())
    }

    fn recv(&self) -> Result<Message> {
        self.receiver
            .recv()
            .map_err(|_| TrellisError::Disconnected(self.name.clone()).into())
    }
}

/// Policy manager with policies distributed over host threads on the same machine.
///
/// Each host thread talks to the manager over its own pair of channels. Policies
/// are assigned to hosts round-robin. In data-parallel mode, hosts also join the
/// fabric to reach the gradient workers.
pub struct MultiProcessPolicyManager {
    core: ManagerCore,
    hosts: Vec<HostHandle>,
    policy2host: BTreeMap<PolicyName, usize>,
    proxy: Option<Proxy>,
    exited: bool,
}

impl MultiProcessPolicyManager {
    /// Spawns `config.num_hosts` host threads and creates the policies of `registry` on them.
    pub fn build(
        registry: &PolicyRegistry,
        config: &PolicyManagerConfig,
        fabric: Option<&Fabric>,
        recorder: Box<dyn Recorder + Send>,
    ) -> Result<Self> {
        if config.num_hosts == 0 {
            return Err(TrellisError::InvalidConfig("num_hosts must be positive".to_string()).into());
        }
        if config.data_parallel && fabric.is_none() {
            return Err(TrellisError::InvalidConfig(
                "data-parallel mode requires a fabric".to_string(),
            )
            .into());
        }

        let policy2host: BTreeMap<_, _> = registry
            .names()
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name, i % config.num_hosts))
            .collect();

        let mut hosts = vec![];
        for idx in 0..config.num_hosts {
            let proxy = match (config.data_parallel, fabric) {
                (true, Some(fabric)) => Some(fabric.connect(POLICY_HOST, &policy_host_name(idx))?),
                _ => None,
            };
            hosts.push(spawn_host(idx, registry.clone(), proxy)?);
        }

        // A host whose channels are dropped stops, so an early return releases the threads.
        let initial_states = init_hosts(&hosts, &policy2host)?;
        let mut manager = Self {
            core: ManagerCore::new(initial_states, config, recorder)?,
            hosts,
            policy2host,
            proxy: None,
            exited: false,
        };

        if let Some(fabric) = fabric.filter(|_| config.data_parallel) {
            let mut proxy = fabric.connect(POLICY_MANAGER, POLICY_MANAGER)?;
            if let Some(allocation) = manager.core.initial_allocation()? {
                init_workers(&mut proxy, &allocation)?;
            }
            manager.proxy = Some(proxy);
        }
        info!(
            "Multi-process policy manager created with {} host(s)",
            manager.hosts.len()
        );
        Ok(manager)
    }

    /// Index of the host owning each policy.
    pub fn policy2host(&self) -> &BTreeMap<PolicyName, usize> {
        &self.policy2host
    }

    /// Exits and waits for the host threads to finish.
    ///
    /// Returns the first error a host stopped with.
    pub fn join(&mut self) -> Result<()> {
        self.exit();
        let mut result = Ok(());
        for host in self.hosts.iter_mut() {
            if let Some(thread) = host.thread.take() {
                let r = match thread.join() {
                    Ok(r) => r,
                    Err(_) => Err(TrellisError::Disconnected(host.name.clone()).into()),
                };
                if result.is_ok() {
                    result = r;
                }
            }
        }
        result
    }
}

impl PolicyManager for MultiProcessPolicyManager {
    fn update(&mut self, rollout_info: RolloutInfoMap) -> Result<()> {
        let start = Instant::now();
        let due = self.core.admit(rollout_info)?;
        if due.is_empty() {
            return Ok(());
        }
        let allocation = self.core.allocate(&due)?;

        let mut groups: BTreeMap<usize, BTreeMap<PolicyName, LearnTask>> = BTreeMap::new();
        for (name, task) in self.core.tasks(due, allocation.as_ref()).into_iter() {
            let idx = self.policy2host[&name];
            groups.entry(idx).or_default().insert(name, task);
        }

        for (idx, tasks) in groups.iter_mut() {
            self.hosts[*idx].send(Message::Learn {
                tasks: std::mem::take(tasks),
            })?;
        }
        let mut updated = StateMap::new();
        for idx in groups.keys() {
            match self.hosts[*idx].recv()? {
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
        shutdown(&self.hosts);
        if let Some(proxy) = self.proxy.as_mut() {
            proxy.ibroadcast(GRAD_WORKER, Message::Exit);
            proxy.close();
        }
        self.exited = true;
    }
}

impl Drop for MultiProcessPolicyManager {
    fn drop(&mut self) {
        self.exit();
    }
}

fn unexpected(msg: Message) -> anyhow::Error {
    TrellisError::UnexpectedMessage {
        component: POLICY_MANAGER.to_string(),
        tag: msg.tag().to_string(),
    }
    .into()
}

/// Sends `INIT_POLICIES` to every host owning a policy and collects the states.
fn init_hosts(hosts: &[HostHandle], policy2host: &BTreeMap<PolicyName, usize>) -> Result<StateMap> {
    let mut groups: BTreeMap<usize, Vec<PolicyName>> = BTreeMap::new();
    for (name, idx) in policy2host.iter() {
        groups.entry(*idx).or_default().push(name.clone());
    }
    for (idx, policy_names) in groups.into_iter() {
        hosts[idx].send(Message::InitPolicies { policy_names })?;
    }

    let mut states = StateMap::new();
    for idx in policy2host.values().collect::<BTreeSet<_>>() {
        match hosts[*idx].recv()? {
            Message::InitPoliciesDone { policy_state } => states.extend(policy_state),
            msg => return Err(unexpected(msg)),
        }
    }
    Ok(states)
}

fn shutdown(hosts: &[HostHandle]) {
    for host in hosts.iter() {
        if let Err(e) = host.send(Message::Exit) {
            warn!("Failed to send EXIT to {}: {}", host.name, e);
        }
    }
}

fn spawn_host(idx: usize, registry: PolicyRegistry, proxy: Option<Proxy>) -> Result<HostHandle> {
    let (manager_sender, host_receiver) = unbounded();
    let (host_sender, manager_receiver) = unbounded();
    let name = policy_host_name(idx);
    let thread = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || run_host(registry, host_receiver, host_sender, proxy))?;
    Ok(HostHandle {
        name,
        sender: manager_sender,
        receiver: manager_receiver,
        thread: Some(thread),
    })
}

fn run_host(
    registry: PolicyRegistry,
    receiver: Receiver<Message>,
    sender: Sender<Message>,
    mut proxy: Option<Proxy>,
) -> Result<()> {
    let name = std::thread::current()
        .name()
        .unwrap_or("policy host")
        .to_string();
    let mut policies = HostedPolicies::new(registry);
    loop {
        let msg = receiver
            .recv()
            .map_err(|_| TrellisError::Disconnected(name.clone()))?;
        let reply = match msg {
            Message::InitPolicies { policy_names } => {
                info!("{} initializing {:?}", name, policy_names);
                Message::InitPoliciesDone {
                    policy_state: policies.init(&policy_names)?,
                }
            }
            Message::Learn { tasks } => Message::LearnDone {
                policy_state: policies.learn(tasks, proxy.as_mut())?,
            },
            Message::Exit => {
                info!("{} exited", name);
                return Ok(());
            }
            msg => {
                return Err(TrellisError::UnexpectedMessage {
                    component: name,
                    tag: msg.tag().to_string(),
                }
                .into())
            }
        };
        sender
            .send(reply)
            .map_err(|_| TrellisError::Disconnected(name.clone()))?;
    }
}
