use super::{ManagerCore, PolicyManager, PolicyManagerConfig};
use crate::{
    data_parallel::{init_workers, run_task},
    messages::{Message, GRAD_WORKER, POLICY_MANAGER},
    proxy::{Fabric, Proxy},
};
use anyhow::Result;
use log::info;
use std::{collections::BTreeMap, time::Instant};
use trellis_core::{
    error::TrellisError, record::Recorder, PolicyName, PolicyRegistry, RlPolicy, RolloutInfoMap,
    StateMap, Version,
};

/// Policy manager holding all policies in its own thread.
///
/// In data-parallel mode, gradients are computed by the gradient workers
/// connected to the fabric, reallocated before every update.
pub struct SimplePolicyManager {
    core: ManagerCore,
    policies: BTreeMap<PolicyName, Box<dyn RlPolicy>>,
    proxy: Option<Proxy>,
    exited: bool,
}

impl SimplePolicyManager {
    /// Creates every policy in `registry`.
    ///
    /// `fabric` is required in data-parallel mode, where the gradient workers must
    /// already be connected.
    pub fn build(
        registry: &PolicyRegistry,
        config: &PolicyManagerConfig,
        fabric: Option<&Fabric>,
        recorder: Box<dyn Recorder + Send>,
    ) -> Result<Self> {
        let mut policies = BTreeMap::new();
        let mut initial_states = StateMap::new();
        for name in registry.names() {
            let policy = registry.create(&name)?;
            initial_states.insert(name.clone(), policy.get_state(true)?);
            policies.insert(name, policy);
        }
        let core = ManagerCore::new(initial_states, config, recorder)?;

        let proxy = match (config.data_parallel, fabric) {
            (false, _) => None,
            (true, None) => {
                return Err(TrellisError::InvalidConfig(
                    "data-parallel mode requires a fabric".to_string(),
                )
                .into())
            }
            (true, Some(fabric)) => {
                let mut proxy = fabric.connect(POLICY_MANAGER, POLICY_MANAGER)?;
                if let Some(allocation) = core.initial_allocation()? {
                    init_workers(&mut proxy, &allocation)?;
                }
                Some(proxy)
            }
        };
        info!("Policy manager created with {:?}", core.policy_names());

        Ok(Self {
            core,
            policies,
            proxy,
            exited: false,
        })
    }

    /// The policy with the given name.
    pub fn policy(&self, name: &str) -> Option<&dyn RlPolicy> {
        self.policies.get(name).map(|p| &**p)
    }
}

impl PolicyManager for SimplePolicyManager {
    fn update(&mut self, rollout_info: RolloutInfoMap) -> Result<()> {
        let start = Instant::now();
        let due = self.core.admit(rollout_info)?;
        if due.is_empty() {
            return Ok(());
        }
        let allocation = self.core.allocate(&due)?;
        let tasks = self.core.tasks(due, allocation.as_ref());

        let mut updated = StateMap::new();
        for (name, task) in tasks.into_iter() {
            let policy = self
                .policies
                .get_mut(&name)
                .ok_or_else(|| TrellisError::UnknownPolicy(name.clone()))?;
            run_task(&mut **policy, task, self.proxy.as_mut())?;
            updated.insert(name, policy.get_state(true)?);
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
        if let Some(proxy) = self.proxy.as_mut() {
            proxy.ibroadcast(GRAD_WORKER, Message::Exit);
            proxy.close();
        }
        self.exited = true;
    }
}
