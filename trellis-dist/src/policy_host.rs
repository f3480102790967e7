//! Policy hosts own the authoritative states of a subset of policies.
use crate::{
    data_parallel::run_task,
    messages::{policy_host_name, LearnTask, Message, SessionMessage, POLICY_HOST},
    proxy::{Fabric, Proxy},
};
use anyhow::Result;
use log::info;
use std::collections::BTreeMap;
use trellis_core::{error::TrellisError, PolicyName, PolicyRegistry, RlPolicy, StateMap};

/// Policies owned by a host.
pub struct HostedPolicies {
    registry: PolicyRegistry,
    policies: BTreeMap<PolicyName, Box<dyn RlPolicy>>,
}

impl HostedPolicies {
    /// Creates an empty set of policies to be created with `registry`.
    pub fn new(registry: PolicyRegistry) -> Self {
        Self {
            registry,
            policies: BTreeMap::new(),
        }
    }

    /// Names of the hosted policies.
    pub fn names(&self) -> Vec<PolicyName> {
        self.policies.keys().cloned().collect()
    }

    /// Creates the policies and returns the states of all hosted policies.
    pub fn init(&mut self, policy_names: &[PolicyName]) -> Result<StateMap> {
        for name in policy_names.iter() {
            let policy = self.registry.create(name)?;
            self.policies.insert(name.clone(), policy);
        }
        self.states(self.policies.keys())
    }

    /// Executes learning tasks and returns the states of the learned policies.
    pub fn learn(
        &mut self,
        tasks: BTreeMap<PolicyName, LearnTask>,
        mut proxy: Option<&mut Proxy>,
    ) -> Result<StateMap> {
        let names: Vec<_> = tasks.keys().cloned().collect();
        for (name, task) in tasks.into_iter() {
            let policy = self
                .policies
                .get_mut(&name)
                .ok_or_else(|| TrellisError::UnknownPolicy(name.clone()))?;
            run_task(&mut **policy, task, proxy.as_deref_mut())?;
        }
        self.states(names.iter())
    }

    fn states<'a>(&self, names: impl Iterator<Item = &'a PolicyName>) -> Result<StateMap> {
        let mut states = StateMap::new();
        for name in names {
            let policy = self
                .policies
                .get(name)
                .ok_or_else(|| TrellisError::UnknownPolicy(name.clone()))?;
            states.insert(name.clone(), policy.get_state(true)?);
        }
        Ok(states)
    }
}

/// A policy host on the fabric, serving a distributed policy manager.
pub struct PolicyHost {
    policies: HostedPolicies,
    proxy: Proxy,
}

impl PolicyHost {
    /// Joins the fabric as the `idx`-th policy host.
    pub fn connect(fabric: &Fabric, idx: usize, registry: PolicyRegistry) -> Result<Self> {
        let proxy = fabric.connect(POLICY_HOST, &policy_host_name(idx))?;
        Ok(Self {
            policies: HostedPolicies::new(registry),
            proxy,
        })
    }

    /// Name of the host.
    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Names of the hosted policies.
    pub fn policy_names(&self) -> Vec<PolicyName> {
        self.policies.names()
    }

    /// Serves requests until `EXIT`.
    pub fn run(&mut self) -> Result<()> {
        info!("{} started", self.name());
        loop {
            let msg = self.proxy.receive()?;
            if !self.handle(msg)? {
                break;
            }
        }
        info!("{} exited", self.name());
        self.proxy.close();
        Ok(())
    }

    /// Handles a message. Returns `false` on `EXIT`.
    pub fn handle(&mut self, msg: SessionMessage) -> Result<bool> {
        let SessionMessage {
            session_id,
            source,
            message,
            ..
        } = msg;
        match message {
            Message::InitPolicies { policy_names } => {
                let policy_state = self.policies.init(&policy_names)?;
                info!("{} initialized {:?}", self.name(), policy_names);
                self.proxy.reply_to(
                    &source,
                    session_id,
                    Message::InitPoliciesDone { policy_state },
                )?;
                Ok(true)
            }
            Message::Learn { tasks } => {
                let policy_state = self.policies.learn(tasks, Some(&mut self.proxy))?;
                self.proxy
                    .reply_to(&source, session_id, Message::LearnDone { policy_state })?;
                Ok(true)
            }
            Message::Exit => Ok(false),
            message => Err(TrellisError::UnexpectedMessage {
                component: self.name().to_string(),
                tag: message.tag().to_string(),
            }
            .into()),
        }
    }
}
