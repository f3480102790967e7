//! Stateless gradient worker.
use crate::{
    messages::{grad_worker_name, Message, SessionMessage, GRAD_WORKER},
    proxy::{Fabric, Proxy},
};
use anyhow::Result;
use log::{debug, info};
use std::collections::BTreeMap;
use trellis_core::{error::TrellisError, PolicyName, PolicyRegistry, RlPolicy, StateMap};

/// Computes loss information on batches pushed by policy managers or hosts.
///
/// The worker keeps policy shells only to run computations on. Their parameters
/// are whatever the caller last pushed with `COMPUTE_GRAD`.
pub struct GradWorker {
    registry: PolicyRegistry,
    proxy: Proxy,
    policies: BTreeMap<PolicyName, Box<dyn RlPolicy>>,
}

impl GradWorker {
    /// Joins the fabric as the `idx`-th gradient worker.
    pub fn connect(fabric: &Fabric, idx: usize, registry: PolicyRegistry) -> Result<Self> {
        let proxy = fabric.connect(GRAD_WORKER, &grad_worker_name(idx))?;
        Ok(Self {
            registry,
            proxy,
            policies: BTreeMap::new(),
        })
    }

    /// Name of the worker.
    pub fn name(&self) -> &str {
        self.proxy.name()
    }

    /// Names of the policy shells created so far.
    pub fn policy_names(&self) -> Vec<PolicyName> {
        self.policies.keys().cloned().collect()
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
        match &msg.message {
            Message::InitPolicies { policy_names } => {
                let mut policy_state = StateMap::new();
                for name in policy_names.iter() {
                    let state = self.shell(name)?.get_state(true)?;
                    policy_state.insert(name.clone(), state);
                }
                debug!("{} initialized {:?}", self.name(), policy_names);
                self.proxy
                    .reply(&msg, Message::InitPoliciesDone { policy_state })?;
                Ok(true)
            }
            Message::ComputeGrad {
                grad_task,
                policy_state,
            } => {
                let mut loss_info = BTreeMap::new();
                for (name, batches) in grad_task.iter() {
                    let policy = self.shell(name)?;
                    if let Some(state) = policy_state.as_ref().and_then(|s| s.get(name)) {
                        policy.set_state(state)?;
                    }
                    let losses = batches
                        .iter()
                        .map(|batch| policy.get_batch_loss(batch, true))
                        .collect::<Result<Vec<_>>>()?;
                    loss_info.insert(name.clone(), losses);
                }
                self.proxy
                    .reply(&msg, Message::ComputeGradDone { loss_info })?;
                Ok(true)
            }
            Message::Exit => Ok(false),
            _ => Err(TrellisError::UnexpectedMessage {
                component: self.name().to_string(),
                tag: msg.tag().to_string(),
            }
            .into()),
        }
    }

    // Allocation changes every cycle, so a policy may be pushed here without INIT_POLICIES.
    fn shell(&mut self, name: &str) -> Result<&mut Box<dyn RlPolicy>> {
        if !self.policies.contains_key(name) {
            let policy = self.registry.create(name)?;
            self.policies.insert(name.to_string(), policy);
        }
        self.policies
            .get_mut(name)
            .ok_or_else(|| TrellisError::UnknownPolicy(name.to_string()).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::MsgTag;
    use std::thread;
    use test_log::test;
    use trellis_core::{
        dummy::{trajectory, DummyParams, DummyPolicy},
        Batch,
    };

    fn spawn_worker(fabric: &Fabric, idx: usize) -> thread::JoinHandle<Result<()>> {
        let mut worker = GradWorker::connect(fabric, idx, DummyPolicy::registry(&["p1", "p2"]))
            .unwrap();
        thread::spawn(move || worker.run())
    }

    #[test]
    fn test_compute_grad_with_pushed_state() -> Result<()> {
        let fabric = Fabric::new();
        let handle = spawn_worker(&fabric, 0);
        let mut manager = fabric.connect("m", "manager")?;

        let reply = manager.send(
            "GRAD_WORKER.0",
            Message::InitPolicies {
                policy_names: vec!["p1".to_string()],
            },
        )?;
        assert_eq!(reply.tag(), MsgTag::InitPoliciesDone);
        match reply.message {
            Message::InitPoliciesDone { policy_state } => {
                assert_eq!(policy_state.keys().collect::<Vec<_>>(), vec!["p1"]);
                assert_eq!(DummyParams::decode(&policy_state["p1"])?, DummyParams::default());
            }
            msg => panic!("unexpected reply: {:?}", msg.tag()),
        }

        // weight 3.0 pushed, batch with reward 1.0: error 2.0
        let state = DummyParams {
            weight: 3.0,
            ..Default::default()
        }
        .encode()?;
        let reply = manager.send(
            "GRAD_WORKER.0",
            Message::ComputeGrad {
                grad_task: BTreeMap::from([(
                    "p2".to_string(),
                    vec![Batch::new(vec![trajectory(3, 1.0)])],
                )]),
                policy_state: Some(StateMap::from([("p2".to_string(), state)])),
            },
        )?;
        match reply.message {
            Message::ComputeGradDone { loss_info } => {
                let losses = &loss_info["p2"];
                assert_eq!(losses.len(), 1);
                assert_eq!(losses[0].loss, 4.0);
                assert_eq!(losses[0].size, 3);
                assert!(losses[0].grad.is_some());
            }
            msg => panic!("unexpected reply: {:?}", msg.tag()),
        }

        manager.notify("GRAD_WORKER.0", Message::Exit)?;
        handle.join().unwrap()?;
        assert!(!fabric.is_connected("GRAD_WORKER.0"));
        Ok(())
    }

    #[test]
    fn test_unknown_policy_is_fatal() -> Result<()> {
        let fabric = Fabric::new();
        let handle = spawn_worker(&fabric, 0);
        let manager = fabric.connect("m", "manager")?;
        manager.isend(
            "GRAD_WORKER.0",
            Message::InitPolicies {
                policy_names: vec!["p9".to_string()],
            },
        )?;
        let err = handle.join().unwrap().err().unwrap();
        assert!(matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::UnknownPolicy(name)) if name == "p9"
        ));
        Ok(())
    }

    #[test]
    fn test_unexpected_message_is_fatal() -> Result<()> {
        let fabric = Fabric::new();
        let handle = spawn_worker(&fabric, 1);
        let manager = fabric.connect("m", "manager")?;
        manager.isend("GRAD_WORKER.1", Message::Done)?;
        let err = handle.join().unwrap().err().unwrap();
        assert!(matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::UnexpectedMessage { tag, .. }) if tag == "DONE"
        ));
        Ok(())
    }
}
