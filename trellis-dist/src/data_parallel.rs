//! Learning with gradients computed by gradient workers.
use crate::{
    messages::{grad_worker_name, LearnTask, Message},
    proxy::Proxy,
};
use anyhow::Result;
use log::debug;
use std::collections::BTreeMap;
use trellis_core::{
    error::TrellisError, Allocation, Batch, RlPolicy, RolloutInfo, StateMap, Trajectory,
};

/// Sends `INIT_POLICIES` to every allocated gradient worker and waits until all are done.
pub fn init_workers(proxy: &mut Proxy, allocation: &Allocation) -> Result<()> {
    let requests = allocation
        .slot2policies
        .iter()
        .map(|(slot, names)| {
            let msg = Message::InitPolicies {
                policy_names: names.clone(),
            };
            (grad_worker_name(*slot), msg)
        })
        .collect();
    for reply in proxy.scatter(requests)? {
        match reply.message {
            Message::InitPoliciesDone { .. } => {}
            _ => {
                return Err(TrellisError::UnexpectedMessage {
                    component: proxy.name().to_string(),
                    tag: reply.tag().to_string(),
                }
                .into())
            }
        }
    }
    Ok(())
}

/// Learns from trajectories with gradients computed by `workers`.
///
/// In every epoch, the trajectories are split round-robin over the workers, each
/// worker computes loss information on its part with the current state of the
/// policy, and the policy is updated with all the loss information.
pub fn distributed_learn(
    policy: &mut dyn RlPolicy,
    trajectories: &[Trajectory],
    workers: &[String],
    num_epochs: usize,
    proxy: &mut Proxy,
) -> Result<()> {
    let name = policy.name().to_string();
    for epoch in 0..num_epochs {
        let state = policy.get_state(false)?;
        let parts = Batch::new(trajectories.to_vec()).split(workers.len());
        let requests: Vec<_> = workers
            .iter()
            .zip(parts)
            .filter(|(_, batch)| !batch.trajectories.is_empty())
            .map(|(worker, batch)| {
                let msg = Message::ComputeGrad {
                    grad_task: BTreeMap::from([(name.clone(), vec![batch])]),
                    policy_state: Some(StateMap::from([(name.clone(), state.clone())])),
                };
                (worker.clone(), msg)
            })
            .collect();
        if requests.is_empty() {
            return Ok(());
        }
        debug!(
            "{}: epoch {} of {} over {} worker(s)",
            name,
            epoch,
            num_epochs,
            requests.len()
        );

        let mut loss_info = vec![];
        for reply in proxy.scatter(requests)? {
            match reply.message {
                Message::ComputeGradDone {
                    loss_info: mut received,
                } => loss_info.extend(received.remove(&name).unwrap_or_default()),
                msg => {
                    return Err(TrellisError::UnexpectedMessage {
                        component: proxy.name().to_string(),
                        tag: msg.tag().to_string(),
                    }
                    .into())
                }
            }
        }
        policy.update(&loss_info)?;
    }
    Ok(())
}

/// Executes a learning task on the policy.
///
/// Loss information is applied with [`RlPolicy::update`]. Trajectories are learned
/// with the gradient workers of the task if any and a proxy is given, otherwise locally.
pub fn run_task(policy: &mut dyn RlPolicy, task: LearnTask, proxy: Option<&mut Proxy>) -> Result<()> {
    match task.rollout_info {
        RolloutInfo::LossInfos(loss_info) => policy.update(&loss_info),
        RolloutInfo::Trajectories(trajectories) => match proxy {
            Some(proxy) if !task.workers.is_empty() => distributed_learn(
                policy,
                &trajectories,
                &task.workers,
                task.num_epochs,
                proxy,
            ),
            _ => {
                for _ in 0..task.num_epochs {
                    policy.learn(&trajectories)?;
                }
                Ok(())
            }
        },
    }
}
