use super::PolicyManagerConfig;
use crate::messages::{grad_worker_name, LearnTask};
use anyhow::Result;
use log::info;
use std::{collections::BTreeMap, time::Instant};
use trellis_core::{
    error::TrellisError,
    record::{Record, RecordValue, Recorder},
    Allocation, PolicyName, PolicyStateCache, RolloutInfo, RolloutInfoMap, StateMap,
    TrainerAllocator, UpdateGate, Version,
};

/// Owns the latest states of a set of policies and updates them with roll-out information.
///
/// Callers must serialize their calls into a manager.
pub trait PolicyManager {
    /// Updates the policies that are due with the given roll-out information.
    ///
    /// The version advances by exactly one if at least one policy was updated.
    /// An empty map has no effect.
    fn update(&mut self, rollout_info: RolloutInfoMap) -> Result<()>;

    /// Latest states of the policies updated after version `since`.
    ///
    /// With `None`, the policies updated at the current version are returned.
    fn get_state(&self, since: Option<Version>) -> StateMap;

    /// Latest states of all policies.
    fn get_all_states(&self) -> StateMap;

    /// Current version.
    fn get_version(&self) -> Version;

    /// Tells every host and worker owned by the manager to terminate.
    ///
    /// Does not wait for acknowledgment. Calling it more than once has no further effect.
    fn exit(&mut self);
}

/// Bookkeeping shared by the policy managers.
pub struct ManagerCore {
    policy_names: Vec<PolicyName>,
    cache: PolicyStateCache,
    gate: UpdateGate,
    allocator: Option<TrainerAllocator>,
    recorder: Box<dyn Recorder + Send>,
}

impl ManagerCore {
    /// Creates the bookkeeping from the initial states of the policies.
    pub fn new(
        initial_states: StateMap,
        config: &PolicyManagerConfig,
        recorder: Box<dyn Recorder + Send>,
    ) -> Result<Self> {
        let allocator = match config.data_parallel {
            true => Some(TrainerAllocator::new(config.num_grad_workers)?),
            false => None,
        };
        Ok(Self {
            policy_names: initial_states.keys().cloned().collect(),
            cache: PolicyStateCache::new(initial_states),
            gate: UpdateGate::new(config.default_update_option, config.update_options.clone())?,
            allocator,
            recorder,
        })
    }

    /// Names of the managed policies.
    pub fn policy_names(&self) -> &[PolicyName] {
        &self.policy_names
    }

    /// Returns the part of `rollout_info` due for an update.
    ///
    /// Fails with [`TrellisError::UnknownPolicy`] for a policy not managed here.
    pub fn admit(&mut self, rollout_info: RolloutInfoMap) -> Result<RolloutInfoMap> {
        if let Some(name) = rollout_info
            .keys()
            .find(|name| self.cache.get(name).is_none())
        {
            return Err(TrellisError::UnknownPolicy(name.clone()).into());
        }
        Ok(self.gate.admit(rollout_info))
    }

    /// Records the load of due policies and recomputes the allocation of gradient workers.
    ///
    /// Returns `None` if not in data-parallel mode.
    pub fn allocate(&mut self, due: &RolloutInfoMap) -> Result<Option<Allocation>> {
        let allocator = match self.allocator.as_mut() {
            Some(allocator) => allocator,
            None => return Ok(None),
        };
        for (name, info) in due.iter() {
            let load = match info {
                RolloutInfo::Trajectories(v) => v.iter().map(|t| t.len()).sum(),
                RolloutInfo::LossInfos(v) => v.iter().map(|l| l.size).sum(),
            };
            allocator.record_load(name, load);
        }
        Ok(Some(allocator.allocate(&self.policy_names)?))
    }

    /// Initial allocation of gradient workers, before any load has been recorded.
    pub fn initial_allocation(&self) -> Result<Option<Allocation>> {
        self.allocator
            .as_ref()
            .map(|allocator| allocator.allocate(&self.policy_names))
            .transpose()
    }

    /// Turns due roll-out information into learning tasks.
    pub fn tasks(
        &self,
        due: RolloutInfoMap,
        allocation: Option<&Allocation>,
    ) -> BTreeMap<PolicyName, LearnTask> {
        let workers = allocation
            .map(|a| a.named_slots(grad_worker_name))
            .unwrap_or_default();
        due.into_iter()
            .map(|(name, rollout_info)| {
                let task = LearnTask {
                    rollout_info,
                    num_epochs: self.gate.option(&name).num_epochs,
                    workers: workers.get(&name).cloned().unwrap_or_default(),
                };
                (name, task)
            })
            .collect()
    }

    /// Stores the states of updated policies and advances the version.
    ///
    /// `start` is when the update began, used for the recorded update time.
    pub fn commit(&mut self, updated: StateMap, start: Instant) -> Version {
        if updated.is_empty() {
            return self.cache.version();
        }
        let names: Vec<_> = updated.keys().cloned().collect();
        let version = self.cache.commit(updated);
        let update_time = start.elapsed().as_secs_f32() * 1000.0;
        info!(
            "Updated policies {:?} in {:.1} ms, version: {}",
            names, update_time, version
        );

        let mut record = Record::from_scalar("version", version as f32);
        record.insert("n_updated", RecordValue::Scalar(names.len() as f32));
        record.insert("update_time_ms", RecordValue::Scalar(update_time));
        record.insert("updated_policies", RecordValue::String(names.join(",")));
        self.recorder.write(record);
        version
    }

    /// See [`PolicyManager::get_state`].
    pub fn get_state(&self, since: Option<Version>) -> StateMap {
        self.cache.get_state(since)
    }

    /// See [`PolicyManager::get_version`].
    pub fn version(&self) -> Version {
        self.cache.version()
    }

    /// Latest states of all policies.
    pub fn all_states(&self) -> &StateMap {
        self.cache.all()
    }
}
