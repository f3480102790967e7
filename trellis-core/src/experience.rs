//! Experience buffering and per-policy update conditions.
use crate::{error::TrellisError, PolicyName, RolloutInfo, RolloutInfoMap, Trajectory};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A mergeable buffer of trajectories.
///
/// The size is the total number of steps, so merging in any order gives the same size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExperienceSet {
    trajectories: Vec<Trajectory>,
    size: usize,
}

impl ExperienceSet {
    /// Creates a set from trajectories.
    pub fn new(trajectories: Vec<Trajectory>) -> Self {
        let size = trajectories.iter().map(Trajectory::len).sum();
        Self { trajectories, size }
    }

    /// Total number of steps.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns `true` if the set holds no trajectory.
    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    /// Appends trajectories.
    pub fn extend(&mut self, trajectories: Vec<Trajectory>) {
        self.size += trajectories.iter().map(Trajectory::len).sum::<usize>();
        self.trajectories.extend(trajectories);
    }

    /// Merges two sets.
    pub fn merge(mut self, other: ExperienceSet) -> Self {
        self.size += other.size;
        self.trajectories.extend(other.trajectories);
        self
    }

    /// Takes all trajectories out, leaving the set empty.
    pub fn take(&mut self) -> Vec<Trajectory> {
        self.size = 0;
        std::mem::take(&mut self.trajectories)
    }
}

/// Conditions under which a policy is updated with incoming trajectories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateOption {
    /// Number of new experience steps required to trigger an update.
    pub update_trigger: usize,

    /// Minimum number of experience steps received in total before the first update.
    pub warmup: usize,

    /// Number of learning passes over the experiences of one update.
    pub num_epochs: usize,
}

impl Default for UpdateOption {
    fn default() -> Self {
        Self {
            update_trigger: 1,
            warmup: 1,
            num_epochs: 1,
        }
    }
}

impl UpdateOption {
    /// Sets the update trigger.
    pub fn update_trigger(mut self, v: usize) -> Self {
        self.update_trigger = v;
        self
    }

    /// Sets the warmup size.
    pub fn warmup(mut self, v: usize) -> Self {
        self.warmup = v;
        self
    }

    /// Sets the number of epochs.
    pub fn num_epochs(mut self, v: usize) -> Self {
        self.num_epochs = v;
        self
    }

    /// Rejects options under which a due policy would not learn.
    pub fn check(&self, name: &str) -> Result<(), TrellisError> {
        if self.update_trigger == 0 {
            return Err(TrellisError::InvalidConfig(format!(
                "update_trigger of {} must be positive",
                name
            )));
        }
        if self.num_epochs == 0 {
            return Err(TrellisError::InvalidConfig(format!(
                "num_epochs of {} must be positive",
                name
            )));
        }
        Ok(())
    }
}

/// Decides which policies are due for an update.
///
/// Trajectories are buffered per policy until the policy's [`UpdateOption`] is met,
/// then handed out all at once. Loss information is always passed through.
#[derive(Clone, Debug, Default)]
pub struct UpdateGate {
    default_option: UpdateOption,
    options: BTreeMap<PolicyName, UpdateOption>,
    pending: BTreeMap<PolicyName, ExperienceSet>,
    received: BTreeMap<PolicyName, usize>,
}

impl UpdateGate {
    /// Creates a gate with a default option and per-policy overrides.
    ///
    /// Fails with [`TrellisError::InvalidConfig`] if an option has a zero
    /// `update_trigger` or `num_epochs`.
    pub fn new(
        default_option: UpdateOption,
        options: BTreeMap<PolicyName, UpdateOption>,
    ) -> Result<Self> {
        default_option.check("default")?;
        for (name, option) in options.iter() {
            option.check(name)?;
        }
        Ok(Self {
            default_option,
            options,
            pending: BTreeMap::new(),
            received: BTreeMap::new(),
        })
    }

    /// Update option of the policy.
    pub fn option(&self, name: &str) -> &UpdateOption {
        self.options.get(name).unwrap_or(&self.default_option)
    }

    /// Number of buffered steps of the policy.
    pub fn pending_size(&self, name: &str) -> usize {
        self.pending.get(name).map(ExperienceSet::size).unwrap_or(0)
    }

    /// Takes incoming roll-out information and returns the part due for an update.
    ///
    /// Empty record lists are ignored.
    pub fn admit(&mut self, rollout_info: RolloutInfoMap) -> RolloutInfoMap {
        let mut due = RolloutInfoMap::new();
        for (name, info) in rollout_info.into_iter() {
            if info.is_empty() {
                continue;
            }
            match info {
                RolloutInfo::LossInfos(_) => {
                    due.insert(name, info);
                }
                RolloutInfo::Trajectories(trajectories) => {
                    let option = *self.option(&name);
                    let exp = ExperienceSet::new(trajectories);
                    let received = self.received.entry(name.clone()).or_insert(0);
                    *received += exp.size();
                    let received = *received;

                    let pending = self.pending.entry(name.clone()).or_default();
                    let merged = std::mem::take(pending).merge(exp);
                    *pending = merged;

                    if pending.size() >= option.update_trigger && received >= option.warmup {
                        due.insert(name, RolloutInfo::Trajectories(pending.take()));
                    }
                }
            }
        }
        due
    }
}
