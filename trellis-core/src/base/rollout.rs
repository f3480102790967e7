//! Roll-out information delivered by actors.
use super::PolicyName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A sequence of interaction records collected for one policy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Observations, one per step.
    pub obs: Vec<Vec<f32>>,

    /// Actions, one per step.
    pub act: Vec<Vec<f32>>,

    /// Rewards, one per step.
    pub reward: Vec<f32>,

    /// `true` if the trajectory ended in a terminal state.
    pub is_terminal: bool,
}

impl Trajectory {
    /// Number of steps in the trajectory.
    pub fn len(&self) -> usize {
        self.reward.len()
    }

    /// Returns `true` if the trajectory has no steps.
    pub fn is_empty(&self) -> bool {
        self.reward.is_empty()
    }
}

/// Loss and, optionally, explicit gradients computed from a batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LossInfo {
    /// Scalar loss.
    pub loss: f32,

    /// Serialized gradients, present when requested with `explicit_grad`.
    pub grad: Option<Vec<u8>>,

    /// Number of samples the loss was computed on.
    pub size: usize,
}

/// Unit of gradient computation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Trajectories in the batch.
    pub trajectories: Vec<Trajectory>,
}

impl Batch {
    /// Builds a batch from trajectories.
    pub fn new(trajectories: Vec<Trajectory>) -> Self {
        Self { trajectories }
    }

    /// Total number of steps in the batch.
    pub fn size(&self) -> usize {
        self.trajectories.iter().map(Trajectory::len).sum()
    }

    /// Splits the batch into `n` sub-batches, distributing trajectories round-robin.
    ///
    /// Sub-batches may be empty when there are fewer trajectories than `n`.
    pub fn split(self, n: usize) -> Vec<Batch> {
        let n = n.max(1);
        let mut parts = vec![Batch::default(); n];
        for (i, tr) in self.trajectories.into_iter().enumerate() {
            parts[i % n].trajectories.push(tr);
        }
        parts
    }
}

/// Roll-out information for a single policy.
///
/// All records for one policy in one update cycle share the same kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RolloutInfo {
    /// Raw simulation trajectories.
    Trajectories(Vec<Trajectory>),

    /// Loss information computed directly by roll-out workers.
    LossInfos(Vec<LossInfo>),
}

impl RolloutInfo {
    /// Number of records.
    pub fn len(&self) -> usize {
        match self {
            Self::Trajectories(v) => v.len(),
            Self::LossInfos(v) => v.len(),
        }
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the record kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Trajectories(_) => "Trajectory",
            Self::LossInfos(_) => "LossInfo",
        }
    }
}

/// Roll-out information grouped by policy.
pub type RolloutInfoMap = BTreeMap<PolicyName, RolloutInfo>;

#[cfg(test)]
mod test {
    use super::*;

    fn traj(n: usize) -> Trajectory {
        Trajectory {
            reward: vec![1.0; n],
            ..Default::default()
        }
    }

    #[test]
    fn test_split_batch() {
        let batch = Batch::new(vec![traj(1), traj(2), traj(3)]);
        assert_eq!(batch.size(), 6);

        let parts = batch.split(2);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].size(), 4);
        assert_eq!(parts[1].size(), 2);
    }

    #[test]
    fn test_split_more_parts_than_trajectories() {
        let parts = Batch::new(vec![traj(5)]).split(3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.iter().filter(|b| b.trajectories.is_empty()).count(), 2);
    }
}
