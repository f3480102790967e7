//! A toy policy used for tests and demos.
//!
//! [`DummyPolicy`] keeps a single weight that moves towards the mean reward of the
//! experiences it learns from, along with counters of learning calls. Its state and
//! gradients are serialized with `bincode`, so it exercises the full state-serving
//! protocol without a numeric backend.
use crate::{
    error::TrellisError, Batch, LossInfo, PolicyRegistry, PolicyState, RlPolicy, Trajectory,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Parameters of [`DummyPolicy`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DummyParams {
    /// The only trainable parameter.
    pub weight: f32,

    /// Number of calls to [`RlPolicy::learn`].
    pub n_learn: usize,

    /// Number of calls to [`RlPolicy::update`].
    pub n_update: usize,
}

impl DummyParams {
    /// Decodes parameters from a serialized state.
    pub fn decode(state: &PolicyState) -> Result<Self> {
        bincode::deserialize(&state.0).map_err(|e| TrellisError::StateCodec(e.to_string()).into())
    }

    /// Encodes parameters into a serialized state.
    pub fn encode(&self) -> Result<PolicyState> {
        let bytes =
            bincode::serialize(self).map_err(|e| TrellisError::StateCodec(e.to_string()))?;
        Ok(PolicyState(bytes))
    }
}

/// Toy policy.
#[derive(Clone, Debug)]
pub struct DummyPolicy {
    name: String,
    lr: f32,
    params: DummyParams,
}

impl DummyPolicy {
    /// Creates a policy with zero weight.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lr: 0.5,
            params: DummyParams::default(),
        }
    }

    /// Parameters of the policy.
    pub fn params(&self) -> &DummyParams {
        &self.params
    }

    /// A registry creating a [`DummyPolicy`] for each of the given names.
    pub fn registry<S: AsRef<str>>(names: &[S]) -> PolicyRegistry {
        names.iter().fold(PolicyRegistry::new(), |registry, name| {
            registry.register(name.as_ref(), |name: &str| {
                Ok(Box::new(DummyPolicy::new(name)) as Box<dyn RlPolicy>)
            })
        })
    }

    fn mean_reward(trajectories: &[Trajectory]) -> f32 {
        let n: usize = trajectories.iter().map(Trajectory::len).sum();
        if n == 0 {
            return 0.0;
        }
        let sum: f32 = trajectories.iter().flat_map(|t| t.reward.iter()).sum();
        sum / n as f32
    }
}

impl RlPolicy for DummyPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_state(&self, _inference: bool) -> Result<PolicyState> {
        self.params.encode()
    }

    fn set_state(&mut self, state: &PolicyState) -> Result<()> {
        self.params = DummyParams::decode(state)?;
        Ok(())
    }

    fn learn(&mut self, trajectories: &[Trajectory]) -> Result<()> {
        let target = Self::mean_reward(trajectories);
        self.params.weight += self.lr * (target - self.params.weight);
        self.params.n_learn += 1;
        Ok(())
    }

    fn update(&mut self, loss_info: &[LossInfo]) -> Result<()> {
        let mut total = 0.0;
        let mut n = 0;
        for info in loss_info.iter() {
            let grad = match &info.grad {
                Some(bytes) => bincode::deserialize::<f32>(bytes)
                    .map_err(|e| TrellisError::StateCodec(e.to_string()))?,
                None => info.loss,
            };
            let size = info.size.max(1);
            total += grad * size as f32;
            n += size;
        }
        if n > 0 {
            self.params.weight -= self.lr * total / n as f32;
        }
        self.params.n_update += 1;
        Ok(())
    }

    fn get_batch_loss(&mut self, batch: &Batch, explicit_grad: bool) -> Result<LossInfo> {
        let error = self.params.weight - Self::mean_reward(&batch.trajectories);
        let grad = if explicit_grad {
            Some(bincode::serialize(&error).map_err(|e| TrellisError::StateCodec(e.to_string()))?)
        } else {
            None
        };
        Ok(LossInfo {
            loss: error * error,
            grad,
            size: batch.size(),
        })
    }
}

/// A trajectory of `len` steps with constant `reward`.
pub fn trajectory(len: usize, reward: f32) -> Trajectory {
    Trajectory {
        obs: vec![vec![0.0]; len],
        act: vec![vec![0.0]; len],
        reward: vec![reward; len],
        is_terminal: true,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_state_round_trip_through_registry() -> Result<()> {
        let registry = DummyPolicy::registry(&["p1", "p2"]);
        assert_eq!(registry.names(), vec!["p1", "p2"]);

        let mut p1 = registry.create("p1")?;
        assert_eq!(p1.name(), "p1");
        p1.learn(&[trajectory(4, 1.0)])?;
        let state = p1.get_state(false)?;

        let mut p2 = registry.create("p2")?;
        p2.set_state(&state)?;
        let params = DummyParams::decode(&p2.get_state(true)?)?;
        assert_eq!(params.weight, 0.5);
        assert_eq!(params.n_learn, 1);
        Ok(())
    }

    #[test]
    fn test_unknown_policy() {
        let registry = DummyPolicy::registry(&["p1"]);
        let err = registry.create("p3").err().unwrap();
        assert!(matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::UnknownPolicy(name)) if name == "p3"
        ));
    }

    #[test]
    fn test_gradients_apply_on_another_instance() -> Result<()> {
        let mut worker = DummyPolicy::new("p1");
        let batch = Batch::new(vec![trajectory(2, 2.0)]);
        let loss = worker.get_batch_loss(&batch, true)?;
        assert_eq!(loss.size, 2);
        assert_eq!(loss.loss, 4.0);

        let mut owner = DummyPolicy::new("p1");
        owner.update(&[loss])?;
        assert_eq!(owner.params().weight, 1.0);
        assert_eq!(owner.params().n_update, 1);
        Ok(())
    }

    #[test]
    fn test_corrupted_state() {
        let mut p = DummyPolicy::new("p1");
        assert!(p.set_state(&PolicyState(vec![1])).is_err());
    }
}
