//! Policy.
use super::{Batch, LossInfo, PolicyName, PolicyState, Trajectory};
use crate::error::TrellisError;
use anyhow::Result;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// A named, independently trainable policy.
///
/// This is the only view the coordination layer has of a learning algorithm.
/// Concrete algorithms implement this trait and are selected at construction
/// time through a [`PolicyRegistry`].
pub trait RlPolicy: Send {
    /// Name of the policy.
    fn name(&self) -> &str;

    /// Serializes the parameters of the policy.
    ///
    /// If `inference` is `true`, only the parameters required for taking actions
    /// need to be included.
    fn get_state(&self, inference: bool) -> Result<PolicyState>;

    /// Overwrites the parameters of the policy.
    fn set_state(&mut self, state: &PolicyState) -> Result<()>;

    /// Performs a learning step from multiple trajectories.
    fn learn(&mut self, trajectories: &[Trajectory]) -> Result<()>;

    /// Updates the parameters with loss information computed elsewhere,
    /// typically by roll-out workers or gradient workers.
    fn update(&mut self, loss_info: &[LossInfo]) -> Result<()>;

    /// Computes the loss on a batch.
    ///
    /// If `explicit_grad` is `true`, the returned [`LossInfo`] carries gradients
    /// that can be applied with [`RlPolicy::update`] on another instance.
    fn get_batch_loss(&mut self, batch: &Batch, explicit_grad: bool) -> Result<LossInfo>;
}

/// A function creating a policy from its name.
pub type PolicyCreator = dyn Fn(&str) -> Result<Box<dyn RlPolicy>> + Send + Sync;

/// Maps policy names to the functions that create them.
///
/// The registry is cheap to clone and is shared by the manager, hosts and
/// gradient workers, each of which creates its own instances.
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    creators: BTreeMap<PolicyName, Arc<PolicyCreator>>,
}

impl PolicyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a creator for the given policy name.
    pub fn register<F>(mut self, name: impl Into<PolicyName>, creator: F) -> Self
    where
        F: Fn(&str) -> Result<Box<dyn RlPolicy>> + Send + Sync + 'static,
    {
        self.creators.insert(name.into(), Arc::new(creator));
        self
    }

    /// Creates the policy with the given name.
    pub fn create(&self, name: &str) -> Result<Box<dyn RlPolicy>> {
        match self.creators.get(name) {
            Some(creator) => creator(name),
            None => Err(TrellisError::UnknownPolicy(name.to_string()))?,
        }
    }

    /// Returns `true` if a creator is registered for the name.
    pub fn contains(&self, name: &str) -> bool {
        self.creators.contains_key(name)
    }

    /// Names of registered policies, in lexicographic order.
    pub fn names(&self) -> Vec<PolicyName> {
        self.creators.keys().cloned().collect()
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.creators.len()
    }

    /// Returns `true` if no policy is registered.
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("names", &self.names())
            .finish()
    }
}
