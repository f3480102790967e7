//! Core types shared by every component.
mod policy;
mod rollout;
mod state;
pub use policy::{PolicyCreator, PolicyRegistry, RlPolicy};
pub use rollout::{Batch, LossInfo, RolloutInfo, RolloutInfoMap, Trajectory};
pub use state::{PolicyName, PolicyState, StateMap, Version};
