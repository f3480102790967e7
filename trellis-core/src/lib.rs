#![warn(missing_docs)]
//! Core types for coordinating the training of multiple named policies.
//!
//! This crate has no threads and does no I/O. It provides the data exchanged
//! between actors, policy managers, policy hosts and gradient workers, the
//! [`RlPolicy`] capability through which learning algorithms are plugged in,
//! the versioned [`PolicyStateCache`], experience gating with [`UpdateGate`] and
//! the dynamic [`allocate`] function.
pub mod allocator;
pub mod dummy;
pub mod error;
pub mod experience;
pub mod record;
pub mod state_cache;

mod base;
pub use allocator::{allocate, Allocation, TrainerAllocator};
pub use base::{
    Batch, LossInfo, PolicyCreator, PolicyName, PolicyRegistry, PolicyState, RlPolicy,
    RolloutInfo, RolloutInfoMap, StateMap, Trajectory, Version,
};
pub use experience::{ExperienceSet, UpdateGate, UpdateOption};
pub use state_cache::PolicyStateCache;
