//! Policy managers.
//!
//! A policy manager owns the versioned cache of policy states served to actors and
//! routes incoming roll-out information to the owners of the policies. Three
//! topologies are provided:
//!
//! * [`SimplePolicyManager`] holds every policy itself.
//! * [`MultiProcessPolicyManager`] spreads policies over host threads, each connected
//!   to the manager by a dedicated pair of channels.
//! * [`DistributedPolicyManager`] talks to [`PolicyHost`](crate::PolicyHost)s over
//!   the fabric with tagged messages.
//!
//! In data-parallel mode, the gradients of policies learning from trajectories are
//! computed by [`GradWorker`](crate::GradWorker)s, reallocated before every update
//! according to the volume of experiences each policy has received.
mod base;
mod config;
mod distributed;
mod multi_process;
mod simple;
pub use base::{ManagerCore, PolicyManager};
pub use config::PolicyManagerConfig;
pub use distributed::DistributedPolicyManager;
pub use multi_process::MultiProcessPolicyManager;
pub use simple::SimplePolicyManager;
