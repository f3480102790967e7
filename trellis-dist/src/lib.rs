#![warn(missing_docs)]
//! Coordination of policy managers, policy hosts, gradient workers and actors.
//!
//! Every component runs in its own thread and communicates with the others only
//! by messages, either over a [`Fabric`] with tagged session messages, or over a
//! dedicated pair of channels between a [`MultiProcessPolicyManager`] and its hosts.
//!
//! # Messages
//! * From actors to the [`PolicyServer`]
//!   - `GET_INITIAL_POLICY_STATE`, `SAMPLE_DONE`, `DONE`
//! * From policy managers to [`PolicyHost`]s
//!   - `INIT_POLICIES`, `LEARN`, `EXIT`
//! * From policy managers and hosts to [`GradWorker`]s
//!   - `INIT_POLICIES`, `COMPUTE_GRAD`, `EXIT`
pub mod client;
pub mod data_parallel;
pub mod grad_worker;
pub mod messages;
pub mod policy_host;
pub mod policy_manager;
pub mod proxy;
pub mod server;
pub use client::PolicyClient;
pub use grad_worker::GradWorker;
pub use messages::{Message, MsgTag, SessionMessage};
pub use policy_host::PolicyHost;
pub use policy_manager::{
    DistributedPolicyManager, MultiProcessPolicyManager, PolicyManager, PolicyManagerConfig,
    SimplePolicyManager,
};
pub use proxy::{Fabric, Proxy};
pub use server::{PolicyServer, ServerConfig, ServerStep};
