//! Runs multi-policy training with simulated actors.
//!
//! A run wires a [`Fabric`](trellis_dist::Fabric), the policy manager of the configured
//! [`Topology`], the hosts and gradient workers it needs, and `num_actors` actor
//! threads that report synthetic trajectories to a [`PolicyServer`](trellis_dist::PolicyServer)
//! until each has finished its episodes.
#![warn(missing_docs)]
mod config;
mod run;
pub use config::{DemoConfig, Topology, TrellisConfig};
pub use run::{run, RunSummary};
