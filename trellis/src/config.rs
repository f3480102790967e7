//! Configuration of a training run.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::File,
    io::{BufReader, Write},
    path::Path,
    str::FromStr,
};
use trellis_core::{error::TrellisError, PolicyName};
use trellis_dist::{PolicyManagerConfig, ServerConfig};

/// Where the policies live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// All policies in the policy manager.
    Local,

    /// Policies on host threads connected to the manager by channels.
    MultiProcess,

    /// Policies on policy hosts connected to the manager over the fabric.
    MultiNode,
}

impl FromStr for Topology {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "multi_process" | "multi-process" => Ok(Self::MultiProcess),
            "multi_node" | "multi-node" => Ok(Self::MultiNode),
            _ => Err(TrellisError::InvalidConfig(format!("unknown topology: {}", s))),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::MultiProcess => write!(f, "multi_process"),
            Self::MultiNode => write!(f, "multi_node"),
        }
    }
}

/// Workload of the simulated actors.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Number of roll-out rounds of each actor.
    pub episodes: usize,

    /// Number of trajectories per policy in a round.
    pub trajectories: usize,

    /// Number of steps of a trajectory.
    pub steps: usize,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            episodes: 5,
            trajectories: 2,
            steps: 8,
        }
    }
}

/// Configuration of a training run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrellisConfig {
    /// Where the policies live.
    pub topology: Topology,

    /// Names of the policies to train.
    pub policies: Vec<PolicyName>,

    /// Configuration of the policy manager.
    pub manager: PolicyManagerConfig,

    /// Configuration of the policy server.
    pub server: ServerConfig,

    /// Workload of the simulated actors.
    pub demo: DemoConfig,
}

impl Default for TrellisConfig {
    fn default() -> Self {
        Self {
            topology: Topology::Local,
            policies: vec!["policy.0".to_string(), "policy.1".to_string()],
            manager: PolicyManagerConfig::default(),
            server: ServerConfig::default(),
            demo: DemoConfig::default(),
        }
    }
}

impl TrellisConfig {
    /// Sets the topology.
    pub fn topology(mut self, v: Topology) -> Self {
        self.topology = v;
        self
    }

    /// Sets the names of policies.
    pub fn policies<T: Into<PolicyName>>(mut self, names: Vec<T>) -> Self {
        self.policies = names.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the configuration of the policy manager.
    pub fn manager(mut self, v: PolicyManagerConfig) -> Self {
        self.manager = v;
        self
    }

    /// Sets the configuration of the policy server.
    pub fn server(mut self, v: ServerConfig) -> Self {
        self.server = v;
        self
    }

    /// Sets the workload of the simulated actors.
    pub fn demo(mut self, v: DemoConfig) -> Self {
        self.demo = v;
        self
    }

    /// Constructs [`TrellisConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TrellisConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
