use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use trellis_core::{PolicyName, UpdateOption};

/// Configuration of policy managers.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyManagerConfig {
    /// If `true`, gradients are computed by gradient workers.
    pub data_parallel: bool,

    /// Number of gradient workers, used in data-parallel mode.
    pub num_grad_workers: usize,

    /// Number of policy hosts, used by the multi-process and distributed managers.
    pub num_hosts: usize,

    /// Update option of policies without an entry in `update_options`.
    pub default_update_option: UpdateOption,

    /// Update options of individual policies.
    pub update_options: BTreeMap<PolicyName, UpdateOption>,
}

impl Default for PolicyManagerConfig {
    fn default() -> Self {
        Self {
            data_parallel: false,
            num_grad_workers: 1,
            num_hosts: 1,
            default_update_option: UpdateOption::default(),
            update_options: BTreeMap::new(),
        }
    }
}

impl PolicyManagerConfig {
    /// Enables data-parallel mode with the given number of gradient workers.
    pub fn data_parallel(mut self, num_grad_workers: usize) -> Self {
        self.data_parallel = true;
        self.num_grad_workers = num_grad_workers;
        self
    }

    /// Sets the number of policy hosts.
    pub fn num_hosts(mut self, v: usize) -> Self {
        self.num_hosts = v;
        self
    }

    /// Sets the default update option.
    pub fn default_update_option(mut self, v: UpdateOption) -> Self {
        self.default_update_option = v;
        self
    }

    /// Sets the update option of a policy.
    pub fn update_option(mut self, name: impl Into<PolicyName>, v: UpdateOption) -> Self {
        self.update_options.insert(name.into(), v);
        self
    }

    /// Constructs [`PolicyManagerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`PolicyManagerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
