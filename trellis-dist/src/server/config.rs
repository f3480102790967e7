use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`PolicyServer`](super::PolicyServer).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of actors. The server stops when all of them have sent `DONE`.
    pub num_actors: usize,

    /// Maximum version lag of accepted roll-out information.
    ///
    /// With 0, only information collected with the current version is accepted.
    pub max_lag: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_actors: 1,
            max_lag: 0,
        }
    }
}

impl ServerConfig {
    /// Sets the number of actors.
    pub fn num_actors(mut self, v: usize) -> Self {
        self.num_actors = v;
        self
    }

    /// Sets the maximum version lag.
    pub fn max_lag(mut self, v: usize) -> Self {
        self.max_lag = v;
        self
    }

    /// Constructs [`ServerConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ServerConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_server_config() -> Result<()> {
        let config = ServerConfig::default().num_actors(8).max_lag(2);
        let dir = TempDir::new("server_config")?;
        let path = dir.path().join("server_config.yaml");
        config.save(&path)?;
        assert_eq!(ServerConfig::load(&path)?, config);
        Ok(())
    }
}
