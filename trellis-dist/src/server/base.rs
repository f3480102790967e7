use super::ServerConfig;
use crate::{
    messages::{Message, SessionMessage, POLICY_SERVER},
    policy_manager::PolicyManager,
    proxy::{Fabric, Proxy},
};
use anyhow::Result;
use log::{info, warn};
use trellis_core::error::TrellisError;

/// Result of handling a message in [`PolicyServer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerStep {
    /// Keep serving.
    Continue,

    /// All actors are done.
    Finished,
}

/// Serves policy states to actors and updates policies with the roll-out
/// information they send.
///
/// Roll-out information collected with a version older than
/// `current - max_lag` is dropped. Either way, the actor receives the states
/// updated since the version it used, along with the current version.
pub struct PolicyServer<M> {
    manager: M,
    proxy: Proxy,
    max_lag: usize,
    num_active_actors: usize,
}

impl<M: PolicyManager> PolicyServer<M> {
    /// Joins the fabric as `POLICY_SERVER`.
    pub fn build(config: &ServerConfig, manager: M, fabric: &Fabric) -> Result<Self> {
        if config.num_actors == 0 {
            return Err(TrellisError::InvalidConfig("num_actors must be positive".to_string()).into());
        }
        Ok(Self {
            manager,
            proxy: fabric.connect(POLICY_SERVER, POLICY_SERVER)?,
            max_lag: config.max_lag,
            num_active_actors: config.num_actors,
        })
    }

    /// Serves until every actor has sent `DONE`.
    pub fn run(&mut self) -> Result<()> {
        info!(
            "Policy server started, waiting for {} actor(s)",
            self.num_active_actors
        );
        loop {
            let msg = self.proxy.receive()?;
            if self.handle(msg)? == ServerStep::Finished {
                return Ok(());
            }
        }
    }

    /// Handles a message from an actor.
    pub fn handle(&mut self, msg: SessionMessage) -> Result<ServerStep> {
        let SessionMessage {
            session_id,
            source,
            message,
            ..
        } = msg;
        match message {
            Message::GetInitialPolicyState => {
                let reply = Message::PolicyState {
                    policy_state: self.manager.get_all_states(),
                    version: self.manager.get_version(),
                };
                self.proxy.reply_to(&source, session_id, reply)?;
            }
            Message::SampleDone {
                rollout_info,
                version,
            } => {
                let current = self.manager.get_version();
                if current.saturating_sub(version) > self.max_lag {
                    info!(
                        "Ignored roll-out information from {} collected with a stale policy version. \
                         Expected versions no earlier than {}, got {}",
                        source,
                        current.saturating_sub(self.max_lag),
                        version
                    );
                } else {
                    self.manager.update(rollout_info)?;
                }
                let reply = Message::PolicyState {
                    policy_state: self.manager.get_state(Some(version)),
                    version: self.manager.get_version(),
                };
                self.proxy.reply_to(&source, session_id, reply)?;
            }
            Message::Done => {
                if self.num_active_actors == 0 {
                    warn!("DONE from {} after all actors finished", source);
                    return Ok(ServerStep::Continue);
                }
                self.num_active_actors -= 1;
                info!(
                    "{} is done, {} actor(s) remaining",
                    source, self.num_active_actors
                );
                if self.num_active_actors == 0 {
                    self.proxy.close();
                    return Ok(ServerStep::Finished);
                }
            }
            message => {
                return Err(TrellisError::UnexpectedMessage {
                    component: POLICY_SERVER.to_string(),
                    tag: message.tag().to_string(),
                }
                .into())
            }
        }
        Ok(ServerStep::Continue)
    }

    /// Number of actors that have not sent `DONE` yet.
    pub fn num_active_actors(&self) -> usize {
        self.num_active_actors
    }

    /// The policy manager.
    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// The policy manager, for calls outside of message handling.
    pub fn manager_mut(&mut self) -> &mut M {
        &mut self.manager
    }

    /// Returns the policy manager.
    pub fn into_manager(self) -> M {
        self.manager
    }
}
