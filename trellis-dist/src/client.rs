//! Actor side of the policy-serving protocol.
use crate::{
    messages::{Message, ACTOR, POLICY_SERVER},
    proxy::{Fabric, Proxy},
};
use anyhow::Result;
use trellis_core::{error::TrellisError, RolloutInfoMap, StateMap, Version};

/// Talks to the [`PolicyServer`](crate::PolicyServer) on behalf of an actor.
pub struct PolicyClient {
    proxy: Proxy,
}

impl PolicyClient {
    /// Joins the fabric as an actor named `name`.
    pub fn connect(fabric: &Fabric, name: &str) -> Result<Self> {
        Ok(Self {
            proxy: fabric.connect(ACTOR, name)?,
        })
    }

    fn request(&mut self, message: Message) -> Result<(StateMap, Version)> {
        let reply = self.proxy.send(POLICY_SERVER, message)?;
        match reply.message {
            Message::PolicyState {
                policy_state,
                version,
            } => Ok((policy_state, version)),
            msg => Err(TrellisError::UnexpectedMessage {
                component: self.proxy.name().to_string(),
                tag: msg.tag().to_string(),
            }
            .into()),
        }
    }

    /// Fetches the states of all policies and the current version.
    pub fn get_initial_policy_state(&mut self) -> Result<(StateMap, Version)> {
        self.request(Message::GetInitialPolicyState)
    }

    /// Delivers roll-out information collected with policies of `version`.
    ///
    /// Returns the states updated since `version` and the current version.
    pub fn sample_done(
        &mut self,
        rollout_info: RolloutInfoMap,
        version: Version,
    ) -> Result<(StateMap, Version)> {
        self.request(Message::SampleDone {
            rollout_info,
            version,
        })
    }

    /// Tells the server this actor has finished.
    pub fn done(&mut self) -> Result<()> {
        self.proxy.notify(POLICY_SERVER, Message::Done)?;
        self.proxy.close();
        Ok(())
    }
}
