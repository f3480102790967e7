//! Messages exchanged between actors, the policy server, policy hosts and gradient workers.
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use trellis_core::{Batch, LossInfo, PolicyName, RolloutInfo, RolloutInfoMap, StateMap, Version};

/// Component type of actors.
pub const ACTOR: &str = "actor";

/// Component type and name of the policy server.
pub const POLICY_SERVER: &str = "POLICY_SERVER";

/// Component type and name of the policy manager.
pub const POLICY_MANAGER: &str = "POLICY_MANAGER";

/// Component type of policy hosts.
pub const POLICY_HOST: &str = "policy_host";

/// Component type of gradient workers.
pub const GRAD_WORKER: &str = "grad_worker";

/// Name of the `i`-th policy host.
pub fn policy_host_name(i: usize) -> String {
    format!("POLICY_HOST.{}", i)
}

/// Name of the `i`-th gradient worker.
pub fn grad_worker_name(i: usize) -> String {
    format!("GRAD_WORKER.{}", i)
}

/// Tags of [`Message`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgTag {
    /// An actor asks for the initial policy states.
    GetInitialPolicyState,

    /// Policy states served to an actor.
    PolicyState,

    /// An actor delivers roll-out information.
    SampleDone,

    /// An actor has finished.
    Done,

    /// Instantiate policies.
    InitPolicies,

    /// Policies have been instantiated.
    InitPoliciesDone,

    /// Update policies.
    Learn,

    /// Policies have been updated.
    LearnDone,

    /// Compute loss information on batches.
    ComputeGrad,

    /// Loss information has been computed.
    ComputeGradDone,

    /// Terminate.
    Exit,
}

impl fmt::Display for MsgTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GetInitialPolicyState => "GET_INITIAL_POLICY_STATE",
            Self::PolicyState => "POLICY_STATE",
            Self::SampleDone => "SAMPLE_DONE",
            Self::Done => "DONE",
            Self::InitPolicies => "INIT_POLICIES",
            Self::InitPoliciesDone => "INIT_POLICIES_DONE",
            Self::Learn => "LEARN",
            Self::LearnDone => "LEARN_DONE",
            Self::ComputeGrad => "COMPUTE_GRAD",
            Self::ComputeGradDone => "COMPUTE_GRAD_DONE",
            Self::Exit => "EXIT",
        };
        write!(f, "{}", s)
    }
}

/// Work for one policy in a [`Message::Learn`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LearnTask {
    /// Roll-out information to learn from.
    pub rollout_info: RolloutInfo,

    /// Number of learning passes over trajectories.
    pub num_epochs: usize,

    /// Gradient workers to spread the computation over.
    ///
    /// Empty if the policy learns locally.
    pub workers: Vec<String>,
}

/// Messages with typed payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Request for the initial policy states.
    GetInitialPolicyState,

    /// Policy states and the version they belong to.
    PolicyState {
        /// Serialized states.
        policy_state: StateMap,
        /// Version of the manager.
        version: Version,
    },

    /// Roll-out information collected with policies of the given version.
    SampleDone {
        /// Roll-out information grouped by policy.
        rollout_info: RolloutInfoMap,
        /// Version of the policies used for collecting the information.
        version: Version,
    },

    /// The sender has finished.
    Done,

    /// Instantiate the given policies.
    InitPolicies {
        /// Names of policies to instantiate.
        policy_names: Vec<PolicyName>,
    },

    /// States of the instantiated policies.
    InitPoliciesDone {
        /// Serialized states.
        policy_state: StateMap,
    },

    /// Update the given policies.
    Learn {
        /// Tasks keyed by policy name.
        tasks: BTreeMap<PolicyName, LearnTask>,
    },

    /// States of the updated policies.
    LearnDone {
        /// Serialized states.
        policy_state: StateMap,
    },

    /// Compute loss information on batches.
    ComputeGrad {
        /// Batches keyed by policy name.
        grad_task: BTreeMap<PolicyName, Vec<Batch>>,
        /// States to load before the computation.
        policy_state: Option<StateMap>,
    },

    /// Loss information, one per batch of the request.
    ComputeGradDone {
        /// Loss information keyed by policy name.
        loss_info: BTreeMap<PolicyName, Vec<LossInfo>>,
    },

    /// Terminate.
    Exit,
}

impl Message {
    /// Tag of the message.
    pub fn tag(&self) -> MsgTag {
        match self {
            Self::GetInitialPolicyState => MsgTag::GetInitialPolicyState,
            Self::PolicyState { .. } => MsgTag::PolicyState,
            Self::SampleDone { .. } => MsgTag::SampleDone,
            Self::Done => MsgTag::Done,
            Self::InitPolicies { .. } => MsgTag::InitPolicies,
            Self::InitPoliciesDone { .. } => MsgTag::InitPoliciesDone,
            Self::Learn { .. } => MsgTag::Learn,
            Self::LearnDone { .. } => MsgTag::LearnDone,
            Self::ComputeGrad { .. } => MsgTag::ComputeGrad,
            Self::ComputeGradDone { .. } => MsgTag::ComputeGradDone,
            Self::Exit => MsgTag::Exit,
        }
    }
}

/// Whether the sender of a message expects a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionType {
    /// A request or a reply.
    Task,

    /// A message with no reply.
    Notification,
}

/// A [`Message`] with routing information.
///
/// A reply carries the `session_id` of the request it answers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Identifier shared by a request and its reply.
    pub session_id: u64,

    /// Whether a reply is expected.
    pub session_type: SessionType,

    /// Name of the sender.
    pub source: String,

    /// Name of the receiver.
    pub destination: String,

    /// Payload.
    pub message: Message,
}

impl SessionMessage {
    /// Tag of the payload.
    pub fn tag(&self) -> MsgTag {
        self.message.tag()
    }
}
