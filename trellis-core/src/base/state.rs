//! Policy state and version.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a policy, stable for the lifetime of a training run.
pub type PolicyName = String;

/// Collective policy version.
///
/// Starts at 0 and is incremented by one for every update cycle in which
/// at least one policy was updated.
pub type Version = usize;

/// Serialized parameters of a policy.
///
/// The blob is produced by [`RlPolicy::get_state`](crate::RlPolicy::get_state) of the
/// policy that owns it and is never inspected by the coordination layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyState(pub Vec<u8>);

impl PolicyState {
    /// Size of the blob in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for PolicyState {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

/// Policy states keyed by policy name.
pub type StateMap = BTreeMap<PolicyName, PolicyState>;
