//! Latest policy states and the history of updates.
use crate::{PolicyName, PolicyState, StateMap, Version};
use std::collections::BTreeSet;

/// Caches the latest serialized state of every policy together with the
/// set of policies updated at each version.
///
/// Entry 0 of the history contains all policies, so that the state of every
/// policy is served to a client that has not received any state yet.
/// The version is the index of the latest history entry.
#[derive(Clone, Debug)]
pub struct PolicyStateCache {
    states: StateMap,
    history: Vec<BTreeSet<PolicyName>>,
}

impl PolicyStateCache {
    /// Creates a cache at version 0 holding the initial states.
    pub fn new(initial_states: StateMap) -> Self {
        let all = initial_states.keys().cloned().collect();
        Self {
            states: initial_states,
            history: vec![all],
        }
    }

    /// Current version.
    pub fn version(&self) -> Version {
        self.history.len() - 1
    }

    /// Stores updated states and advances the version by one.
    ///
    /// Does nothing if `updated` is empty.
    pub fn commit(&mut self, updated: StateMap) -> Version {
        if updated.is_empty() {
            return self.version();
        }
        let names = updated.keys().cloned().collect();
        self.states.extend(updated);
        self.history.push(names);
        self.version()
    }

    /// Latest states of the policies updated after version `since`.
    ///
    /// With `None`, the states updated at the current version are returned,
    /// which at version 0 means all policies. A `since` at or beyond the current
    /// version gives an empty map.
    pub fn get_state(&self, since: Option<Version>) -> StateMap {
        let start = match since {
            Some(v) => v.saturating_add(1),
            None => self.version(),
        };
        let mut updated = BTreeSet::new();
        for names in self.history.iter().skip(start) {
            updated.extend(names.iter());
        }
        updated
            .into_iter()
            .filter_map(|name| self.states.get(name).map(|s| (name.clone(), s.clone())))
            .collect()
    }

    /// Latest states of all policies.
    pub fn all(&self) -> &StateMap {
        &self.states
    }

    /// The latest state of the policy.
    pub fn get(&self, name: &str) -> Option<&PolicyState> {
        self.states.get(name)
    }

    /// Sets of updated policies, indexed by version.
    pub fn history(&self) -> &[BTreeSet<PolicyName>] {
        &self.history
    }
}
