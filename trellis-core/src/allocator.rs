//! Allocation of policies to trainer or worker slots.
//!
//! The allocation is recomputed from the accumulated per-policy experience volume,
//! so that policies receiving more experience get more slots for gradient computation.
use crate::{error::TrellisError, PolicyName};
use anyhow::Result;
use log::info;
use std::collections::BTreeMap;

/// Two mutually inverse mappings between policies and slots.
///
/// Every policy maps to at least one slot, and every slot used maps back to the
/// policies assigned to it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Slots assigned to each policy.
    pub policy2slots: BTreeMap<PolicyName, Vec<usize>>,

    /// Policies assigned to each slot.
    pub slot2policies: BTreeMap<usize, Vec<PolicyName>>,
}

impl Allocation {
    fn assign(&mut self, name: &PolicyName, slot: usize) {
        self.policy2slots
            .entry(name.clone())
            .or_default()
            .push(slot);
        self.slot2policies
            .entry(slot)
            .or_default()
            .push(name.clone());
    }

    /// Slots assigned to the policy.
    pub fn slots_of(&self, name: &str) -> &[usize] {
        self.policy2slots
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Policies assigned to the slot.
    pub fn policies_of(&self, slot: usize) -> &[PolicyName] {
        self.slot2policies
            .get(&slot)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Converts slot indices into peer names with `slot_name`.
    pub fn named_slots<F>(&self, slot_name: F) -> BTreeMap<PolicyName, Vec<String>>
    where
        F: Fn(usize) -> String,
    {
        self.policy2slots
            .iter()
            .map(|(name, slots)| (name.clone(), slots.iter().map(|&i| slot_name(i)).collect()))
            .collect()
    }
}

/// Allocates `num_slots` slots to policies according to their load.
///
/// * Without load history (zero total load), policies are assigned round-robin
///   when there are at least as many policies as slots, otherwise each policy
///   is striped over slots `i, i + P, i + 2P, ...` so that no slot stays empty.
/// * With load history, each policy gets a quota of `max(1, round(load / average))`
///   slots where `average = total_load / num_slots`. If the quotas do not fill all
///   slots, the remainder goes to the policy with the largest quota. Quotas that
///   exceed the number of slots are kept as they are, so that some slots are shared.
///   Slots are handed out at consecutive offsets, wrapping around `num_slots`.
///
/// Policies missing from `load` are treated as having zero load.
pub fn allocate(
    policy_names: &[PolicyName],
    load: &BTreeMap<PolicyName, usize>,
    num_slots: usize,
) -> Result<Allocation> {
    if num_slots == 0 {
        return Err(TrellisError::NoSlots.into());
    }

    let mut allocation = Allocation::default();
    let num_policies = policy_names.len();
    let load_of = |name: &PolicyName| load.get(name).copied().unwrap_or(0);
    let total_load: usize = policy_names.iter().map(load_of).sum();

    if total_load == 0 {
        if num_policies >= num_slots {
            for (i, name) in policy_names.iter().enumerate() {
                allocation.assign(name, i % num_slots);
            }
        } else {
            for (i, name) in policy_names.iter().enumerate() {
                for slot in (i..num_slots).step_by(num_policies) {
                    allocation.assign(name, slot);
                }
            }
        }
        return Ok(allocation);
    }

    let average = total_load as f64 / num_slots as f64;
    let mut quotas: Vec<(&PolicyName, usize)> = policy_names
        .iter()
        .map(|name| {
            let quota = (load_of(name) as f64 / average).round_ties_even() as usize;
            (name, quota.max(1))
        })
        .collect();

    let assigned: usize = quotas.iter().map(|(_, q)| q).sum();
    if assigned < num_slots {
        let mut busiest = 0;
        for (i, (_, quota)) in quotas.iter().enumerate() {
            if *quota > quotas[busiest].1 {
                busiest = i;
            }
        }
        quotas[busiest].1 += num_slots - assigned;
    }

    let mut offset = 0;
    for (name, quota) in quotas {
        for i in 0..quota {
            allocation.assign(name, (i + offset) % num_slots);
        }
        offset = (offset + quota) % num_slots;
    }

    Ok(allocation)
}

/// Keeps the load history of policies and allocates slots from it.
#[derive(Clone, Debug)]
pub struct TrainerAllocator {
    num_slots: usize,
    load: BTreeMap<PolicyName, usize>,
}

impl TrainerAllocator {
    /// Creates an allocator over `num_slots` slots with no load history.
    pub fn new(num_slots: usize) -> Result<Self> {
        if num_slots == 0 {
            return Err(TrellisError::NoSlots.into());
        }
        Ok(Self {
            num_slots,
            load: BTreeMap::new(),
        })
    }

    /// Number of slots.
    pub fn num_slots(&self) -> usize {
        self.num_slots
    }

    /// Adds `amount` to the load of the policy.
    pub fn record_load(&mut self, name: &str, amount: usize) {
        *self.load.entry(name.to_string()).or_insert(0) += amount;
    }

    /// Accumulated load of each policy.
    pub fn load(&self) -> &BTreeMap<PolicyName, usize> {
        &self.load
    }

    /// Allocates slots to the given policies from the current load history.
    pub fn allocate(&self, policy_names: &[PolicyName]) -> Result<Allocation> {
        let allocation = allocate(policy_names, &self.load, self.num_slots)?;
        for name in policy_names {
            info!(
                "Policy {} payload: {}, quota: {} slot(s)",
                name,
                self.load.get(name).copied().unwrap_or(0),
                allocation.slots_of(name).len()
            );
        }
        Ok(allocation)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    fn names(n: usize) -> Vec<PolicyName> {
        (0..n).map(|i| format!("p{}", i)).collect()
    }

    fn load(pairs: &[(&str, usize)]) -> BTreeMap<PolicyName, usize> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_cold_start_round_robin() -> Result<()> {
        let a = allocate(&names(5), &BTreeMap::new(), 2)?;
        assert_eq!(a.slots_of("p0"), &[0]);
        assert_eq!(a.slots_of("p1"), &[1]);
        assert_eq!(a.slots_of("p4"), &[0]);
        assert_eq!(a.policies_of(0), &["p0", "p2", "p4"]);
        assert_eq!(a.policies_of(1), &["p1", "p3"]);
        Ok(())
    }

    #[test]
    fn test_cold_start_stripes_over_all_slots() -> Result<()> {
        let a = allocate(&names(3), &BTreeMap::new(), 5)?;
        assert_eq!(a.slots_of("p0"), &[0, 3]);
        assert_eq!(a.slots_of("p1"), &[1, 4]);
        assert_eq!(a.slots_of("p2"), &[2]);
        for slot in 0..5 {
            assert_eq!(a.policies_of(slot).len(), 1, "slot {}", slot);
        }
        Ok(())
    }

    #[test]
    fn test_warm_allocation_by_quota() -> Result<()> {
        let a = allocate(
            &names(3),
            &load(&[("p0", 30), ("p1", 10), ("p2", 10)]),
            5,
        )?;
        assert_eq!(a.slots_of("p0"), &[0, 1, 2]);
        assert_eq!(a.slots_of("p1"), &[3]);
        assert_eq!(a.slots_of("p2"), &[4]);
        Ok(())
    }

    #[test]
    fn test_deficit_goes_to_busiest_policy() -> Result<()> {
        // quotas round(2.5) = 2 each, one slot left over
        let a = allocate(&names(2), &load(&[("p0", 10), ("p1", 10)]), 5)?;
        assert_eq!(a.slots_of("p0"), &[0, 1, 2]);
        assert_eq!(a.slots_of("p1"), &[3, 4]);
        Ok(())
    }

    #[test]
    fn test_over_subscription_is_kept() -> Result<()> {
        let a = allocate(
            &names(3),
            &load(&[("p0", 1), ("p1", 1), ("p2", 100)]),
            2,
        )?;
        assert_eq!(a.slots_of("p0"), &[0]);
        assert_eq!(a.slots_of("p1"), &[1]);
        assert_eq!(a.slots_of("p2"), &[0, 1]);
        let n_assigned: usize = a.policy2slots.values().map(Vec::len).sum();
        assert_eq!(n_assigned, 4);
        Ok(())
    }

    #[test]
    fn test_every_slot_used_exactly_once() -> Result<()> {
        let cases: Vec<(Vec<(&str, usize)>, usize)> = vec![
            (vec![("p0", 5), ("p1", 5), ("p2", 5)], 3),
            (vec![("p0", 7), ("p1", 1), ("p2", 2)], 6),
            (vec![("p0", 100), ("p1", 14)], 8),
            (vec![("p0", 1), ("p1", 1), ("p2", 1), ("p3", 1)], 4),
        ];
        for (pairs, num_slots) in cases {
            let load = load(&pairs);
            let policy_names: Vec<PolicyName> = load.keys().cloned().collect();
            let a = allocate(&policy_names, &load, num_slots)?;
            for slot in 0..num_slots {
                assert_eq!(a.policies_of(slot).len(), 1, "{:?} slot {}", pairs, slot);
            }
            for name in policy_names.iter() {
                assert!(!a.slots_of(name).is_empty());
            }
        }
        Ok(())
    }

    #[test]
    fn test_missing_load_counts_as_zero() -> Result<()> {
        // p1 still gets one slot, which over-subscribes slot 0
        let a = allocate(&names(2), &load(&[("p0", 10)]), 4)?;
        assert_eq!(a.slots_of("p0"), &[0, 1, 2, 3]);
        assert_eq!(a.slots_of("p1"), &[0]);
        Ok(())
    }

    #[test]
    fn test_zero_slots() {
        let err = allocate(&names(2), &BTreeMap::new(), 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TrellisError>(),
            Some(TrellisError::NoSlots)
        ));
        assert!(TrainerAllocator::new(0).is_err());
    }

    #[test]
    fn test_trainer_allocator_accumulates_load() -> Result<()> {
        let mut allocator = TrainerAllocator::new(4)?;
        let policy_names = names(2);
        let a = allocator.allocate(&policy_names)?;
        assert_eq!(a.slots_of("p0"), &[0, 2]);
        assert_eq!(a.slots_of("p1"), &[1, 3]);

        allocator.record_load("p0", 20);
        allocator.record_load("p1", 5);
        allocator.record_load("p0", 10);
        assert_eq!(allocator.load()["p0"], 30);

        let a = allocator.allocate(&policy_names)?;
        assert_eq!(a.slots_of("p0"), &[0, 1, 2]);
        assert_eq!(a.slots_of("p1"), &[3]);
        Ok(())
    }
}
