//! Ordered map from disjoint address intervals to values.
//!
//! Inserting a value erases whatever overlapped its interval, splitting
//! partially covered nodes, and then offers the new node to its neighbours for
//! merging. The rules for splitting and merging values come from a
//! `MergePolicy`, so the same structure serves both segment tables and plain
//! address-extent sets.

use std::collections::BTreeMap;

use crate::core::address_interval::AddressInterval;

/// Rules for merging and splitting values when intervals change.
pub trait MergePolicy<V> {
    /// Attempts to fold `right` into `left`, whose intervals are adjacent.
    /// Returns true if the two should become one node.
    fn merge(
        &self,
        left_range: &AddressInterval,
        left: &mut V,
        right_range: &AddressInterval,
        right: &V,
    ) -> bool;

    /// Splits the value mapped at `range` at `split_point`. `value` keeps the
    /// lower part; the returned value describes `[split_point, range.greatest()]`.
    fn split(&self, range: &AddressInterval, value: &mut V, split_point: u64) -> V;

    /// Discards the part of `value` at and above `split_point`.
    fn truncate(&self, range: &AddressInterval, value: &mut V, split_point: u64);
}

/// Merges adjacent equal values; splitting clones.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMergePolicy;

impl<V: Clone + PartialEq> MergePolicy<V> for DefaultMergePolicy {
    fn merge(&self, _: &AddressInterval, left: &mut V, _: &AddressInterval, right: &V) -> bool {
        *left == *right
    }

    fn split(&self, _: &AddressInterval, value: &mut V, _: u64) -> V {
        value.clone()
    }

    fn truncate(&self, _: &AddressInterval, _: &mut V, _: u64) {}
}

#[derive(Debug, Clone)]
struct Node<V> {
    range: AddressInterval,
    value: V,
}

/// Disjoint intervals mapped to values, keyed by their least address.
#[derive(Debug, Clone)]
pub struct IntervalMap<V, P = DefaultMergePolicy> {
    nodes: BTreeMap<u64, Node<V>>,
    policy: P,
}

impl<V, P: Default> Default for IntervalMap<V, P> {
    fn default() -> Self {
        Self::with_policy(P::default())
    }
}

impl<V, P: Default> IntervalMap<V, P> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<V, P> IntervalMap<V, P> {
    pub fn with_policy(policy: P) -> Self {
        Self {
            nodes: BTreeMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of addresses covered, saturating at `u64::MAX`.
    pub fn size(&self) -> u64 {
        self.nodes
            .values()
            .fold(0u64, |acc, n| acc.saturating_add(n.range.size()))
    }

    /// Smallest interval containing every node, or empty.
    pub fn hull(&self) -> AddressInterval {
        match (self.nodes.values().next(), self.nodes.values().next_back()) {
            (Some(first), Some(last)) => {
                AddressInterval::hull(first.range.least(), last.range.greatest())
            }
            _ => AddressInterval::empty(),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Nodes in ascending address order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&AddressInterval, &V)> + '_ {
        self.nodes.values().map(|n| (&n.range, &n.value))
    }

    /// Mutable access to every value. Changing a value never changes its
    /// interval, and neighbours are not re-merged.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> + '_ {
        self.nodes.values_mut().map(|n| &mut n.value)
    }

    /// The node containing `va`.
    pub fn find(&self, va: u64) -> Option<(&AddressInterval, &V)> {
        self.nodes
            .range(..=va)
            .next_back()
            .filter(|(_, n)| n.range.contains(va))
            .map(|(_, n)| (&n.range, &n.value))
    }

    pub fn find_mut(&mut self, va: u64) -> Option<(AddressInterval, &mut V)> {
        self.nodes
            .range_mut(..=va)
            .next_back()
            .filter(|(_, n)| n.range.contains(va))
            .map(|(_, n)| (n.range, &mut n.value))
    }

    pub fn contains(&self, va: u64) -> bool {
        self.find(va).is_some()
    }

    /// Nodes at or above `va`, starting with the node containing `va` if any.
    pub fn iter_from(&self, va: u64) -> impl Iterator<Item = (&AddressInterval, &V)> + '_ {
        let start = self.find(va).map_or(va, |(range, _)| range.least());
        self.nodes.range(start..).map(|(_, n)| (&n.range, &n.value))
    }

    /// Nodes whose least address is at or below `va`, in descending order.
    pub fn iter_down_from(&self, va: u64) -> impl Iterator<Item = (&AddressInterval, &V)> + '_ {
        self.nodes.range(..=va).rev().map(|(_, n)| (&n.range, &n.value))
    }

    /// Nodes overlapping `range`, in ascending order.
    pub fn overlapping(
        &self,
        range: AddressInterval,
    ) -> impl Iterator<Item = (&AddressInterval, &V)> + '_ {
        let start = if range.is_empty() { 0 } else { range.least() };
        self.iter_from(start)
            .take_while(move |(r, _)| !range.is_empty() && r.least() <= range.greatest())
    }

    pub fn overlaps(&self, range: AddressInterval) -> bool {
        self.overlapping(range).next().is_some()
    }

    /// Removes nodes for which `keep` returns false. Returns how many were removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&AddressInterval, &V) -> bool,
    {
        let before = self.nodes.len();
        self.nodes.retain(|_, n| keep(&n.range, &n.value));
        before - self.nodes.len()
    }

    /// The largest unmapped interval that begins at the first unmapped address
    /// at or above `va`.
    pub fn free_from(&self, va: u64) -> Option<AddressInterval> {
        let mut va = va;
        while let Some((range, _)) = self.find(va) {
            if range.greatest() == u64::MAX {
                return None;
            }
            va = range.greatest() + 1;
        }
        let hi = self
            .nodes
            .range(va..)
            .next()
            .map_or(u64::MAX, |(&least, _)| least - 1);
        Some(AddressInterval::hull(va, hi))
    }

    /// The largest unmapped interval that ends at the last unmapped address at
    /// or below `va`.
    pub fn free_down_from(&self, va: u64) -> Option<AddressInterval> {
        let mut va = va;
        while let Some((range, _)) = self.find(va) {
            if range.least() == 0 {
                return None;
            }
            va = range.least() - 1;
        }
        let lo = self
            .nodes
            .range(..va)
            .next_back()
            .map_or(0, |(_, n)| n.range.greatest() + 1);
        Some(AddressInterval::hull(lo, va))
    }
}

impl<V, P: MergePolicy<V>> IntervalMap<V, P> {
    /// Maps `range` to `value`, replacing anything previously there.
    pub fn insert(&mut self, range: AddressInterval, value: V) {
        if range.is_empty() {
            return;
        }
        self.erase(range);
        self.nodes.insert(range.least(), Node { range, value });
        let key = self.merge_right(range.least());
        self.merge_left(key);
    }

    /// Unmaps every address in `range`, splitting nodes that straddle its ends.
    pub fn erase(&mut self, range: AddressInterval) {
        if range.is_empty() {
            return;
        }
        let keys: Vec<u64> = self
            .overlapping(range)
            .map(|(r, _)| r.least())
            .collect();
        for key in keys {
            let Some(Node {
                range: node_range,
                mut value,
            }) = self.nodes.remove(&key)
            else {
                continue;
            };
            if node_range.greatest() > range.greatest() {
                let split_point = range.greatest() + 1;
                let right = self.policy.split(&node_range, &mut value, split_point);
                let right_range = AddressInterval::hull(split_point, node_range.greatest());
                self.nodes.insert(
                    split_point,
                    Node {
                        range: right_range,
                        value: right,
                    },
                );
            }
            if node_range.least() < range.least() {
                let kept = AddressInterval::hull(
                    node_range.least(),
                    range.greatest().min(node_range.greatest()),
                );
                self.policy.truncate(&kept, &mut value, range.least());
                self.nodes.insert(
                    node_range.least(),
                    Node {
                        range: AddressInterval::hull(node_range.least(), range.least() - 1),
                        value,
                    },
                );
            }
        }
    }

    /// Folds the node after `key` into it when the policy agrees. Returns `key`.
    fn merge_right(&mut self, key: u64) -> u64 {
        let Some(left) = self.nodes.get(&key) else {
            return key;
        };
        if left.range.greatest() == u64::MAX {
            return key;
        }
        let next_key = left.range.greatest() + 1;
        let Some(right) = self.nodes.remove(&next_key) else {
            return key;
        };
        let merged = match self.nodes.get_mut(&key) {
            Some(left) => {
                if self
                    .policy
                    .merge(&left.range, &mut left.value, &right.range, &right.value)
                {
                    left.range = left.range.join(&right.range);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if !merged {
            self.nodes.insert(next_key, right);
        }
        key
    }

    /// Folds the node at `key` into its left neighbour when the policy agrees.
    /// Returns the key of the node that now covers `key`.
    fn merge_left(&mut self, key: u64) -> u64 {
        if key == 0 {
            return key;
        }
        let Some((&prev_key, prev)) = self.nodes.range(..key).next_back() else {
            return key;
        };
        if prev.range.greatest() != key - 1 {
            return key;
        }
        let Some(right) = self.nodes.remove(&key) else {
            return key;
        };
        let merged = match self.nodes.get_mut(&prev_key) {
            Some(left) => {
                if self
                    .policy
                    .merge(&left.range, &mut left.value, &right.range, &right.value)
                {
                    left.range = left.range.join(&right.range);
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if merged {
            prev_key
        } else {
            self.nodes.insert(key, right);
            key
        }
    }
}
