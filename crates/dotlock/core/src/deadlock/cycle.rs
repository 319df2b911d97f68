// Dotlock
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Cycle Detector
//!
//! Depth-first cycle detection over the resource-allocation graph. A
//! back-edge to a node on the recursion stack yields a cycle, recorded
//! as the stack slice from that node to the current node. Nodes and
//! outgoing edges are visited in ascending identifier order, so results
//! are deterministic and repeat runs on an unchanged snapshot return
//! equal cycle lists.
//!
//! For multi-instance resources a cycle in the graph is necessary but
//! not sufficient for deadlock: the detector additionally checks that no
//! release by a process outside the cycle could satisfy the blocking
//! requests, and suppresses the cycle otherwise.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deadlock::graph::{AllocationGraph, NodeId};
use crate::deadlock::lib::{ProcessId, ResourceId};
use crate::deadlock::model::ModelSnapshot;

/// An ordered sequence of nodes forming a closed path in the
/// resource-allocation graph. The first node is not repeated at the
/// tail; process and resource nodes alternate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    nodes: Vec<NodeId>,
}

impl Cycle {
    pub(crate) fn new(nodes: Vec<NodeId>) -> Self {
        Self { nodes }
    }

    /// Nodes in cycle order, starting at the back-edge target
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }

    /// Process members in cycle order
    pub fn processes(&self) -> Vec<ProcessId> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                NodeId::Process(id) => Some(*id),
                NodeId::Resource(_) => None,
            })
            .collect()
    }

    /// Resource members in cycle order
    pub fn resources(&self) -> Vec<ResourceId> {
        self.nodes
            .iter()
            .filter_map(|node| match node {
                NodeId::Resource(id) => Some(*id),
                NodeId::Process(_) => None,
            })
            .collect()
    }

    /// The same cycle rotated to start at its smallest node. Two
    /// rotations of one closed path compare equal under this form.
    pub fn rotated_min(&self) -> Cycle {
        if self.nodes.is_empty() {
            return self.clone();
        }
        let min_index = self
            .nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, node)| **node)
            .map(|(index, _)| index)
            .expect("non-empty cycle");
        let mut nodes = self.nodes.clone();
        nodes.rotate_left(min_index);
        Cycle { nodes }
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{node} -> ")?;
        }
        match self.nodes.first() {
            Some(first) => write!(f, "{first}"),
            None => write!(f, "(empty)"),
        }
    }
}

/// Detect all deadlock cycles in the graph.
///
/// Returns an empty list iff the graph is acyclic. Each traversal runs
/// in O(P + E); a node fully explored once is never re-entered.
pub fn detect_cycles(graph: &AllocationGraph, snapshot: &ModelSnapshot) -> Vec<Cycle> {
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();
    let mut path = Vec::new();
    let mut cycles = Vec::new();

    for node in graph.nodes() {
        if !visited.contains(&node) {
            dfs_collect_cycles(graph, node, &mut visited, &mut on_stack, &mut path, &mut cycles);
        }
    }

    cycles.retain(|cycle| !externally_breakable(cycle, snapshot));
    cycles
}

fn dfs_collect_cycles(
    graph: &AllocationGraph,
    node: NodeId,
    visited: &mut HashSet<NodeId>,
    on_stack: &mut HashSet<NodeId>,
    path: &mut Vec<NodeId>,
    cycles: &mut Vec<Cycle>,
) {
    visited.insert(node);
    on_stack.insert(node);
    path.push(node);

    for edge in graph.edges_from(node) {
        if !visited.contains(&edge.to) {
            dfs_collect_cycles(graph, edge.to, visited, on_stack, path, cycles);
        } else if on_stack.contains(&edge.to) {
            if let Some(start) = path.iter().position(|&n| n == edge.to) {
                cycles.push(Cycle::new(path[start..].to_vec()));
            }
        }
    }

    path.pop();
    on_stack.remove(&node);
}

/// Whether a release by some process outside the cycle could satisfy the
/// blocking requests. Holds for a resource when the instances requested
/// by cycle members do not exceed the instances held outside the cycle
/// plus the available pool.
fn externally_breakable(cycle: &Cycle, snapshot: &ModelSnapshot) -> bool {
    let members: BTreeSet<ProcessId> = cycle.processes().into_iter().collect();

    cycle.resources().iter().any(|&resource| {
        let requested_by_members: u32 = snapshot
            .requests
            .iter()
            .filter(|edge| edge.resource == resource && members.contains(&edge.process))
            .map(|edge| edge.count)
            .sum();
        let held_outside: u32 = snapshot
            .allocations
            .iter()
            .filter(|edge| edge.resource == resource && !members.contains(&edge.process))
            .map(|edge| edge.count)
            .sum();
        requested_by_members <= held_outside + snapshot.available(resource)
    })
}
