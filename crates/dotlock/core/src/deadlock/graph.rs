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

//! Graph Builder
//!
//! Derives the directed resource-allocation graph (RAG) and the reduced
//! wait-for graph from a model snapshot. Both derivations are pure
//! functions of the snapshot: nodes and adjacency are keyed by ordered
//! identifiers in flat maps, never by object references, so traversal
//! order is deterministic and copies are cheap.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deadlock::lib::{ProcessId, ResourceId};
use crate::deadlock::model::ModelSnapshot;

/// A node in the resource-allocation graph.
///
/// The derived ordering sorts all process nodes (ascending) before all
/// resource nodes (ascending), which fixes the traversal order used by
/// the cycle detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeId {
    Process(ProcessId),
    Resource(ResourceId),
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Process(id) => write!(f, "{id}"),
            NodeId::Resource(id) => write!(f, "{id}"),
        }
    }
}

/// Edge classification in the resource-allocation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Resource -> process: instances currently held
    Allocation,
    /// Process -> resource: an outstanding, unsatisfied request
    Request,
}

/// A directed edge in the resource-allocation graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
    pub count: u32,
}

/// Directed multigraph over the union of process and resource nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationGraph {
    nodes: BTreeSet<NodeId>,
    adjacency: BTreeMap<NodeId, Vec<GraphEdge>>,
}

impl AllocationGraph {
    /// Build the RAG from a snapshot. Runs in O(P + R + E).
    pub fn build(snapshot: &ModelSnapshot) -> Self {
        let mut nodes = BTreeSet::new();
        for &process in snapshot.processes.keys() {
            nodes.insert(NodeId::Process(process));
        }
        for &resource in snapshot.resources.keys() {
            nodes.insert(NodeId::Resource(resource));
        }

        let mut adjacency: BTreeMap<NodeId, Vec<GraphEdge>> = BTreeMap::new();
        for edge in &snapshot.allocations {
            adjacency.entry(NodeId::Resource(edge.resource)).or_default().push(GraphEdge {
                from: NodeId::Resource(edge.resource),
                to: NodeId::Process(edge.process),
                kind: EdgeKind::Allocation,
                count: edge.count,
            });
        }
        for edge in &snapshot.requests {
            adjacency.entry(NodeId::Process(edge.process)).or_default().push(GraphEdge {
                from: NodeId::Process(edge.process),
                to: NodeId::Resource(edge.resource),
                kind: EdgeKind::Request,
                count: edge.count,
            });
        }
        for edges in adjacency.values_mut() {
            edges.sort_by_key(|edge| edge.to);
        }

        Self { nodes, adjacency }
    }

    /// Nodes in ascending identifier order
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// Outgoing edges of `node` in ascending target order
    pub fn edges_from(&self, node: NodeId) -> &[GraphEdge] {
        self.adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A wait-for relationship between two processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForEdge {
    /// Process that is waiting
    pub waiter: ProcessId,
    /// Process that must release instances for the wait to end
    pub holder: ProcessId,
    /// Resource being waited for
    pub resource: ResourceId,
}

/// Directed graph over process nodes only, derived on demand from the
/// RAG and the availability counts; never stored persistently
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitForGraph {
    adjacency: BTreeMap<ProcessId, Vec<WaitForEdge>>,
}

impl WaitForGraph {
    /// Reduce a snapshot to its wait-for graph.
    ///
    /// A request currently satisfiable from the available pool draws no
    /// edges. An unsatisfiable request draws an edge to each holder
    /// needed to free enough instances, holders taken in ascending
    /// process id; the waiter itself is never a holder (no self-edges).
    pub fn reduce(snapshot: &ModelSnapshot) -> Self {
        let mut adjacency: BTreeMap<ProcessId, Vec<WaitForEdge>> = BTreeMap::new();

        for request in &snapshot.requests {
            let available = snapshot.available(request.resource);
            if available >= request.count {
                continue;
            }
            let mut deficit = request.count - available;

            // snapshot.allocations is sorted by (resource, process), so
            // holders already come out in ascending process id.
            for allocation in snapshot.allocations.iter().filter(|edge| edge.resource == request.resource) {
                if allocation.process == request.process {
                    continue;
                }
                adjacency.entry(request.process).or_default().push(WaitForEdge {
                    waiter: request.process,
                    holder: allocation.process,
                    resource: request.resource,
                });
                deficit = deficit.saturating_sub(allocation.count);
                if deficit == 0 {
                    break;
                }
            }
        }

        for edges in adjacency.values_mut() {
            edges.sort_by_key(|edge| (edge.holder, edge.resource));
        }

        Self { adjacency }
    }

    /// Outgoing wait-for edges of `process` in ascending holder order
    pub fn edges_from(&self, process: ProcessId) -> &[WaitForEdge] {
        self.adjacency.get(&process).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Waiting processes in ascending id order
    pub fn waiters(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    /// Whether any wait-for cycle exists
    pub fn has_cycle(&self) -> bool {
        self.has_cycle_within(None)
    }

    /// Whether a wait-for cycle exists among `members` only (or anywhere,
    /// when `members` is `None`). Used by the resolution engine to check
    /// whether a specific cycle has been broken.
    pub fn has_cycle_within(&self, members: Option<&BTreeSet<ProcessId>>) -> bool {
        let included = |p: ProcessId| members.is_none_or(|set| set.contains(&p));

        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        for process in self.adjacency.keys().copied() {
            if included(process) && !visited.contains(&process) && self.dfs_finds_cycle(process, &included, &mut visited, &mut on_stack) {
                return true;
            }
        }
        false
    }

    fn dfs_finds_cycle(
        &self,
        process: ProcessId,
        included: &impl Fn(ProcessId) -> bool,
        visited: &mut HashSet<ProcessId>,
        on_stack: &mut HashSet<ProcessId>,
    ) -> bool {
        visited.insert(process);
        on_stack.insert(process);

        for edge in self.edges_from(process) {
            if !included(edge.holder) {
                continue;
            }
            if on_stack.contains(&edge.holder) {
                return true;
            }
            if !visited.contains(&edge.holder) && self.dfs_finds_cycle(edge.holder, included, visited, on_stack) {
                return true;
            }
        }

        on_stack.remove(&process);
        false
    }
}
