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

//! Resource Model
//!
//! Owns the catalog of processes and resources and the current
//! allocation/request relation between them. All other components read
//! immutable snapshots; mutation happens here, one operation at a time,
//! and every failed operation leaves the model untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::deadlock::lib::{DeadlockError, DeadlockResult, ProcessId, ProcessStatus, ResourceId};

/// Per-resource instance accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Total instance count, fixed at registration
    pub total: u32,
    /// Instances not currently allocated to any process
    pub available: u32,
}

/// An allocation edge (resource -> process) with a held instance count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEdge {
    pub resource: ResourceId,
    pub process: ProcessId,
    pub count: u32,
}

/// An outstanding request edge (process -> resource)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEdge {
    pub process: ProcessId,
    pub resource: ResourceId,
    pub count: u32,
    /// Creation sequence number; lower means requested earlier
    pub seq: u64,
}

/// Outcome of a `request_resource` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The request was satisfied immediately
    Granted,
    /// The request was recorded as an outstanding request edge
    Queued,
}

#[derive(Debug, Clone, Copy)]
struct RequestEntry {
    count: u32,
    seq: u64,
}

/// Immutable copy of the model state, consumed by the graph builder and
/// rendering collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub processes: BTreeMap<ProcessId, ProcessStatus>,
    pub resources: BTreeMap<ResourceId, ResourceState>,
    /// Allocation edges sorted by (resource, process)
    pub allocations: Vec<AllocationEdge>,
    /// Request edges in FIFO creation order
    pub requests: Vec<RequestEdge>,
}

impl ModelSnapshot {
    /// Instances of `resource` currently held by `process`
    pub fn held(&self, resource: ResourceId, process: ProcessId) -> u32 {
        self.allocations
            .iter()
            .find(|edge| edge.resource == resource && edge.process == process)
            .map(|edge| edge.count)
            .unwrap_or(0)
    }

    /// Instances of `resource` not allocated to any process
    pub fn available(&self, resource: ResourceId) -> u32 {
        self.resources.get(&resource).map(|state| state.available).unwrap_or(0)
    }

    /// Total instances held by `process` across all resources
    pub fn total_held(&self, process: ProcessId) -> u32 {
        self.allocations.iter().filter(|edge| edge.process == process).map(|edge| edge.count).sum()
    }

    /// Number of outstanding request edges held by `process`
    pub fn outstanding_requests(&self, process: ProcessId) -> usize {
        self.requests.iter().filter(|edge| edge.process == process).count()
    }

    /// Verify that `available + allocated == total` for every resource
    pub fn conservation_holds(&self) -> bool {
        self.resources.iter().all(|(id, state)| {
            let allocated: u32 = self.allocations.iter().filter(|edge| edge.resource == *id).map(|edge| edge.count).sum();
            state.available + allocated == state.total
        })
    }
}

/// The single mutable owner of allocation state
#[derive(Debug, Default)]
pub struct ResourceModel {
    processes: BTreeMap<ProcessId, ProcessStatus>,
    resources: BTreeMap<ResourceId, ResourceState>,
    /// Allocation edges, one per (resource, process) pair
    allocations: BTreeMap<(ResourceId, ProcessId), u32>,
    /// Request edges, one per (process, resource) pair
    requests: BTreeMap<(ProcessId, ResourceId), RequestEntry>,
    next_seq: u64,
}

impl ResourceModel {
    /// Create an empty model
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new process; it starts in `Running` state
    pub fn register_process(&mut self, id: ProcessId) -> DeadlockResult<()> {
        if self.processes.contains_key(&id) {
            return Err(DeadlockError::DuplicateId(id.to_string()));
        }
        self.processes.insert(id, ProcessStatus::Running);
        Ok(())
    }

    /// Register a new resource with a fixed total instance count
    pub fn register_resource(&mut self, id: ResourceId, total: u32) -> DeadlockResult<()> {
        if total == 0 {
            return Err(DeadlockError::InvalidArgument(format!("resource {id} must have at least one instance")));
        }
        if self.resources.contains_key(&id) {
            return Err(DeadlockError::DuplicateId(id.to_string()));
        }
        self.resources.insert(id, ResourceState { total, available: total });
        Ok(())
    }

    /// Request `count` instances of `resource` for `process`.
    ///
    /// Grants immediately when enough instances are available, otherwise
    /// records (or merges into) an outstanding request edge and marks the
    /// process `Waiting`. Never blocks the caller.
    pub fn request_resource(&mut self, process: ProcessId, resource: ResourceId, count: u32) -> DeadlockResult<RequestOutcome> {
        let status = self.require_process(process)?;
        self.require_resource(resource)?;
        if count == 0 {
            return Err(DeadlockError::InvalidArgument(format!("{process} requested zero instances of {resource}")));
        }
        if status == ProcessStatus::Terminated {
            return Err(DeadlockError::InvalidState(format!("{process} is terminated and cannot request resources")));
        }

        let state = self.resources.get_mut(&resource).expect("resource checked above");
        if state.available >= count {
            state.available -= count;
            *self.allocations.entry((resource, process)).or_insert(0) += count;
            return Ok(RequestOutcome::Granted);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.requests
            .entry((process, resource))
            .and_modify(|entry| entry.count += count)
            .or_insert(RequestEntry { count, seq });
        self.processes.insert(process, ProcessStatus::Waiting);
        Ok(RequestOutcome::Queued)
    }

    /// Release `count` held instances of `resource` from `process`, then
    /// promote outstanding requests for that resource in FIFO order.
    ///
    /// Returns the processes whose requests were fully satisfied.
    pub fn release_resource(&mut self, process: ProcessId, resource: ResourceId, count: u32) -> DeadlockResult<Vec<ProcessId>> {
        self.require_process(process)?;
        self.require_resource(resource)?;
        if count == 0 {
            return Err(DeadlockError::InvalidArgument(format!("{process} released zero instances of {resource}")));
        }

        let held = match self.allocations.get(&(resource, process)) {
            Some(&held) => held,
            None => {
                return Err(DeadlockError::InvalidState(format!("{process} holds no instances of {resource}")));
            }
        };
        if count > held {
            return Err(DeadlockError::InvalidState(format!("{process} holds {held} instances of {resource}, cannot release {count}")));
        }

        if count == held {
            self.allocations.remove(&(resource, process));
        } else {
            self.allocations.insert((resource, process), held - count);
        }
        self.resources.get_mut(&resource).expect("resource checked above").available += count;

        Ok(self.promote_waiters(resource))
    }

    /// Withdraw a pending request edge.
    ///
    /// The process returns to `Running` when no other pending requests
    /// remain for it.
    pub fn cancel_request(&mut self, process: ProcessId, resource: ResourceId) -> DeadlockResult<()> {
        self.require_process(process)?;
        self.require_resource(resource)?;
        if self.requests.remove(&(process, resource)).is_none() {
            return Err(DeadlockError::NotFound(format!("no pending request from {process} for {resource}")));
        }
        self.refresh_status(process);
        Ok(())
    }

    /// Remove a process that neither holds allocations nor has pending
    /// requests
    pub fn deregister_process(&mut self, id: ProcessId) -> DeadlockResult<()> {
        self.require_process(id)?;
        if self.allocations.keys().any(|(_, process)| *process == id) {
            return Err(DeadlockError::InvalidState(format!("{id} still holds allocated instances")));
        }
        if self.requests.keys().any(|(process, _)| *process == id) {
            return Err(DeadlockError::InvalidState(format!("{id} still has pending requests")));
        }
        self.processes.remove(&id);
        Ok(())
    }

    /// Reset the model to empty; used when loading a scenario
    pub fn clear(&mut self) {
        self.processes.clear();
        self.resources.clear();
        self.allocations.clear();
        self.requests.clear();
        self.next_seq = 0;
    }

    /// Take an immutable, side-effect-free copy of the current state
    pub fn snapshot(&self) -> ModelSnapshot {
        let mut requests: Vec<RequestEdge> = self
            .requests
            .iter()
            .map(|(&(process, resource), entry)| RequestEdge {
                process,
                resource,
                count: entry.count,
                seq: entry.seq,
            })
            .collect();
        requests.sort_by_key(|edge| edge.seq);

        ModelSnapshot {
            processes: self.processes.clone(),
            resources: self.resources.clone(),
            allocations: self
                .allocations
                .iter()
                .map(|(&(resource, process), &count)| AllocationEdge { resource, process, count })
                .collect(),
            requests,
        }
    }

    /// Current status of a process, if registered
    pub fn process_status(&self, id: ProcessId) -> Option<ProcessStatus> {
        self.processes.get(&id).copied()
    }

    /// Preempt `count` instances of `resource` from `process` and return
    /// them to the pool, promoting waiters afterwards.
    ///
    /// Applied by the resolution engine as part of a plan.
    pub fn preempt(&mut self, resource: ResourceId, process: ProcessId, count: u32) -> DeadlockResult<Vec<ProcessId>> {
        self.release_resource(process, resource, count)
    }

    /// Terminate a process: drop its request edges, release everything it
    /// holds back to the pool and promote waiters per resource.
    ///
    /// Applied by the resolution engine as part of a plan.
    pub fn terminate(&mut self, process: ProcessId) -> DeadlockResult<Vec<ProcessId>> {
        self.require_process(process)?;

        let pending: Vec<(ProcessId, ResourceId)> = self.requests.keys().filter(|(p, _)| *p == process).copied().collect();
        for key in pending {
            self.requests.remove(&key);
        }

        let held: Vec<(ResourceId, u32)> = self
            .allocations
            .iter()
            .filter(|((_, p), _)| *p == process)
            .map(|(&(resource, _), &count)| (resource, count))
            .collect();

        let mut promoted = Vec::new();
        for (resource, count) in held {
            self.allocations.remove(&(resource, process));
            self.resources.get_mut(&resource).expect("held resource must be registered").available += count;
            promoted.extend(self.promote_waiters(resource));
        }

        self.processes.insert(process, ProcessStatus::Terminated);
        Ok(promoted)
    }

    fn require_process(&self, id: ProcessId) -> DeadlockResult<ProcessStatus> {
        self.processes.get(&id).copied().ok_or_else(|| DeadlockError::UnknownEntity(id.to_string()))
    }

    fn require_resource(&self, id: ResourceId) -> DeadlockResult<ResourceState> {
        self.resources.get(&id).copied().ok_or_else(|| DeadlockError::UnknownEntity(id.to_string()))
    }

    /// Promote outstanding requests for `resource` in strict FIFO order.
    ///
    /// Promotion stops at the first request that cannot be fully
    /// satisfied; partial grants are never made.
    fn promote_waiters(&mut self, resource: ResourceId) -> Vec<ProcessId> {
        let mut waiters: Vec<(ProcessId, RequestEntry)> = self
            .requests
            .iter()
            .filter(|((_, r), _)| *r == resource)
            .map(|(&(process, _), &entry)| (process, entry))
            .collect();
        waiters.sort_by_key(|(_, entry)| entry.seq);

        let mut promoted = Vec::new();
        for (process, entry) in waiters {
            let available = self.resources.get(&resource).expect("promoting on registered resource").available;
            if available < entry.count {
                break;
            }
            self.resources.get_mut(&resource).expect("promoting on registered resource").available -= entry.count;
            *self.allocations.entry((resource, process)).or_insert(0) += entry.count;
            self.requests.remove(&(process, resource));
            self.refresh_status(process);
            promoted.push(process);
        }
        promoted
    }

    /// Recompute `Running`/`Waiting` from the pending request edges
    fn refresh_status(&mut self, process: ProcessId) {
        if self.processes.get(&process) == Some(&ProcessStatus::Terminated) {
            return;
        }
        let waiting = self.requests.keys().any(|(p, _)| *p == process);
        self.processes.insert(process, if waiting { ProcessStatus::Waiting } else { ProcessStatus::Running });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model_with(processes: u32, resources: u32, instances: u32) -> ResourceModel {
        let mut model = ResourceModel::new();
        for p in 1..=processes {
            model.register_process(ProcessId(p)).unwrap();
        }
        for r in 1..=resources {
            model.register_resource(ResourceId(r), instances).unwrap();
        }
        model
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut model = ResourceModel::new();
        model.register_process(ProcessId(1)).unwrap();
        assert!(matches!(model.register_process(ProcessId(1)), Err(DeadlockError::DuplicateId(_))));

        model.register_resource(ResourceId(1), 2).unwrap();
        assert!(matches!(model.register_resource(ResourceId(1), 1), Err(DeadlockError::DuplicateId(_))));
    }

    #[test]
    fn test_register_resource_requires_instances() {
        let mut model = ResourceModel::new();
        assert!(matches!(model.register_resource(ResourceId(1), 0), Err(DeadlockError::InvalidArgument(_))));
    }

    #[test]
    fn test_request_grants_when_available() {
        let mut model = model_with(1, 1, 2);
        let outcome = model.request_resource(ProcessId(1), ResourceId(1), 2).unwrap();
        assert_eq!(outcome, RequestOutcome::Granted);

        let snapshot = model.snapshot();
        assert_eq!(snapshot.available(ResourceId(1)), 0);
        assert_eq!(snapshot.held(ResourceId(1), ProcessId(1)), 2);
        assert_eq!(snapshot.processes[&ProcessId(1)], ProcessStatus::Running);
        assert!(snapshot.requests.is_empty());
    }

    #[test]
    fn test_request_queues_when_unavailable() {
        let mut model = model_with(2, 1, 1);
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        let outcome = model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();
        assert_eq!(outcome, RequestOutcome::Queued);

        let snapshot = model.snapshot();
        assert_eq!(snapshot.processes[&ProcessId(2)], ProcessStatus::Waiting);
        assert_eq!(snapshot.requests.len(), 1);
        assert_eq!(snapshot.requests[0].process, ProcessId(2));
    }

    #[test]
    fn test_request_edges_merge_by_summing() {
        let mut model = model_with(2, 1, 1);
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 2).unwrap();

        let snapshot = model.snapshot();
        assert_eq!(snapshot.requests.len(), 1);
        assert_eq!(snapshot.requests[0].count, 3);
    }

    #[test]
    fn test_allocation_edges_merge() {
        let mut model = model_with(1, 1, 3);
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(1), 2).unwrap();

        let snapshot = model.snapshot();
        assert_eq!(snapshot.allocations.len(), 1);
        assert_eq!(snapshot.held(ResourceId(1), ProcessId(1)), 3);
    }

    #[test]
    fn test_request_unknown_entities() {
        let mut model = model_with(1, 1, 1);
        assert!(matches!(
            model.request_resource(ProcessId(9), ResourceId(1), 1),
            Err(DeadlockError::UnknownEntity(_))
        ));
        assert!(matches!(
            model.request_resource(ProcessId(1), ResourceId(9), 1),
            Err(DeadlockError::UnknownEntity(_))
        ));
        assert!(matches!(
            model.request_resource(ProcessId(1), ResourceId(1), 0),
            Err(DeadlockError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_release_validates_held_instances() {
        let mut model = model_with(1, 1, 2);
        assert!(matches!(
            model.release_resource(ProcessId(1), ResourceId(1), 1),
            Err(DeadlockError::InvalidState(_))
        ));

        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        assert!(matches!(
            model.release_resource(ProcessId(1), ResourceId(1), 2),
            Err(DeadlockError::InvalidState(_))
        ));
    }

    #[test]
    fn test_release_promotes_fifo() {
        // Three waiters against one freed instance: earliest request wins.
        let mut model = model_with(4, 1, 1);
        model.request_resource(ProcessId(4), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(3), ResourceId(1), 1).unwrap();

        let promoted = model.release_resource(ProcessId(4), ResourceId(1), 1).unwrap();
        assert_eq!(promoted, vec![ProcessId(1)]);

        let snapshot = model.snapshot();
        assert_eq!(snapshot.processes[&ProcessId(1)], ProcessStatus::Running);
        assert_eq!(snapshot.processes[&ProcessId(2)], ProcessStatus::Waiting);
        assert_eq!(snapshot.processes[&ProcessId(3)], ProcessStatus::Waiting);
        assert_eq!(snapshot.held(ResourceId(1), ProcessId(1)), 1);
    }

    #[test]
    fn test_promotion_stops_at_unsatisfiable_head() {
        // Head of the queue needs two instances; only one is freed. The
        // later single-instance request must not jump the queue.
        let mut model = model_with(3, 1, 2);
        model.request_resource(ProcessId(3), ResourceId(1), 2).unwrap();
        model.request_resource(ProcessId(1), ResourceId(1), 2).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();

        let promoted = model.release_resource(ProcessId(3), ResourceId(1), 1).unwrap();
        assert!(promoted.is_empty());

        let snapshot = model.snapshot();
        assert_eq!(snapshot.available(ResourceId(1)), 1);
        assert_eq!(snapshot.processes[&ProcessId(2)], ProcessStatus::Waiting);
    }

    #[test]
    fn test_oversize_request_waits_without_violating_invariants() {
        let mut model = model_with(1, 1, 2);
        let outcome = model.request_resource(ProcessId(1), ResourceId(1), 5).unwrap();
        assert_eq!(outcome, RequestOutcome::Queued);

        let snapshot = model.snapshot();
        assert!(snapshot.conservation_holds());
        assert_eq!(snapshot.processes[&ProcessId(1)], ProcessStatus::Waiting);

        model.cancel_request(ProcessId(1), ResourceId(1)).unwrap();
        assert_eq!(model.process_status(ProcessId(1)), Some(ProcessStatus::Running));
    }

    #[test]
    fn test_cancel_request_not_found() {
        let mut model = model_with(1, 1, 1);
        assert!(matches!(
            model.cancel_request(ProcessId(1), ResourceId(1)),
            Err(DeadlockError::NotFound(_))
        ));
    }

    #[test]
    fn test_cancel_keeps_waiting_with_other_requests() {
        let mut model = model_with(2, 2, 1);
        model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(2), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(2), 1).unwrap();

        model.cancel_request(ProcessId(1), ResourceId(1)).unwrap();
        assert_eq!(model.process_status(ProcessId(1)), Some(ProcessStatus::Waiting));

        model.cancel_request(ProcessId(1), ResourceId(2)).unwrap();
        assert_eq!(model.process_status(ProcessId(1)), Some(ProcessStatus::Running));
    }

    #[test]
    fn test_terminate_releases_and_promotes() {
        let mut model = model_with(2, 2, 1);
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(2), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();

        let promoted = model.terminate(ProcessId(1)).unwrap();
        assert_eq!(promoted, vec![ProcessId(2)]);
        assert_eq!(model.process_status(ProcessId(1)), Some(ProcessStatus::Terminated));

        let snapshot = model.snapshot();
        assert_eq!(snapshot.held(ResourceId(1), ProcessId(2)), 1);
        assert_eq!(snapshot.available(ResourceId(2)), 1);
        assert_eq!(snapshot.total_held(ProcessId(1)), 0);
        assert!(snapshot.conservation_holds());
    }

    #[test]
    fn test_terminated_process_cannot_request() {
        let mut model = model_with(1, 1, 1);
        model.terminate(ProcessId(1)).unwrap();
        assert!(matches!(
            model.request_resource(ProcessId(1), ResourceId(1), 1),
            Err(DeadlockError::InvalidState(_))
        ));
    }

    #[test]
    fn test_deregister_guards() {
        let mut model = model_with(2, 1, 1);
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();

        assert!(matches!(model.deregister_process(ProcessId(1)), Err(DeadlockError::InvalidState(_))));
        assert!(matches!(model.deregister_process(ProcessId(2)), Err(DeadlockError::InvalidState(_))));

        model.cancel_request(ProcessId(2), ResourceId(1)).unwrap();
        model.deregister_process(ProcessId(2)).unwrap();
        assert_eq!(model.process_status(ProcessId(2)), None);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut model = model_with(1, 1, 1);
        let before = model.snapshot();
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        let after = model.snapshot();
        assert_ne!(before, after);
        assert!(before.allocations.is_empty());
    }

    proptest! {
        #[test]
        fn conservation_holds_under_arbitrary_operations(
            ops in proptest::collection::vec((0u8..3, 1u32..4, 1u32..4, 1u32..4), 0..50)
        ) {
            let mut model = model_with(3, 3, 2);
            for (kind, p, r, count) in ops {
                let process = ProcessId(p);
                let resource = ResourceId(r);
                let _ = match kind {
                    0 => model.request_resource(process, resource, count).map(|_| ()),
                    1 => model.release_resource(process, resource, count).map(|_| ()),
                    _ => model.cancel_request(process, resource),
                };
                prop_assert!(model.snapshot().conservation_holds());
            }
        }
    }
}
