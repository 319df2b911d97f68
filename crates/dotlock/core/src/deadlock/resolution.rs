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

//! Resolution Engine
//!
//! Given detected cycles and the resource model, selects a resolution
//! strategy and produces an ordered plan of preemption/termination
//! actions. Actions apply to the model one at a time; after each one the
//! wait-for graph is recomputed and the pass stops early once the cycle
//! is broken. A final detection run confirms clearance.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::deadlock::cycle::{Cycle, detect_cycles};
use crate::deadlock::graph::{AllocationGraph, WaitForGraph};
use crate::deadlock::lib::{DeadlockError, DeadlockResult, ProcessId, ResourceId};
use crate::deadlock::model::{ModelSnapshot, ResourceModel};

/// Order in which resolution tactics are attempted per cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// Try a minimum-cost preemption first, fall back to termination
    #[default]
    PreemptThenTerminate,
    /// Only preempt; never terminate a process
    PreemptOnly,
    /// Always terminate a victim, never preempt
    TerminateOnly,
}

/// A single step of a resolution plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionAction {
    /// Take `count` instances of `resource` away from `from`
    Preempt { resource: ResourceId, from: ProcessId, count: u32 },
    /// Abort the process and release everything it holds
    Terminate { process: ProcessId },
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionAction::Preempt { resource, from, count } => {
                write!(f, "preempt {count} instance(s) of {resource} from {from}")
            }
            ResolutionAction::Terminate { process } => write!(f, "terminate {process}"),
        }
    }
}

/// Ordered sequence of actions applied to the model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub actions: Vec<ResolutionAction>,
}

/// Result of a resolution pass: the actions taken and the state they
/// left behind, for display by collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub plan: ResolutionPlan,
    pub snapshot: ModelSnapshot,
}

/// Selects victims and applies resolution plans to the resource model
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionEngine {
    strategy: ResolutionStrategy,
}

impl ResolutionEngine {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Resolve the given cycles against the model.
    ///
    /// Fails with `NoDeadlock` when `cycles` is empty and with
    /// `ResolutionFailed` when cycles remain after the strategy is
    /// exhausted; applied actions are kept in the model either way, so
    /// the caller can re-run detection and resolve the remainder.
    pub fn resolve(&self, cycles: &[Cycle], model: &mut ResourceModel) -> DeadlockResult<ResolutionOutcome> {
        if cycles.is_empty() {
            return Err(DeadlockError::NoDeadlock);
        }

        let mut plan = ResolutionPlan::default();

        for cycle in cycles {
            let members: BTreeSet<ProcessId> = cycle.processes().into_iter().collect();
            if cycle_broken(&model.snapshot(), &members) {
                debug!(cycle = %cycle, "cycle already broken, skipping");
                continue;
            }

            if self.strategy != ResolutionStrategy::TerminateOnly {
                if let Some(action) = choose_preemption(&model.snapshot(), cycle) {
                    apply(model, action)?;
                    info!(action = %action, "applied preemption");
                    plan.actions.push(action);
                    if cycle_broken(&model.snapshot(), &members) {
                        continue;
                    }
                }
            }

            if self.strategy != ResolutionStrategy::PreemptOnly {
                let victim = choose_termination_victim(&model.snapshot(), &members);
                let action = ResolutionAction::Terminate { process: victim };
                apply(model, action)?;
                info!(action = %action, "applied termination");
                plan.actions.push(action);
            }
        }

        let snapshot = model.snapshot();
        let remaining = detect_cycles(&AllocationGraph::build(&snapshot), &snapshot);
        if !remaining.is_empty() {
            return Err(DeadlockError::ResolutionFailed(format!(
                "{} cycle(s) remain after applying {} action(s)",
                remaining.len(),
                plan.actions.len()
            )));
        }

        Ok(ResolutionOutcome { plan, snapshot })
    }
}

fn apply(model: &mut ResourceModel, action: ResolutionAction) -> DeadlockResult<()> {
    match action {
        ResolutionAction::Preempt { resource, from, count } => model.preempt(resource, from, count).map(|_| ()),
        ResolutionAction::Terminate { process } => model.terminate(process).map(|_| ()),
    }
}

fn cycle_broken(snapshot: &ModelSnapshot, members: &BTreeSet<ProcessId>) -> bool {
    !WaitForGraph::reduce(snapshot).has_cycle_within(Some(members))
}

/// Find the minimum-cost preemption for a cycle, if one exists: a cycle
/// member holding enough instances of a cycle resource that releasing
/// them satisfies the blocking request. Candidates are ranked by the
/// holder's total held instances, then lowest process id, then smallest
/// preempted count.
fn choose_preemption(snapshot: &ModelSnapshot, cycle: &Cycle) -> Option<ResolutionAction> {
    let members: BTreeSet<ProcessId> = cycle.processes().into_iter().collect();
    let mut candidates: Vec<(u32, ProcessId, u32, ResourceId)> = Vec::new();

    for &resource in &cycle.resources() {
        let available = snapshot.available(resource);
        for request in snapshot.requests.iter().filter(|edge| edge.resource == resource && members.contains(&edge.process)) {
            if request.count <= available {
                continue;
            }
            let deficit = request.count - available;
            for &holder in &members {
                if holder == request.process {
                    continue;
                }
                if snapshot.held(resource, holder) >= deficit {
                    candidates.push((snapshot.total_held(holder), holder, deficit, resource));
                }
            }
        }
    }

    candidates
        .into_iter()
        .min()
        .map(|(_, from, count, resource)| ResolutionAction::Preempt { resource, from, count })
}

/// Termination victim: the cycle member with the fewest outstanding
/// requests, ties broken by lowest process id
fn choose_termination_victim(snapshot: &ModelSnapshot, members: &BTreeSet<ProcessId>) -> ProcessId {
    members
        .iter()
        .copied()
        .min_by_key(|&process| (snapshot.outstanding_requests(process), process))
        .expect("cycle has at least two process members")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadlock::lib::ProcessStatus;

    fn two_process_deadlock() -> ResourceModel {
        let mut model = ResourceModel::new();
        model.register_process(ProcessId(1)).unwrap();
        model.register_process(ProcessId(2)).unwrap();
        model.register_resource(ResourceId(1), 1).unwrap();
        model.register_resource(ResourceId(2), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(2), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(2), 1).unwrap();
        model
    }

    fn detect(model: &ResourceModel) -> Vec<Cycle> {
        let snapshot = model.snapshot();
        detect_cycles(&AllocationGraph::build(&snapshot), &snapshot)
    }

    #[test]
    fn test_resolve_empty_is_no_deadlock() {
        let mut model = ResourceModel::new();
        let engine = ResolutionEngine::default();
        assert!(matches!(engine.resolve(&[], &mut model), Err(DeadlockError::NoDeadlock)));
    }

    #[test]
    fn test_two_process_deadlock_resolved_by_single_preemption() {
        let mut model = two_process_deadlock();
        let cycles = detect(&model);
        assert_eq!(cycles.len(), 1);

        let outcome = ResolutionEngine::default().resolve(&cycles, &mut model).unwrap();
        assert_eq!(
            outcome.plan.actions,
            vec![ResolutionAction::Preempt {
                resource: ResourceId(1),
                from: ProcessId(1),
                count: 1,
            }]
        );
        assert!(outcome.snapshot.conservation_holds());
        assert!(detect(&model).is_empty());
    }

    #[test]
    fn test_terminate_only_strategy() {
        let mut model = two_process_deadlock();
        let cycles = detect(&model);

        let outcome = ResolutionEngine::new(ResolutionStrategy::TerminateOnly).resolve(&cycles, &mut model).unwrap();
        assert_eq!(outcome.plan.actions, vec![ResolutionAction::Terminate { process: ProcessId(1) }]);
        assert_eq!(model.process_status(ProcessId(1)), Some(ProcessStatus::Terminated));
        assert!(detect(&model).is_empty());
    }

    #[test]
    fn test_termination_fallback_when_no_preemption_suffices() {
        // Every cycle holder owns a single instance while the blocking
        // requests need two, so no single preemption can satisfy them.
        let mut model = ResourceModel::new();
        for id in 1..=5 {
            model.register_process(ProcessId(id)).unwrap();
        }
        model.register_resource(ResourceId(1), 2).unwrap();
        model.register_resource(ResourceId(2), 2).unwrap();
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(4), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(2), 1).unwrap();
        model.request_resource(ProcessId(5), ResourceId(2), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(2), 2).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 2).unwrap();

        let cycles = detect(&model);
        assert_eq!(cycles.len(), 1);

        let outcome = ResolutionEngine::default().resolve(&cycles, &mut model).unwrap();
        assert_eq!(outcome.plan.actions, vec![ResolutionAction::Terminate { process: ProcessId(1) }]);
        assert!(detect(&model).is_empty());
    }

    #[test]
    fn test_already_broken_cycle_is_skipped() {
        let mut model = two_process_deadlock();
        let cycles = detect(&model);
        let duplicated: Vec<Cycle> = vec![cycles[0].clone(), cycles[0].clone()];

        let outcome = ResolutionEngine::default().resolve(&duplicated, &mut model).unwrap();
        assert_eq!(outcome.plan.actions.len(), 1);
    }

    #[test]
    fn test_partial_cycle_list_reports_resolution_failed() {
        // Two disjoint deadlocks but only one handed to the resolver:
        // the pass fixes what it was given and reports the remainder.
        let mut model = ResourceModel::new();
        for id in 1..=4 {
            model.register_process(ProcessId(id)).unwrap();
            model.register_resource(ResourceId(id), 1).unwrap();
        }
        model.request_resource(ProcessId(1), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(2), 1).unwrap();
        model.request_resource(ProcessId(1), ResourceId(2), 1).unwrap();
        model.request_resource(ProcessId(2), ResourceId(1), 1).unwrap();
        model.request_resource(ProcessId(3), ResourceId(3), 1).unwrap();
        model.request_resource(ProcessId(4), ResourceId(4), 1).unwrap();
        model.request_resource(ProcessId(3), ResourceId(4), 1).unwrap();
        model.request_resource(ProcessId(4), ResourceId(3), 1).unwrap();

        let cycles = detect(&model);
        assert_eq!(cycles.len(), 2);

        let result = ResolutionEngine::default().resolve(&cycles[..1], &mut model);
        assert!(matches!(result, Err(DeadlockError::ResolutionFailed(_))));

        // The remaining deadlock is still detectable and resolvable.
        let remaining = detect(&model);
        assert_eq!(remaining.len(), 1);
        ResolutionEngine::default().resolve(&remaining, &mut model).unwrap();
        assert!(detect(&model).is_empty());
    }

    #[test]
    fn test_action_display() {
        let preempt = ResolutionAction::Preempt {
            resource: ResourceId(1),
            from: ProcessId(2),
            count: 1,
        };
        assert_eq!(preempt.to_string(), "preempt 1 instance(s) of R1 from P2");
        assert_eq!(ResolutionAction::Terminate { process: ProcessId(3) }.to_string(), "terminate P3");
    }
}
