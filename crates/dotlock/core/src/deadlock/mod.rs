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

// Deadlock Engine Module
// Resource allocation model, graph derivation, cycle detection and resolution

pub mod cycle;
pub mod engine;
pub mod graph;
pub mod lib;
pub mod model;
pub mod monitor;
pub mod resolution;
pub mod scenario;

// Public exports
pub use cycle::{Cycle, detect_cycles};
pub use engine::{DeadlockEngine, EngineStatistics};
pub use graph::{AllocationGraph, EdgeKind, GraphEdge, NodeId, WaitForEdge, WaitForGraph};
pub use lib::{DeadlockError, DeadlockResult, EngineConfig, ProcessId, ProcessStatus, ResourceId};
pub use model::{AllocationEdge, ModelSnapshot, RequestEdge, RequestOutcome, ResourceModel, ResourceState};
pub use monitor::DeadlockMonitor;
pub use resolution::{ResolutionAction, ResolutionEngine, ResolutionOutcome, ResolutionPlan, ResolutionStrategy};
pub use scenario::{Scenario, ScenarioOp, find_scenario, scenarios};
