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

//! Scenario Generator
//!
//! Predefined allocation/request configurations replayed against a
//! fresh resource model, used for simulation when no live deadlock
//! exists. Purely declarative: each scenario is a finite op list; the
//! catalog is rebuilt on every call and therefore restartable.

use serde::{Deserialize, Serialize};

use crate::deadlock::lib::{DeadlockResult, ProcessId, ResourceId};
use crate::deadlock::model::ResourceModel;

/// One replayable step of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScenarioOp {
    RegisterProcess(ProcessId),
    RegisterResource(ResourceId, u32),
    Request { process: ProcessId, resource: ResourceId, count: u32 },
    Release { process: ProcessId, resource: ResourceId, count: u32 },
}

/// A named, declarative allocation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: &'static str,
    pub summary: &'static str,
    /// Whether replaying this configuration produces a detectable
    /// deadlock
    pub deadlocked: bool,
    ops: Vec<ScenarioOp>,
}

impl Scenario {
    pub fn ops(&self) -> &[ScenarioOp] {
        &self.ops
    }

    /// Reset the model and replay this configuration into it
    pub fn replay(&self, model: &mut ResourceModel) -> DeadlockResult<()> {
        model.clear();
        for op in &self.ops {
            match *op {
                ScenarioOp::RegisterProcess(id) => model.register_process(id)?,
                ScenarioOp::RegisterResource(id, total) => model.register_resource(id, total)?,
                ScenarioOp::Request { process, resource, count } => {
                    model.request_resource(process, resource, count)?;
                }
                ScenarioOp::Release { process, resource, count } => {
                    model.release_resource(process, resource, count)?;
                }
            }
        }
        Ok(())
    }
}

fn registrations(processes: u32, resources: u32, instances: u32) -> Vec<ScenarioOp> {
    let mut ops = Vec::new();
    for p in 1..=processes {
        ops.push(ScenarioOp::RegisterProcess(ProcessId(p)));
    }
    for r in 1..=resources {
        ops.push(ScenarioOp::RegisterResource(ResourceId(r), instances));
    }
    ops
}

fn request(process: u32, resource: u32, count: u32) -> ScenarioOp {
    ScenarioOp::Request {
        process: ProcessId(process),
        resource: ResourceId(resource),
        count,
    }
}

fn release(process: u32, resource: u32, count: u32) -> ScenarioOp {
    ScenarioOp::Release {
        process: ProcessId(process),
        resource: ResourceId(resource),
        count,
    }
}

/// A ring of `n` processes where each one holds its own resource and
/// requests its neighbour's
fn circular_wait(n: u32) -> Vec<ScenarioOp> {
    let mut ops = registrations(n, n, 1);
    for i in 1..=n {
        ops.push(request(i, i, 1));
    }
    for i in 1..=n {
        ops.push(request(i, i % n + 1, 1));
    }
    ops
}

/// The ordered scenario catalog. Rebuilt on every call, so iteration is
/// restartable from the start.
pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "mutual-wait",
            summary: "two processes each holding what the other requests",
            deadlocked: true,
            ops: circular_wait(2),
        },
        Scenario {
            name: "circular-wait-three",
            summary: "three-process ring over three single-instance resources",
            deadlocked: true,
            ops: circular_wait(3),
        },
        Scenario {
            name: "circular-wait-four",
            summary: "four-process ring over four single-instance resources",
            deadlocked: true,
            ops: circular_wait(4),
        },
        Scenario {
            name: "partial-deadlock",
            summary: "three deadlocked processes plus one waiter outside the cycle",
            deadlocked: true,
            ops: {
                let mut ops = circular_wait(3);
                ops.insert(3, ScenarioOp::RegisterProcess(ProcessId(4)));
                ops.push(request(4, 1, 1));
                ops
            },
        },
        Scenario {
            name: "shared-pool",
            summary: "multi-instance cycle broken by a holder outside it; no deadlock",
            deadlocked: false,
            ops: {
                let mut ops = registrations(3, 2, 1);
                // R1 gets a second instance held by P3 outside the cycle.
                ops[3] = ScenarioOp::RegisterResource(ResourceId(1), 2);
                ops.extend([request(1, 1, 1), request(3, 1, 1), request(2, 2, 1), request(1, 2, 1), request(2, 1, 1)]);
                ops
            },
        },
        Scenario {
            name: "multi-instance-deadlock",
            summary: "all instances of a two-instance resource trapped inside the cycle",
            deadlocked: true,
            ops: {
                let mut ops = registrations(2, 2, 1);
                ops[2] = ScenarioOp::RegisterResource(ResourceId(1), 2);
                ops.extend([request(1, 1, 2), request(2, 2, 1), request(1, 2, 1), request(2, 1, 2)]);
                ops
            },
        },
        Scenario {
            name: "safe-handoff",
            summary: "acquire, release and reacquire with no contention cycle",
            deadlocked: false,
            ops: {
                let mut ops = registrations(2, 2, 1);
                ops.extend([request(1, 1, 1), request(1, 2, 1), release(1, 1, 1), request(2, 1, 1), request(2, 2, 1)]);
                ops
            },
        },
    ]
}

/// Look up a scenario by name
pub fn find_scenario(name: &str) -> Option<Scenario> {
    scenarios().into_iter().find(|scenario| scenario.name == name)
}
