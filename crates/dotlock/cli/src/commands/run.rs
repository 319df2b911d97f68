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

use anyhow::Result;
use dotlock_core::deadlock::{DeadlockEngine, ModelSnapshot};
use serde_json::json;

/// Replay a scenario, detect, optionally resolve, and print a report
pub fn run(name: &str, resolve: bool, json_output: bool) -> Result<()> {
    let engine = DeadlockEngine::new();
    engine.load_scenario(name)?;

    let cycles = engine.detect();
    let outcome = if resolve && !cycles.is_empty() { Some(engine.resolve(&cycles)?) } else { None };
    let snapshot = engine.snapshot();

    if json_output {
        let report = json!({
            "scenario": name,
            "cycles": cycles,
            "resolution": outcome,
            "snapshot": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Scenario: {name}");
    if cycles.is_empty() {
        println!("No deadlock detected");
    } else {
        println!("Detected {} cycle(s):", cycles.len());
        for cycle in &cycles {
            println!("  {cycle}");
        }
    }

    if let Some(outcome) = outcome {
        println!("Resolution plan ({} action(s)):", outcome.plan.actions.len());
        for action in &outcome.plan.actions {
            println!("  {action}");
        }
        println!("Post-resolution state is deadlock-free");
    } else if resolve {
        println!("Nothing to resolve");
    }

    print_snapshot(&snapshot);
    Ok(())
}

fn print_snapshot(snapshot: &ModelSnapshot) {
    println!("Processes:");
    for (id, status) in &snapshot.processes {
        println!("  {id}: {status:?}");
    }
    println!("Resources:");
    for (id, state) in &snapshot.resources {
        println!("  {id}: {}/{} available", state.available, state.total);
    }
    if !snapshot.allocations.is_empty() {
        println!("Allocations:");
        for edge in &snapshot.allocations {
            println!("  {} -> {} ({})", edge.resource, edge.process, edge.count);
        }
    }
    if !snapshot.requests.is_empty() {
        println!("Pending requests:");
        for edge in &snapshot.requests {
            println!("  {} -> {} ({})", edge.process, edge.resource, edge.count);
        }
    }
}
