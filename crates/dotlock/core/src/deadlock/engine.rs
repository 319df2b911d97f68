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

//! Deadlock Engine
//!
//! Facade over the resource model, graph builder, cycle detector and
//! resolution engine. The model is the sole mutable shared state, held
//! behind a mutex so that event ingestion from collaborators is
//! serialized in arrival order; detection and resolution always operate
//! on a snapshot taken after all queued mutations have been applied.

use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::deadlock::cycle::{Cycle, detect_cycles};
use crate::deadlock::graph::AllocationGraph;
use crate::deadlock::lib::{DeadlockError, DeadlockResult, EngineConfig, ProcessId, ResourceId};
use crate::deadlock::model::{ModelSnapshot, RequestOutcome, ResourceModel};
use crate::deadlock::resolution::{ResolutionEngine, ResolutionOutcome};
use crate::deadlock::scenario::find_scenario;

/// Counters describing engine activity since construction
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EngineStatistics {
    /// Number of detection passes run
    pub detections_run: u64,
    /// Total cycles reported across all passes
    pub cycles_found: u64,
    /// Resolution actions applied to the model
    pub actions_applied: u64,
    /// Duration of the most recent detection pass in microseconds
    pub last_detection_us: u64,
}

/// In-process deadlock detection and resolution engine
pub struct DeadlockEngine {
    model: Mutex<ResourceModel>,
    resolver: ResolutionEngine,
    statistics: Mutex<EngineStatistics>,
    detection_interval: std::time::Duration,
}

impl DeadlockEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            model: Mutex::new(ResourceModel::new()),
            resolver: ResolutionEngine::new(config.strategy),
            statistics: Mutex::new(EngineStatistics::default()),
            detection_interval: std::time::Duration::from_millis(config.detection_interval_ms),
        }
    }

    /// Interval the background monitor should use between passes
    pub fn detection_interval(&self) -> std::time::Duration {
        self.detection_interval
    }

    // Event ingestion, consumed by the live-monitoring collaborator.
    // Mutations are serialized by the model lock and never interleave.

    pub fn register_process(&self, id: ProcessId) -> DeadlockResult<()> {
        self.model.lock().register_process(id)
    }

    pub fn register_resource(&self, id: ResourceId, total: u32) -> DeadlockResult<()> {
        self.model.lock().register_resource(id, total)
    }

    pub fn request_resource(&self, process: ProcessId, resource: ResourceId, count: u32) -> DeadlockResult<RequestOutcome> {
        self.model.lock().request_resource(process, resource, count)
    }

    pub fn release_resource(&self, process: ProcessId, resource: ResourceId, count: u32) -> DeadlockResult<Vec<ProcessId>> {
        self.model.lock().release_resource(process, resource, count)
    }

    pub fn cancel_request(&self, process: ProcessId, resource: ResourceId) -> DeadlockResult<()> {
        self.model.lock().cancel_request(process, resource)
    }

    pub fn deregister_process(&self, id: ProcessId) -> DeadlockResult<()> {
        self.model.lock().deregister_process(id)
    }

    /// Read-only state for rendering collaborators
    pub fn snapshot(&self) -> ModelSnapshot {
        self.model.lock().snapshot()
    }

    /// Run the graph builder and cycle detector on the current state.
    /// An empty list means a safe state.
    pub fn detect(&self) -> Vec<Cycle> {
        let snapshot = self.snapshot();
        self.detect_on(&snapshot)
    }

    /// Resolve previously detected cycles, applying the plan to the
    /// model and returning the actions taken plus the post-resolution
    /// snapshot
    pub fn resolve(&self, cycles: &[Cycle]) -> DeadlockResult<ResolutionOutcome> {
        let mut model = self.model.lock();
        let outcome = self.resolver.resolve(cycles, &mut model)?;
        drop(model);

        let mut statistics = self.statistics.lock();
        statistics.actions_applied += outcome.plan.actions.len() as u64;
        info!(actions = outcome.plan.actions.len(), "resolution applied");
        Ok(outcome)
    }

    /// Detect and, when a deadlock is present, resolve it in one step
    /// without releasing the model to other writers in between
    pub fn detect_and_resolve(&self) -> DeadlockResult<Option<ResolutionOutcome>> {
        let mut model = self.model.lock();
        let cycles = self.detect_on(&model.snapshot());
        if cycles.is_empty() {
            return Ok(None);
        }
        let outcome = self.resolver.resolve(&cycles, &mut model)?;
        drop(model);

        self.statistics.lock().actions_applied += outcome.plan.actions.len() as u64;
        Ok(Some(outcome))
    }

    /// Reset the model and replay a named scenario configuration
    pub fn load_scenario(&self, name: &str) -> DeadlockResult<()> {
        let scenario = find_scenario(name).ok_or_else(|| DeadlockError::UnknownScenario(name.to_string()))?;
        scenario.replay(&mut self.model.lock())?;
        info!(scenario = name, "scenario loaded");
        Ok(())
    }

    pub fn statistics(&self) -> EngineStatistics {
        *self.statistics.lock()
    }

    fn detect_on(&self, snapshot: &ModelSnapshot) -> Vec<Cycle> {
        let started = Instant::now();
        let graph = AllocationGraph::build(snapshot);
        let cycles = detect_cycles(&graph, snapshot);

        let mut statistics = self.statistics.lock();
        statistics.detections_run += 1;
        statistics.cycles_found += cycles.len() as u64;
        statistics.last_detection_us = started.elapsed().as_micros() as u64;
        debug!(cycles = cycles.len(), elapsed_us = statistics.last_detection_us, "detection pass finished");
        cycles
    }
}

impl Default for DeadlockEngine {
    fn default() -> Self {
        Self::new()
    }
}
