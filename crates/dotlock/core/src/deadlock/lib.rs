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

// Common types and utilities for the deadlock engine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deadlock::resolution::ResolutionStrategy;

/// Represents a unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Represents a unique identifier for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(pub u32);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// Lifecycle state of a registered process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessStatus {
    /// Process has no unsatisfied requests
    Running,
    /// Process has at least one outstanding request edge
    Waiting,
    /// Process was aborted by the resolution engine
    Terminated,
}

/// Engine configuration options
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Resolution strategy applied when a deadlock must be broken
    pub strategy: ResolutionStrategy,
    /// Interval between background detection passes in milliseconds
    pub detection_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::default(),
            detection_interval_ms: 100,
        }
    }
}

/// Error types specific to the deadlock engine
#[derive(Debug, thiserror::Error)]
pub enum DeadlockError {
    #[error("Duplicate identifier: {0}")]
    DuplicateId(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No deadlock to resolve")]
    NoDeadlock,

    #[error("Resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for deadlock engine operations
pub type DeadlockResult<T> = std::result::Result<T, DeadlockError>;
