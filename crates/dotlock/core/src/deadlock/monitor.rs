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

//! Deadlock monitor service
//!
//! Periodic background detection over a shared engine. External event
//! sources keep ingesting allocation events; the monitor samples the
//! engine on a fixed interval and hands detected cycles to a
//! caller-supplied callback. It never resolves on its own: deciding
//! what to do with a deadlock stays with the collaborator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::deadlock::cycle::Cycle;
use crate::deadlock::engine::DeadlockEngine;
use crate::deadlock::lib::{DeadlockError, DeadlockResult};

/// Periodic deadlock detection service
pub struct DeadlockMonitor {
    engine: Arc<DeadlockEngine>,
    interval: Duration,
    on_deadlock: Arc<dyn Fn(&[Cycle]) + Send + Sync>,
    is_running: Arc<AtomicBool>,
}

impl DeadlockMonitor {
    /// Create a monitor over `engine` firing `on_deadlock` whenever a
    /// detection pass reports cycles
    pub fn new<F>(engine: Arc<DeadlockEngine>, interval: Duration, on_deadlock: F) -> Self
    where
        F: Fn(&[Cycle]) + Send + Sync + 'static,
    {
        Self {
            engine,
            interval,
            on_deadlock: Arc::new(on_deadlock),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a monitor using the engine's configured detection interval
    pub fn for_engine<F>(engine: Arc<DeadlockEngine>, on_deadlock: F) -> Self
    where
        F: Fn(&[Cycle]) + Send + Sync + 'static,
    {
        let interval = engine.detection_interval();
        Self::new(engine, interval, on_deadlock)
    }

    /// Start the background detection thread
    pub fn start(&self) -> DeadlockResult<()> {
        if self.is_running.load(Ordering::Acquire) {
            return Err(DeadlockError::InvalidState("monitor already running".to_string()));
        }
        self.is_running.store(true, Ordering::Release);

        let engine = self.engine.clone();
        let on_deadlock = self.on_deadlock.clone();
        let is_running = self.is_running.clone();
        let interval = self.interval;

        std::thread::spawn(move || {
            while is_running.load(Ordering::Acquire) {
                let cycles = engine.detect();
                if !cycles.is_empty() {
                    warn!(cycles = cycles.len(), "deadlock detected");
                    (on_deadlock)(&cycles);
                }
                std::thread::sleep(interval);
            }
        });

        Ok(())
    }

    /// Stop the background thread after its current pass
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_monitor_lifecycle() {
        let engine = Arc::new(DeadlockEngine::new());
        let monitor = DeadlockMonitor::new(engine, Duration::from_millis(10), |_| {});

        assert!(!monitor.is_running());
        monitor.start().unwrap();
        assert!(monitor.is_running());
        assert!(monitor.start().is_err());

        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_monitor_reports_deadlock() {
        let engine = Arc::new(DeadlockEngine::new());
        engine.load_scenario("mutual-wait").unwrap();

        let (sender, receiver) = mpsc::channel();
        let monitor = DeadlockMonitor::new(engine, Duration::from_millis(5), move |cycles| {
            let _ = sender.send(cycles.len());
        });

        monitor.start().unwrap();
        let reported = receiver.recv_timeout(Duration::from_secs(5)).expect("monitor should report the deadlock");
        assert_eq!(reported, 1);
        monitor.stop();
    }

    #[test]
    fn test_for_engine_uses_configured_interval() {
        let engine = Arc::new(DeadlockEngine::new());
        let monitor = DeadlockMonitor::for_engine(engine.clone(), |_| {});
        assert_eq!(monitor.interval(), engine.detection_interval());
    }

    #[test]
    fn test_monitor_stays_quiet_on_safe_state() {
        let engine = Arc::new(DeadlockEngine::new());
        engine.load_scenario("safe-handoff").unwrap();

        let (sender, receiver) = mpsc::channel();
        let monitor = DeadlockMonitor::new(engine, Duration::from_millis(5), move |cycles| {
            let _ = sender.send(cycles.len());
        });

        monitor.start().unwrap();
        std::thread::sleep(Duration::from_millis(50));
        monitor.stop();
        assert!(receiver.try_recv().is_err());
    }
}
