// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.


//! Tracks at most one worker per kind and stops workers cooperatively

use std::collections::HashMap;
use std::io;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{error, info, warn};
use crate::worker::{
    CancelToken, Outcome, Worker, WorkerContext, WorkerEvent, WorkerKind, WorkerState,
};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{0} is already running")]
    AlreadyRunning(WorkerKind),
    /// Callers usually report this as a warning
    #[error("{0} is not running")]
    NotRunning(WorkerKind),
    #[error("cannot spawn {kind} thread: {source}")]
    Spawn {
        kind: WorkerKind,
        #[source]
        source: io::Error,
    },
}

// ============================================================================
// Registry
// ============================================================================

struct WorkerHandle {
    cancel: CancelToken,
    state: Arc<Mutex<WorkerState>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                // A panicking worker never reported its own terminal state
                *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WorkerState::Failed;
            }
        }
    }
}

#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerKind, WorkerHandle>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `worker` on its own thread and returns its event stream.
    ///
    /// The stream ends with exactly one `Done`, `Stopped` or `Failed`.
    pub fn start(&mut self, worker: Box<dyn Worker>) -> Result<Receiver<WorkerEvent>, RegistryError> {
        let kind = worker.kind();
        if self.state(kind) == WorkerState::Running {
            warn!(%kind, "start refused, worker already running");
            return Err(RegistryError::AlreadyRunning(kind));
        }

        // Reap the previous, finished worker of this kind
        if let Some(mut finished) = self.workers.remove(&kind) {
            finished.join();
        }

        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let state = Arc::new(Mutex::new(WorkerState::Running));
        let ctx = WorkerContext::new(kind, cancel.clone(), tx);
        let shared_state = Arc::clone(&state);

        let thread = thread::Builder::new()
            .name(kind.name().to_string())
            .spawn(move || {
                let (final_state, event) = match worker.run(&ctx) {
                    Ok(Outcome::Completed) => (WorkerState::Completed, WorkerEvent::Done),
                    Ok(Outcome::Stopped) => (WorkerState::Stopped, WorkerEvent::Stopped),
                    Err(e) => {
                        error!(%kind, error = %e, "worker failed");
                        (WorkerState::Failed, WorkerEvent::Failed(e))
                    }
                };
                info!(%kind, state = ?final_state, "worker finished");
                *shared_state.lock().unwrap_or_else(PoisonError::into_inner) = final_state;
                ctx.emit(event);
            })
            .map_err(|source| RegistryError::Spawn { kind, source })?;

        info!(%kind, "worker started");
        self.workers.insert(kind, WorkerHandle {
            cancel,
            state,
            thread: Some(thread),
        });
        Ok(rx)
    }

    /// Asks the running worker of `kind` to stop. Does not wait for it.
    pub fn stop(&mut self, kind: WorkerKind) -> Result<(), RegistryError> {
        match self.workers.get(&kind) {
            Some(handle) if handle.state() == WorkerState::Running => {
                handle.cancel.cancel();
                info!(%kind, "stop requested");
                Ok(())
            }
            _ => {
                warn!(%kind, "stop requested but worker is not running");
                Err(RegistryError::NotRunning(kind))
            }
        }
    }

    /// Asks every running worker to stop, e.g. before the link is closed
    pub fn stop_all(&mut self) {
        for (kind, handle) in &self.workers {
            if handle.state() == WorkerState::Running {
                handle.cancel.cancel();
                info!(%kind, "stop requested");
            }
        }
    }

    /// Current state of the worker of `kind`, `Idle` if none was started
    pub fn state(&self, kind: WorkerKind) -> WorkerState {
        self.workers
            .get(&kind)
            .map(WorkerHandle::state)
            .unwrap_or(WorkerState::Idle)
    }

    /// Blocks until the worker of `kind` exits and returns its final state.
    /// Receivers only exit once stopped or failed.
    pub fn wait(&mut self, kind: WorkerKind) -> WorkerState {
        match self.workers.get_mut(&kind) {
            Some(handle) => {
                handle.join();
                handle.state()
            }
            None => WorkerState::Idle,
        }
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        self.stop_all();
        for handle in self.workers.values_mut() {
            handle.join();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
